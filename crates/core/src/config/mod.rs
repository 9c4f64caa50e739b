//! Configuration for memtools
//!
//! Two kinds of configuration live here:
//! - Type and patch descriptions ([`TypeConfig`], [`PatchConfig`]), loaded
//!   from TOML or JSON files
//! - Framework settings ([`CoreConfig`]), loaded from TOML
//!
//! # Example
//!
//! ```ignore
//! use memtools_core::config::{load_file, TypeConfig};
//!
//! let config: TypeConfig = load_file("data/CBasePlayer.toml")?;
//! println!("binary: {:?}", config.binary);
//! ```

mod loader;
mod records;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use loader::{load_file, parse_str, ConfigFormat};
pub use records::{MemberRecord, PatchConfig, PatchRecord, Section, TypeConfig};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write a config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse JSON content
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// File extension is neither `.toml` nor `.json`
    #[error("Unsupported config file extension: {0:?}")]
    UnsupportedExtension(PathBuf),

    /// A required key is absent from a record
    #[error("Missing key '{key}' in '{name}'")]
    MissingKey { name: String, key: &'static str },

    /// A key holds a value that cannot be interpreted
    #[error("Invalid value for '{key}' in '{name}': {value}")]
    InvalidValue {
        name: String,
        key: &'static str,
        value: String,
    },

    /// Relative displacements are only 1 or 4 bytes wide
    #[error("Unsupported operand size: {0} (expected 1 or 4)")]
    UnsupportedOperandSize(usize),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Core framework configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Explicit `tracing` filter directive, e.g. `"memtools_core=trace"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            log_filter: None,
        }
    }
}

impl CoreConfig {
    /// Load core config from `path`, creating a default file if missing
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded core config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Created default core config at {:?}", path);
            Ok(default)
        }
    }

    /// Save core config to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved core config to {:?}", path);
        Ok(())
    }

    /// Reload core config from `path`
    pub fn reload(&mut self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded core config from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("memtools-config-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_core_config_default() {
        let config = CoreConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_core_config_serialize() {
        let config = CoreConfig {
            version: 2,
            debug: true,
            log_filter: Some("memtools_core=trace".to_string()),
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("version = 2"));
        assert!(toml_str.contains("debug = true"));
        assert!(toml_str.contains("log_filter = \"memtools_core=trace\""));
    }

    #[test]
    fn test_core_config_load_creates_default() {
        let path = scratch_path("core.toml");
        let _ = std::fs::remove_file(&path);

        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.version, 1);
        assert!(path.exists());

        let mut edited = config.clone();
        edited.debug = true;
        edited.save(&path).unwrap();

        let mut reloaded = CoreConfig::default();
        reloaded.reload(&path).unwrap();
        assert!(reloaded.debug);

        let _ = std::fs::remove_file(&path);
    }
}
