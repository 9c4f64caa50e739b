//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::CoreConfig;

/// Filter directive derived from the core config
///
/// An explicit `log_filter` wins; otherwise `debug` selects between the
/// `debug` and `info` levels.
pub fn filter_directive(config: &CoreConfig) -> String {
    match &config.log_filter {
        Some(filter) => filter.clone(),
        None if config.debug => "debug".to_string(),
        None => "info".to_string(),
    }
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` overrides the config. Calling this more than once is harmless;
/// only the first subscriber is kept.
pub fn init(config: &CoreConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    tracing::debug!("Logging initialized (config version {})", config.version);
}
