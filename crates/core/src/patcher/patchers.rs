//! Named groups of patches

use std::collections::BTreeMap;
use std::path::Path;

use memtools_binary::{parse_hex_bytes, AddressResolver, BytePattern};

use super::{Patch, PatchError};
use crate::config::{load_file, ConfigError, PatchConfig, PatchRecord};

/// A set of named patches switched together
///
/// The group keeps its own applied flag, flipped by [`Patchers::toggle_all`];
/// [`Patchers::toggle`] flips each member on its own.
#[derive(Debug, Default)]
pub struct Patchers {
    patches: BTreeMap<String, Patch>,
    applied: bool,
}

impl Patchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every patch in `config`
    ///
    /// Nothing is applied. Any failure drops the patches built so far and
    /// names the failing entry.
    ///
    /// # Safety
    /// Every resolved range must satisfy the contract of [`Patch::new`].
    pub unsafe fn from_config<R: AddressResolver + ?Sized>(
        config: &PatchConfig,
        resolver: &R,
    ) -> Result<Self, PatchError> {
        let mut patchers = Self::new();
        for (name, record) in &config.patches {
            let patch = build_patch(config, name, record, resolver).map_err(|source| PatchError::Named {
                name: name.clone(),
                source: Box::new(source),
            })?;
            patchers.insert(name.clone(), patch);
        }

        tracing::info!("Created {} patch(es)", patchers.len());
        Ok(patchers)
    }

    /// Load a patch file and build every patch in it
    ///
    /// # Safety
    /// See [`Patchers::from_config`].
    pub unsafe fn from_file<R: AddressResolver + ?Sized>(
        path: impl AsRef<Path>,
        resolver: &R,
    ) -> Result<Self, PatchError> {
        let config: PatchConfig = load_file(path)?;
        Self::from_config(&config, resolver)
    }

    /// Add a patch, returning the one it replaces
    pub fn insert(&mut self, name: impl Into<String>, patch: Patch) -> Option<Patch> {
        self.patches.insert(name.into(), patch)
    }

    pub fn remove(&mut self, name: &str) -> Option<Patch> {
        self.patches.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Patch> {
        self.patches.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Patch> {
        self.patches.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patches.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Patch)> {
        self.patches.iter().map(|(name, patch)| (name.as_str(), patch))
    }

    pub fn apply(&mut self) {
        self.patches.values_mut().for_each(Patch::apply);
        self.applied = true;
    }

    pub fn revert(&mut self) {
        self.patches.values_mut().for_each(Patch::revert);
        self.applied = false;
    }

    pub fn set(&mut self, applied: bool) {
        if applied {
            self.apply();
        } else {
            self.revert();
        }
    }

    /// Flip every patch individually
    pub fn toggle(&mut self) {
        self.patches.values_mut().for_each(Patch::toggle);
    }

    /// Flip the group: apply all if the group is reverted, else revert all
    pub fn toggle_all(&mut self) {
        self.set(!self.applied);
    }

    /// The group's flag, as last set by `apply`, `revert`, `set` or `toggle_all`
    pub fn is_applied(&self) -> bool {
        self.applied
    }
}

unsafe fn build_patch<R: AddressResolver + ?Sized>(
    config: &PatchConfig,
    name: &str,
    record: &PatchRecord,
    resolver: &R,
) -> Result<Patch, PatchError> {
    let binary = record
        .binary
        .as_deref()
        .or(config.binary.as_deref())
        .ok_or_else(|| missing(name, "binary"))?;
    let identifier = record
        .identifier
        .as_deref()
        .ok_or_else(|| missing(name, "identifier"))?;
    let srv_check = record.srv_check.or(config.srv_check).unwrap_or(true);

    let size = record.size(name)?;
    let op_codes = record.op_codes.as_deref().map(parse_hex_bytes).transpose()?;
    let base_op_codes = record
        .base_op_codes
        .as_deref()
        .map(BytePattern::parse)
        .transpose()?;

    let address = resolver.resolve(
        binary,
        identifier,
        record.offset(name)?,
        record.level.unwrap_or(0),
        srv_check,
    )?;
    tracing::debug!("Patch '{}' resolved to {}", name, address);

    Patch::new(address, size, op_codes.as_deref(), base_op_codes.as_ref())
}

fn missing(name: &str, key: &'static str) -> ConfigError {
    ConfigError::MissingKey {
        name: name.to_string(),
        key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_str, ConfigFormat};
    use crate::memory::read_bytes;
    use memtools_binary::{Binary, BinaryRegistry, ResolveError};
    use memtools_sdk::Address;

    const PATCHES_TOML: &str = r#"
binary = "server"

[skip_check]
identifier = "85 C0 74"
offset = 2
size = 2
op_codes = "EB"
base_op_codes = "74 2A"

[nop_call]
identifier = "E8 ?? ?? ?? ?? 5D"
size = 5
"#;

    fn image() -> Vec<u8> {
        vec![
            0x55, 0x85, 0xC0, 0x74, 0x06, // test eax, eax; jz +6
            0xE8, 0x10, 0x20, 0x30, 0x40, 0x5D, // call; pop ebp
            0xC3,
        ]
    }

    fn registry(image: &[u8]) -> BinaryRegistry {
        let registry = BinaryRegistry::new();
        registry.register(
            unsafe { Binary::new("server", Address::from_ptr(image.as_ptr()), image.len()) }.server(true),
        );
        registry
    }

    #[test]
    fn test_from_config_and_group_state() {
        let mut code = image();
        let registry = registry(&code);
        let base = Address::from_mut_ptr(code.as_mut_ptr());
        let config: PatchConfig = parse_str(PATCHES_TOML, ConfigFormat::Toml).unwrap();

        let mut patchers = unsafe { Patchers::from_config(&config, &registry) }.unwrap();
        assert_eq!(patchers.len(), 2);
        assert_eq!(patchers.names().collect::<Vec<_>>(), vec!["nop_call", "skip_check"]);
        assert_eq!(patchers.get("skip_check").unwrap().address(), base + 3usize);
        assert!(!patchers.is_applied());

        patchers.apply();
        assert!(patchers.is_applied());
        assert_eq!(
            unsafe { read_bytes(base, 12) },
            vec![0x55, 0x85, 0xC0, 0xEB, 0x90, 0x0F, 0x1F, 0x44, 0x00, 0x00, 0x5D, 0xC3]
        );

        patchers.toggle_all();
        assert!(!patchers.is_applied());
        assert_eq!(unsafe { read_bytes(base, 12) }, image());

        patchers.get_mut("nop_call").unwrap().apply();
        patchers.toggle();
        assert!(patchers.get("skip_check").unwrap().is_applied());
        assert!(!patchers.get("nop_call").unwrap().is_applied());

        patchers.set(false);
        drop(patchers);
        assert_eq!(code, image());
    }

    #[test]
    fn test_from_config_names_failure() {
        let mut code = image();
        code[4] = 0x07;
        let registry = registry(&code);

        // base_op_codes still match through the wildcard
        let config: PatchConfig = parse_str(PATCHES_TOML, ConfigFormat::Toml).unwrap();
        assert!(unsafe { Patchers::from_config(&config, &registry) }.is_ok());

        let broken: PatchConfig = parse_str(
            "binary = \"server\"\n[skip_check]\nidentifier = \"85 C0 74\"\noffset = 2\nsize = 2\nbase_op_codes = \"75\"",
            ConfigFormat::Toml,
        )
        .unwrap();
        match unsafe { Patchers::from_config(&broken, &registry) }.unwrap_err() {
            PatchError::Named { name, source } => {
                assert_eq!(name, "skip_check");
                assert!(matches!(*source, PatchError::Verification { .. }));
            }
            other => panic!("unexpected error {other}"),
        }

        let unresolved: PatchConfig =
            parse_str("[skip_check]\nbinary = \"client\"\nidentifier = \"85 C0\"\nsize = 2", ConfigFormat::Toml)
                .unwrap();
        match unsafe { Patchers::from_config(&unresolved, &registry) }.unwrap_err() {
            PatchError::Named { source, .. } => {
                assert!(matches!(*source, PatchError::Resolve(ResolveError::BinaryNotFound(_))));
            }
            other => panic!("unexpected error {other}"),
        }

        let no_size: PatchConfig =
            parse_str("binary = \"server\"\n[skip_check]\nidentifier = \"85 C0\"", ConfigFormat::Toml).unwrap();
        match unsafe { Patchers::from_config(&no_size, &registry) }.unwrap_err() {
            PatchError::Named { source, .. } => assert!(matches!(
                *source,
                PatchError::Config(ConfigError::MissingKey { key: "size", .. })
            )),
            other => panic!("unexpected error {other}"),
        }
    }
}
