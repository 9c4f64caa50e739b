//! Named registry of compiled types

use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use memtools_binary::AddressResolver;
use memtools_sdk::Address;

use super::descriptor::{MemberKind, TypeDescriptor, TypeRef};
use super::instance::Instance;
use super::{AccessError, TypeError};
use crate::config::{load_file, TypeConfig};

/// Registry of compiled types, shared by cloning
///
/// Custom member types (`type = "OtherType"`) are looked up here when they
/// are accessed, so types may refer to each other or to themselves in any
/// order.
#[derive(Clone, Default)]
pub struct TypeManager {
    types: Arc<DashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled descriptor
    ///
    /// A name that is already registered keeps its descriptor; the new one
    /// is dropped with a warning and the existing one returned.
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        match self.types.entry(descriptor.name().to_string()) {
            Entry::Occupied(existing) => {
                warn!("Type '{}' is already registered, skipping", existing.key());
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                info!(
                    "Registered type '{}' ({} members)",
                    descriptor.name(),
                    descriptor.len()
                );
                let inserted = slot.insert(Arc::new(descriptor));
                Arc::clone(inserted.value())
            }
        }
    }

    /// Compile and register a type
    pub fn create_type<R: AddressResolver + ?Sized>(
        &self,
        name: &str,
        config: &TypeConfig,
        resolver: &R,
    ) -> Result<Arc<TypeDescriptor>, TypeError> {
        if let Some(existing) = self.get(name) {
            warn!("Type '{}' is already registered, skipping", name);
            return Ok(existing);
        }
        let descriptor = TypeDescriptor::compile(name, config, resolver)?;
        Ok(self.register(descriptor))
    }

    /// Load a type description from a TOML or JSON file and register it
    pub fn create_type_from_file<R: AddressResolver + ?Sized>(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        resolver: &R,
    ) -> Result<Arc<TypeDescriptor>, TypeError> {
        self.create_type_from_files(name, &[path], resolver)
    }

    /// Load and merge several description files, earlier files winning
    pub fn create_type_from_files<R: AddressResolver + ?Sized, P: AsRef<Path>>(
        &self,
        name: &str,
        paths: &[P],
        resolver: &R,
    ) -> Result<Arc<TypeDescriptor>, TypeError> {
        let mut merged = TypeConfig::default();
        for path in paths {
            let config: TypeConfig = load_file(path).map_err(|source| TypeError::Config {
                type_name: name.to_string(),
                source,
            })?;
            merged.merge(config);
        }
        self.create_type(name, &merged, resolver)
    }

    /// Add the members of `config` to a registered type
    ///
    /// Type-level defaults missing from `config` are taken from the existing
    /// type. Names that already exist are skipped with a warning. Instances
    /// created before the call keep the previous descriptor.
    pub fn extend_type<R: AddressResolver + ?Sized>(
        &self,
        name: &str,
        config: &TypeConfig,
        resolver: &R,
    ) -> Result<Arc<TypeDescriptor>, TypeError> {
        let existing = self
            .get(name)
            .ok_or_else(|| TypeError::NotFound(name.to_string()))?;

        let mut config = config.clone();
        if config.binary.is_none() {
            config.binary = existing.binary().map(str::to_string);
        }
        if config.srv_check.is_none() {
            config.srv_check = Some(existing.srv_check());
        }

        let extension = TypeDescriptor::compile(name, &config, resolver)?;
        let extended = Arc::new(existing.extended(extension));
        self.types.insert(name.to_string(), Arc::clone(&extended));

        info!("Extended type '{}' ({} members)", name, extended.len());
        Ok(extended)
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.remove(name).map(|(_, descriptor)| descriptor)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// View `address` as an object of the registered type `name`
    ///
    /// # Safety
    /// See [`Instance::new`].
    pub unsafe fn instance(&self, name: &str, address: Address) -> Result<Instance, AccessError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| AccessError::UnknownType(name.to_string()))?;
        Ok(Instance::new(address, descriptor, self.clone()))
    }

    /// View the object a global pointer member of `type_name` resolves to
    ///
    /// # Safety
    /// The resolved address must hold a live object of the member's type.
    pub unsafe fn global_instance(&self, type_name: &str, member: &str) -> Result<Instance, AccessError> {
        let descriptor = self
            .get(type_name)
            .ok_or_else(|| AccessError::UnknownType(type_name.to_string()))?;

        let Some(found) = descriptor.member(member) else {
            return Err(AccessError::UnknownMember {
                type_name: type_name.to_string(),
                member: member.to_string(),
            });
        };
        match &found.kind {
            MemberKind::Global {
                address,
                ty: TypeRef::Custom(target),
            } => self.instance(target, *address),
            other => Err(AccessError::WrongKind {
                member: member.to_string(),
                expected: "global object",
                found: other.name(),
            }),
        }
    }
}

impl std::fmt::Debug for TypeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeManager")
            .field("types", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_str, ConfigFormat, MemberRecord, Section};
    use crate::memory::Value;
    use memtools_binary::{Binary, BinaryRegistry};
    use memtools_sdk::POINTER_SIZE;

    const ENTITY_TOML: &str = r#"
size = 16

[instance_attribute.health]
type = "INT"
offset = 0

[virtual_function.get_team]
index = 2
return_type = "INT"
"#;

    fn entity_config() -> TypeConfig {
        let mut config: TypeConfig = parse_str(ENTITY_TOML, ConfigFormat::Toml).unwrap();
        // the vtable pointer comes first
        config.sections.get_mut(&Section::InstanceAttribute).unwrap().insert(
            "health".to_string(),
            MemberRecord {
                type_name: Some("INT".to_string()),
                offset: Some(POINTER_SIZE as i64),
                ..Default::default()
            },
        );
        config
    }

    extern "C" fn team_red(_this: Address) -> i32 {
        2
    }

    extern "C" fn team_blue(_this: Address) -> i32 {
        3
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn test_end_to_end_field_and_virtual_call() {
        let resolver = BinaryRegistry::new();
        let manager = TypeManager::new();
        manager.create_type("Entity", &entity_config(), &resolver).unwrap();

        let red: extern "C" fn(Address) -> i32 = team_red;
        let blue: extern "C" fn(Address) -> i32 = team_blue;
        let red_vtable = [0usize, 0, red as usize];
        let blue_vtable = [0usize, 0, blue as usize];

        let mut object = [red_vtable.as_ptr() as usize, 0];
        let entity = unsafe { manager.instance("Entity", Address::from_mut_ptr(object.as_mut_ptr())) }.unwrap();

        entity.set("health", Value::Int(42)).unwrap();
        assert_eq!(entity.get("health").unwrap(), Value::Int(42));
        assert_eq!(object[1] as u32, 42);

        let get_team = entity.function::<extern "C" fn(Address) -> i32>("get_team").unwrap();
        assert_eq!(unsafe { get_team.call() }, 2);

        object[0] = blue_vtable.as_ptr() as usize;
        assert_eq!(unsafe { get_team.call() }, 3);

        assert!(entity
            .function::<extern "C" fn(Address) -> f32>("get_team")
            .is_err());
    }

    #[test]
    fn test_duplicate_type_is_skipped() {
        let resolver = BinaryRegistry::new();
        let manager = TypeManager::new();

        let first: TypeConfig =
            parse_str("[instance_attribute.a]\ntype = \"INT\"\noffset = 0", ConfigFormat::Toml).unwrap();
        let second: TypeConfig =
            parse_str("[instance_attribute.b]\ntype = \"INT\"\noffset = 4", ConfigFormat::Toml).unwrap();

        let created = manager.create_type("Thing", &first, &resolver).unwrap();
        let again = manager.create_type("Thing", &second, &resolver).unwrap();

        assert!(Arc::ptr_eq(&created, &again));
        assert!(again.contains("a"));
        assert!(!again.contains("b"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_extend_type() {
        let mut image = vec![0u8; 16];
        image[0..3].copy_from_slice(&[0x8B, 0x41, 0x0C]);
        let resolver = BinaryRegistry::new();
        resolver.register(
            unsafe { Binary::new("server", Address::from_ptr(image.as_ptr()), image.len()) }.server(true),
        );

        let manager = TypeManager::new();
        let base: TypeConfig = parse_str(
            "binary = \"server\"\n[instance_attribute.health]\ntype = \"INT\"\noffset = 0",
            ConfigFormat::Toml,
        )
        .unwrap();
        manager.create_type("Player", &base, &resolver).unwrap();

        // binary is inherited from the registered type
        let extension: TypeConfig = parse_str(
            r#"
[binary_instance_attribute.armor]
identifier = "8B 41 0C"
offset = 2
size = 1
type = "INT"

[instance_attribute.health]
type = "FLOAT"
offset = 8
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        let extended = manager.extend_type("Player", &extension, &resolver).unwrap();

        assert_eq!(extended.len(), 2);
        assert!(matches!(
            extended.member("armor").unwrap().kind,
            MemberKind::Field { offset: 0x0C, .. }
        ));
        assert!(matches!(
            extended.member("health").unwrap().kind,
            MemberKind::Field { offset: 0, .. }
        ));
        assert!(Arc::ptr_eq(&manager.get("Player").unwrap(), &extended));

        assert!(matches!(
            manager.extend_type("Missing", &extension, &resolver),
            Err(TypeError::NotFound(_))
        ));
    }

    #[test]
    fn test_global_instance() {
        let mut state = [0i32, 0];
        let registry_image = [0x11u8, 0x22, 0x33, 0x44];
        let resolver = BinaryRegistry::new();
        resolver.register(
            unsafe {
                Binary::new(
                    "engine",
                    Address::from_ptr(registry_image.as_ptr()),
                    registry_image.len(),
                )
            }
            .with_symbol("g_GameRules", Address::from_mut_ptr(state.as_mut_ptr())),
        );

        let manager = TypeManager::new();
        let config: TypeConfig = parse_str(
            r#"
binary = "engine"
srv_check = false

[instance_attribute.round]
type = "INT"
offset = 4

[global_pointer.instance]
identifier = "g_GameRules"
offset = 0
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        manager.create_type("GameRules", &config, &resolver).unwrap();

        let rules = unsafe { manager.global_instance("GameRules", "instance") }.unwrap();
        rules.set("round", Value::Int(5)).unwrap();
        assert_eq!(state[1], 5);

        assert!(matches!(
            unsafe { manager.global_instance("GameRules", "round") },
            Err(AccessError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_create_type_from_files() {
        let dir = std::env::temp_dir().join(format!("memtools-types-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let toml_path = dir.join("weapon.toml");
        let json_path = dir.join("weapon.json");
        std::fs::write(&toml_path, "size = 8\n[instance_attribute.clip]\ntype = \"INT\"\noffset = 0\n").unwrap();
        std::fs::write(
            &json_path,
            r#"{ "instance_attribute": { "clip": { "type": "INT", "offset": 4 }, "reserve": { "type": "INT", "offset": 4 } } }"#,
        )
        .unwrap();

        let resolver = BinaryRegistry::new();
        let manager = TypeManager::new();
        let weapon = manager
            .create_type_from_files("Weapon", &[&toml_path, &json_path], &resolver)
            .unwrap();

        assert_eq!(weapon.size(), Some(8));
        assert_eq!(weapon.len(), 2);
        assert!(matches!(
            weapon.member("clip").unwrap().kind,
            MemberKind::Field { offset: 0, .. }
        ));

        let missing = manager.create_type_from_file("Ghost", dir.join("ghost.toml"), &resolver);
        assert!(matches!(missing, Err(TypeError::Config { .. })));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
