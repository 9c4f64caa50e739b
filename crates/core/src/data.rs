//! Offset and address tables
//!
//! Resolves a type description into plain numbers without building
//! accessors. Useful when the caller has its own bindings and only needs
//! the offsets, vtable slots and addresses for the current build.

use std::collections::BTreeMap;
use std::path::Path;

use memtools_binary::AddressResolver;
use memtools_sdk::Address;
use tracing::debug;

use crate::config::{load_file, ConfigError, MemberRecord, Section, TypeConfig};
use crate::memory::relative_target;
use crate::types::{binary_offset, vtable_slot, MemberDefaults, MemberError};

/// Error type for table resolution
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Failed to resolve entry '{name}': {source}")]
    Entry { name: String, source: MemberError },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One resolved entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEntry {
    /// Byte offset into an instance
    Offset(isize),
    /// Vtable slot index
    Slot(usize),
    /// Absolute address in the current process
    Address(Address),
}

/// Resolved entries keyed by member name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    entries: BTreeMap<String, DataEntry>,
}

impl DataTable {
    /// Resolve every member of `config`
    ///
    /// Names repeated across sections keep their first entry.
    pub fn resolve<R: AddressResolver + ?Sized>(config: &TypeConfig, resolver: &R) -> Result<Self, DataError> {
        let defaults = MemberDefaults::of(config);
        let mut entries = BTreeMap::new();

        for section in Section::ALL {
            for (name, record) in config.section(section) {
                if entries.contains_key(name) {
                    tracing::warn!("Skipping duplicate entry '{}' in {}", name, section);
                    continue;
                }
                let entry = resolve_entry(section, name, record, defaults, resolver).map_err(|source| {
                    DataError::Entry {
                        name: name.clone(),
                        source,
                    }
                })?;
                debug!("{} '{}' -> {:?}", section, name, entry);
                entries.insert(name.clone(), entry);
            }
        }

        Ok(Self { entries })
    }

    /// Load a description file and resolve it
    pub fn from_file<R: AddressResolver + ?Sized>(path: impl AsRef<Path>, resolver: &R) -> Result<Self, DataError> {
        let config: TypeConfig = load_file(path)?;
        Self::resolve(&config, resolver)
    }

    pub fn get(&self, name: &str) -> Option<DataEntry> {
        self.entries.get(name).copied()
    }

    pub fn offset(&self, name: &str) -> Option<isize> {
        match self.get(name)? {
            DataEntry::Offset(offset) => Some(offset),
            _ => None,
        }
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        match self.get(name)? {
            DataEntry::Slot(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        match self.get(name)? {
            DataEntry::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DataEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), *entry))
    }
}

fn resolve_entry<R: AddressResolver + ?Sized>(
    section: Section,
    name: &str,
    record: &MemberRecord,
    defaults: MemberDefaults<'_>,
    resolver: &R,
) -> Result<DataEntry, MemberError> {
    let entry = match section {
        Section::InstanceAttribute
        | Section::PointerAttribute
        | Section::StaticInstanceArray
        | Section::DynamicInstanceArray
        | Section::StaticPointerArray
        | Section::DynamicPointerArray => DataEntry::Offset(record.offset(name)?),
        Section::VirtualFunction => match record.index {
            Some(index) => DataEntry::Slot(index),
            None => DataEntry::Slot(vtable_slot(name, record.offset(name)?)?),
        },
        Section::Function => DataEntry::Address(defaults.resolve(resolver, record, name, 0, 0)?),
        Section::FunctionPointer | Section::GlobalPointer => DataEntry::Address(defaults.resolve(
            resolver,
            record,
            name,
            record.offset(name)?,
            record.level(),
        )?),
        Section::BinaryVirtualFunction => {
            DataEntry::Slot(vtable_slot(name, binary_offset(resolver, record, name, defaults)?)?)
        }
        Section::BinaryFunction => {
            let base = defaults.resolve(resolver, record, name, 0, 0)?;
            // SAFETY: the operand lies inside the registered image holding `base`
            DataEntry::Address(unsafe {
                relative_target(base, record.offset(name)?, record.operand_size())
            }?)
        }
        _ => DataEntry::Offset(binary_offset(resolver, record, name, defaults)?),
    };
    Ok(entry)
}
