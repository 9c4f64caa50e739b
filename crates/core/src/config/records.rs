//! Type and patch description records
//!
//! These mirror the on-disk layout one to one. Interpretation (defaults,
//! tag parsing) happens through the accessor methods so every error names
//! the record it came from.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use memtools_sdk::{Convention, DataType};

use super::{ConfigError, ConfigResult};

/// Member section of a type description
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    InstanceAttribute,
    PointerAttribute,
    StaticInstanceArray,
    DynamicInstanceArray,
    StaticPointerArray,
    DynamicPointerArray,
    VirtualFunction,
    Function,
    FunctionPointer,
    GlobalPointer,
    BinaryInstanceAttribute,
    BinaryPointerAttribute,
    BinaryStaticInstanceArray,
    BinaryDynamicInstanceArray,
    BinaryStaticPointerArray,
    BinaryDynamicPointerArray,
    BinaryVirtualFunction,
    BinaryFunction,
}

impl Section {
    /// Every section, in resolution order
    pub const ALL: [Section; 18] = [
        Section::InstanceAttribute,
        Section::PointerAttribute,
        Section::StaticInstanceArray,
        Section::DynamicInstanceArray,
        Section::StaticPointerArray,
        Section::DynamicPointerArray,
        Section::VirtualFunction,
        Section::Function,
        Section::FunctionPointer,
        Section::GlobalPointer,
        Section::BinaryInstanceAttribute,
        Section::BinaryPointerAttribute,
        Section::BinaryStaticInstanceArray,
        Section::BinaryDynamicInstanceArray,
        Section::BinaryStaticPointerArray,
        Section::BinaryDynamicPointerArray,
        Section::BinaryVirtualFunction,
        Section::BinaryFunction,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Section::InstanceAttribute => "instance_attribute",
            Section::PointerAttribute => "pointer_attribute",
            Section::StaticInstanceArray => "static_instance_array",
            Section::DynamicInstanceArray => "dynamic_instance_array",
            Section::StaticPointerArray => "static_pointer_array",
            Section::DynamicPointerArray => "dynamic_pointer_array",
            Section::VirtualFunction => "virtual_function",
            Section::Function => "function",
            Section::FunctionPointer => "function_pointer",
            Section::GlobalPointer => "global_pointer",
            Section::BinaryInstanceAttribute => "binary_instance_attribute",
            Section::BinaryPointerAttribute => "binary_pointer_attribute",
            Section::BinaryStaticInstanceArray => "binary_static_instance_array",
            Section::BinaryDynamicInstanceArray => "binary_dynamic_instance_array",
            Section::BinaryStaticPointerArray => "binary_static_pointer_array",
            Section::BinaryDynamicPointerArray => "binary_dynamic_pointer_array",
            Section::BinaryVirtualFunction => "binary_virtual_function",
            Section::BinaryFunction => "binary_function",
        }
    }

    /// Whether the member offset is read out of the binary
    pub const fn is_binary(self) -> bool {
        matches!(
            self,
            Section::BinaryInstanceAttribute
                | Section::BinaryPointerAttribute
                | Section::BinaryStaticInstanceArray
                | Section::BinaryDynamicInstanceArray
                | Section::BinaryStaticPointerArray
                | Section::BinaryDynamicPointerArray
                | Section::BinaryVirtualFunction
                | Section::BinaryFunction
        )
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One member entry of a type description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srv_check: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convention: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// Default operand size for values read out of a binary
pub const DEFAULT_OPERAND_SIZE: usize = 4;

impl MemberRecord {
    /// Byte offset, required
    pub fn offset(&self, name: &str) -> ConfigResult<isize> {
        let offset = self.offset.ok_or_else(|| missing(name, "offset"))?;
        isize::try_from(offset).map_err(|_| invalid(name, "offset", offset))
    }

    /// Byte offset, zero when absent
    pub fn offset_or_zero(&self, name: &str) -> ConfigResult<isize> {
        match self.offset {
            Some(_) => self.offset(name),
            None => Ok(0),
        }
    }

    pub fn identifier(&self, name: &str) -> ConfigResult<&str> {
        self.identifier
            .as_deref()
            .ok_or_else(|| missing(name, "identifier"))
    }

    /// Binary name, falling back to the type-level default
    pub fn binary<'a>(&'a self, name: &str, default: Option<&'a str>) -> ConfigResult<&'a str> {
        self.binary
            .as_deref()
            .or(default)
            .ok_or_else(|| missing(name, "binary"))
    }

    pub fn srv_check(&self, default: bool) -> bool {
        self.srv_check.unwrap_or(default)
    }

    pub fn level(&self) -> usize {
        self.level.unwrap_or(0)
    }

    /// Operand size for values read out of a binary
    pub fn operand_size(&self) -> usize {
        self.size.unwrap_or(DEFAULT_OPERAND_SIZE)
    }

    /// Raw `type` tag, required
    pub fn type_name(&self, name: &str) -> ConfigResult<&str> {
        self.type_name.as_deref().ok_or_else(|| missing(name, "type"))
    }

    /// Argument types; the receiver is not part of this list
    pub fn args(&self, name: &str) -> ConfigResult<Vec<DataType>> {
        self.args
            .iter()
            .map(|arg| arg.parse::<DataType>().map_err(|_| invalid(name, "args", arg)))
            .collect()
    }

    /// Return type, `VOID` when absent
    pub fn return_type(&self, name: &str) -> ConfigResult<DataType> {
        match &self.return_type {
            Some(tag) => tag
                .parse::<DataType>()
                .map_err(|_| invalid(name, "return_type", tag)),
            None => Ok(DataType::Void),
        }
    }

    /// Calling convention, `THISCALL` when absent
    pub fn convention(&self, name: &str) -> ConfigResult<Convention> {
        match &self.convention {
            Some(tag) => tag
                .parse::<Convention>()
                .map_err(|_| invalid(name, "convention", tag)),
            None => Ok(Convention::default()),
        }
    }
}

/// A complete type description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeConfig {
    /// Default binary for members that resolve addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    /// Default server-build check, `true` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srv_check: Option<bool>,

    /// Size of one instance in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    #[serde(flatten)]
    pub sections: BTreeMap<Section, BTreeMap<String, MemberRecord>>,
}

impl TypeConfig {
    /// Records of one section
    pub fn section(&self, section: Section) -> impl Iterator<Item = (&String, &MemberRecord)> {
        self.sections.get(&section).into_iter().flatten()
    }

    /// Add a member record, replacing one with the same name in that section
    pub fn insert(&mut self, section: Section, name: impl Into<String>, record: MemberRecord) {
        self.sections
            .entry(section)
            .or_default()
            .insert(name.into(), record);
    }

    /// Section a member name is declared in
    pub fn find_member(&self, name: &str) -> Option<Section> {
        self.sections
            .iter()
            .find(|(_, records)| records.contains_key(name))
            .map(|(section, _)| *section)
    }

    pub fn member_count(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }

    /// Effective type-level server check
    pub fn default_srv_check(&self) -> bool {
        self.srv_check.unwrap_or(true)
    }

    /// Combine another source into this one
    ///
    /// Type-level keys already set here win. A member whose name is already
    /// declared in any section is skipped with a warning.
    pub fn merge(&mut self, other: TypeConfig) {
        if self.binary.is_none() {
            self.binary = other.binary;
        }
        if self.srv_check.is_none() {
            self.srv_check = other.srv_check;
        }
        if self.size.is_none() {
            self.size = other.size;
        }

        for (section, records) in other.sections {
            for (name, record) in records {
                if let Some(existing) = self.find_member(&name) {
                    tracing::warn!(
                        "Skipping duplicate member '{}' in {} (already declared in {})",
                        name,
                        section,
                        existing
                    );
                    continue;
                }
                self.insert(section, name, record);
            }
        }
    }
}

/// One named patch entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srv_check: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Replacement bytes as hex, NOP-padded up to `size`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_codes: Option<String>,
    /// Expected original bytes as hex; `2A`/`??` are wildcards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_op_codes: Option<String>,
}

impl PatchRecord {
    pub fn size(&self, name: &str) -> ConfigResult<usize> {
        self.size.ok_or_else(|| missing(name, "size"))
    }

    pub fn offset(&self, name: &str) -> ConfigResult<isize> {
        let offset = self.offset.unwrap_or(0);
        isize::try_from(offset).map_err(|_| invalid(name, "offset", offset))
    }
}

/// A set of named patches with shared defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srv_check: Option<bool>,
    #[serde(flatten)]
    pub patches: BTreeMap<String, PatchRecord>,
}

fn missing(name: &str, key: &'static str) -> ConfigError {
    ConfigError::MissingKey {
        name: name.to_string(),
        key,
    }
}

fn invalid(name: &str, key: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        key,
        value: value.to_string(),
    }
}
