//! Type description compilation
//!
//! Sections are resolved in the order of [`Section::ALL`]. A member name
//! that already exists in an earlier section is skipped with a warning.

use memtools_binary::AddressResolver;
use memtools_sdk::{Address, POINTER_SIZE};
use tracing::{debug, info, warn};

use super::descriptor::{ArrayLayout, Member, MemberKind, TypeDescriptor, TypeRef};
use super::{MemberError, TypeError};
use crate::config::{ConfigError, MemberRecord, Section, TypeConfig};
use crate::function::{NativeFunction, Signature, VirtualFunction};
use crate::memory::{read_signed, relative_target};

/// Type-level defaults applied to member records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberDefaults<'a> {
    pub binary: Option<&'a str>,
    pub srv_check: bool,
}

impl<'a> MemberDefaults<'a> {
    pub fn of(config: &'a TypeConfig) -> Self {
        Self {
            binary: config.binary.as_deref(),
            srv_check: config.default_srv_check(),
        }
    }

    /// Resolve a record's identifier
    pub fn resolve<R: AddressResolver + ?Sized>(
        &self,
        resolver: &R,
        record: &MemberRecord,
        name: &str,
        offset: isize,
        level: usize,
    ) -> Result<Address, MemberError> {
        let binary = record.binary(name, self.binary)?;
        let identifier = record.identifier(name)?;
        let srv_check = record.srv_check(self.srv_check);
        Ok(resolver.resolve(binary, identifier, offset, level, srv_check)?)
    }
}

/// Read a member offset encoded in a binary
///
/// The operand is a signed `size`-byte value at the record's identifier
/// plus `offset`.
pub fn binary_offset<R: AddressResolver + ?Sized>(
    resolver: &R,
    record: &MemberRecord,
    name: &str,
    defaults: MemberDefaults<'_>,
) -> Result<isize, MemberError> {
    let size = record.operand_size();
    let address = defaults.resolve(resolver, record, name, record.offset(name)?, 0)?;
    // SAFETY: resolved addresses lie inside registered images
    Ok(unsafe { read_signed(address, size) }?)
}

/// Convert a byte offset into a vtable into a slot index
pub fn vtable_slot(name: &str, offset: isize) -> Result<usize, ConfigError> {
    let bytes = usize::try_from(offset).ok().filter(|bytes| bytes % POINTER_SIZE == 0);
    bytes
        .map(|bytes| bytes / POINTER_SIZE)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            key: "offset",
            value: offset.to_string(),
        })
}

/// Slot of a `virtual_function` record: `index`, else `offset` in bytes
fn declared_slot(record: &MemberRecord, name: &str) -> Result<usize, ConfigError> {
    match record.index {
        Some(index) => Ok(index),
        None => vtable_slot(name, record.offset(name)?),
    }
}

fn type_ref(record: &MemberRecord, name: &str) -> Result<TypeRef, ConfigError> {
    record.type_name(name).map(TypeRef::parse)
}

fn signature(record: &MemberRecord, name: &str) -> Result<Signature, ConfigError> {
    Ok(Signature::member(
        record.args(name)?,
        record.return_type(name)?,
        record.convention(name)?,
    ))
}

fn layout(section: Section) -> ArrayLayout {
    match section {
        Section::StaticInstanceArray | Section::BinaryStaticInstanceArray => ArrayLayout {
            dynamic: false,
            pointers: false,
        },
        Section::DynamicInstanceArray | Section::BinaryDynamicInstanceArray => ArrayLayout {
            dynamic: true,
            pointers: false,
        },
        Section::StaticPointerArray | Section::BinaryStaticPointerArray => ArrayLayout {
            dynamic: false,
            pointers: true,
        },
        _ => ArrayLayout {
            dynamic: true,
            pointers: true,
        },
    }
}

/// Build the member declared by one record
fn build_member<R: AddressResolver + ?Sized>(
    type_name: &str,
    section: Section,
    name: &str,
    record: &MemberRecord,
    defaults: MemberDefaults<'_>,
    resolver: &R,
) -> Result<MemberKind, MemberError> {
    let kind = match section {
        Section::InstanceAttribute => MemberKind::Field {
            offset: record.offset(name)?,
            ty: type_ref(record, name)?,
        },
        Section::PointerAttribute => MemberKind::Pointer {
            offset: record.offset(name)?,
            ty: type_ref(record, name)?,
        },
        Section::StaticInstanceArray
        | Section::DynamicInstanceArray
        | Section::StaticPointerArray
        | Section::DynamicPointerArray => MemberKind::Array {
            offset: record.offset(name)?,
            ty: type_ref(record, name)?,
            length: record.length,
            layout: layout(section),
        },
        Section::VirtualFunction => MemberKind::Virtual(VirtualFunction::new(
            declared_slot(record, name)?,
            signature(record, name)?,
        )?),
        Section::Function => {
            let address = defaults.resolve(resolver, record, name, 0, 0)?;
            MemberKind::Bound(NativeFunction::new(address, signature(record, name)?)?)
        }
        Section::FunctionPointer => {
            let address =
                defaults.resolve(resolver, record, name, record.offset(name)?, record.level())?;
            MemberKind::Bound(NativeFunction::new(address, signature(record, name)?)?)
        }
        Section::GlobalPointer => {
            let address =
                defaults.resolve(resolver, record, name, record.offset(name)?, record.level())?;
            let ty = match &record.type_name {
                Some(tag) => TypeRef::parse(tag),
                None => TypeRef::Custom(type_name.to_string()),
            };
            MemberKind::Global { address, ty }
        }
        Section::BinaryInstanceAttribute => MemberKind::Field {
            offset: binary_offset(resolver, record, name, defaults)?,
            ty: type_ref(record, name)?,
        },
        Section::BinaryPointerAttribute => MemberKind::Pointer {
            offset: binary_offset(resolver, record, name, defaults)?,
            ty: type_ref(record, name)?,
        },
        Section::BinaryStaticInstanceArray
        | Section::BinaryDynamicInstanceArray
        | Section::BinaryStaticPointerArray
        | Section::BinaryDynamicPointerArray => MemberKind::Array {
            offset: binary_offset(resolver, record, name, defaults)?,
            ty: type_ref(record, name)?,
            length: record.length,
            layout: layout(section),
        },
        Section::BinaryVirtualFunction => {
            let slot = vtable_slot(name, binary_offset(resolver, record, name, defaults)?)?;
            MemberKind::Virtual(VirtualFunction::new(slot, signature(record, name)?)?)
        }
        Section::BinaryFunction => {
            let base = defaults.resolve(resolver, record, name, 0, 0)?;
            // SAFETY: the operand lies inside the registered image holding `base`
            let address =
                unsafe { relative_target(base, record.offset(name)?, record.operand_size()) }?;
            MemberKind::Bound(NativeFunction::new(address, signature(record, name)?)?)
        }
    };
    Ok(kind)
}

pub(super) fn compile<R: AddressResolver + ?Sized>(
    name: &str,
    config: &TypeConfig,
    resolver: &R,
) -> Result<TypeDescriptor, TypeError> {
    let defaults = MemberDefaults::of(config);
    let mut descriptor = TypeDescriptor::new(
        name,
        config.binary.clone(),
        defaults.srv_check,
        config.size,
    );

    for section in Section::ALL {
        let mut built = 0;
        for (member, record) in config.section(section) {
            if descriptor.contains(member) {
                warn!(
                    "Skipping duplicate member '{}' in {} of type '{}'",
                    member, section, name
                );
                continue;
            }

            let kind = build_member(name, section, member, record, defaults, resolver).map_err(
                |source| TypeError::Member {
                    type_name: name.to_string(),
                    member: member.clone(),
                    source,
                },
            )?;
            descriptor.insert(member.as_str(), Member::new(kind).with_doc(record.doc.clone()));
            built += 1;
        }

        if built > 0 {
            debug!("Type '{}': built {} {} member(s)", name, built, section);
        }
    }

    info!("Compiled type '{}' ({} members)", name, descriptor.len());
    Ok(descriptor)
}
