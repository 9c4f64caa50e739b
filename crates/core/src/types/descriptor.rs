//! Compiled type descriptors

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use memtools_binary::AddressResolver;
use memtools_sdk::{Address, DataType};

use super::compiler;
use super::TypeError;
use crate::config::TypeConfig;
use crate::function::{NativeFunction, VirtualFunction};

/// The type of a field, array element or pointee
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Native(DataType),
    /// A type registered in the same [`TypeManager`](super::TypeManager)
    Custom(String),
}

impl TypeRef {
    /// Interpret a `type` tag; anything that is not a primitive names a custom type
    pub fn parse(tag: &str) -> Self {
        match tag.parse::<DataType>() {
            Ok(ty) => TypeRef::Native(ty),
            Err(_) => TypeRef::Custom(tag.trim().to_string()),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Native(ty) => write!(f, "{}", ty),
            TypeRef::Custom(name) => f.write_str(name),
        }
    }
}

/// Element storage of an array member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    /// The member holds a pointer to the elements rather than the elements
    pub dynamic: bool,
    /// Each element is a pointer to the value rather than the value
    pub pointers: bool,
}

/// What a member is and where it lives
#[derive(Debug)]
pub enum MemberKind {
    /// A value stored inline at `offset`
    Field { offset: isize, ty: TypeRef },
    /// A pointer stored at `offset`, dereferenced on access
    Pointer { offset: isize, ty: TypeRef },
    Array {
        offset: isize,
        ty: TypeRef,
        length: Option<usize>,
        layout: ArrayLayout,
    },
    /// Looked up in the receiver's vtable on every call
    Virtual(VirtualFunction),
    /// Resolved once when the type is built
    Bound(NativeFunction),
    /// A resolved address shared by all instances
    Global { address: Address, ty: TypeRef },
}

impl MemberKind {
    pub fn name(&self) -> &'static str {
        match self {
            MemberKind::Field { .. } => "field",
            MemberKind::Pointer { .. } => "pointer",
            MemberKind::Array { .. } => "array",
            MemberKind::Virtual(_) => "virtual function",
            MemberKind::Bound(_) => "function",
            MemberKind::Global { .. } => "global pointer",
        }
    }
}

#[derive(Debug)]
pub struct Member {
    pub kind: MemberKind,
    pub doc: Option<String>,
}

impl Member {
    pub fn new(kind: MemberKind) -> Self {
        Self { kind, doc: None }
    }

    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }
}

/// A named set of members describing a foreign structure
///
/// A descriptor never owns the memory it describes; [`Instance`](super::Instance)
/// pairs it with an address.
#[derive(Debug)]
pub struct TypeDescriptor {
    name: String,
    binary: Option<String>,
    srv_check: bool,
    size: Option<usize>,
    members: BTreeMap<String, Arc<Member>>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, binary: Option<String>, srv_check: bool, size: Option<usize>) -> Self {
        Self {
            name: name.into(),
            binary,
            srv_check,
            size,
            members: BTreeMap::new(),
        }
    }

    /// Build a descriptor from a type description
    ///
    /// Every member is resolved now; the first failure aborts and names the
    /// member.
    pub fn compile<R: AddressResolver + ?Sized>(
        name: &str,
        config: &TypeConfig,
        resolver: &R,
    ) -> Result<Self, TypeError> {
        compiler::compile(name, config, resolver)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default binary of the type description
    pub fn binary(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    pub fn srv_check(&self) -> bool {
        self.srv_check
    }

    /// Size of one instance, when declared
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members
            .iter()
            .map(|(name, member)| (name.as_str(), member.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Address of a global pointer member
    pub fn global(&self, name: &str) -> Option<Address> {
        match self.member(name).map(|m| &m.kind) {
            Some(MemberKind::Global { address, .. }) => Some(*address),
            _ => None,
        }
    }

    /// Add a member; an existing name is kept and the new one skipped
    pub fn insert(&mut self, name: impl Into<String>, member: impl Into<Arc<Member>>) -> bool {
        let name = name.into();
        if self.members.contains_key(&name) {
            tracing::warn!(
                "Skipping duplicate member '{}' on type '{}'",
                name,
                self.name
            );
            return false;
        }
        self.members.insert(name, member.into());
        true
    }

    /// A copy of this descriptor with the members of `extension` added
    pub(crate) fn extended(&self, extension: TypeDescriptor) -> TypeDescriptor {
        let mut merged = TypeDescriptor {
            name: self.name.clone(),
            binary: self.binary.clone(),
            srv_check: self.srv_check,
            size: self.size.or(extension.size),
            members: self.members.clone(),
        };
        for (name, member) in extension.members {
            merged.insert(name, member);
        }
        merged
    }
}
