//! Declarative foreign types
//!
//! A [`TypeConfig`](crate::config::TypeConfig) is compiled into a
//! [`TypeDescriptor`] once, with every address and offset resolved up
//! front. An [`Instance`] pairs a descriptor with an address and gives
//! checked access to its members:
//!
//! ```text
//! TypeConfig --compile--> TypeDescriptor --(address)--> Instance
//!                              |                          |
//!                         TypeManager               get / set / call
//! ```

mod array;
mod compiler;
mod descriptor;
mod instance;
mod manager;

use memtools_binary::ResolveError;

use crate::config::ConfigError;
use crate::function::SignatureMismatch;
use crate::memory::TypeMismatch;
use crate::trampoline::TrampolineError;

pub use array::ArrayView;
pub use compiler::{binary_offset, vtable_slot, MemberDefaults};
pub use descriptor::{ArrayLayout, Member, MemberKind, TypeDescriptor, TypeRef};
pub use instance::Instance;
pub use manager::TypeManager;

/// Error type for building a single member
#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Trampoline(#[from] TrampolineError),
}

/// Error type for type construction
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("Failed to build member '{member}' of type '{type_name}': {source}")]
    Member {
        type_name: String,
        member: String,
        source: MemberError,
    },

    #[error("Failed to load type '{type_name}': {source}")]
    Config {
        type_name: String,
        source: ConfigError,
    },

    #[error("Type not registered: {0}")]
    NotFound(String),
}

/// Error type for member access on an [`Instance`]
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Type '{type_name}' has no member '{member}'")]
    UnknownMember { type_name: String, member: String },

    #[error("Member '{member}' is a {found}, not a {expected}")]
    WrongKind {
        member: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    #[error(transparent)]
    Signature(#[from] SignatureMismatch),

    #[error("Index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Member '{0}' is a null pointer")]
    NullPointer(String),

    #[error("Type not registered: {0}")]
    UnknownType(String),

    #[error("Type '{0}' has no declared size")]
    UnknownSize(String),

    #[error("Element {index} of '{member}' lies outside the address space")]
    AddressOverflow { member: String, index: usize },
}
