//! memtools core - Foreign memory toolkit
//!
//! This crate turns declarative descriptions of foreign structures and code
//! into checked accessors, callable function handles and reversible patches.
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and binary crates for convenience:
//! - [`sdk`] - Addresses, data type and calling convention tags
//! - [`binary`] - Address resolution inside registered modules
//!
//! # Modules
//!
//! - [`types`] - Type descriptors, instances and the type manager
//! - [`function`] - Typed foreign function handles
//! - [`trampoline`] - Calling convention bridges
//! - [`patcher`] - Reversible byte patches
//! - [`data`] - Plain offset and address tables
//! - [`config`] - Description files and core settings

use tracing::info;

pub use memtools_binary as binary;
pub use memtools_sdk as sdk;

pub mod abi;
pub mod config;
pub mod data;
pub mod function;
pub mod logging;
pub mod memory;
pub mod patcher;
pub mod trampoline;
pub mod types;

pub use abi::{dispatch, Dispatch, Host};
pub use config::{ConfigError, ConfigResult, CoreConfig, PatchConfig, TypeConfig};
pub use data::{DataEntry, DataError, DataTable};
pub use function::{HostFn, MemberFunction, NativeFunction, Signature, SignatureMismatch, VirtualFunction};
pub use memory::{NativeType, TypeMismatch, Value};
pub use patcher::{make_jmp, no_op, Patch, PatchError, Patchers};
pub use trampoline::{Trampoline, TrampolineError};
pub use types::{AccessError, ArrayView, Instance, TypeDescriptor, TypeError, TypeManager};

/// Initialize logging and report the host
pub fn init(config: &CoreConfig) {
    logging::init(config);
    info!(
        "memtools {} initialized (host: {}, config version {})",
        env!("CARGO_PKG_VERSION"),
        Host::current(),
        config.version
    );
}
