//! memtools SDK - Foreign type definitions
//!
//! This crate contains the plain value types shared by every other memtools
//! crate. It has no dependencies and compiles quickly, allowing parallel
//! compilation of dependent crates.
//!
//! # Modules
//!
//! - [`address`] - Foreign memory addresses
//! - [`data_type`] - Primitive data type tags
//! - [`convention`] - Calling convention tags

pub mod address;
pub mod convention;
pub mod data_type;

pub use address::{Address, POINTER_SIZE};
pub use convention::{Convention, UnknownConvention};
pub use data_type::{DataType, Repr, UnknownDataType};
