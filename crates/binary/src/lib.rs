//! memtools binary - Address resolution
//!
//! This crate is the boundary between the core and the process image:
//! - [`AddressResolver`] is the trait the core consumes
//! - [`BytePattern`] parses signatures and byte templates
//! - [`BinaryRegistry`] resolves identifiers inside registered modules
//!
//! # Architecture
//!
//! The host registers every loaded module once via
//! [`BinaryRegistry::register`]. Lookups scan the registered image for a
//! byte signature (or look up an exported symbol), apply an offset, and
//! follow a pointer chain.

pub mod error;
pub mod pattern;
pub mod registry;
pub mod resolver;

pub use error::ResolveError;
pub use pattern::{format_bytes, parse_hex_bytes, BytePattern, PatternError, WILDCARD};
pub use registry::{Binary, BinaryRegistry};
pub use resolver::{follow_pointers, AddressResolver, Identifier};
