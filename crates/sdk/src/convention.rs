//! Calling convention tags
//!
//! Conventions a foreign function may be compiled with. How each one maps
//! onto the host is decided by the ABI layer in `memtools-core`.

use std::fmt;
use std::str::FromStr;

/// Foreign calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Convention {
    /// All arguments on the stack, caller cleans up
    Cdecl,
    /// cdecl where the callee pops 4 bytes on return (hidden return pointer)
    CdeclReturn4,
    /// All arguments on the stack, callee cleans up
    Stdcall,
    /// Receiver in `ecx`, remainder on the stack, callee cleans up
    #[default]
    Thiscall,
    /// First two word-sized arguments in `ecx`/`edx`, callee cleans up
    Fastcall,
    /// Fastcall where the caller cleans up
    FastcallCaller,
    /// First two arguments in `eax`/`edx`, no stack arguments
    Register,
}

impl Convention {
    pub const ALL: [Convention; 7] = [
        Convention::Cdecl,
        Convention::CdeclReturn4,
        Convention::Stdcall,
        Convention::Thiscall,
        Convention::Fastcall,
        Convention::FastcallCaller,
        Convention::Register,
    ];

    /// Configuration tag for this convention
    pub const fn name(self) -> &'static str {
        match self {
            Convention::Cdecl => "CDECL",
            Convention::CdeclReturn4 => "CDECL_RETURN4",
            Convention::Stdcall => "STDCALL",
            Convention::Thiscall => "THISCALL",
            Convention::Fastcall => "FASTCALL",
            Convention::FastcallCaller => "FASTCALL_CALLER",
            Convention::Register => "REGISTER",
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a convention tag is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown calling convention: {0}")]
pub struct UnknownConvention(pub String);

impl FromStr for Convention {
    type Err = UnknownConvention;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Convention::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(tag))
            .ok_or_else(|| UnknownConvention(tag.to_string()))
    }
}
