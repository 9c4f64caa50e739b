//! Calling convention descriptors and host dispatch
//!
//! [`AbiDescriptor`] states how a 32-bit x86 foreign convention passes
//! arguments and who cleans the stack. [`dispatch`] decides whether the
//! current host can call a convention directly, needs a trampoline, or
//! cannot call it at all.

use std::fmt;

use memtools_sdk::Convention;

/// General purpose registers used for argument passing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ecx,
    Edx,
}

impl Register {
    /// Registers a trampoline may use as scratch, in order of preference
    pub const SCRATCH: [Register; 3] = [Register::Eax, Register::Ecx, Register::Edx];

    pub const fn name(self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who removes stack arguments after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Caller,
    Callee,
    /// The callee pops this many bytes, the caller the rest
    CalleePops(usize),
}

/// Argument passing rules of a foreign convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiDescriptor {
    pub convention: Convention,
    /// Registers filled from the leading arguments, in order
    pub registers: &'static [Register],
    pub cleanup: Cleanup,
    /// Whether arguments beyond the registers may go on the stack
    pub stack_arguments: bool,
}

impl AbiDescriptor {
    pub const fn of(convention: Convention) -> Self {
        let (registers, cleanup, stack_arguments): (&'static [Register], Cleanup, bool) =
            match convention {
                Convention::Cdecl => (&[], Cleanup::Caller, true),
                Convention::CdeclReturn4 => (&[], Cleanup::CalleePops(4), true),
                Convention::Stdcall => (&[], Cleanup::Callee, true),
                Convention::Thiscall => (&[Register::Ecx], Cleanup::Callee, true),
                Convention::Fastcall => (&[Register::Ecx, Register::Edx], Cleanup::Callee, true),
                Convention::FastcallCaller => {
                    (&[Register::Ecx, Register::Edx], Cleanup::Caller, true)
                }
                Convention::Register => (&[Register::Eax, Register::Edx], Cleanup::Caller, false),
            };

        Self {
            convention,
            registers,
            cleanup,
            stack_arguments,
        }
    }
}

/// Host platform classes with distinct dispatch rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    X86Windows,
    X86Other,
    X86_64Windows,
    X86_64Other,
    Other,
}

impl Host {
    /// The platform this crate was compiled for
    pub const fn current() -> Self {
        if cfg!(all(target_arch = "x86", windows)) {
            Host::X86Windows
        } else if cfg!(target_arch = "x86") {
            Host::X86Other
        } else if cfg!(all(target_arch = "x86_64", windows)) {
            Host::X86_64Windows
        } else if cfg!(target_arch = "x86_64") {
            Host::X86_64Other
        } else {
            Host::Other
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Host::X86Windows => "x86-windows",
            Host::X86Other => "x86",
            Host::X86_64Windows => "x86_64-windows",
            Host::X86_64Other => "x86_64",
            Host::Other => std::env::consts::ARCH,
        };
        f.write_str(name)
    }
}

/// How a host reaches a function of some foreign convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Callable as `extern "C"` without help
    Direct,
    /// Needs a generated trampoline
    Trampoline,
    /// Cannot be called from this host
    Unsupported,
}

/// Dispatch rule for `convention` on `host`
pub const fn dispatch(host: Host, convention: Convention) -> Dispatch {
    match (host, convention) {
        (Host::X86Windows, Convention::Cdecl) => Dispatch::Direct,
        (Host::X86Windows, _) => Dispatch::Trampoline,
        (Host::X86Other, Convention::Cdecl | Convention::Thiscall) => Dispatch::Direct,
        (Host::X86Other, _) => Dispatch::Trampoline,
        (Host::X86_64Windows, Convention::Register) => Dispatch::Unsupported,
        (Host::X86_64Windows, _) => Dispatch::Direct,
        (
            Host::X86_64Other,
            Convention::Cdecl | Convention::CdeclReturn4 | Convention::Thiscall,
        ) => Dispatch::Direct,
        (Host::X86_64Other, _) => Dispatch::Unsupported,
        (Host::Other, Convention::Cdecl) => Dispatch::Direct,
        (Host::Other, _) => Dispatch::Unsupported,
    }
}
