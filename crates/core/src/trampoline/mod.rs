//! Calling convention trampolines
//!
//! A trampoline is a small block of generated 32-bit x86 code with a cdecl
//! entry point. It moves the host's stack arguments into the places a
//! foreign convention expects them, calls the foreign function, and
//! restores the stack the way the host expects.
//!
//! ```text
//! host (cdecl) --> trampoline --> foreign (thiscall/fastcall/...)
//! ```
//!
//! Trampolines are built once per function and freed when dropped.

mod codegen;
mod exec;
mod plan;

use memtools_sdk::{Address, Convention};

use crate::abi::Host;

pub use codegen::assemble;
pub use exec::ExecutableBuffer;
pub use plan::{word_align, ArgSlot, CallPlan, Location, WORD};

/// Error type for trampoline construction
#[derive(Debug, thiserror::Error)]
pub enum TrampolineError {
    #[error("Convention {convention} cannot be called on {host}")]
    UnsupportedConvention { convention: Convention, host: Host },

    #[error("Argument {index} ({size} bytes) cannot be passed: {reason}")]
    UnsupportedArgument {
        index: usize,
        size: usize,
        reason: &'static str,
    },

    #[error("Call target {0} does not fit in 32 bits")]
    TargetOutOfRange(Address),

    #[error("Vtable slot {0} is out of range")]
    SlotOutOfRange(usize),

    #[error("Assembly failed: {0}")]
    Assembly(#[from] iced_x86::IcedError),

    #[error("Memory allocation failed: {0}")]
    Allocation(#[from] region::Error),
}

/// What a trampoline calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A fixed function address
    Absolute(Address),
    /// A vtable slot of the receiver passed as the first argument
    Virtual { slot: usize },
}

/// A generated bridge into a foreign convention
#[derive(Debug)]
pub struct Trampoline {
    plan: CallPlan,
    target: CallTarget,
    buffer: ExecutableBuffer,
}

impl Trampoline {
    /// Generate and install a trampoline
    ///
    /// `arg_sizes` are the byte sizes of the foreign arguments, receiver
    /// included.
    pub fn new(
        convention: Convention,
        arg_sizes: &[usize],
        target: CallTarget,
    ) -> Result<Self, TrampolineError> {
        let plan = CallPlan::new(convention, arg_sizes)?;
        let code = assemble(&plan, target)?;
        let buffer = ExecutableBuffer::new(&code)?;

        tracing::debug!(
            "Built {} trampoline at {} -> {:?} ({} bytes, {} bytes of stack arguments)",
            convention,
            buffer.entry(),
            target,
            code.len(),
            plan.payload
        );

        Ok(Self {
            plan,
            target,
            buffer,
        })
    }

    /// Host-callable entry point
    pub fn entry(&self) -> Address {
        self.buffer.entry()
    }

    pub fn code(&self) -> &[u8] {
        self.buffer.code()
    }

    pub fn plan(&self) -> &CallPlan {
        &self.plan
    }

    pub fn target(&self) -> CallTarget {
        self.target
    }

    pub fn convention(&self) -> Convention {
        self.plan.convention
    }
}
