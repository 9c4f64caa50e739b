//! Argument placement for a foreign call
//!
//! Offsets are measured from `esp` on entry to the trampoline, where `[esp]`
//! is the return address and the host's cdecl arguments follow in order.

use memtools_sdk::Convention;

use super::TrampolineError;
use crate::abi::{AbiDescriptor, Cleanup, Register};

/// Size of one stack word on 32-bit x86
pub const WORD: usize = 4;

/// Round a byte size up to whole stack words
pub const fn word_align(size: usize) -> usize {
    size.div_ceil(WORD) * WORD
}

/// Where one argument travels to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Register),
    Stack,
}

/// One argument of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSlot {
    pub size: usize,
    /// Offset of the argument on the incoming stack
    pub incoming: usize,
    pub location: Location,
}

/// Complete placement of a call's arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    pub convention: Convention,
    pub args: Vec<ArgSlot>,
    /// Bytes of stack arguments pushed for the foreign call
    pub payload: usize,
    /// Incoming offset of the first stack-bound argument
    pub first_stack_slot: usize,
    pub cleanup: Cleanup,
}

impl CallPlan {
    /// Place `arg_sizes` according to `convention`
    ///
    /// Registers are filled from the leading arguments. The first register
    /// argument must fit in a word. Once a later argument does not fit, it
    /// and every argument after it go on the stack.
    pub fn new(convention: Convention, arg_sizes: &[usize]) -> Result<Self, TrampolineError> {
        let abi = AbiDescriptor::of(convention);

        let mut args = Vec::with_capacity(arg_sizes.len());
        let mut registers = abi.registers.iter().copied();
        let mut in_registers = true;
        let mut incoming = WORD;

        for (index, &size) in arg_sizes.iter().enumerate() {
            if size == 0 {
                return Err(TrampolineError::UnsupportedArgument {
                    index,
                    size,
                    reason: "zero-sized argument",
                });
            }

            let mut location = Location::Stack;
            if in_registers {
                match registers.next() {
                    Some(register) if size <= WORD => location = Location::Register(register),
                    Some(_) if index == 0 => {
                        return Err(TrampolineError::UnsupportedArgument {
                            index,
                            size,
                            reason: "first register argument must fit in a word",
                        });
                    }
                    _ => in_registers = false,
                }
            }

            if location == Location::Stack && !abi.stack_arguments {
                return Err(TrampolineError::UnsupportedArgument {
                    index,
                    size,
                    reason: "convention takes no stack arguments",
                });
            }

            args.push(ArgSlot {
                size,
                incoming,
                location,
            });
            incoming += word_align(size);
        }

        let first_stack_slot = args
            .iter()
            .find(|slot| slot.location == Location::Stack)
            .map_or(incoming, |slot| slot.incoming);
        let payload = args
            .iter()
            .filter(|slot| slot.location == Location::Stack)
            .map(|slot| word_align(slot.size))
            .sum();

        if let Cleanup::CalleePops(popped) = abi.cleanup {
            if payload < popped {
                return Err(TrampolineError::UnsupportedArgument {
                    index: 0,
                    size: payload,
                    reason: "callee pops more bytes than are passed",
                });
            }
        }

        Ok(Self {
            convention,
            args,
            payload,
            first_stack_slot,
            cleanup: abi.cleanup,
        })
    }

    /// Arguments passed in registers, in argument order
    pub fn register_args(&self) -> impl Iterator<Item = (Register, usize)> + '_ {
        self.args.iter().filter_map(|slot| match slot.location {
            Location::Register(register) => Some((register, slot.incoming)),
            Location::Stack => None,
        })
    }

    /// First register not used for arguments
    pub fn scratch(&self) -> Register {
        Register::SCRATCH
            .into_iter()
            .find(|candidate| self.register_args().all(|(used, _)| used != *candidate))
            .unwrap_or(Register::Eax)
    }

    /// Bytes the trampoline discards after the foreign call returns
    pub fn caller_cleanup(&self) -> usize {
        match self.cleanup {
            Cleanup::Caller => self.payload,
            Cleanup::Callee => 0,
            Cleanup::CalleePops(popped) => self.payload - popped,
        }
    }
}
