//! 32-bit machine code emission for trampolines

use iced_x86::code_asm::*;

use memtools_sdk::Address;

use super::plan::{CallPlan, WORD};
use super::{CallTarget, TrampolineError};
use crate::abi::Register;

fn asm_register(register: Register) -> AsmRegister32 {
    match register {
        Register::Eax => eax,
        Register::Ecx => ecx,
        Register::Edx => edx,
    }
}

fn displacement(bytes: usize) -> Result<i32, TrampolineError> {
    i32::try_from(bytes).map_err(|_| TrampolineError::UnsupportedArgument {
        index: 0,
        size: bytes,
        reason: "stack displacement out of range",
    })
}

fn absolute(address: Address) -> Result<u32, TrampolineError> {
    u32::try_from(address.value()).map_err(|_| TrampolineError::TargetOutOfRange(address))
}

/// Assemble the trampoline body for `plan` calling `target`
///
/// Layout: load register arguments, re-push stack arguments (last word
/// first), load the target into a scratch register, call it, discard what
/// the callee left on the stack, return.
pub fn assemble(plan: &CallPlan, target: CallTarget) -> Result<Vec<u8>, TrampolineError> {
    let mut a = CodeAssembler::new(32)?;

    for (register, incoming) in plan.register_args() {
        a.mov(asm_register(register), dword_ptr(esp + displacement(incoming)?))?;
    }

    if plan.payload > 0 {
        let last_word = displacement(plan.first_stack_slot + plan.payload - WORD)?;
        for _ in 0..plan.payload / WORD {
            a.push(dword_ptr(esp + last_word))?;
        }
    }

    let scratch = asm_register(plan.scratch());
    match target {
        CallTarget::Absolute(address) => {
            a.mov(scratch, absolute(address)?)?;
        }
        CallTarget::Virtual { slot } => {
            // Receiver is the first host argument, now below the pushed payload
            let receiver = displacement(WORD + plan.payload)?;
            let entry = slot
                .checked_mul(WORD)
                .and_then(|bytes| i32::try_from(bytes).ok())
                .ok_or(TrampolineError::SlotOutOfRange(slot))?;
            a.mov(scratch, dword_ptr(esp + receiver))?;
            a.mov(scratch, dword_ptr(scratch))?;
            a.mov(scratch, dword_ptr(scratch + entry))?;
        }
    }
    a.call(scratch)?;

    let discard = plan.caller_cleanup();
    if discard > 0 {
        a.add(esp, displacement(discard)?)?;
    }
    a.ret()?;

    Ok(a.assemble(0)?)
}
