//! Jump patches

use iced_x86::{Code, Encoder, Instruction};

use memtools_sdk::Address;

use super::{Patch, PatchError};

const BITNESS: u32 = if cfg!(target_pointer_width = "64") { 64 } else { 32 };

/// Encode a relative jump placed at `base` that lands on `dest`
///
/// Short jumps are `EB rel8`, near jumps `E9 rel32`.
pub fn jmp_bytes(base: Address, dest: Address, short: bool) -> Result<Vec<u8>, PatchError> {
    let (code, length, width) = match (short, BITNESS) {
        (true, 64) => (Code::Jmp_rel8_64, 2, 8),
        (true, _) => (Code::Jmp_rel8_32, 2, 8),
        (false, 64) => (Code::Jmp_rel32_64, 5, 32),
        (false, _) => (Code::Jmp_rel32_32, 5, 32),
    };

    let displacement = dest.value() as i128 - (base.value() as i128 + length);
    let fits = if short {
        i8::try_from(displacement).is_ok()
    } else {
        i32::try_from(displacement).is_ok()
    };
    if !fits {
        return Err(PatchError::JumpOutOfRange {
            from: base,
            to: dest,
            width,
        });
    }

    let instruction = Instruction::with_branch(code, dest.value() as u64)?;
    let mut encoder = Encoder::try_new(BITNESS)?;
    encoder.encode(&instruction, base.value() as u64)?;
    Ok(encoder.take_buffer())
}

/// Create a patch that jumps from `base` to `dest`
///
/// # Safety
/// See [`Patch::new`].
pub unsafe fn make_jmp(base: Address, dest: Address, short: bool) -> Result<Patch, PatchError> {
    let bytes = jmp_bytes(base, dest, short)?;
    Patch::new(base, bytes.len(), Some(&bytes), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::read_bytes;

    #[test]
    fn test_jmp_encodings() {
        let base = Address::new(0x1000);

        assert_eq!(jmp_bytes(base, Address::new(0x1010), true).unwrap(), vec![0xEB, 0x0E]);
        assert_eq!(jmp_bytes(Address::new(0x1010), base, true).unwrap(), vec![0xEB, 0xEE]);
        assert_eq!(
            jmp_bytes(base, Address::new(0x1010), false).unwrap(),
            vec![0xE9, 0x0B, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            jmp_bytes(base, Address::new(0x0F00), false).unwrap(),
            vec![0xE9, 0xFB, 0xFE, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_short_jump_out_of_range() {
        let err = jmp_bytes(Address::new(0x1000), Address::new(0x1200), true).unwrap_err();
        assert!(matches!(err, PatchError::JumpOutOfRange { width: 8, .. }));

        // rel8 reaches 127 bytes past the instruction
        assert!(jmp_bytes(Address::new(0x1000), Address::new(0x1081), true).is_ok());
        assert!(jmp_bytes(Address::new(0x1000), Address::new(0x1082), true).is_err());
    }

    #[test]
    fn test_make_jmp_patch() {
        let mut code = vec![0x90u8; 32];
        let base = Address::from_mut_ptr(code.as_mut_ptr());

        let mut patch = unsafe { make_jmp(base, base + 0x10usize, true) }.unwrap();
        assert_eq!(patch.size(), 2);

        patch.apply();
        assert_eq!(unsafe { read_bytes(base, 3) }, vec![0xEB, 0x0E, 0x90]);

        drop(patch);
        assert_eq!(&code[..2], &[0x90, 0x90]);
    }
}
