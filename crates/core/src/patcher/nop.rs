//! Multi-byte NOP filler

/// Recommended multi-byte NOP encodings, indexed by length minus one
pub const NOP_CODES: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Exactly `size` bytes of NOPs, longest encodings first
pub fn no_op(size: usize) -> Vec<u8> {
    let longest = NOP_CODES[NOP_CODES.len() - 1];
    let mut filler = Vec::with_capacity(size);
    for _ in 0..size / longest.len() {
        filler.extend_from_slice(longest);
    }

    let rest = size % longest.len();
    if rest > 0 {
        filler.extend_from_slice(NOP_CODES[rest - 1]);
    }
    filler
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_lengths() {
        for (index, code) in NOP_CODES.iter().enumerate() {
            assert_eq!(code.len(), index + 1);
        }
    }

    #[test]
    fn test_filler_length() {
        for size in 0..40 {
            assert_eq!(no_op(size).len(), size, "size {size}");
        }
        assert!(no_op(0).is_empty());
    }

    #[test]
    fn test_filler_layout() {
        assert_eq!(no_op(1), vec![0x90]);
        assert_eq!(no_op(3), vec![0x0F, 0x1F, 0x00]);

        let eleven = no_op(11);
        assert_eq!(&eleven[..9], NOP_CODES[8]);
        assert_eq!(&eleven[9..], &[0x66, 0x90]);

        let eighteen = no_op(18);
        assert_eq!(&eighteen[..9], &eighteen[9..]);
    }
}
