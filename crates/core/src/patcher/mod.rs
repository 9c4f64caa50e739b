//! Reversible binary patches
//!
//! A [`Patch`] owns a byte range of foreign code. It captures the original
//! bytes on construction and can swap the replacement bytes in and out any
//! number of times. Two live patches never overlap.
//!
//! ```text
//! Patch::new --> Reverted <--apply/revert--> Applied
//!                    \                        /
//!                     `------- drop --------'   (applied patches revert first)
//! ```

mod jmp;
mod nop;
mod patchers;
mod registry;

use memtools_binary::{format_bytes, BytePattern, PatternError, ResolveError};
use memtools_sdk::Address;
use tracing::info;

use crate::config::ConfigError;
use crate::memory::{make_writable, read_bytes, write_bytes};

pub use jmp::{jmp_bytes, make_jmp};
pub use nop::{no_op, NOP_CODES};
pub use patchers::Patchers;
pub use registry::{is_live, live_count, overlaps, PatchKey};

/// Error type for patch construction
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Patch at {0} covers no bytes")]
    Empty(Address),

    #[error("{what} are {len} bytes, the patch is {size} bytes: {bytes}")]
    OpCodesTooLong {
        what: &'static str,
        len: usize,
        size: usize,
        bytes: String,
    },

    #[error("Patch at {address} (+{size}) overlaps the live patch at {other} (+{other_size})")]
    Overlap {
        address: Address,
        size: usize,
        other: Address,
        other_size: usize,
    },

    #[error("Original bytes at {address} do not match:\n    original: {observed}\n    expected: {expected}")]
    Verification {
        address: Address,
        observed: String,
        expected: String,
    },

    #[error("Failed to make {address} writable: {source}")]
    Protection {
        address: Address,
        source: region::Error,
    },

    #[error("Jump from {from} to {to} does not fit a {width}-bit displacement")]
    JumpOutOfRange {
        from: Address,
        to: Address,
        width: u32,
    },

    #[error("Encoding failed: {0}")]
    Encoding(#[from] iced_x86::IcedError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Patch '{name}': {source}")]
    Named {
        name: String,
        source: Box<PatchError>,
    },
}

/// A reversible replacement of `size` bytes of foreign memory
#[derive(Debug)]
pub struct Patch {
    key: PatchKey,
    address: Address,
    op_codes: Vec<u8>,
    original: Vec<u8>,
    applied: bool,
}

impl Patch {
    /// Reserve `address..address + size` and capture its bytes
    ///
    /// `op_codes` are padded with NOPs up to `size`; without them the whole
    /// range becomes NOPs. With `base_op_codes`, the current bytes must
    /// match the template (wildcards excepted) before anything is written.
    ///
    /// The patch starts reverted.
    ///
    /// # Safety
    /// `address..address + size` must be mapped memory that nothing else
    /// modifies while the patch is alive.
    pub unsafe fn new(
        address: Address,
        size: usize,
        op_codes: Option<&[u8]>,
        base_op_codes: Option<&BytePattern>,
    ) -> Result<Self, PatchError> {
        if size == 0 {
            return Err(PatchError::Empty(address));
        }
        let op_codes = op_codes.unwrap_or_default();
        if op_codes.len() > size {
            return Err(PatchError::OpCodesTooLong {
                what: "op_codes",
                len: op_codes.len(),
                size,
                bytes: format_bytes(op_codes),
            });
        }
        if let Some(template) = base_op_codes {
            if template.len() > size {
                return Err(PatchError::OpCodesTooLong {
                    what: "base_op_codes",
                    len: template.len(),
                    size,
                    bytes: template.to_string(),
                });
            }
        }

        let mut live = registry::lock();
        if let Some(other) = registry::find_overlap(&live, address, size) {
            return Err(PatchError::Overlap {
                address,
                size,
                other: other.address,
                other_size: other.size,
            });
        }

        let original = read_bytes(address, size);
        if let Some(template) = base_op_codes {
            let observed = &original[..template.len()];
            if !template.matches(observed) {
                return Err(PatchError::Verification {
                    address,
                    observed: format_bytes(observed),
                    expected: template.to_string(),
                });
            }
        }

        make_writable(address, size).map_err(|source| PatchError::Protection { address, source })?;

        let key = live.insert(registry::Reservation { address, size });
        drop(live);

        let mut bytes = op_codes.to_vec();
        bytes.extend(no_op(size - op_codes.len()));

        tracing::debug!(
            "Created patch at {} ({} bytes): {}",
            address,
            size,
            format_bytes(&bytes)
        );

        Ok(Self {
            key,
            address,
            op_codes: bytes,
            original,
            applied: false,
        })
    }

    pub fn key(&self) -> PatchKey {
        self.key
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn size(&self) -> usize {
        self.original.len()
    }

    /// Replacement bytes, padded to the patch size
    pub fn op_codes(&self) -> &[u8] {
        &self.op_codes
    }

    /// Bytes captured at construction
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Write the replacement bytes
    pub fn apply(&mut self) {
        if self.applied {
            return;
        }
        // SAFETY: the range was made writable and reserved in `Patch::new`
        unsafe { write_bytes(self.address, &self.op_codes) };
        self.applied = true;
        info!("Applied patch at {} ({} bytes)", self.address, self.size());
    }

    /// Restore the original bytes
    pub fn revert(&mut self) {
        if !self.applied {
            return;
        }
        // SAFETY: the range was made writable and reserved in `Patch::new`
        unsafe { write_bytes(self.address, &self.original) };
        self.applied = false;
        info!("Reverted patch at {} ({} bytes)", self.address, self.size());
    }

    pub fn set(&mut self, applied: bool) {
        if applied {
            self.apply();
        } else {
            self.revert();
        }
    }

    pub fn toggle(&mut self) {
        self.set(!self.applied);
    }
}

impl Drop for Patch {
    fn drop(&mut self) {
        self.revert();
        registry::release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_address(buffer: &mut [u8]) -> Address {
        Address::from_mut_ptr(buffer.as_mut_ptr())
    }

    #[test]
    fn test_apply_revert_cycles() {
        let mut code = vec![0x74u8, 0x05, 0x8B, 0x45, 0x08, 0xC3];
        let address = buffer_address(&mut code);
        let mut patch = unsafe { Patch::new(address, 5, Some(&[0xEB]), None) }.unwrap();

        assert!(!patch.is_applied());
        assert_eq!(patch.op_codes(), &[0xEB, 0x0F, 0x1F, 0x40, 0x00]);
        assert_eq!(patch.original(), &[0x74, 0x05, 0x8B, 0x45, 0x08]);

        for _ in 0..3 {
            patch.apply();
            patch.apply();
            assert_eq!(unsafe { read_bytes(address, 6) }, vec![0xEB, 0x0F, 0x1F, 0x40, 0x00, 0xC3]);
            patch.revert();
            patch.revert();
            assert_eq!(unsafe { read_bytes(address, 6) }, vec![0x74, 0x05, 0x8B, 0x45, 0x08, 0xC3]);
        }

        patch.toggle();
        assert!(patch.is_applied());
        patch.toggle();
        assert!(!patch.is_applied());
        assert_eq!(unsafe { read_bytes(address, 5) }, patch.original());

        patch.set(true);
        assert!(patch.is_applied());
        drop(patch);
        assert_eq!(code, vec![0x74, 0x05, 0x8B, 0x45, 0x08, 0xC3]);
    }

    #[test]
    fn test_default_op_codes_are_nops() {
        let mut code = vec![0xCCu8; 4];
        let address = buffer_address(&mut code);
        let mut patch = unsafe { Patch::new(address, 4, None, None) }.unwrap();
        patch.apply();
        assert_eq!(unsafe { read_bytes(address, 4) }, NOP_CODES[3].to_vec());
    }

    #[test]
    fn test_op_codes_too_long() {
        let mut code = vec![0u8; 8];
        let address = buffer_address(&mut code);

        let err = unsafe { Patch::new(address, 2, Some(&[0x90, 0x90, 0x90]), None) }.unwrap_err();
        assert!(matches!(
            err,
            PatchError::OpCodesTooLong { what: "op_codes", len: 3, size: 2, .. }
        ));

        let template = BytePattern::parse("00 00 00").unwrap();
        let err = unsafe { Patch::new(address, 2, None, Some(&template)) }.unwrap_err();
        assert!(matches!(err, PatchError::OpCodesTooLong { what: "base_op_codes", .. }));
    }

    #[test]
    fn test_empty_patch_rejected() {
        let mut code = vec![0u8; 4];
        let address = buffer_address(&mut code);

        let err = unsafe { Patch::new(address, 0, None, None) }.unwrap_err();
        assert!(matches!(err, PatchError::Empty(at) if at == address));
    }

    #[test]
    fn test_overlap_and_adjacent() {
        let mut code = vec![0u8; 16];
        let address = buffer_address(&mut code);

        let first = unsafe { Patch::new(address, 4, None, None) }.unwrap();
        let adjacent = unsafe { Patch::new(address + 4usize, 4, None, None) }.unwrap();
        assert!(is_live(first.key()));
        assert!(is_live(adjacent.key()));

        let err = unsafe { Patch::new(address + 2usize, 4, None, None) }.unwrap_err();
        match err {
            PatchError::Overlap { other, other_size, .. } => {
                assert_eq!(other, address);
                assert_eq!(other_size, 4);
            }
            other => panic!("unexpected error {other}"),
        }

        // Reverted patches still hold their range
        let err = unsafe { Patch::new(address + 6usize, 1, None, None) }.unwrap_err();
        assert!(matches!(err, PatchError::Overlap { .. }));

        let key = first.key();
        drop(first);
        assert!(!is_live(key));
        let replacement = unsafe { Patch::new(address + 2usize, 2, None, None) }.unwrap();
        assert!(is_live(replacement.key()));
    }

    #[test]
    fn test_template_verification() {
        let mut code = vec![0x55u8, 0x8B, 0xEC, 0x83, 0xEC, 0x10];
        let address = buffer_address(&mut code);

        let matching = BytePattern::parse("55 2A EC ?? EC").unwrap();
        let patch = unsafe { Patch::new(address, 6, Some(&[0xC3]), Some(&matching)) }.unwrap();
        drop(patch);

        let wrong = BytePattern::parse("55 8B ED").unwrap();
        let err = unsafe { Patch::new(address, 6, Some(&[0xC3]), Some(&wrong)) }.unwrap_err();
        match err {
            PatchError::Verification { observed, expected, .. } => {
                assert_eq!(observed, "55 8B EC");
                assert_eq!(expected, "55 8B ED");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(code[0], 0x55);
    }
}
