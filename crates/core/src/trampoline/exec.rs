//! Executable memory for trampolines
//!
//! Each trampoline owns its own allocation. The code is written while the
//! pages are read-write, then the pages are flipped to read-execute.

use memtools_sdk::Address;
use region::{Allocation, Protection};

use super::TrampolineError;

/// An owned block of executable code
pub struct ExecutableBuffer {
    allocation: Allocation,
    len: usize,
}

// SAFETY: The buffer is immutable after construction
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Copy `code` into a fresh executable allocation
    pub fn new(code: &[u8]) -> Result<Self, TrampolineError> {
        let mut allocation = region::alloc(code.len().max(1), Protection::READ_WRITE)?;

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), allocation.as_mut_ptr::<u8>(), code.len());
            region::protect(
                allocation.as_ptr::<u8>(),
                allocation.len(),
                Protection::READ_EXECUTE,
            )?;
        }

        Ok(Self {
            allocation,
            len: code.len(),
        })
    }

    /// Address of the first instruction
    pub fn entry(&self) -> Address {
        Address::from_ptr(self.allocation.as_ptr::<u8>())
    }

    /// The code as written
    pub fn code(&self) -> &[u8] {
        // SAFETY: the allocation holds at least `len` initialized bytes
        unsafe { std::slice::from_raw_parts(self.allocation.as_ptr::<u8>(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for ExecutableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableBuffer")
            .field("entry", &self.entry())
            .field("len", &self.len)
            .finish()
    }
}
