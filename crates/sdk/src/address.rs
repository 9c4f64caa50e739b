//! Foreign address type
//!
//! An `Address` is a plain integer location inside the current process.
//! It never owns the memory it points at; the foreign module does.

use std::ffi::c_void;
use std::fmt;
use std::ops::{Add, Sub};

/// Size of a native pointer on the host
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A memory location in the current process
///
/// Equality is bit-exact and arithmetic is byte-offset arithmetic.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    /// The null address
    pub const NULL: Address = Address(0);

    /// Create an address from a raw integer
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// Create an address from a raw pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Create an address from a mutable raw pointer
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    /// Raw integer value
    pub const fn value(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset by a signed number of bytes (wrapping)
    pub const fn offset(self, bytes: isize) -> Self {
        Self(self.0.wrapping_add_signed(bytes))
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// View as an untyped C pointer
    pub fn as_void(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Read a `T` at this address
    ///
    /// # Safety
    /// The address must be readable for `size_of::<T>()` bytes and hold a valid `T`.
    #[inline]
    pub unsafe fn read<T: Copy>(self) -> T {
        self.as_ptr::<T>().read_unaligned()
    }

    /// Write a `T` at this address
    ///
    /// # Safety
    /// The address must be writable for `size_of::<T>()` bytes.
    #[inline]
    pub unsafe fn write<T: Copy>(self, value: T) {
        self.as_mut_ptr::<T>().write_unaligned(value)
    }

    /// Read the pointer stored at this address
    ///
    /// # Safety
    /// The address must be readable for one pointer.
    #[inline]
    pub unsafe fn deref(self) -> Address {
        Address(self.read::<usize>())
    }
}

impl Add<isize> for Address {
    type Output = Address;

    fn add(self, rhs: isize) -> Address {
        self.offset(rhs)
    }
}

impl Add<usize> for Address {
    type Output = Address;

    fn add(self, rhs: usize) -> Address {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<Address> for Address {
    type Output = isize;

    fn sub(self, rhs: Address) -> isize {
        self.0.wrapping_sub(rhs.0) as isize
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<Address> for usize {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl<T> From<*const T> for Address {
    fn from(ptr: *const T) -> Self {
        Self::from_ptr(ptr)
    }
}

impl<T> From<*mut T> for Address {
    fn from(ptr: *mut T) -> Self {
        Self::from_mut_ptr(ptr)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_arithmetic() {
        let base = Address::new(0x1000);
        assert_eq!(base + 0x20isize, Address::new(0x1020));
        assert_eq!(base + (-0x10isize), Address::new(0xFF0));
        assert_eq!(base + 4usize, Address::new(0x1004));
        assert_eq!(Address::new(0x1025) - base, 0x25);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let mut buffer = [0u8; 16];
        let address = Address::from_mut_ptr(buffer.as_mut_ptr());

        unsafe {
            (address + 4usize).write::<i32>(42);
            assert_eq!((address + 4usize).read::<i32>(), 42);
        }
        assert_eq!(&buffer[4..8], &42i32.to_le_bytes());
    }

    #[test]
    fn test_deref() {
        let value = 7u32;
        let slot: usize = &value as *const u32 as usize;
        let address = Address::from_ptr(&slot as *const usize);

        unsafe {
            assert_eq!(address.deref(), Address::new(slot));
            assert_eq!(address.deref().read::<u32>(), 7);
        }
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(Address::new(0xdead).to_string(), "0xdead");
        assert_eq!(format!("{:x}", Address::new(0xbeef)), "beef");
    }
}
