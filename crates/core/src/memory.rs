//! Raw memory access
//!
//! Typed reads and writes at foreign addresses, protection changes, and the
//! mapping between Rust types and [`DataType`] tags.

use std::ffi::{c_char, c_long, c_ulong, CStr};

use memtools_sdk::{Address, DataType};

use crate::config::{ConfigError, ConfigResult};

/// A dynamically typed value read from or written to foreign memory
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Pointer(Address),
    /// A `char*`; `None` when the pointer is null
    String(Option<String>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Pointer(_) => "pointer",
            Value::String(_) => "string",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match *self {
            Value::Pointer(address) => Some(address),
            _ => None,
        }
    }
}

/// A value that cannot be stored as the requested type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot store a {found} value as {expected}")]
pub struct TypeMismatch {
    pub expected: DataType,
    pub found: &'static str,
}

/// Read a value of type `ty` at `address`
///
/// # Safety
/// `address` must be readable for `ty.size()` bytes. For `STRING`, the
/// stored pointer must be null or point at a NUL-terminated string.
pub unsafe fn read_value(address: Address, ty: DataType) -> Value {
    match ty {
        DataType::Void => Value::Void,
        DataType::Bool => Value::Bool(address.read::<u8>() != 0),
        DataType::Char => Value::Int(address.read::<i8>() as i64),
        DataType::UChar => Value::UInt(address.read::<u8>() as u64),
        DataType::Short => Value::Int(address.read::<i16>() as i64),
        DataType::UShort => Value::UInt(address.read::<u16>() as u64),
        DataType::Int => Value::Int(address.read::<i32>() as i64),
        DataType::UInt => Value::UInt(address.read::<u32>() as u64),
        DataType::Long => Value::Int(address.read::<c_long>() as i64),
        DataType::ULong => Value::UInt(address.read::<c_ulong>() as u64),
        DataType::LongLong => Value::Int(address.read::<i64>()),
        DataType::ULongLong => Value::UInt(address.read::<u64>()),
        DataType::Float => Value::Float(address.read::<f32>() as f64),
        DataType::Double => Value::Float(address.read::<f64>()),
        DataType::Pointer => Value::Pointer(address.deref()),
        DataType::String => Value::String(read_c_string(address.deref())),
    }
}

/// Write `value` at `address` as type `ty`
///
/// Integers are truncated to the width of `ty`. A `STRING` slot only takes a
/// raw pointer.
///
/// # Safety
/// `address` must be writable for `ty.size()` bytes.
pub unsafe fn write_value(address: Address, ty: DataType, value: &Value) -> Result<(), TypeMismatch> {
    let mismatch = || TypeMismatch {
        expected: ty,
        found: value.kind(),
    };

    match (ty, value) {
        (DataType::Bool, Value::Bool(v)) => address.write::<u8>(*v as u8),
        (DataType::Float, Value::Float(v)) => address.write::<f32>(*v as f32),
        (DataType::Float, Value::Int(v)) => address.write::<f32>(*v as f32),
        (DataType::Double, Value::Float(v)) => address.write::<f64>(*v),
        (DataType::Double, Value::Int(v)) => address.write::<f64>(*v as f64),
        (DataType::Pointer | DataType::String, Value::Pointer(p)) => address.write::<usize>(p.value()),
        (_, Value::Int(_) | Value::UInt(_)) => {
            let bits = match *value {
                Value::Int(v) => v as u64,
                Value::UInt(v) => v,
                _ => return Err(mismatch()),
            };
            match ty {
                DataType::Char | DataType::UChar => address.write::<u8>(bits as u8),
                DataType::Short | DataType::UShort => address.write::<u16>(bits as u16),
                DataType::Int | DataType::UInt => address.write::<u32>(bits as u32),
                DataType::Long | DataType::ULong => address.write::<c_ulong>(bits as c_ulong),
                DataType::LongLong | DataType::ULongLong => address.write::<u64>(bits),
                _ => return Err(mismatch()),
            }
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Read a NUL-terminated string
///
/// # Safety
/// `address` must be null or point at a NUL-terminated string.
pub unsafe fn read_c_string(address: Address) -> Option<String> {
    if address.is_null() {
        return None;
    }
    Some(
        CStr::from_ptr(address.as_ptr::<c_char>())
            .to_string_lossy()
            .into_owned(),
    )
}

/// Read a signed `size`-byte operand
///
/// Only 1- and 4-byte operands are encoded in the instructions this is used
/// on.
///
/// # Safety
/// `address` must be readable for `size` bytes.
pub unsafe fn read_signed(address: Address, size: usize) -> ConfigResult<isize> {
    match size {
        1 => Ok(address.read::<i8>() as isize),
        4 => Ok(address.read::<i32>() as isize),
        other => Err(ConfigError::UnsupportedOperandSize(other)),
    }
}

/// Resolve a relative displacement
///
/// The displacement is a signed `size`-byte value at `base + offset`, and
/// is relative to the end of that operand.
///
/// # Safety
/// `base + offset` must be readable for `size` bytes.
pub unsafe fn relative_target(base: Address, offset: isize, size: usize) -> ConfigResult<Address> {
    let displacement = read_signed(base + offset, size)?;
    Ok(base + displacement + offset + size as isize)
}

/// Copy `len` bytes out of foreign memory
///
/// # Safety
/// `address` must be readable for `len` bytes.
pub unsafe fn read_bytes(address: Address, len: usize) -> Vec<u8> {
    std::slice::from_raw_parts(address.as_ptr::<u8>(), len).to_vec()
}

/// Copy `bytes` into foreign memory
///
/// # Safety
/// `address` must be writable for `bytes.len()` bytes and must not overlap
/// `bytes`.
pub unsafe fn write_bytes(address: Address, bytes: &[u8]) {
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_mut_ptr::<u8>(), bytes.len());
}

/// Add write access to every page in `address..address + size`
///
/// Pages that are already writable are left alone.
///
/// # Safety
/// Changing protection of foreign code pages is inherently unsafe; the
/// caller owns the consequences.
pub unsafe fn make_writable(address: Address, size: usize) -> Result<(), region::Error> {
    for page in region::query_range(address.as_ptr::<u8>(), size.max(1))? {
        let page = page?;
        let protection = page.protection();
        if !protection.contains(region::Protection::WRITE) {
            region::protect(
                page.as_ptr::<u8>(),
                page.len(),
                protection | region::Protection::WRITE,
            )?;
            tracing::trace!("Unprotected {:#x} ({} bytes)", page.as_ptr::<u8>() as usize, page.len());
        }
    }
    Ok(())
}

/// A Rust type with a fixed foreign representation
///
/// # Safety
/// `DATA_TYPE` must describe the layout of `Self` exactly.
pub unsafe trait NativeType: Copy {
    const DATA_TYPE: DataType;

    /// Read a value of this type
    ///
    /// # Safety
    /// `address` must be readable for `size_of::<Self>()` bytes.
    unsafe fn read_from(address: Address) -> Self {
        address.read::<Self>()
    }
}

macro_rules! native_type {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            unsafe impl NativeType for $ty {
                const DATA_TYPE: DataType = DataType::$tag;
            }
        )*
    };
}

native_type! {
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => LongLong,
    u64 => ULongLong,
    f32 => Float,
    f64 => Double,
    Address => Pointer,
}

unsafe impl NativeType for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    unsafe fn read_from(address: Address) -> Self {
        address.read::<u8>() != 0
    }
}

unsafe impl<T> NativeType for *const T {
    const DATA_TYPE: DataType = DataType::Pointer;
}

unsafe impl<T> NativeType for *mut T {
    const DATA_TYPE: DataType = DataType::Pointer;
}

/// A type a foreign function may return
pub trait NativeReturn {
    const DATA_TYPE: DataType;
}

impl<T: NativeType> NativeReturn for T {
    const DATA_TYPE: DataType = T::DATA_TYPE;
}

impl NativeReturn for () {
    const DATA_TYPE: DataType = DataType::Void;
}
