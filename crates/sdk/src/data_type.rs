//! Primitive data type tags
//!
//! These are the type tags accepted in `type`, `args` and `return_type`
//! entries of a type description.

use std::ffi::c_long;
use std::fmt;
use std::str::FromStr;

use crate::address::POINTER_SIZE;

/// Primitive foreign data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Pointer,
    /// `char*`, read as a NUL-terminated string
    String,
}

/// Storage class of a data type, used for compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    Void,
    Bool,
    Signed(usize),
    Unsigned(usize),
    Float(usize),
    Pointer,
}

impl DataType {
    /// All tags, in declaration order
    pub const ALL: [DataType; 16] = [
        DataType::Void,
        DataType::Bool,
        DataType::Char,
        DataType::UChar,
        DataType::Short,
        DataType::UShort,
        DataType::Int,
        DataType::UInt,
        DataType::Long,
        DataType::ULong,
        DataType::LongLong,
        DataType::ULongLong,
        DataType::Float,
        DataType::Double,
        DataType::Pointer,
        DataType::String,
    ];

    /// Size in bytes on the host
    pub const fn size(self) -> usize {
        match self {
            DataType::Void => 0,
            DataType::Bool | DataType::Char | DataType::UChar => 1,
            DataType::Short | DataType::UShort => 2,
            DataType::Int | DataType::UInt | DataType::Float => 4,
            DataType::Long | DataType::ULong => std::mem::size_of::<c_long>(),
            DataType::LongLong | DataType::ULongLong | DataType::Double => 8,
            DataType::Pointer | DataType::String => POINTER_SIZE,
        }
    }

    /// Storage class of this tag
    pub const fn repr(self) -> Repr {
        match self {
            DataType::Void => Repr::Void,
            DataType::Bool => Repr::Bool,
            DataType::Char | DataType::Short | DataType::Int | DataType::Long | DataType::LongLong => {
                Repr::Signed(self.size())
            }
            DataType::UChar
            | DataType::UShort
            | DataType::UInt
            | DataType::ULong
            | DataType::ULongLong => Repr::Unsigned(self.size()),
            DataType::Float | DataType::Double => Repr::Float(self.size()),
            DataType::Pointer | DataType::String => Repr::Pointer,
        }
    }

    /// Two tags are compatible when they share a storage class
    ///
    /// `LONG` is compatible with `INT` or `LONG_LONG` depending on the host.
    pub fn is_compatible(self, other: DataType) -> bool {
        self.repr() == other.repr()
    }

    pub const fn is_void(self) -> bool {
        matches!(self, DataType::Void)
    }

    /// Configuration tag for this type
    pub const fn name(self) -> &'static str {
        match self {
            DataType::Void => "VOID",
            DataType::Bool => "BOOL",
            DataType::Char => "CHAR",
            DataType::UChar => "UCHAR",
            DataType::Short => "SHORT",
            DataType::UShort => "USHORT",
            DataType::Int => "INT",
            DataType::UInt => "UINT",
            DataType::Long => "LONG",
            DataType::ULong => "ULONG",
            DataType::LongLong => "LONG_LONG",
            DataType::ULongLong => "ULONG_LONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Pointer => "POINTER",
            DataType::String => "STRING",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a type tag is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data type: {0}")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    /// Tags are case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        DataType::ALL
            .into_iter()
            .find(|dt| dt.name().eq_ignore_ascii_case(tag))
            .ok_or_else(|| UnknownDataType(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!("INT".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!("long_long".parse::<DataType>().unwrap(), DataType::LongLong);
        assert_eq!(" pointer ".parse::<DataType>().unwrap(), DataType::Pointer);
        assert!("INT128".parse::<DataType>().is_err());
    }

    #[test]
    fn test_unknown_data_type_error() {
        let err = "INT128".parse::<DataType>().unwrap_err();
        assert_eq!(err, UnknownDataType("INT128".to_string()));
        assert_eq!(err.to_string(), "unknown data type: INT128");
    }

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::Void.size(), 0);
        assert_eq!(DataType::UChar.size(), 1);
        assert_eq!(DataType::Short.size(), 2);
        assert_eq!(DataType::Float.size(), 4);
        assert_eq!(DataType::Double.size(), 8);
        assert_eq!(DataType::Pointer.size(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_compatibility() {
        assert!(DataType::String.is_compatible(DataType::Pointer));
        assert!(!DataType::Int.is_compatible(DataType::UInt));
        assert!(!DataType::Float.is_compatible(DataType::Int));
        let long_peer = if DataType::Long.size() == 8 {
            DataType::LongLong
        } else {
            DataType::Int
        };
        assert!(DataType::Long.is_compatible(long_peer));
    }

    #[test]
    fn test_name_roundtrip() {
        for dt in DataType::ALL {
            assert_eq!(dt.name().parse::<DataType>().unwrap(), dt);
        }
    }
}
