//! The address resolution boundary
//!
//! Everything in `memtools-core` that needs a foreign address goes through
//! [`AddressResolver`]. The core never scans memory itself.

use memtools_sdk::Address;

use crate::error::ResolveError;
use crate::pattern::BytePattern;

/// Resolves symbolic descriptions to addresses in the current process
pub trait AddressResolver {
    /// Resolve `identifier` inside `binary`
    ///
    /// The identifier's address is offset by `offset` bytes and then
    /// dereferenced `level` times. With `srv_check`, the binary must be a
    /// server build.
    fn resolve(
        &self,
        binary: &str,
        identifier: &str,
        offset: isize,
        level: usize,
        srv_check: bool,
    ) -> Result<Address, ResolveError>;

    /// Resolve the identifier itself, without offset or dereference
    fn find_address(
        &self,
        binary: &str,
        identifier: &str,
        srv_check: bool,
    ) -> Result<Address, ResolveError> {
        self.resolve(binary, identifier, 0, 0, srv_check)
    }
}

impl<T: AddressResolver + ?Sized> AddressResolver for &T {
    fn resolve(
        &self,
        binary: &str,
        identifier: &str,
        offset: isize,
        level: usize,
        srv_check: bool,
    ) -> Result<Address, ResolveError> {
        (**self).resolve(binary, identifier, offset, level, srv_check)
    }
}

/// What an identifier string refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// A byte signature to scan for
    Signature(BytePattern),
    /// An exported symbol name
    Symbol(String),
}

impl Identifier {
    /// Interpret an identifier string
    ///
    /// A signature is written with separated bytes (`55 8B`), `\x` escapes
    /// or `?` wildcards and must parse as a byte pattern. Everything else,
    /// including bare hex words such as `DEADBEEF`, is a symbol name.
    pub fn parse(identifier: &str) -> Result<Self, ResolveError> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::InvalidSignature("empty identifier".to_string()));
        }

        if !looks_like_signature(trimmed) {
            return Ok(Identifier::Symbol(trimmed.to_string()));
        }
        match BytePattern::parse(trimmed) {
            Ok(pattern) => Ok(Identifier::Signature(pattern)),
            Err(_) => Ok(Identifier::Symbol(trimmed.to_string())),
        }
    }
}

fn looks_like_signature(identifier: &str) -> bool {
    identifier.contains(char::is_whitespace) || identifier.contains("\\x") || identifier.contains('?')
}

/// Follow a pointer chain starting at `address`
///
/// # Safety
/// Every address in the chain must be readable for one pointer.
pub unsafe fn follow_pointers(
    binary: &str,
    identifier: &str,
    mut address: Address,
    level: usize,
) -> Result<Address, ResolveError> {
    for current in 0..level {
        address = address.deref();
        if address.is_null() {
            return Err(ResolveError::NullPointer {
                binary: binary.to_string(),
                identifier: identifier.to_string(),
                level: current + 1,
            });
        }
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parse() {
        assert!(matches!(
            Identifier::parse("55 8B EC ??").unwrap(),
            Identifier::Signature(_)
        ));
        assert!(matches!(
            Identifier::parse("\\x55\\x8B\\xEC").unwrap(),
            Identifier::Signature(_)
        ));
        assert_eq!(
            Identifier::parse("_ZN11CBaseEntity6ThinkEv").unwrap(),
            Identifier::Symbol("_ZN11CBaseEntity6ThinkEv".to_string())
        );
        assert!(Identifier::parse("  ").is_err());
    }

    #[test]
    fn test_hex_word_is_a_symbol() {
        for name in ["FACE", "DEADBEEF", "E8", "cafe01"] {
            assert_eq!(Identifier::parse(name).unwrap(), Identifier::Symbol(name.to_string()));
        }
        assert!(matches!(Identifier::parse("DE AD BE EF").unwrap(), Identifier::Signature(_)));
        assert!(matches!(Identifier::parse("E8 ?").unwrap(), Identifier::Signature(_)));
    }

    #[test]
    fn test_follow_pointers() {
        let value = 99u32;
        let first: usize = &value as *const u32 as usize;
        let second: usize = &first as *const usize as usize;
        let start = Address::from_ptr(&second as *const usize);

        unsafe {
            let resolved = follow_pointers("server", "id", start, 2).unwrap();
            assert_eq!(resolved, Address::new(first));
            assert_eq!(resolved.read::<u32>(), 99);
        }
    }

    #[test]
    fn test_follow_pointers_null() {
        let null: usize = 0;
        let start = Address::from_ptr(&null as *const usize);

        let err = unsafe { follow_pointers("server", "id", start, 1) }.unwrap_err();
        assert!(matches!(err, ResolveError::NullPointer { level: 1, .. }));
    }
}
