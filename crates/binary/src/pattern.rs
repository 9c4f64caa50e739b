//! Byte patterns with wildcards
//!
//! Used both for signature scanning and for verifying the bytes a patch
//! expects to overwrite.
//!
//! Supported notations:
//! - Spaced hex: `"55 8B ?? EC"`
//! - Escaped hex: `"\x55\x8B\x2A\xEC"`
//! - Contiguous hex: `"558B2AEC"`
//!
//! `?`, `??` and the byte `2A` are wildcards in every notation.

use std::fmt;

/// Byte value treated as a wildcard
pub const WILDCARD: u8 = 0x2A;

/// Errors produced while parsing hex byte strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Empty byte pattern")]
    Empty,

    #[error("Invalid hex byte: {0}")]
    InvalidByte(String),

    #[error("Odd number of hex digits: {0}")]
    OddLength(String),
}

/// A sequence of bytes where `None` matches anything
#[derive(Clone, PartialEq, Eq, Default)]
pub struct BytePattern {
    bytes: Vec<Option<u8>>,
}

impl BytePattern {
    /// Parse a pattern string
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let tokens = tokenize(pattern)?;

        let mut bytes = Vec::with_capacity(tokens.len());
        for token in tokens {
            if token == "?" || token == "??" {
                bytes.push(None);
                continue;
            }
            let byte = parse_byte(token)?;
            bytes.push(if byte == WILDCARD { None } else { Some(byte) });
        }

        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }

        Ok(Self { bytes })
    }

    /// Build a pattern from raw bytes, treating `0x2A` as a wildcard
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self {
            bytes: raw
                .iter()
                .map(|&b| if b == WILDCARD { None } else { Some(b) })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// Index of the first non-wildcard byte that differs from `data`
    ///
    /// A `data` shorter than the pattern mismatches at its end.
    pub fn first_mismatch(&self, data: &[u8]) -> Option<usize> {
        for (i, expected) in self.bytes.iter().enumerate() {
            let Some(actual) = data.get(i) else {
                return Some(i);
            };
            if let Some(byte) = expected {
                if byte != actual {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Check whether `data` starts with this pattern
    pub fn matches(&self, data: &[u8]) -> bool {
        self.first_mismatch(data).is_none()
    }

    /// Find the first offset in `haystack` where the pattern matches
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if self.bytes.is_empty() || haystack.len() < self.bytes.len() {
            return None;
        }

        let end = haystack.len() - self.bytes.len();
        (0..=end).find(|&offset| self.matches(&haystack[offset..]))
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(b) => write!(f, "{:02X}", b)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BytePattern({})", self)
    }
}

/// Parse a plain hex byte string, without wildcards
///
/// Whitespace and `\x` escapes are ignored, so `"90 90"`, `"9090"` and
/// `"\x90\x90"` all give the same two bytes.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, PatternError> {
    let tokens = tokenize(text)?;
    let bytes = tokens
        .into_iter()
        .map(parse_byte)
        .collect::<Result<Vec<u8>, _>>()?;

    if bytes.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(bytes)
}

/// Format bytes as spaced upper-case hex
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(text: &str) -> Result<Vec<&str>, PatternError> {
    let text = text.trim();

    if text.contains("\\x") {
        return Ok(text
            .split("\\x")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect());
    }

    if text.contains(char::is_whitespace) {
        return Ok(text.split_whitespace().collect());
    }

    if text.len() % 2 != 0 {
        return Err(PatternError::OddLength(text.to_string()));
    }

    // Contiguous hex, two characters per byte
    let mut tokens = Vec::with_capacity(text.len() / 2);
    let mut rest = text;
    while !rest.is_empty() {
        if !rest.is_char_boundary(2) {
            return Err(PatternError::InvalidByte(rest.to_string()));
        }
        let (token, tail) = rest.split_at(2);
        tokens.push(token);
        rest = tail;
    }
    Ok(tokens)
}

fn parse_byte(token: &str) -> Result<u8, PatternError> {
    if token.len() != 2 {
        return Err(PatternError::InvalidByte(token.to_string()));
    }
    u8::from_str_radix(token, 16).map_err(|_| PatternError::InvalidByte(token.to_string()))
}
