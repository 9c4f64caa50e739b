//! Error types for address resolution

/// Error type for address resolution operations
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No binary with this name was registered
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    /// `srv_check` was requested but the binary is not a server build
    #[error("Binary is not a server build: {0}")]
    NotServerBinary(String),

    /// Signature string could not be parsed
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature did not match anywhere in the binary
    #[error("Signature not found in {binary}: {identifier}")]
    SignatureNotFound { binary: String, identifier: String },

    /// Symbol is not exported by the binary
    #[error("Symbol not found in {binary}: {symbol}")]
    SymbolNotFound { binary: String, symbol: String },

    /// A dereference in the pointer chain produced null
    #[error("Null pointer at level {level} while resolving {identifier} in {binary}")]
    NullPointer {
        binary: String,
        identifier: String,
        level: usize,
    },
}
