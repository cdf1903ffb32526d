use thiserror::Error;

/// Errors from parsing or encoding the primitive types.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Hex string had the wrong length for a 32-byte hash.
    #[error("invalid block hash length, expected 64 hex chars, got {0}")]
    InvalidHashLength(usize),

    /// Hex string contained non-hex characters.
    #[error("invalid hex in block hash: {0}")]
    InvalidHex(String),

    /// Unknown chain name.
    #[error("unknown chain '{0}'")]
    UnknownChain(String),
}
