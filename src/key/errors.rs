//! Key codec and comparison errors

use thiserror::Error;

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors raised while encoding, decoding or comparing index keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Two keys of different underlying types were compared
    #[error("cannot compare type {left} with type {right}")]
    TypeMismatch { left: &'static str, right: &'static str },

    /// A value kind that cannot be ordered or indexed
    #[error("unknown type {0} received as value")]
    UnknownType(&'static str),

    /// Encoded bytes are malformed
    #[error("cannot decode key: {0}")]
    Decode(String),
}

impl KeyError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            KeyError::TypeMismatch { .. } => "BITINDEX_KEY_TYPE_MISMATCH",
            KeyError::UnknownType(_) => "BITINDEX_KEY_UNKNOWN_TYPE",
            KeyError::Decode(_) => "BITINDEX_KEY_DECODE_FAILED",
        }
    }
}
