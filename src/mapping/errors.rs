//! Mapping store error types
//!
//! Error codes:
//! - BITINDEX_MAPPING_BUCKET_NOT_FOUND (ERROR)
//! - BITINDEX_MAPPING_IO_ERROR (ERROR)
//! - BITINDEX_MAPPING_CORRUPTION (FATAL)
//! - BITINDEX_MAPPING_NOT_OPEN (ERROR)
//! - BITINDEX_MAPPING_NO_TRANSACTION (ERROR)
//! - BITINDEX_MAPPING_TRANSACTION_ACTIVE (ERROR)
//! - BITINDEX_MAPPING_DECODE_FAILED (ERROR)

use std::io;

use thiserror::Error;

/// Result type for mapping operations
pub type MappingResult<T> = Result<T, MappingError>;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("bucket {0} not found")]
    BucketNotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A committed record failed its checksum or could not be parsed
    #[error("mapping log corrupted at byte {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("mapping is not open")]
    NotOpen,

    /// A write was attempted outside `open_create`
    #[error("no write transaction is open")]
    NoTransaction,

    #[error("a write transaction is already open")]
    TransactionActive,

    #[error("cannot decode mapping value: {0}")]
    Decode(String),
}

impl MappingError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        MappingError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        MappingError::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::BucketNotFound(_) => "BITINDEX_MAPPING_BUCKET_NOT_FOUND",
            MappingError::Io { .. } => "BITINDEX_MAPPING_IO_ERROR",
            MappingError::Corruption { .. } => "BITINDEX_MAPPING_CORRUPTION",
            MappingError::NotOpen => "BITINDEX_MAPPING_NOT_OPEN",
            MappingError::NoTransaction => "BITINDEX_MAPPING_NO_TRANSACTION",
            MappingError::TransactionActive => "BITINDEX_MAPPING_TRANSACTION_ACTIVE",
            MappingError::Decode(_) => "BITINDEX_MAPPING_DECODE_FAILED",
        }
    }

    /// Corruption of committed data cannot be repaired in place
    pub fn is_fatal(&self) -> bool {
        matches!(self, MappingError::Corruption { .. })
    }
}
