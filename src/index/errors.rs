//! Index driver error types
//!
//! Error codes:
//! - BITINDEX_INVALID_KEYS (ERROR) - wrong key count for the index arity
//! - BITINDEX_INDEX_CORRUPTED (ERROR) - missing config or stray processing marker
//! - BITINDEX_UNMERGEABLE (ERROR) - lookups over different engine indexes
//! - BITINDEX_CYCLIC_LOOKUP (ERROR)
//! - BITINDEX_TYPE_MISMATCH / BITINDEX_UNKNOWN_TYPE (ERROR) - range filters
//! - BITINDEX_MAPPING_NOT_FOUND (ERROR)
//! - BITINDEX_SAVE_CANCELLED (ERROR)
//! - BITINDEX_IO_ERROR, BITINDEX_CONFIG_ERROR (ERROR)
//! - mapping and bitmap errors keep their own codes; corruption there is FATAL

use std::fmt;
use std::io;

use thiserror::Error;

use crate::bitmap::BitmapError;
use crate::key::KeyError;
use crate::mapping::MappingError;

/// Result type for index driver operations
pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Operation fails, the driver keeps serving
    Error,
    /// On-disk state can no longer be trusted
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("expecting {expected} keys for index {id:?}, got {got}")]
    InvalidKeys {
        expected: usize,
        id: String,
        got: usize,
    },

    #[error("the index db: {db}, table: {table}, id: {id} is corrupted")]
    Corrupted {
        db: String,
        table: String,
        id: String,
    },

    #[error("unmergeable type {0}")]
    Unmergeable(String),

    #[error("lookup references itself")]
    CyclicLookup,

    #[error("cannot compare type {left} with type {right}")]
    TypeMismatch {
        left: &'static str,
        right: &'static str,
    },

    #[error("unknown type {0} received as value")]
    UnknownType(&'static str),

    #[error("mapping not found for partition {0}")]
    MappingNotFound(String),

    #[error("save cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid index config: {0}")]
    Config(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Bitmap(#[from] BitmapError),

    #[error("{}", .0.join("\n"))]
    Aggregate(Vec<String>),

    #[error("iterator failed: {0}")]
    Iterator(String),
}

impl From<KeyError> for IndexError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::TypeMismatch { left, right } => IndexError::TypeMismatch { left, right },
            KeyError::UnknownType(t) => IndexError::UnknownType(t),
            KeyError::Decode(reason) => IndexError::Mapping(MappingError::Decode(reason)),
        }
    }
}

impl IndexError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        IndexError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupted(db: &str, table: &str, id: &str) -> Self {
        IndexError::Corrupted {
            db: db.to_string(),
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, IndexError::Corrupted { .. })
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::InvalidKeys { .. } => "BITINDEX_INVALID_KEYS",
            IndexError::Corrupted { .. } => "BITINDEX_INDEX_CORRUPTED",
            IndexError::Unmergeable(_) => "BITINDEX_UNMERGEABLE",
            IndexError::CyclicLookup => "BITINDEX_CYCLIC_LOOKUP",
            IndexError::TypeMismatch { .. } => "BITINDEX_TYPE_MISMATCH",
            IndexError::UnknownType(_) => "BITINDEX_UNKNOWN_TYPE",
            IndexError::MappingNotFound(_) => "BITINDEX_MAPPING_NOT_FOUND",
            IndexError::Cancelled => "BITINDEX_SAVE_CANCELLED",
            IndexError::Io { .. } => "BITINDEX_IO_ERROR",
            IndexError::Config(_) => "BITINDEX_CONFIG_ERROR",
            IndexError::Mapping(e) => e.code(),
            IndexError::Bitmap(e) => e.code(),
            IndexError::Aggregate(_) => "BITINDEX_LOAD_FAILED",
            IndexError::Iterator(_) => "BITINDEX_ITERATOR_FAILED",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            IndexError::Mapping(e) if e.is_fatal() => ErrorSeverity::Fatal,
            IndexError::Bitmap(e) if e.is_fatal() => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}
