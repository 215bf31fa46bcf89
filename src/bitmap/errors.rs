//! Bitmap engine error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for bitmap engine operations
pub type BitmapResult<T> = Result<T, BitmapError>;

#[derive(Debug, Error)]
pub enum BitmapError {
    #[error("field {0} not found")]
    FieldNotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A persisted field failed validation
    #[error("bitmap field {path} corrupted: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("cannot import {rows} rows with {cols} columns")]
    LengthMismatch { rows: usize, cols: usize },
}

impl BitmapError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BitmapError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BitmapError::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BitmapError::FieldNotFound(_) => "BITINDEX_BITMAP_FIELD_NOT_FOUND",
            BitmapError::Io { .. } => "BITINDEX_BITMAP_IO_ERROR",
            BitmapError::Corruption { .. } => "BITINDEX_BITMAP_CORRUPTION",
            BitmapError::LengthMismatch { .. } => "BITINDEX_BITMAP_LENGTH_MISMATCH",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BitmapError::Corruption { .. })
    }
}
