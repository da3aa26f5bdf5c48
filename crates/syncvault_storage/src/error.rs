//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while moving containers in and out of a store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The copied byte count did not match the source size.
    #[error("size mismatch: expected {expected} bytes, copied {actual}")]
    SizeMismatch {
        /// Size of the source.
        expected: u64,
        /// Number of bytes actually copied.
        actual: u64,
    },

    /// The store location cannot be used.
    #[error("invalid location: {0}")]
    InvalidLocation(String),
}
