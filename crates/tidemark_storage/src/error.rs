//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// Attempted to truncate beyond the end of the log.
    #[error("cannot truncate to {requested}: log is only {size} bytes")]
    TruncatePastEnd {
        /// The requested new size.
        requested: u64,
        /// The current log size.
        size: u64,
    },

    /// The backend cannot be reached.
    #[error("storage offline: {0}")]
    Offline(String),
}

impl StorageError {
    /// Returns true if the backend is unreachable rather than broken.
    pub fn is_offline(&self) -> bool {
        matches!(self, StorageError::Offline(_))
    }
}
