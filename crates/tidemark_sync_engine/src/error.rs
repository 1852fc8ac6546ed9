//! Error types for the sync engine.

use thiserror::Error;
use tidemark_core::NodeError;
use tidemark_protocol::{LogicalTimestamp, ProtocolError, Tsn};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync attempt.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The pulling node's own store failed.
    #[error("local node error: {0}")]
    Local(NodeError),

    /// The source peer reported a failure.
    #[error("peer error: {0}")]
    Peer(NodeError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The peer sent something malformed or inconsistent.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer returned an entry that does not extend the tail.
    #[error("entry {entry} does not follow {after}")]
    OutOfOrder {
        /// The offending entry.
        entry: LogicalTimestamp,
        /// The tsn it had to exceed.
        after: Tsn,
    },

    /// The peer has no snapshot for an insert or update it logged.
    #[error("peer has no snapshot of {class} {timestamp}")]
    MissingSnapshot {
        /// Object class.
        class: String,
        /// Version that was requested.
        timestamp: LogicalTimestamp,
    },

    /// Not connected.
    #[error("not connected to peer")]
    NotConnected,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A scheduled attempt did not run to completion.
    #[error("sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Local(e) | SyncError::Peer(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
