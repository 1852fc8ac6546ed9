//! Error types for Tidemark core.
//!
//! [`StoreError`] is what the node store raises internally. Every public
//! [`Session`](crate::Session) operation folds it into a [`NodeError`]
//! before returning, so callers only ever see the boundary taxonomy.

use thiserror::Error;
use tidemark_protocol::{ClockId, LogicalTimestamp, ProtocolError, Tsn};
use tidemark_storage::StorageError;

/// Result type for store internals.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for public node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Faults raised inside a node store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Journal record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Journal is corrupted before its final record.
    #[error("journal corruption at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The store location could not be resolved.
    #[error("cannot open store: {0}")]
    Unreachable(String),

    /// Registration was attempted with an empty url.
    #[error("node url must not be empty")]
    EmptyUrl,

    /// The store already has a different identity bound.
    #[error("clock id already bound to {current}, refusing {requested}")]
    AlreadyBound {
        /// Identity already bound.
        current: ClockId,
        /// Identity that was requested.
        requested: ClockId,
    },

    /// A local mutation was attempted before an identity was bound.
    #[error("no clock id bound to this node")]
    Unbound,

    /// A high-water-mark was asked to move backwards.
    #[error("high-water-mark for {clock_id} is {current}, refusing {requested}")]
    Regression {
        /// Origin.
        clock_id: ClockId,
        /// Current mark.
        current: Tsn,
        /// Requested mark.
        requested: Tsn,
    },

    /// A high-water-mark was asked to pass entries that are not applied.
    #[error("high-water-mark for {clock_id} cannot pass {applied} (requested {requested})")]
    BeyondApplied {
        /// Origin.
        clock_id: ClockId,
        /// Highest applied tsn from that origin.
        applied: Tsn,
        /// Requested mark.
        requested: Tsn,
    },

    /// A remote entry arrived below an already applied tsn of its origin.
    #[error("entry {entry} arrived after {applied} was applied")]
    OutOfOrder {
        /// The rejected entry.
        entry: LogicalTimestamp,
        /// Highest applied tsn from that origin.
        applied: Tsn,
    },

    /// An insert or update arrived without a matching snapshot.
    #[error("entry {0} needs a snapshot with the same key and timestamp")]
    SnapshotMismatch(LogicalTimestamp),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if the backing store could not be reached.
    pub fn is_unreachable(&self) -> bool {
        match self {
            StoreError::Storage(e) => e.is_offline(),
            StoreError::Unreachable(_) => true,
            _ => false,
        }
    }

    /// Returns true if this is an identity assignment fault.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            StoreError::EmptyUrl | StoreError::AlreadyBound { .. } | StoreError::Unbound
        )
    }
}

/// Public operation a [`StoreError`] is folded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Reaching the store at all.
    Connect,
    /// Issuing a sequence value.
    Tsn,
    /// Assigning or binding an identity.
    Register,
    /// Reading the replication frontier.
    HighRead,
    /// Moving a high-water-mark.
    HighAdvance,
    /// Reading the oplog.
    OplogRead,
    /// Committing a local mutation.
    Mutate,
    /// Any other read or write.
    Other,
}

impl StoreError {
    /// Folds this fault into the taxonomy of `op`.
    pub(crate) fn fold(self, op: Operation) -> NodeError {
        if let StoreError::Regression {
            clock_id,
            current,
            requested,
        } = self
        {
            return NodeError::HighWaterRegression {
                clock_id,
                current,
                requested,
            };
        }
        if self.is_registration() {
            return NodeError::Registration(self.to_string());
        }

        let unreachable = self.is_unreachable();
        let message = self.to_string();
        match op {
            Operation::Tsn => NodeError::TsnUnavailable(message),
            Operation::Mutate if unreachable => NodeError::TsnUnavailable(message),
            Operation::HighRead => NodeError::HighWaterRead(message),
            Operation::OplogRead => NodeError::OplogRead(message),
            Operation::Connect => NodeError::Connection(message),
            _ if unreachable => NodeError::Connection(message),
            _ => NodeError::OperationFailed(message),
        }
    }
}

/// Errors returned by public node operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The backing store is unreachable. Retryable by the caller.
    #[error("connection error: {0}")]
    Connection(String),

    /// Identity assignment was invalid or conflicting.
    #[error("registration error: {0}")]
    Registration(String),

    /// No timestamp could be issued; the mutation was not recorded.
    #[error("tsn unavailable: {0}")]
    TsnUnavailable(String),

    /// The oplog could not be read.
    #[error("oplog read error: {0}")]
    OplogRead(String),

    /// The replication frontier could not be read.
    #[error("high-water-mark read error: {0}")]
    HighWaterRead(String),

    /// A high-water-mark was asked to move backwards.
    #[error("high-water-mark for {clock_id} is {current}, refusing {requested}")]
    HighWaterRegression {
        /// Origin.
        clock_id: ClockId,
        /// Current mark.
        current: Tsn,
        /// Requested mark.
        requested: Tsn,
    },

    /// The requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object class is not on the allow-list.
    #[error("unknown object class: {0:?}")]
    UnknownObjectClass(String),

    /// Any other fault, folded at the boundary.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl NodeError {
    /// Returns true if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::Connection(_)
                | NodeError::TsnUnavailable(_)
                | NodeError::OplogRead(_)
                | NodeError::HighWaterRead(_)
        )
    }

    /// Returns true for the expected "absent" signal of point lookups.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::NotFound(_))
    }
}
