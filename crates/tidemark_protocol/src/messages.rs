//! Peer protocol messages.
//!
//! A puller sends a [`PeerRequest`] to the node it pulls from and gets one
//! [`PeerResponse`] back. Both travel inside an [`Envelope`] carrying the
//! protocol version.

use crate::codec::{from_cbor, to_cbor};
use crate::entry::OplogPage;
use crate::error::{ProtocolError, ProtocolResult};
use crate::records::{HighWaterMark, Thing};
use crate::types::{ClockId, Tsn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current peer protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// A request served by the source side of an anti-entropy pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRequest {
    /// Ask for the peer's own clock id.
    Identity,
    /// Ask for the peer's full replication frontier.
    RemoteHighs,
    /// Ask for the peer's mark for one origin.
    CheckHigh {
        /// Origin to query.
        clock_id: ClockId,
    },
    /// Ask for the oplog tail of one origin.
    OplogTail {
        /// Origin to read.
        clock_id: ClockId,
        /// Exclusive lower bound.
        since: Tsn,
        /// Maximum number of entries.
        limit: u32,
    },
    /// Ask for one materialized snapshot.
    Thing {
        /// Object class name.
        class: String,
        /// Origin of the version.
        clock_id: ClockId,
        /// Version within the origin.
        tsn: Tsn,
    },
}

impl PeerRequest {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            PeerRequest::Identity => "identity",
            PeerRequest::RemoteHighs => "remote_highs",
            PeerRequest::CheckHigh { .. } => "check_high",
            PeerRequest::OplogTail { .. } => "oplog_tail",
            PeerRequest::Thing { .. } => "thing",
        }
    }
}

/// The answer to a [`PeerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerResponse {
    /// The peer's identity, if bound.
    Identity {
        /// Bound clock id.
        clock_id: Option<ClockId>,
    },
    /// The peer's frontier.
    RemoteHighs(Vec<HighWaterMark>),
    /// One mark.
    High(Tsn),
    /// One page of an oplog tail.
    OplogTail(OplogPage),
    /// A snapshot, or `None` when the version is unknown.
    Thing(Option<Thing>),
    /// The request failed on the peer.
    Error(RemoteError),
}

/// Failure category reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// The peer's store is unreachable.
    Connection,
    /// Identity assignment failed.
    Registration,
    /// The peer could not issue a tsn.
    TsnUnavailable,
    /// The peer could not read its oplog.
    OplogRead,
    /// The peer could not read its frontier.
    HighWaterRead,
    /// The requested item does not exist.
    NotFound,
    /// The object class is not served.
    UnknownObjectClass,
    /// The request was malformed.
    BadRequest,
    /// Any other failure.
    OperationFailed,
}

/// An error reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category.
    pub kind: RemoteErrorKind,
    /// Human readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A versioned message frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version of the sender.
    pub version: u16,
    /// The message.
    pub body: T,
}

impl<T: Serialize + DeserializeOwned> Envelope<T> {
    /// Wraps a message with the current protocol version.
    pub fn new(body: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            body,
        }
    }

    /// Encodes the envelope to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes an envelope and unwraps the message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::VersionMismatch`] when the sender uses a
    /// different protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<T> {
        let envelope: Envelope<T> = from_cbor(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: envelope.version,
            });
        }
        Ok(envelope.body)
    }
}
