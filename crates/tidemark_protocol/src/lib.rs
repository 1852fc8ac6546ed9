//! # Tidemark Protocol
//!
//! Replication data model and peer messages for Tidemark.
//!
//! This crate provides:
//! - Logical clock identifiers (`ClockId`, `Tsn`, `LogicalTimestamp`)
//! - Oplog entries, high-water-marks, node records and thing snapshots
//! - Peer request/response messages with CBOR codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entry;
mod error;
mod messages;
mod records;
mod types;

pub use codec::{from_cbor, to_cbor};
pub use entry::{OpKind, OplogEntry, OplogPage};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{Envelope, PeerRequest, PeerResponse, RemoteError, RemoteErrorKind, PROTOCOL_VERSION};
pub use records::{HighWaterMark, Node, Thing};
pub use types::{ClockId, LogicalTimestamp, Tsn};
