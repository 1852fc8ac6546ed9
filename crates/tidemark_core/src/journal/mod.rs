//! Checksummed append-only journal behind [`JournalStore`](crate::JournalStore).
//!
//! ## Record format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! The CRC covers header and payload. Replay stops cleanly at an incomplete
//! or checksum-failing final record and truncates it away; the same damage
//! earlier in the file is corruption.

mod record;
mod writer;

pub use record::{compute_crc32, JournalRecord, RecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use writer::{Journal, Replay};
