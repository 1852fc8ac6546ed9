//! Journal record types and envelope encoding.

use crate::error::{StoreError, StoreResult};
use crate::sequence::SequenceSpace;
use serde::{Deserialize, Serialize};
use tidemark_protocol::{from_cbor, to_cbor, ClockId, Node, OplogEntry, Thing, Tsn};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"TMJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type tag stored in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A sequence value was issued outside a commit.
    SequenceIssued = 1,
    /// A node was added to the registry.
    NodeRegistered = 2,
    /// The store's own identity was bound.
    ClockBound = 3,
    /// A high-water-mark moved forward.
    HighAdvanced = 4,
    /// A local mutation was committed.
    LocalCommit = 5,
    /// A remote entry was applied.
    RemoteApply = 6,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::SequenceIssued),
            2 => Some(Self::NodeRegistered),
            3 => Some(Self::ClockBound),
            4 => Some(Self::HighAdvanced),
            5 => Some(Self::LocalCommit),
            6 => Some(Self::RemoteApply),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One durable state change of a node store.
///
/// Each record is self-contained: replaying the journal in order rebuilds
/// the exact in-memory state the store had when the record was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A sequence value was handed out.
    SequenceIssued {
        /// Sequence space.
        space: SequenceSpace,
        /// Issued value.
        value: Tsn,
    },
    /// A node was registered here, or imported from the registry that
    /// assigned it.
    NodeRegistered {
        /// The node record.
        node: Node,
        /// Imported records do not consume this store's node sequence.
        imported: bool,
    },
    /// The store's own clock id was bound.
    ClockBound {
        /// Bound identity.
        clock_id: ClockId,
    },
    /// A high-water-mark moved forward.
    HighAdvanced {
        /// Origin.
        clock_id: ClockId,
        /// New mark.
        tsn: Tsn,
    },
    /// A local mutation: issues the data tsn, applies the change, appends the
    /// entry and advances the own-origin mark.
    LocalCommit {
        /// The appended entry.
        entry: OplogEntry,
        /// Snapshot of the new value, absent for deletes.
        thing: Option<Thing>,
    },
    /// A remote entry applied and appended for relay.
    RemoteApply {
        /// The appended entry.
        entry: OplogEntry,
        /// Snapshot of the new value, absent for deletes.
        thing: Option<Thing>,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::SequenceIssued { .. } => RecordType::SequenceIssued,
            Self::NodeRegistered { .. } => RecordType::NodeRegistered,
            Self::ClockBound { .. } => RecordType::ClockBound,
            Self::HighAdvanced { .. } => RecordType::HighAdvanced,
            Self::LocalCommit { .. } => RecordType::LocalCommit,
            Self::RemoteApply { .. } => RecordType::RemoteApply,
        }
    }

    /// Encodes the record with its envelope and checksum.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let payload = to_cbor(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::corrupted(0, "journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Decodes a CBOR payload and checks it against the header type.
    pub fn decode_payload(record_type: RecordType, payload: &[u8], offset: u64) -> StoreResult<Self> {
        let record: JournalRecord = from_cbor(payload)?;
        if record.record_type() != record_type {
            return Err(StoreError::corrupted(
                offset,
                format!(
                    "header says {:?} but payload is {:?}",
                    record_type,
                    record.record_type()
                ),
            ));
        }
        Ok(record)
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_protocol::OpKind;

    #[test]
    fn record_type_bytes() {
        for t in [
            RecordType::SequenceIssued,
            RecordType::NodeRegistered,
            RecordType::ClockBound,
            RecordType::HighAdvanced,
            RecordType::LocalCommit,
            RecordType::RemoteApply,
        ] {
            assert_eq!(RecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(RecordType::from_byte(0), None);
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn envelope_layout() {
        let record = JournalRecord::HighAdvanced {
            clock_id: ClockId::new(2),
            tsn: Tsn::new(3),
        };
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[0..4], &JOURNAL_MAGIC);
        assert_eq!(bytes[6], RecordType::HighAdvanced.as_byte());

        let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
        assert_eq!(bytes.len(), HEADER_SIZE + len + CRC_SIZE);

        let payload = &bytes[HEADER_SIZE..HEADER_SIZE + len];
        let decoded = JournalRecord::decode_payload(RecordType::HighAdvanced, payload, 0).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn mismatched_header_type_is_corruption() {
        let record = JournalRecord::LocalCommit {
            entry: OplogEntry::new("t", ClockId::new(1), Tsn::new(1), OpKind::Delete, "k"),
            thing: None,
        };
        let bytes = record.encode().unwrap();
        let payload = &bytes[HEADER_SIZE..bytes.len() - CRC_SIZE];
        let err = JournalRecord::decode_payload(RecordType::RemoteApply, payload, 40).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { offset: 40, .. }));
    }
}
