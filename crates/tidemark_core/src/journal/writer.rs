//! Journal writer and replay.

use super::record::{
    compute_crc32, JournalRecord, RecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION,
};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use tidemark_storage::StorageBackend;
use tracing::{debug, warn};

/// Append-only record log over a storage backend.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

/// Outcome of reading a journal from the start.
#[derive(Debug, Default)]
pub struct Replay {
    /// Valid records in write order.
    pub records: Vec<JournalRecord>,
    /// Offset the journal was cut back to, if a torn tail was dropped.
    pub truncated_at: Option<u64>,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends one record and returns the offset it was written at.
    pub fn append(&self, record: &JournalRecord) -> StoreResult<u64> {
        let data = record.encode()?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.sync()?;
        }
        debug!(offset, kind = ?record.record_type(), bytes = data.len(), "journal append");
        Ok(offset)
    }

    /// Round-trips to the backend without changing anything.
    pub fn ping(&self) -> StoreResult<()> {
        self.backend.lock().size()?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Forces buffered records to durable storage.
    pub fn sync(&self) -> StoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Reads every record from the start.
    ///
    /// A final record that is incomplete or fails its checksum is the result
    /// of an interrupted write: it is dropped and the journal is truncated to
    /// the end of the last good record. Damage anywhere before the final
    /// record is reported as corruption.
    pub fn replay(&self) -> StoreResult<Replay> {
        let mut backend = self.backend.lock();
        let data = backend.read_all()?;
        let end = data.len();

        let mut replay = Replay::default();
        let mut pos = 0usize;

        while pos < end {
            let offset = pos as u64;
            if end - pos < HEADER_SIZE {
                replay.truncated_at = Some(offset);
                break;
            }

            let header = &data[pos..pos + HEADER_SIZE];
            if header[0..4] != JOURNAL_MAGIC {
                return Err(StoreError::corrupted(offset, "invalid magic"));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version > JOURNAL_VERSION {
                return Err(StoreError::corrupted(
                    offset,
                    format!("unsupported version {version}"),
                ));
            }
            let type_byte = header[6];
            let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
                StoreError::corrupted(offset, format!("unknown record type {type_byte}"))
            })?;
            let payload_len =
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

            let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
            if end - pos < total_len {
                replay.truncated_at = Some(offset);
                break;
            }

            let payload_end = pos + HEADER_SIZE + payload_len;
            let stored_crc = u32::from_le_bytes([
                data[payload_end],
                data[payload_end + 1],
                data[payload_end + 2],
                data[payload_end + 3],
            ]);
            let computed_crc = compute_crc32(&data[pos..payload_end]);
            if stored_crc != computed_crc {
                if pos + total_len == end {
                    replay.truncated_at = Some(offset);
                    break;
                }
                return Err(StoreError::corrupted(
                    offset,
                    format!("checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
                ));
            }

            let payload = &data[pos + HEADER_SIZE..payload_end];
            replay
                .records
                .push(JournalRecord::decode_payload(record_type, payload, offset)?);
            pos += total_len;
        }

        if let Some(offset) = replay.truncated_at {
            warn!(
                offset,
                dropped = end as u64 - offset,
                "discarding torn journal tail"
            );
            backend.truncate(offset)?;
            backend.sync()?;
        }

        Ok(replay)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceSpace;
    use tidemark_protocol::{ClockId, Tsn};
    use tidemark_storage::InMemoryBackend;

    fn issued(value: i64) -> JournalRecord {
        JournalRecord::SequenceIssued {
            space: SequenceSpace::Data,
            value: Tsn::new(value),
        }
    }

    #[test]
    fn replay_empty() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        let replay = journal.replay().unwrap();
        assert!(replay.records.is_empty());
        assert!(replay.truncated_at.is_none());
    }

    #[test]
    fn append_then_replay() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), true);
        let first = journal.append(&issued(1)).unwrap();
        let second = journal
            .append(&JournalRecord::ClockBound {
                clock_id: ClockId::new(4),
            })
            .unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let replay = journal.replay().unwrap();
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.records[0], issued(1));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()), false);
        journal.append(&issued(1)).unwrap();
        let good_size = journal.size().unwrap();
        journal.append(&issued(2)).unwrap();

        let mut bytes = backend.data();
        bytes.truncate(bytes.len() - 3);
        let journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let replay = journal.replay().unwrap();
        assert_eq!(replay.records, vec![issued(1)]);
        assert_eq!(replay.truncated_at, Some(good_size));
        assert_eq!(journal.size().unwrap(), good_size);
    }

    #[test]
    fn bad_checksum_on_last_record_is_torn() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()), false);
        journal.append(&issued(1)).unwrap();
        journal.append(&issued(2)).unwrap();

        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let replay = journal.replay().unwrap();
        assert_eq!(replay.records, vec![issued(1)]);
        assert!(replay.truncated_at.is_some());
    }

    #[test]
    fn bad_checksum_mid_journal_is_corruption() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()), false);
        journal.append(&issued(1)).unwrap();
        let first_end = journal.size().unwrap() as usize;
        journal.append(&issued(2)).unwrap();

        let mut bytes = backend.data();
        bytes[first_end - 1] ^= 0xFF;
        let journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let err = journal.replay().unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { offset: 0, .. }));
    }

    #[test]
    fn offline_backend_fails_ping() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()), false);
        journal.ping().unwrap();
        backend.set_offline(true);
        assert!(journal.ping().unwrap_err().is_unreachable());
        assert!(journal.append(&issued(1)).unwrap_err().is_unreachable());
    }
}
