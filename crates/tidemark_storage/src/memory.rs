//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A volatile, in-memory journal log.
///
/// Clones share the same bytes, so a clone kept by a test can reopen a store
/// over the log another store wrote, or take the log offline to simulate an
/// unreachable backing store.
///
/// # Example
///
/// ```rust
/// use tidemark_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let handle = backend.clone();
/// backend.append(b"abc").unwrap();
/// assert_eq!(handle.size().unwrap(), 3);
///
/// handle.set_offline(true);
/// assert!(backend.append(b"d").unwrap_err().is_offline());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    ///
    /// Useful for replaying hand-crafted or truncated journals.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the log.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent call fail with [`StorageError::Offline`]
    /// until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Offline("in-memory log switched offline".into()))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.check_online()?;
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_online()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_online()?;
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_online()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_online()?;
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_previous_size() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn clones_share_the_log() {
        let mut backend = InMemoryBackend::new();
        let reopened = backend.clone();
        backend.append(b"shared").unwrap();
        assert_eq!(reopened.data(), b"shared");
    }

    #[test]
    fn offline_rejects_everything() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        backend.set_offline(true);

        assert!(backend.append(b"x").unwrap_err().is_offline());
        assert!(backend.size().unwrap_err().is_offline());
        assert!(backend.sync().is_err());

        backend.set_offline(false);
        assert_eq!(backend.append(b"d").unwrap(), 3);
    }

    #[test]
    fn truncate_discards_tail() {
        let mut backend = InMemoryBackend::with_data(b"complete+torn".to_vec());
        backend.truncate(8).unwrap();
        assert_eq!(backend.data(), b"complete");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncatePastEnd { requested: 100, size: 8 })
        ));
    }
}
