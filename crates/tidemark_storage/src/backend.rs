//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log holding one node's journal.
///
/// Backends do not interpret what they store. The journal frames each record
/// and decides which prefix of the log is valid on replay.
///
/// # Invariants
///
/// - `append` returns the offset the data starts at, which equals the
///   previous `size`
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, every appended byte survives process termination
/// - `truncate` only ever shortens the log
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends past the end of the log.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current length of the log in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the log back to `new_size` bytes.
    ///
    /// Used by replay to discard a torn final record.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole log.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
