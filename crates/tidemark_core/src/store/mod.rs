//! Durable node state.
//!
//! Everything a node persists lives behind [`NodeStore`]: the registry, the
//! sequence counters, the oplog, the high-water-marks, retained snapshots and
//! the replicated tables. [`JournalStore`] is the shipped implementation.

mod journal_store;
mod state;

pub use journal_store::JournalStore;

use crate::error::StoreResult;
use crate::sequence::SequenceSpace;
use tidemark_protocol::{ClockId, HighWaterMark, Node, OplogEntry, OplogPage, Thing, Tsn};

/// A local change to one key of a replicated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMutation {
    /// Object class (table) being changed.
    pub table: String,
    /// Key being changed.
    pub key: String,
    /// The change itself.
    pub change: Change,
}

/// What a [`LocalMutation`] does to its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Write a value, inserting or overwriting.
    Put {
        /// New value.
        value: Vec<u8>,
        /// Opaque payload retained with the snapshot.
        payload: Vec<u8>,
    },
    /// Remove the key.
    Delete,
}

impl LocalMutation {
    /// Creates a put mutation.
    pub fn put(table: impl Into<String>, key: impl Into<String>, value: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            change: Change::Put { value, payload },
        }
    }

    /// Creates a delete mutation.
    pub fn delete(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            change: Change::Delete,
        }
    }
}

/// Durable state of one node.
///
/// Every mutating method is atomic: it either persists its whole effect or
/// none of it. Implementations must be safe to share across threads.
pub trait NodeStore: Send + Sync {
    /// Round-trips to the backing store.
    fn ping(&self) -> StoreResult<()>;

    /// Issues the next value of a sequence space.
    fn next_tsn(&self, space: SequenceSpace) -> StoreResult<Tsn>;

    /// Returns the last issued value of a sequence space.
    fn current_tsn(&self, space: SequenceSpace) -> StoreResult<Tsn>;

    /// Registers a url, or returns the existing record for it.
    fn register_node(&self, url: &str, metadata: &[u8]) -> StoreResult<Node>;

    /// Records a node assigned by another registry.
    fn import_node(&self, node: &Node) -> StoreResult<()>;

    /// Looks up a registered node.
    fn node(&self, clock_id: ClockId) -> StoreResult<Option<Node>>;

    /// Lists registered nodes by clock id.
    fn nodes(&self) -> StoreResult<Vec<Node>>;

    /// Binds this store's own identity.
    fn bind_clock_id(&self, clock_id: ClockId) -> StoreResult<()>;

    /// Returns this store's own identity, if bound.
    fn my_clock_id(&self) -> StoreResult<Option<ClockId>>;

    /// Returns every known high-water-mark, ascending by clock id.
    fn remote_highs(&self) -> StoreResult<Vec<HighWaterMark>>;

    /// Returns the mark for one origin, zero if unseen.
    fn check_high(&self, clock_id: ClockId) -> StoreResult<Tsn>;

    /// Moves the mark for one origin forward.
    fn advance_high(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<()>;

    /// Moves the mark for one origin to at least `tsn` and returns the
    /// resulting mark. Never fails because another writer got there first.
    fn raise_high(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<Tsn>;

    /// Returns up to `limit` entries of `clock_id` with tsn above `since`.
    fn oplog_page(&self, clock_id: ClockId, since: Tsn, limit: usize) -> StoreResult<OplogPage>;

    /// Timestamps and commits a local mutation.
    ///
    /// Returns `None` when the mutation is a no-op (deleting an absent key).
    fn commit_local(&self, mutation: LocalMutation) -> StoreResult<Option<OplogEntry>>;

    /// Applies a remote entry and appends it to the local oplog.
    ///
    /// Returns `false` if the entry was already present.
    fn apply_remote(&self, entry: &OplogEntry, thing: Option<&Thing>) -> StoreResult<bool>;

    /// Returns the retained snapshot for one version of one key.
    fn thing(&self, table: &str, clock_id: ClockId, tsn: Tsn) -> StoreResult<Option<Thing>>;

    /// Reads the current value of a key.
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Lists the keys of a table in order.
    fn keys(&self, table: &str) -> StoreResult<Vec<String>>;
}
