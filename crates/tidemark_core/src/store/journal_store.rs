//! Journal-backed node store.

use super::state::StoreState;
use super::{LocalMutation, NodeStore};
use crate::error::StoreResult;
use crate::journal::{Journal, JournalRecord};
use crate::sequence::SequenceSpace;
use parking_lot::RwLock;
use std::path::Path;
use tidemark_protocol::{ClockId, HighWaterMark, Node, OplogEntry, OplogPage, Thing, Tsn};
use tidemark_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::debug;

/// A [`NodeStore`] that keeps its state in memory and journals every change.
///
/// Writers hold the state lock while the record is appended, so the journal
/// order is the order in which changes became visible. Readers round-trip to
/// the backend first, which makes an unreachable backend visible to reads as
/// well as writes.
pub struct JournalStore {
    journal: Journal,
    state: RwLock<StoreState>,
}

impl JournalStore {
    /// Opens a store over `backend`, replaying any existing journal.
    pub fn open(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> StoreResult<Self> {
        let journal = Journal::new(backend, sync_on_write);
        let replay = journal.replay()?;

        let mut state = StoreState::default();
        for record in &replay.records {
            state.apply(record);
        }
        debug!(
            records = replay.records.len(),
            clock_id = ?state.my_clock_id(),
            "journal replayed"
        );

        Ok(Self {
            journal,
            state: RwLock::new(state),
        })
    }

    /// Opens an empty volatile store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), false)
    }

    /// Opens or creates a store backed by the file at `path`.
    pub fn open_file(path: &Path, sync_on_write: bool) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), sync_on_write)
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.journal.size()
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R> {
        self.journal.ping()?;
        Ok(f(&self.state.read()))
    }

    /// Plans under the write lock, journals the record, then applies it.
    ///
    /// A plan that records nothing still round-trips to the backend, so an
    /// unreachable store fails writes whether or not they change state.
    fn write<R>(
        &self,
        plan: impl FnOnce(&StoreState) -> StoreResult<(Option<JournalRecord>, R)>,
    ) -> StoreResult<R> {
        let mut state = self.state.write();
        let (record, out) = plan(&state)?;
        match record {
            Some(record) => {
                self.journal.append(&record)?;
                state.apply(&record);
            }
            None => self.journal.ping()?,
        }
        Ok(out)
    }
}

impl NodeStore for JournalStore {
    fn ping(&self) -> StoreResult<()> {
        self.journal.ping()
    }

    fn next_tsn(&self, space: SequenceSpace) -> StoreResult<Tsn> {
        self.write(|state| {
            let record = state.plan_issue(space);
            let value = state.sequence(space).next();
            Ok((Some(record), value))
        })
    }

    fn current_tsn(&self, space: SequenceSpace) -> StoreResult<Tsn> {
        self.read(|state| state.sequence(space))
    }

    fn register_node(&self, url: &str, metadata: &[u8]) -> StoreResult<Node> {
        self.write(|state| {
            let (record, node) = state.plan_register(url, metadata)?;
            if record.is_some() {
                debug!(clock_id = %node.clock_id, url, "node registered");
            }
            Ok((record, node))
        })
    }

    fn import_node(&self, node: &Node) -> StoreResult<()> {
        self.write(|state| Ok((state.plan_import(node), ())))
    }

    fn node(&self, clock_id: ClockId) -> StoreResult<Option<Node>> {
        self.read(|state| state.node(clock_id).cloned())
    }

    fn nodes(&self) -> StoreResult<Vec<Node>> {
        self.read(StoreState::nodes)
    }

    fn bind_clock_id(&self, clock_id: ClockId) -> StoreResult<()> {
        self.write(|state| Ok((state.plan_bind(clock_id)?, ())))
    }

    fn my_clock_id(&self) -> StoreResult<Option<ClockId>> {
        self.read(StoreState::my_clock_id)
    }

    fn remote_highs(&self) -> StoreResult<Vec<HighWaterMark>> {
        self.read(StoreState::highs)
    }

    fn check_high(&self, clock_id: ClockId) -> StoreResult<Tsn> {
        self.read(|state| state.high(clock_id))
    }

    fn advance_high(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<()> {
        self.write(|state| Ok((state.plan_advance(clock_id, tsn)?, ())))
    }

    fn raise_high(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<Tsn> {
        self.write(|state| state.plan_raise(clock_id, tsn))
    }

    fn oplog_page(&self, clock_id: ClockId, since: Tsn, limit: usize) -> StoreResult<OplogPage> {
        self.read(|state| state.oplog_page(clock_id, since, limit))
    }

    fn commit_local(&self, mutation: LocalMutation) -> StoreResult<Option<OplogEntry>> {
        self.write(|state| {
            Ok(match state.plan_commit(mutation)? {
                Some((record, entry)) => (Some(record), Some(entry)),
                None => (None, None),
            })
        })
    }

    fn apply_remote(&self, entry: &OplogEntry, thing: Option<&Thing>) -> StoreResult<bool> {
        self.write(|state| {
            let record = state.plan_apply(entry, thing)?;
            let applied = record.is_some();
            Ok((record, applied))
        })
    }

    fn thing(&self, table: &str, clock_id: ClockId, tsn: Tsn) -> StoreResult<Option<Thing>> {
        self.read(|state| state.thing(table, clock_id, tsn).cloned())
    }

    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.read(|state| state.get(table, key).cloned())
    }

    fn keys(&self, table: &str) -> StoreResult<Vec<String>> {
        self.read(|state| state.keys(table))
    }
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("journal", &self.journal)
            .field("clock_id", &self.state.read().my_clock_id())
            .finish()
    }
}
