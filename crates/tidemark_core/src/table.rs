//! Replicated keyed tables.

use crate::error::{NodeError, NodeResult, Operation};
use crate::session::Session;
use crate::store::LocalMutation;
use tidemark_protocol::OplogEntry;

/// Minimal per-key store the replication layer runs underneath.
pub trait KeyedStore {
    /// Writes `value` under `key`.
    fn put(&self, key: &str, value: Vec<u8>) -> NodeResult<()>;

    /// Reads the value under `key`.
    fn get(&self, key: &str) -> NodeResult<Option<Vec<u8>>>;

    /// Removes `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> NodeResult<()>;
}

/// A table whose mutations are timestamped and logged for replication.
///
/// Each write issues a data tsn, applies the change, retains a snapshot,
/// appends the oplog entry and advances the node's own mark, all in one
/// journal record.
#[derive(Debug, Clone, Copy)]
pub struct ReplicatedTable<'a> {
    session: &'a Session,
    class: &'a str,
}

impl Session {
    /// Returns the replicated table for an allow-listed object class.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::UnknownObjectClass`] if `class` is not
    /// allow-listed, since peers could not fetch its snapshots.
    pub fn table<'a>(&'a self, class: &'a str) -> NodeResult<ReplicatedTable<'a>> {
        if !self.things().is_allowed(class) {
            return Err(NodeError::UnknownObjectClass(class.to_string()));
        }
        Ok(ReplicatedTable {
            session: self,
            class,
        })
    }
}

impl<'a> ReplicatedTable<'a> {
    /// Returns the object class of this table.
    pub fn class(&self) -> &'a str {
        self.class
    }

    /// Writes `value` with an opaque payload and returns the logged entry.
    pub fn put_with_payload(&self, key: &str, value: Vec<u8>, payload: Vec<u8>) -> NodeResult<OplogEntry> {
        self.session
            .commit(LocalMutation::put(self.class, key, value, payload))?
            .ok_or_else(|| NodeError::OperationFailed(format!("put of {key:?} logged nothing")))
    }

    /// Removes `key` and returns the logged entry, if the key existed.
    pub fn remove(&self, key: &str) -> NodeResult<Option<OplogEntry>> {
        self.session.commit(LocalMutation::delete(self.class, key))
    }

    /// Lists the keys of this table in order.
    pub fn keys(&self) -> NodeResult<Vec<String>> {
        self.session
            .store()
            .keys(self.class)
            .map_err(|e| e.fold(Operation::Other))
    }
}

impl KeyedStore for ReplicatedTable<'_> {
    fn put(&self, key: &str, value: Vec<u8>) -> NodeResult<()> {
        self.put_with_payload(key, value, Vec::new()).map(drop)
    }

    fn get(&self, key: &str) -> NodeResult<Option<Vec<u8>>> {
        self.session
            .store()
            .get(self.class, key)
            .map_err(|e| e.fold(Operation::Other))
    }

    fn delete(&self, key: &str) -> NodeResult<()> {
        self.remove(key).map(drop)
    }
}
