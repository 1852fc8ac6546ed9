//! Operation log access.
//!
//! Entries are appended as a side effect of local commits and of applying
//! remote entries, so a node can relay what it learned from one peer to
//! another.

use crate::error::{NodeError, NodeResult, Operation};
use crate::session::Session;
use crate::store::LocalMutation;
use tidemark_protocol::{ClockId, OplogEntry, OplogPage, Thing, Tsn};
use tracing::debug;

impl Session {
    /// Returns every entry of `clock_id` with tsn above `since`, ascending.
    ///
    /// `since = Tsn::ZERO` returns the full history of that origin.
    pub fn oplog_tail(&self, clock_id: ClockId, since: Tsn) -> NodeResult<Vec<OplogEntry>> {
        self.store()
            .oplog_page(clock_id, since, usize::MAX)
            .map(|page| page.entries)
            .map_err(|e| e.fold(Operation::OplogRead))
    }

    /// Returns at most `limit` entries of `clock_id` with tsn above `since`.
    pub fn oplog_page(&self, clock_id: ClockId, since: Tsn, limit: usize) -> NodeResult<OplogPage> {
        self.store()
            .oplog_page(clock_id, since, limit)
            .map_err(|e| e.fold(Operation::OplogRead))
    }

    /// Timestamps and commits a local mutation.
    ///
    /// Returns the appended entry, or `None` if the mutation changed nothing.
    pub fn commit(&self, mutation: LocalMutation) -> NodeResult<Option<OplogEntry>> {
        let entry = self
            .store()
            .commit_local(mutation)
            .map_err(|e| e.fold(Operation::Mutate))?;
        if let Some(entry) = &entry {
            debug!(
                session = %self.name(),
                table = %entry.table_name,
                timestamp = %entry.timestamp(),
                op = %entry.op.to_code(),
                "local commit"
            );
        }
        Ok(entry)
    }

    /// Applies an entry pulled from a peer.
    ///
    /// Inserts and updates need the snapshot written at the entry's
    /// timestamp. Returns `false` if the entry was already applied.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::UnknownObjectClass`] if the entry's class is not
    /// allow-listed here; such an entry could never be served onwards.
    pub fn apply_remote(&self, entry: &OplogEntry, thing: Option<&Thing>) -> NodeResult<bool> {
        if !self.things().is_allowed(&entry.table_name) {
            return Err(NodeError::UnknownObjectClass(entry.table_name.clone()));
        }
        self.store()
            .apply_remote(entry, thing)
            .map_err(|e| e.fold(Operation::Other))
    }
}

#[cfg(test)]
mod tests {
    use crate::session::tests::offline_capable;
    use crate::{LocalMutation, NodeError};
    use tidemark_protocol::{ClockId, OpKind, OplogEntry, Tsn};

    #[test]
    fn tail_is_repeatable_and_bounded() {
        let (session, _backend) = offline_capable("oplog");
        session.register_local(None, "tcp://a", b"").unwrap();
        for key in ["a", "b", "c"] {
            session
                .commit(LocalMutation::put("power", key, vec![1], vec![]))
                .unwrap();
        }
        let me = session.my_clock_id().unwrap();

        let full = session.oplog_tail(me, Tsn::ZERO).unwrap();
        assert_eq!(full.len(), 3);
        assert_eq!(full, session.oplog_tail(me, Tsn::ZERO).unwrap());
        assert_eq!(session.oplog_tail(me, Tsn::new(2)).unwrap().len(), 1);
        assert!(session.oplog_tail(me, Tsn::new(3)).unwrap().is_empty());
        assert!(session.oplog_tail(ClockId::new(99), Tsn::ZERO).unwrap().is_empty());

        let page = session.oplog_page(me, Tsn::ZERO, 2).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn commit_without_identity_fails_and_records_nothing() {
        let (session, _backend) = offline_capable("oplog");
        assert!(matches!(
            session.commit(LocalMutation::put("power", "a", vec![], vec![])),
            Err(NodeError::Registration(_))
        ));
        session.set_my_clock_id(ClockId::new(4)).unwrap();
        let entry = session
            .commit(LocalMutation::put("power", "a", vec![], vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(entry.tsn, Tsn::new(1));
        assert_eq!(entry.op, OpKind::Insert);
    }

    #[test]
    fn remote_entry_of_unlisted_class_is_refused() {
        let (session, _backend) = offline_capable("oplog");
        session.set_my_clock_id(ClockId::new(1)).unwrap();
        let origin = ClockId::new(2);

        let stray = OplogEntry::new("light", origin, Tsn::new(1), OpKind::Delete, "k");
        assert!(matches!(
            session.apply_remote(&stray, None),
            Err(NodeError::UnknownObjectClass(class)) if class == "light"
        ));
        assert!(session.oplog_tail(origin, Tsn::ZERO).unwrap().is_empty());

        let listed = OplogEntry::new("power", origin, Tsn::new(1), OpKind::Delete, "k");
        assert!(session.apply_remote(&listed, None).unwrap());
    }

    #[test]
    fn unreachable_store() {
        let (session, backend) = offline_capable("oplog");
        session.set_my_clock_id(ClockId::new(1)).unwrap();
        backend.set_offline(true);
        assert!(matches!(
            session.oplog_tail(ClockId::new(1), Tsn::ZERO),
            Err(NodeError::OplogRead(_))
        ));
        assert!(matches!(
            session.commit(LocalMutation::delete("power", "a")),
            Err(NodeError::TsnUnavailable(_))
        ));
        backend.set_offline(false);
        assert!(session.oplog_tail(ClockId::new(1), Tsn::ZERO).unwrap().is_empty());
    }
}
