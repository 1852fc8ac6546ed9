//! In-memory image of a node store, rebuilt from the journal.

use crate::error::{StoreError, StoreResult};
use crate::journal::JournalRecord;
use crate::sequence::SequenceSpace;
use crate::store::{Change, LocalMutation};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included};
use tidemark_protocol::{ClockId, HighWaterMark, Node, OpKind, OplogEntry, OplogPage, Thing, Tsn};

type SnapshotKey = (String, ClockId, Tsn);

/// State of one node.
///
/// Methods named `plan_*` validate a request and produce the journal record
/// that carries it out; only [`StoreState::apply`] mutates.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    data_seq: Tsn,
    nodes_seq: Tsn,
    nodes: BTreeMap<ClockId, Node>,
    urls: HashMap<String, ClockId>,
    my_clock_id: Option<ClockId>,
    highs: BTreeMap<ClockId, Tsn>,
    oplog: BTreeMap<(ClockId, Tsn), OplogEntry>,
    things: HashMap<SnapshotKey, Thing>,
    tables: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl StoreState {
    pub fn sequence(&self, space: SequenceSpace) -> Tsn {
        match space {
            SequenceSpace::Data => self.data_seq,
            SequenceSpace::Nodes => self.nodes_seq,
        }
    }

    pub fn node(&self, clock_id: ClockId) -> Option<&Node> {
        self.nodes.get(&clock_id)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    pub fn my_clock_id(&self) -> Option<ClockId> {
        self.my_clock_id
    }

    pub fn highs(&self) -> Vec<HighWaterMark> {
        self.highs
            .iter()
            .map(|(&clock_id, &tsn)| HighWaterMark::new(clock_id, tsn))
            .collect()
    }

    pub fn high(&self, clock_id: ClockId) -> Tsn {
        self.highs.get(&clock_id).copied().unwrap_or(Tsn::ZERO)
    }

    /// Highest tsn of `clock_id` present in the oplog.
    pub fn applied_max(&self, clock_id: ClockId) -> Tsn {
        self.oplog
            .range((clock_id, Tsn::ZERO)..=(clock_id, Tsn::new(i64::MAX)))
            .next_back()
            .map(|(&(_, tsn), _)| tsn)
            .unwrap_or(Tsn::ZERO)
    }

    pub fn oplog_page(&self, clock_id: ClockId, since: Tsn, limit: usize) -> OplogPage {
        let mut tail = self
            .oplog
            .range((Excluded((clock_id, since)), Included((clock_id, Tsn::new(i64::MAX)))))
            .map(|(_, entry)| entry);
        let entries: Vec<OplogEntry> = tail.by_ref().take(limit.max(1)).cloned().collect();
        let has_more = tail.next().is_some();
        OplogPage::new(entries, has_more)
    }

    pub fn thing(&self, table: &str, clock_id: ClockId, tsn: Tsn) -> Option<&Thing> {
        self.things.get(&(table.to_string(), clock_id, tsn))
    }

    pub fn get(&self, table: &str, key: &str) -> Option<&Vec<u8>> {
        self.tables.get(table).and_then(|rows| rows.get(key))
    }

    pub fn keys(&self, table: &str) -> Vec<String> {
        self.tables
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn plan_issue(&self, space: SequenceSpace) -> JournalRecord {
        JournalRecord::SequenceIssued {
            space,
            value: self.sequence(space).next(),
        }
    }

    /// Returns the node for `url`, with the record registering it when the
    /// url is new.
    pub fn plan_register(&self, url: &str, metadata: &[u8]) -> StoreResult<(Option<JournalRecord>, Node)> {
        if url.is_empty() {
            return Err(StoreError::EmptyUrl);
        }
        if let Some(node) = self.urls.get(url).and_then(|id| self.nodes.get(id)) {
            return Ok((None, node.clone()));
        }
        let clock_id = self
            .nodes
            .keys()
            .next_back()
            .map_or(ClockId::new(1), |last| ClockId::new(last.as_i64() + 1));
        let node = Node {
            clock_id,
            url: url.to_string(),
            metadata: metadata.to_vec(),
            registered_at: self.nodes_seq.next(),
        };
        let record = JournalRecord::NodeRegistered {
            node: node.clone(),
            imported: false,
        };
        Ok((Some(record), node))
    }

    pub fn plan_import(&self, node: &Node) -> Option<JournalRecord> {
        if self.nodes.contains_key(&node.clock_id) {
            return None;
        }
        Some(JournalRecord::NodeRegistered {
            node: node.clone(),
            imported: true,
        })
    }

    pub fn plan_bind(&self, clock_id: ClockId) -> StoreResult<Option<JournalRecord>> {
        match self.my_clock_id {
            Some(current) if current == clock_id => Ok(None),
            Some(current) => Err(StoreError::AlreadyBound {
                current,
                requested: clock_id,
            }),
            None => Ok(Some(JournalRecord::ClockBound { clock_id })),
        }
    }

    pub fn plan_advance(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<Option<JournalRecord>> {
        let current = self.high(clock_id);
        if tsn < current {
            return Err(StoreError::Regression {
                clock_id,
                current,
                requested: tsn,
            });
        }
        if tsn == current {
            return Ok(None);
        }
        let applied = self.applied_max(clock_id);
        if tsn > applied {
            return Err(StoreError::BeyondApplied {
                clock_id,
                applied,
                requested: tsn,
            });
        }
        Ok(Some(JournalRecord::HighAdvanced { clock_id, tsn }))
    }

    /// Like [`plan_advance`](Self::plan_advance), but a mark already at or
    /// above `tsn` is left alone. Returns the mark after the write.
    pub fn plan_raise(&self, clock_id: ClockId, tsn: Tsn) -> StoreResult<(Option<JournalRecord>, Tsn)> {
        let current = self.high(clock_id);
        if tsn <= current {
            return Ok((None, current));
        }
        Ok((self.plan_advance(clock_id, tsn)?, tsn))
    }

    pub fn plan_commit(&self, mutation: LocalMutation) -> StoreResult<Option<(JournalRecord, OplogEntry)>> {
        let clock_id = self.my_clock_id.ok_or(StoreError::Unbound)?;
        let exists = self.get(&mutation.table, &mutation.key).is_some();
        let tsn = self.data_seq.next();

        let (op, thing) = match mutation.change {
            Change::Delete if !exists => return Ok(None),
            Change::Delete => (OpKind::Delete, None),
            Change::Put { value, payload } => {
                let op = if exists { OpKind::Update } else { OpKind::Insert };
                let url = self
                    .nodes
                    .get(&clock_id)
                    .map(|node| node.url.clone())
                    .unwrap_or_default();
                let thing = Thing {
                    key: mutation.key.clone(),
                    value,
                    url,
                    payload,
                    clock_id,
                    tsn,
                };
                (op, Some(thing))
            }
        };

        let entry = OplogEntry::new(mutation.table, clock_id, tsn, op, mutation.key);
        let record = JournalRecord::LocalCommit {
            entry: entry.clone(),
            thing,
        };
        Ok(Some((record, entry)))
    }

    /// Returns `None` if the entry is already present.
    pub fn plan_apply(&self, entry: &OplogEntry, thing: Option<&Thing>) -> StoreResult<Option<JournalRecord>> {
        if self.oplog.contains_key(&(entry.clock_id, entry.tsn)) {
            return Ok(None);
        }
        let applied = self.applied_max(entry.clock_id);
        if entry.tsn < applied {
            return Err(StoreError::OutOfOrder {
                entry: entry.timestamp(),
                applied,
            });
        }

        let thing = if entry.op.carries_value() {
            match thing {
                Some(t) if t.timestamp() == entry.timestamp() && t.key == entry.key => Some(t.clone()),
                _ => return Err(StoreError::SnapshotMismatch(entry.timestamp())),
            }
        } else {
            None
        };

        Ok(Some(JournalRecord::RemoteApply {
            entry: entry.clone(),
            thing,
        }))
    }

    pub fn apply(&mut self, record: &JournalRecord) {
        match record {
            JournalRecord::SequenceIssued { space, value } => {
                let seq = match space {
                    SequenceSpace::Data => &mut self.data_seq,
                    SequenceSpace::Nodes => &mut self.nodes_seq,
                };
                *seq = (*seq).max(*value);
            }
            JournalRecord::NodeRegistered { node, imported } => {
                if !imported {
                    self.nodes_seq = self.nodes_seq.max(node.registered_at);
                }
                self.urls.entry(node.url.clone()).or_insert(node.clock_id);
                self.nodes.entry(node.clock_id).or_insert_with(|| node.clone());
            }
            JournalRecord::ClockBound { clock_id } => {
                self.my_clock_id = Some(*clock_id);
            }
            JournalRecord::HighAdvanced { clock_id, tsn } => {
                self.raise_high(*clock_id, *tsn);
            }
            JournalRecord::LocalCommit { entry, thing } => {
                self.data_seq = self.data_seq.max(entry.tsn);
                self.apply_entry(entry, thing.as_ref());
                self.raise_high(entry.clock_id, entry.tsn);
            }
            JournalRecord::RemoteApply { entry, thing } => {
                self.apply_entry(entry, thing.as_ref());
            }
        }
    }

    fn raise_high(&mut self, clock_id: ClockId, tsn: Tsn) {
        let high = self.highs.entry(clock_id).or_insert(Tsn::ZERO);
        *high = (*high).max(tsn);
    }

    fn apply_entry(&mut self, entry: &OplogEntry, thing: Option<&Thing>) {
        let rows = self.tables.entry(entry.table_name.clone()).or_default();
        match (entry.op, thing) {
            (OpKind::Delete, _) => {
                rows.remove(&entry.key);
            }
            (_, Some(thing)) => {
                rows.insert(entry.key.clone(), thing.value.clone());
                self.things
                    .insert((entry.table_name.clone(), entry.clock_id, entry.tsn), thing.clone());
            }
            (_, None) => {}
        }
        self.oplog.insert((entry.clock_id, entry.tsn), entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(clock: i64) -> StoreState {
        let mut state = StoreState::default();
        state.apply(&JournalRecord::ClockBound {
            clock_id: ClockId::new(clock),
        });
        state
    }

    fn commit(state: &mut StoreState, mutation: LocalMutation) -> Option<OplogEntry> {
        let (record, entry) = state.plan_commit(mutation).unwrap()?;
        state.apply(&record);
        Some(entry)
    }

    #[test]
    fn register_assigns_ascending_ids() {
        let mut state = StoreState::default();
        for (expected, url) in [(1, "a"), (2, "b")] {
            let (record, _) = state.plan_register(url, b"").unwrap();
            state.apply(&record.unwrap());
            assert_eq!(state.urls[url], ClockId::new(expected));
        }
        assert_eq!(state.sequence(SequenceSpace::Nodes), Tsn::new(2));
        let (record, existing) = state.plan_register("a", b"other").unwrap();
        assert!(record.is_none());
        assert_eq!(existing.clock_id, ClockId::new(1));
        assert!(existing.metadata.is_empty());
    }

    #[test]
    fn imports_do_not_consume_node_sequence() {
        let mut state = StoreState::default();
        let node = Node {
            clock_id: ClockId::new(9),
            url: "far".into(),
            metadata: vec![],
            registered_at: Tsn::new(40),
        };
        state.apply(&state.plan_import(&node).unwrap());
        assert_eq!(state.sequence(SequenceSpace::Nodes), Tsn::ZERO);
        assert!(state.plan_import(&node).is_none());
    }

    #[test]
    fn put_then_update_then_delete() {
        let mut state = bound(2);
        let first = commit(&mut state, LocalMutation::put("power", "m1", vec![1], vec![])).unwrap();
        let second = commit(&mut state, LocalMutation::put("power", "m1", vec![2], vec![])).unwrap();
        let third = commit(&mut state, LocalMutation::delete("power", "m1")).unwrap();

        assert_eq!(
            [first.op, second.op, third.op],
            [OpKind::Insert, OpKind::Update, OpKind::Delete]
        );
        assert_eq!([first.tsn, second.tsn, third.tsn], [Tsn::new(1), Tsn::new(2), Tsn::new(3)]);
        assert!(state.get("power", "m1").is_none());
        assert_eq!(state.high(ClockId::new(2)), Tsn::new(3));
        assert_eq!(state.thing("power", ClockId::new(2), Tsn::new(2)).unwrap().value, vec![2]);
        assert!(commit(&mut state, LocalMutation::delete("power", "m1")).is_none());
    }

    #[test]
    fn commit_requires_identity() {
        let state = StoreState::default();
        let err = state
            .plan_commit(LocalMutation::put("t", "k", vec![], vec![]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unbound));
    }

    #[test]
    fn oplog_page_is_bounded_and_ordered() {
        let mut state = bound(1);
        for i in 0..5 {
            commit(&mut state, LocalMutation::put("t", format!("k{i}"), vec![], vec![]));
        }
        let page = state.oplog_page(ClockId::new(1), Tsn::new(1), 2);
        let tsns: Vec<_> = page.entries.iter().map(|e| e.tsn.as_i64()).collect();
        assert_eq!(tsns, vec![2, 3]);
        assert!(page.has_more);

        let rest = state.oplog_page(ClockId::new(1), Tsn::new(3), 10);
        assert_eq!(rest.entries.len(), 2);
        assert!(!rest.has_more);
        assert!(state.oplog_page(ClockId::new(7), Tsn::ZERO, 10).is_empty());
        assert!(state
            .oplog_page(ClockId::new(1), Tsn::new(i64::MAX), 10)
            .is_empty());
    }

    #[test]
    fn advance_rules() {
        let mut state = bound(1);
        commit(&mut state, LocalMutation::put("t", "k", vec![], vec![]));
        let origin = ClockId::new(1);

        assert!(state.plan_advance(origin, Tsn::new(1)).unwrap().is_none());
        assert!(matches!(
            state.plan_advance(origin, Tsn::ZERO),
            Err(StoreError::Regression { .. })
        ));
        assert!(matches!(
            state.plan_advance(origin, Tsn::new(2)),
            Err(StoreError::BeyondApplied { .. })
        ));
    }

    #[test]
    fn raise_rules() {
        let mut state = bound(1);
        for key in ["a", "b"] {
            commit(&mut state, LocalMutation::put("t", key, vec![], vec![]));
        }
        let origin = ClockId::new(1);

        let (record, high) = state.plan_raise(origin, Tsn::ZERO).unwrap();
        assert!(record.is_none());
        assert_eq!(high, Tsn::new(2));
        let (record, high) = state.plan_raise(origin, Tsn::new(1)).unwrap();
        assert!(record.is_none());
        assert_eq!(high, Tsn::new(2));
        assert!(matches!(
            state.plan_raise(origin, Tsn::new(3)),
            Err(StoreError::BeyondApplied { .. })
        ));

        let other = ClockId::new(9);
        assert!(matches!(
            state.plan_raise(other, Tsn::new(1)),
            Err(StoreError::BeyondApplied { .. })
        ));
    }

    #[test]
    fn remote_apply_checks() {
        let mut state = bound(1);
        let origin = ClockId::new(2);
        let entry = |tsn: i64, op| OplogEntry::new("t", origin, Tsn::new(tsn), op, "k");
        let thing = |tsn: i64| Thing {
            key: "k".into(),
            value: vec![tsn as u8],
            url: "b".into(),
            payload: vec![],
            clock_id: origin,
            tsn: Tsn::new(tsn),
        };

        assert!(matches!(
            state.plan_apply(&entry(1, OpKind::Insert), None),
            Err(StoreError::SnapshotMismatch(_))
        ));
        assert!(matches!(
            state.plan_apply(&entry(1, OpKind::Insert), Some(&thing(2))),
            Err(StoreError::SnapshotMismatch(_))
        ));

        let record = state.plan_apply(&entry(2, OpKind::Insert), Some(&thing(2))).unwrap().unwrap();
        state.apply(&record);
        assert_eq!(state.get("t", "k"), Some(&vec![2]));
        assert!(state.plan_apply(&entry(2, OpKind::Insert), Some(&thing(2))).unwrap().is_none());
        assert!(matches!(
            state.plan_apply(&entry(1, OpKind::Delete), None),
            Err(StoreError::OutOfOrder { .. })
        ));

        let record = state.plan_apply(&entry(3, OpKind::Delete), None).unwrap().unwrap();
        state.apply(&record);
        assert!(state.get("t", "k").is_none());
        // remote entries do not move the mark on their own
        assert_eq!(state.high(origin), Tsn::ZERO);
    }
}
