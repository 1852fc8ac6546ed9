//! Oplog entries.

use crate::types::{ClockId, LogicalTimestamp, Tsn};
use serde::{Deserialize, Serialize};

/// Kind of mutation recorded in the oplog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Key was created.
    #[serde(rename = "I")]
    Insert,
    /// Key was overwritten.
    #[serde(rename = "U")]
    Update,
    /// Key was removed.
    #[serde(rename = "D")]
    Delete,
}

impl OpKind {
    /// Returns the single-letter op code.
    pub fn to_code(&self) -> char {
        match self {
            OpKind::Insert => 'I',
            OpKind::Update => 'U',
            OpKind::Delete => 'D',
        }
    }

    /// Parses a single-letter op code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'I' => Some(OpKind::Insert),
            'U' => Some(OpKind::Update),
            'D' => Some(OpKind::Delete),
            _ => None,
        }
    }

    /// Returns true if applying this op needs the materialized value.
    pub fn carries_value(&self) -> bool {
        !matches!(self, OpKind::Delete)
    }
}

/// One timestamped mutation, the unit of replication.
///
/// Entries are append-only: once written they are never changed or
/// reordered. `(clock_id, tsn)` identifies the entry on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Object class (replicated table) the mutation touched.
    pub table_name: String,
    /// Origin node.
    pub clock_id: ClockId,
    /// Position in the origin's sequence.
    pub tsn: Tsn,
    /// Kind of mutation.
    pub op: OpKind,
    /// Key the mutation touched.
    pub key: String,
}

impl OplogEntry {
    /// Creates an entry.
    pub fn new(
        table_name: impl Into<String>,
        clock_id: ClockId,
        tsn: Tsn,
        op: OpKind,
        key: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            clock_id,
            tsn,
            op,
            key: key.into(),
        }
    }

    /// Returns the logical timestamp of this entry.
    pub fn timestamp(&self) -> LogicalTimestamp {
        LogicalTimestamp::new(self.clock_id, self.tsn)
    }
}

/// A bounded slice of one origin's oplog tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogPage {
    /// Entries in ascending tsn order.
    pub entries: Vec<OplogEntry>,
    /// Whether more entries follow the last one returned.
    pub has_more: bool,
}

impl OplogPage {
    /// Creates a page.
    pub fn new(entries: Vec<OplogEntry>, has_more: bool) -> Self {
        Self { entries, has_more }
    }

    /// Returns the tsn of the last entry, if any.
    pub fn last_tsn(&self) -> Option<Tsn> {
        self.entries.last().map(|e| e.tsn)
    }

    /// Returns true if the page holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_cbor, to_cbor};

    #[test]
    fn op_codes() {
        for op in [OpKind::Insert, OpKind::Update, OpKind::Delete] {
            assert_eq!(OpKind::from_code(op.to_code()), Some(op));
        }
        assert_eq!(OpKind::from_code('X'), None);
        assert!(!OpKind::Delete.carries_value());
        assert!(OpKind::Update.carries_value());
    }

    #[test]
    fn op_kind_serializes_as_code() {
        let bytes = to_cbor(&OpKind::Delete).unwrap();
        assert_eq!(bytes, to_cbor(&"D").unwrap());
    }

    #[test]
    fn entry_survives_cbor() {
        let entry = OplogEntry::new("power", ClockId::new(2), Tsn::new(3), OpKind::Update, "meter-7");
        let decoded: OplogEntry = from_cbor(&to_cbor(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.timestamp(), LogicalTimestamp::new(ClockId::new(2), Tsn::new(3)));
    }

    #[test]
    fn page_last_tsn() {
        let page = OplogPage::new(
            vec![
                OplogEntry::new("power", ClockId::new(1), Tsn::new(4), OpKind::Insert, "a"),
                OplogEntry::new("power", ClockId::new(1), Tsn::new(9), OpKind::Delete, "a"),
            ],
            true,
        );
        assert_eq!(page.last_tsn(), Some(Tsn::new(9)));
        assert!(OplogPage::default().last_tsn().is_none());
    }
}
