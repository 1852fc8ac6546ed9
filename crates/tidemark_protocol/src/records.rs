//! Registry, frontier and snapshot records.

use crate::types::{ClockId, LogicalTimestamp, Tsn};
use serde::{Deserialize, Serialize};

/// A registered node.
///
/// Created once at registration and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Assigned identity.
    pub clock_id: ClockId,
    /// Address the node registered with.
    pub url: String,
    /// Opaque registration payload.
    pub metadata: Vec<u8>,
    /// Node-management tsn stamped at registration.
    pub registered_at: Tsn,
}

/// "Everything from `clock_id` up to `tsn` is applied here."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HighWaterMark {
    /// Origin node.
    pub clock_id: ClockId,
    /// Highest applied tsn from that origin.
    pub tsn: Tsn,
}

impl HighWaterMark {
    /// Creates a high-water-mark.
    pub const fn new(clock_id: ClockId, tsn: Tsn) -> Self {
        Self { clock_id, tsn }
    }
}

/// A materialized object version, fetched directly instead of replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thing {
    /// Key within the object class.
    pub key: String,
    /// Value at this version.
    pub value: Vec<u8>,
    /// Url of the node that produced the version.
    pub url: String,
    /// Opaque payload attached to the version.
    pub payload: Vec<u8>,
    /// Origin node.
    pub clock_id: ClockId,
    /// Version within the origin's sequence.
    pub tsn: Tsn,
}

impl Thing {
    /// Returns the logical timestamp of this version.
    pub fn timestamp(&self) -> LogicalTimestamp {
        LogicalTimestamp::new(self.clock_id, self.tsn)
    }
}
