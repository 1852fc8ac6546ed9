//! Logical clock identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a node, assigned once at registration.
///
/// A clock id is the origin component of every logical timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClockId(pub i64);

impl ClockId {
    /// Creates a clock id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock:{}", self.0)
    }
}

/// Per-node monotonic logical clock value.
///
/// Issued values start at 1. [`Tsn::ZERO`] means "nothing observed yet"
/// when used as a frontier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tsn(pub i64);

impl Tsn {
    /// The empty frontier.
    pub const ZERO: Tsn = Tsn(0);

    /// Creates a tsn.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the following value.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tsn:{}", self.0)
    }
}

/// The pair (clock id, tsn) naming exactly one operation.
///
/// The derived ordering sorts by origin first, so it is only meaningful as a
/// total order within one clock id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalTimestamp {
    /// Origin node.
    pub clock_id: ClockId,
    /// Position in the origin's sequence.
    pub tsn: Tsn,
}

impl LogicalTimestamp {
    /// Creates a logical timestamp.
    #[must_use]
    pub const fn new(clock_id: ClockId, tsn: Tsn) -> Self {
        Self { clock_id, tsn }
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.clock_id.0, self.tsn.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsn_zero_is_below_first_issued() {
        assert!(Tsn::ZERO < Tsn::new(1));
        assert_eq!(Tsn::ZERO.next(), Tsn::new(1));
        assert_eq!(Tsn::default(), Tsn::ZERO);
    }

    #[test]
    fn timestamps_order_within_origin() {
        let a = LogicalTimestamp::new(ClockId::new(2), Tsn::new(1));
        let b = LogicalTimestamp::new(ClockId::new(2), Tsn::new(3));
        assert!(a < b);
        assert_eq!(b.to_string(), "(2, 3)");
    }
}
