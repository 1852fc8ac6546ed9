//! High-water-mark tracking.
//!
//! A node keeps one mark per origin: the highest tsn from that origin it has
//! applied. Marks never move backwards and never pass what the local oplog
//! holds for the origin.

use crate::error::{NodeResult, Operation};
use crate::session::Session;
use tidemark_protocol::{ClockId, HighWaterMark, Tsn};
use tracing::debug;

impl Session {
    /// Returns the full replication frontier, ascending by clock id.
    pub fn remote_highs(&self) -> NodeResult<Vec<HighWaterMark>> {
        self.store()
            .remote_highs()
            .map_err(|e| e.fold(Operation::HighRead))
    }

    /// Returns the mark for `clock_id`; zero if nothing was observed.
    pub fn check_high(&self, clock_id: ClockId) -> NodeResult<Tsn> {
        self.store()
            .check_high(clock_id)
            .map_err(|e| e.fold(Operation::HighRead))
    }

    /// Moves the mark for `clock_id` to `tsn`.
    ///
    /// Advancing to the current mark is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::HighWaterRegression`](crate::NodeError::HighWaterRegression)
    /// if `tsn` is below the current mark.
    pub fn advance_high(&self, clock_id: ClockId, tsn: Tsn) -> NodeResult<()> {
        self.store()
            .advance_high(clock_id, tsn)
            .map_err(|e| e.fold(Operation::HighAdvance))?;
        debug!(session = %self.name(), %clock_id, %tsn, "high-water-mark advanced");
        Ok(())
    }

    /// Moves the mark for `clock_id` to at least `tsn`, returning the mark
    /// now stored.
    ///
    /// Concurrent pulls of the same origin race on this; the later, lower
    /// raise is absorbed instead of reported as a regression.
    pub fn raise_high(&self, clock_id: ClockId, tsn: Tsn) -> NodeResult<Tsn> {
        let high = self
            .store()
            .raise_high(clock_id, tsn)
            .map_err(|e| e.fold(Operation::HighAdvance))?;
        debug!(session = %self.name(), %clock_id, requested = %tsn, %high, "high-water-mark raised");
        Ok(high)
    }
}
