//! Sequence generator.
//!
//! Each node keeps two independent counters: one for data mutations and one
//! for node-management events. Issued values start at 1, are journaled
//! before they are returned and are never handed out twice, including across
//! restarts.

use crate::error::{NodeResult, Operation};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use tidemark_protocol::Tsn;

/// Independent numeric space a tsn is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceSpace {
    /// Timestamps of data mutations.
    Data,
    /// Node-management events such as registrations.
    Nodes,
}

impl Session {
    /// Issues the next data tsn.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::TsnUnavailable`](crate::NodeError::TsnUnavailable)
    /// if the store cannot be reached.
    pub fn new_tsn(&self) -> NodeResult<Tsn> {
        self.issue(SequenceSpace::Data)
    }

    /// Issues the next node-management tsn.
    pub fn new_nodes_tsn(&self) -> NodeResult<Tsn> {
        self.issue(SequenceSpace::Nodes)
    }

    /// Returns the last value issued in `space` without issuing one.
    pub fn current_tsn(&self, space: SequenceSpace) -> NodeResult<Tsn> {
        self.store()
            .current_tsn(space)
            .map_err(|e| e.fold(Operation::Tsn))
    }

    fn issue(&self, space: SequenceSpace) -> NodeResult<Tsn> {
        self.store()
            .next_tsn(space)
            .map_err(|e| e.fold(Operation::Tsn))
    }
}
