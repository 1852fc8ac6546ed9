//! Sessions.

use crate::config::Config;
use crate::error::{NodeResult, Operation};
use crate::sessions::{StoreConnector, TemplateConnector};
use crate::store::{JournalStore, NodeStore};
use crate::things::{ThingFetcher, ThingRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A handle on one node's store.
///
/// Every public node operation is a method on `Session` and returns a
/// [`NodeResult`]; store faults are folded into
/// [`NodeError`](crate::NodeError) at this boundary. Sessions are cheap to
/// share behind an `Arc` and safe to use from many threads at once.
pub struct Session {
    name: String,
    store: Arc<dyn NodeStore>,
    things: ThingRegistry,
    max_tail_batch: usize,
}

impl Session {
    /// Creates a session over an existing store.
    pub fn new(name: impl Into<String>, store: Arc<dyn NodeStore>, config: &Config) -> NodeResult<Self> {
        Ok(Self {
            name: name.into(),
            store,
            things: ThingRegistry::with_classes(&config.object_classes)?,
            max_tail_batch: config.max_tail_batch.max(1),
        })
    }

    /// Opens the store `config` resolves for `name`.
    pub fn open(name: &str, config: &Config) -> NodeResult<Self> {
        let store = TemplateConnector
            .connect(name, config)
            .map_err(|e| e.fold(Operation::Connect))?;
        let session = Self::new(name, store, config)?;
        info!(name, "session opened");
        Ok(session)
    }

    /// Opens a session over a fresh in-memory store.
    pub fn open_in_memory(name: &str, config: &Config) -> NodeResult<Self> {
        let store = JournalStore::open_in_memory().map_err(|e| e.fold(Operation::Connect))?;
        Self::new(name, Arc::new(store), config)
    }

    /// Serves `class` through a custom fetcher.
    pub fn with_thing_fetcher(mut self, class: &str, fetcher: Arc<dyn ThingFetcher>) -> NodeResult<Self> {
        self.things.register(class, fetcher)?;
        Ok(self)
    }

    /// Returns the node name this session was opened for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Returns the object classes this session serves.
    pub fn things(&self) -> &ThingRegistry {
        &self.things
    }

    /// Returns the largest oplog page served to a peer.
    pub fn max_tail_batch(&self) -> usize {
        self.max_tail_batch
    }

    /// Checks that the store is reachable.
    pub fn ping(&self) -> NodeResult<()> {
        self.store.ping().map_err(|e| e.fold(Operation::Connect))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("things", &self.things)
            .finish_non_exhaustive()
    }
}
