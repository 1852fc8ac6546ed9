//! Test fixtures and node helpers.
//!
//! Provides convenience functions for setting up sessions and small
//! clusters for replication tests.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tidemark_core::{Config, Session, DATABASE_PLACEHOLDER};
use tidemark_protocol::ClockId;

/// Object class allow-listed on every fixture node.
pub const TEST_CLASS: &str = "power";

/// Returns the configuration fixture nodes use.
pub fn test_config() -> Config {
    Config::new().object_classes([TEST_CLASS]).sync_on_write(false)
}

/// A test node with automatic cleanup.
pub struct TestNode {
    /// The session.
    pub session: Arc<Session>,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestNode {
    /// Creates an in-memory node.
    pub fn memory(name: &str) -> Self {
        let config = test_config();
        Self {
            session: Arc::new(Session::open_in_memory(name, &config).expect("Failed to open in-memory node")),
            config,
            _temp_dir: None,
        }
    }

    /// Creates a node journaled to a temporary directory.
    pub fn file(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let template = format!("{}/{DATABASE_PLACEHOLDER}.journal", temp_dir.path().display());
        let config = test_config().store_template(template);
        let session = Session::open(name, &config).expect("Failed to open file node");

        Self {
            session: Arc::new(session),
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the journal path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join(format!("{}.journal", self.session.name())))
    }

    /// Closes the session and opens it again from its journal.
    ///
    /// # Panics
    ///
    /// Panics for in-memory nodes and when another handle to the session
    /// is still alive.
    pub fn reopen(self) -> Self {
        assert!(self._temp_dir.is_some(), "only file nodes can be reopened");
        let name = self.session.name().to_string();
        let Self {
            session,
            config,
            _temp_dir,
        } = self;
        drop(Arc::into_inner(session).expect("session still shared"));

        let session = Session::open(&name, &config).expect("Failed to reopen file node");
        Self {
            session: Arc::new(session),
            config,
            _temp_dir,
        }
    }
}

impl Deref for TestNode {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// Runs a test with a temporary in-memory node.
pub fn with_temp_node<F, R>(f: F) -> R
where
    F: FnOnce(&Session) -> R,
{
    let node = TestNode::memory("test");
    f(&node)
}

/// Pulls one origin's tail from `source` into `sink` without the
/// synchronizer and returns the number of entries applied.
///
/// Panics on any failure.
pub fn pull_origin(sink: &Session, source: &Session, origin: ClockId) -> usize {
    let since = sink.check_high(origin).expect("Failed to read mark");
    let tail = source.oplog_tail(origin, since).expect("Failed to read tail");
    let mut applied = 0;
    for entry in &tail {
        let thing = if entry.op.carries_value() {
            Some(
                source
                    .anti_entropy_get(&entry.table_name, entry.clock_id, entry.tsn)
                    .expect("Failed to fetch snapshot"),
            )
        } else {
            None
        };
        if sink.apply_remote(entry, thing.as_ref()).expect("Failed to apply entry") {
            applied += 1;
        }
    }
    if let Some(last) = tail.last() {
        sink.advance_high(origin, last.tsn).expect("Failed to advance mark");
    }
    applied
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use tidemark_core::KeyedStore;

    /// A master node and the nodes registered through it.
    pub struct Cluster {
        /// Registry node, clock id 1.
        pub master: TestNode,
        /// Registered nodes, clock ids 2 and up.
        pub nodes: Vec<TestNode>,
    }

    impl Cluster {
        /// Returns the clock ids of the registered nodes.
        pub fn clock_ids(&self) -> Vec<ClockId> {
            self.nodes
                .iter()
                .map(|n| n.my_clock_id().expect("Node not registered"))
                .collect()
        }
    }

    /// Creates a master plus `count` in-memory nodes named `engine1..`.
    pub fn cluster(count: usize) -> Cluster {
        let master = TestNode::memory("master");
        master
            .register_local(None, "tcp://master", b"")
            .expect("Failed to register master");

        let nodes = (1..=count)
            .map(|i| {
                let name = format!("engine{i}");
                let node = TestNode::memory(&name);
                node.register_local(Some(master.session.as_ref()), &format!("tcp://{name}"), b"")
                    .expect("Failed to register node");
                node
            })
            .collect();

        Cluster { master, nodes }
    }

    /// Creates a registered node holding `count` keys `key-0..` in
    /// [`TEST_CLASS`].
    pub fn populated_node(count: usize) -> TestNode {
        let node = TestNode::memory("populated");
        node.register_local(None, "tcp://populated", b"")
            .expect("Failed to register node");
        let table = node.table(TEST_CLASS).expect("Test class not allowed");
        for i in 0..count {
            table
                .put(&format!("key-{i}"), i.to_le_bytes().to_vec())
                .expect("Failed to put key");
        }
        node
    }
}
