//! The source side of a pull.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tidemark_core::{NodeError, Session};
use tidemark_protocol::{ClockId, HighWaterMark, OplogEntry, OplogPage, Thing, Tsn};

/// A node the synchronizer can pull from.
///
/// This trait abstracts where the peer lives, allowing for in-process
/// sessions, wire transports, and scripted peers in tests.
pub trait SyncPeer: Send + Sync {
    /// Returns a name for logs and reports.
    fn name(&self) -> &str;

    /// Returns the peer's own clock id, if it has one.
    fn identity(&self) -> SyncResult<Option<ClockId>>;

    /// Returns the peer's replication frontier.
    fn remote_highs(&self) -> SyncResult<Vec<HighWaterMark>>;

    /// Returns up to `limit` entries of `clock_id` above `since`.
    fn oplog_tail(&self, clock_id: ClockId, since: Tsn, limit: u32) -> SyncResult<OplogPage>;

    /// Returns the snapshot of `class` at `(clock_id, tsn)`, or `None` if
    /// the peer does not have that version.
    fn anti_entropy_get(&self, class: &str, clock_id: ClockId, tsn: Tsn) -> SyncResult<Option<Thing>>;

    /// Checks if the peer is reachable.
    fn is_connected(&self) -> bool;
}

/// A peer in the same process, reached through its [`Session`].
#[derive(Debug, Clone)]
pub struct SessionPeer {
    session: Arc<Session>,
}

impl SessionPeer {
    /// Wraps a session.
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Returns the wrapped session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl SyncPeer for SessionPeer {
    fn name(&self) -> &str {
        self.session.name()
    }

    fn identity(&self) -> SyncResult<Option<ClockId>> {
        match self.session.my_clock_id() {
            Ok(id) => Ok(Some(id)),
            Err(NodeError::Registration(_)) => Ok(None),
            Err(e) => Err(SyncError::Peer(e)),
        }
    }

    fn remote_highs(&self) -> SyncResult<Vec<HighWaterMark>> {
        self.session.remote_highs().map_err(SyncError::Peer)
    }

    fn oplog_tail(&self, clock_id: ClockId, since: Tsn, limit: u32) -> SyncResult<OplogPage> {
        let limit = (limit as usize).min(self.session.max_tail_batch());
        self.session
            .oplog_page(clock_id, since, limit)
            .map_err(SyncError::Peer)
    }

    fn anti_entropy_get(&self, class: &str, clock_id: ClockId, tsn: Tsn) -> SyncResult<Option<Thing>> {
        match self.session.anti_entropy_get(class, clock_id, tsn) {
            Ok(thing) => Ok(Some(thing)),
            Err(NodeError::NotFound(_)) => Ok(None),
            Err(e) => Err(SyncError::Peer(e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.ping().is_ok()
    }
}

/// A scripted peer for testing.
///
/// Pages are served exactly as scripted, so tests can feed the synchronizer
/// malformed tails.
#[derive(Debug)]
pub struct MockPeer {
    name: String,
    connected: AtomicBool,
    identity: Mutex<Option<ClockId>>,
    highs: Mutex<Vec<HighWaterMark>>,
    tails: Mutex<HashMap<ClockId, Vec<OplogEntry>>>,
    things: Mutex<HashMap<(ClockId, Tsn), Thing>>,
    fail_things_after: Mutex<Option<usize>>,
    thing_requests: AtomicUsize,
}

impl MockPeer {
    /// Creates a connected peer with nothing to serve.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            identity: Mutex::new(None),
            highs: Mutex::new(Vec::new()),
            tails: Mutex::new(HashMap::new()),
            things: Mutex::new(HashMap::new()),
            fail_things_after: Mutex::new(None),
            thing_requests: AtomicUsize::new(0),
        }
    }

    /// Sets the identity the peer reports.
    pub fn set_identity(&self, clock_id: Option<ClockId>) {
        *self.identity.lock() = clock_id;
    }

    /// Sets the frontier the peer advertises.
    pub fn set_highs(&self, highs: Vec<HighWaterMark>) {
        *self.highs.lock() = highs;
    }

    /// Sets the raw entries served for one origin, in the given order.
    ///
    /// Requests return the entries whose tsn is above `since`, keeping the
    /// scripted order.
    pub fn set_tail(&self, clock_id: ClockId, entries: Vec<OplogEntry>) {
        self.tails.lock().insert(clock_id, entries);
    }

    /// Adds a snapshot the peer can serve.
    pub fn add_thing(&self, thing: Thing) {
        self.things.lock().insert((thing.clock_id, thing.tsn), thing);
    }

    /// Makes snapshot requests fail after `count` successful ones.
    pub fn fail_things_after(&self, count: Option<usize>) {
        *self.fail_things_after.lock() = count;
        self.thing_requests.store(0, Ordering::SeqCst);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}

impl SyncPeer for MockPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> SyncResult<Option<ClockId>> {
        self.check_connected()?;
        Ok(*self.identity.lock())
    }

    fn remote_highs(&self) -> SyncResult<Vec<HighWaterMark>> {
        self.check_connected()?;
        Ok(self.highs.lock().clone())
    }

    fn oplog_tail(&self, clock_id: ClockId, since: Tsn, limit: u32) -> SyncResult<OplogPage> {
        self.check_connected()?;
        let tails = self.tails.lock();
        let mut tail = tails
            .get(&clock_id)
            .into_iter()
            .flatten()
            .filter(|e| e.tsn > since);
        let entries: Vec<OplogEntry> = tail.by_ref().take(limit as usize).cloned().collect();
        let has_more = tail.next().is_some();
        Ok(OplogPage::new(entries, has_more))
    }

    fn anti_entropy_get(&self, _class: &str, clock_id: ClockId, tsn: Tsn) -> SyncResult<Option<Thing>> {
        self.check_connected()?;
        let served = self.thing_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_things_after.lock() {
            if served >= limit {
                return Err(SyncError::transport_retryable("snapshot request dropped"));
            }
        }
        Ok(self.things.lock().get(&(clock_id, tsn)).cloned())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{Config, KeyedStore};
    use tidemark_protocol::OpKind;

    #[test]
    fn session_peer_reads_through_session() {
        let config = Config::new().object_classes(["power"]).max_tail_batch(2);
        let session = Arc::new(Session::open_in_memory("b", &config).unwrap());
        let peer = SessionPeer::new(Arc::clone(&session));
        assert_eq!(peer.identity().unwrap(), None);

        let me = session.register_local(None, "tcp://b", b"").unwrap();
        let table = session.table("power").unwrap();
        for key in ["a", "b", "c"] {
            table.put(key, vec![1]).unwrap();
        }

        assert_eq!(peer.name(), "b");
        assert_eq!(peer.identity().unwrap(), Some(me));
        assert_eq!(peer.remote_highs().unwrap(), vec![HighWaterMark::new(me, Tsn::new(3))]);

        let page = peer.oplog_tail(me, Tsn::ZERO, 100).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);

        assert!(peer.anti_entropy_get("power", me, Tsn::new(1)).unwrap().is_some());
        assert!(peer.anti_entropy_get("power", me, Tsn::new(9)).unwrap().is_none());
        assert!(matches!(
            peer.anti_entropy_get("users", me, Tsn::new(1)),
            Err(SyncError::Peer(NodeError::UnknownObjectClass(_)))
        ));
        assert!(peer.is_connected());
    }

    #[test]
    fn mock_peer_serves_script() {
        let peer = MockPeer::new("mock");
        let origin = ClockId::new(2);
        peer.set_tail(
            origin,
            (1..=3)
                .map(|t| OplogEntry::new("power", origin, Tsn::new(t), OpKind::Delete, "k"))
                .collect(),
        );

        let page = peer.oplog_tail(origin, Tsn::new(1), 1).unwrap();
        assert_eq!(page.last_tsn(), Some(Tsn::new(2)));
        assert!(page.has_more);

        peer.set_connected(false);
        assert!(matches!(peer.remote_highs(), Err(SyncError::NotConnected)));
    }
}
