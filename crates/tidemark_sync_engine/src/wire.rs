//! Peer wire protocol.
//!
//! [`RequestHandler`] serves CBOR-encoded [`PeerRequest`]s against a local
//! session. [`WirePeer`] is the client side: it implements [`SyncPeer`] over
//! any byte transport that implements [`WireClient`].

use crate::error::{SyncError, SyncResult};
use crate::peer::SyncPeer;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidemark_core::{NodeError, Session};
use tidemark_protocol::{
    ClockId, Envelope, HighWaterMark, OplogPage, PeerRequest, PeerResponse, RemoteError,
    RemoteErrorKind, Thing, Tsn,
};
use tracing::{debug, warn};

/// Serves peer requests from one session.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    session: Arc<Session>,
}

impl RequestHandler {
    /// Creates a handler for `session`.
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Returns the served session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handles one decoded request.
    pub fn handle(&self, request: PeerRequest) -> PeerResponse {
        debug!(session = %self.session.name(), request = request.name(), "serving peer request");
        let result = match request {
            PeerRequest::Identity => match self.session.my_clock_id() {
                Ok(id) => Ok(PeerResponse::Identity { clock_id: Some(id) }),
                Err(NodeError::Registration(_)) => Ok(PeerResponse::Identity { clock_id: None }),
                Err(e) => Err(e),
            },
            PeerRequest::RemoteHighs => self.session.remote_highs().map(PeerResponse::RemoteHighs),
            PeerRequest::CheckHigh { clock_id } => self.session.check_high(clock_id).map(PeerResponse::High),
            PeerRequest::OplogTail {
                clock_id,
                since,
                limit,
            } => {
                let limit = (limit as usize).min(self.session.max_tail_batch());
                self.session
                    .oplog_page(clock_id, since, limit)
                    .map(PeerResponse::OplogTail)
            }
            PeerRequest::Thing {
                class,
                clock_id,
                tsn,
            } => match self.session.anti_entropy_get(&class, clock_id, tsn) {
                Ok(thing) => Ok(PeerResponse::Thing(Some(thing))),
                Err(NodeError::NotFound(_)) => Ok(PeerResponse::Thing(None)),
                Err(e) => Err(e),
            },
        };
        result.unwrap_or_else(|e| PeerResponse::Error(to_remote(&e)))
    }

    /// Handles one encoded request and returns the encoded response.
    ///
    /// Undecodable requests are answered with a `BadRequest` error.
    pub fn handle_bytes(&self, body: &[u8]) -> Result<Vec<u8>, String> {
        let response = match Envelope::<PeerRequest>::decode(body) {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!(session = %self.session.name(), error = %e, "rejecting peer request");
                PeerResponse::Error(RemoteError::new(RemoteErrorKind::BadRequest, e.to_string()))
            }
        };
        Envelope::new(response).encode().map_err(|e| e.to_string())
    }
}

/// Maps a node error onto the wire.
pub fn to_remote(err: &NodeError) -> RemoteError {
    let kind = match err {
        NodeError::Connection(_) => RemoteErrorKind::Connection,
        NodeError::Registration(_) => RemoteErrorKind::Registration,
        NodeError::TsnUnavailable(_) => RemoteErrorKind::TsnUnavailable,
        NodeError::OplogRead(_) => RemoteErrorKind::OplogRead,
        NodeError::HighWaterRead(_) => RemoteErrorKind::HighWaterRead,
        NodeError::NotFound(_) => RemoteErrorKind::NotFound,
        NodeError::UnknownObjectClass(_) => RemoteErrorKind::UnknownObjectClass,
        NodeError::HighWaterRegression { .. } | NodeError::OperationFailed(_) => {
            RemoteErrorKind::OperationFailed
        }
    };
    RemoteError::new(kind, err.to_string())
}

/// Maps a wire error back to a sync error.
pub fn from_remote(err: RemoteError) -> SyncError {
    let message = err.message;
    let node = match err.kind {
        RemoteErrorKind::BadRequest => return SyncError::Protocol(message),
        RemoteErrorKind::Connection => NodeError::Connection(message),
        RemoteErrorKind::Registration => NodeError::Registration(message),
        RemoteErrorKind::TsnUnavailable => NodeError::TsnUnavailable(message),
        RemoteErrorKind::OplogRead => NodeError::OplogRead(message),
        RemoteErrorKind::HighWaterRead => NodeError::HighWaterRead(message),
        RemoteErrorKind::NotFound => NodeError::NotFound(message),
        RemoteErrorKind::UnknownObjectClass => NodeError::UnknownObjectClass(message),
        RemoteErrorKind::OperationFailed => NodeError::OperationFailed(message),
    };
    SyncError::Peer(node)
}

/// Byte transport to a remote [`RequestHandler`].
///
/// Implement this trait to carry peer requests over an actual network
/// connection.
pub trait WireClient: Send + Sync {
    /// Sends an encoded request and returns the encoded response.
    fn send(&self, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// A [`SyncPeer`] reached through a [`WireClient`].
pub struct WirePeer<C: WireClient> {
    name: String,
    client: C,
    open: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: WireClient> WirePeer<C> {
    /// Creates a peer named `name` over `client`.
    pub fn new(name: impl Into<String>, client: C) -> Self {
        Self {
            name: name.into(),
            client,
            open: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Closes the peer; later requests fail with [`SyncError::NotConnected`].
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn call(&self, request: PeerRequest) -> SyncResult<PeerResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let name = request.name();
        let body = Envelope::new(request).encode()?;

        let response = self.client.send(body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(format!("{name}: {e}"))
        })?;
        *self.last_error.write() = None;

        match Envelope::<PeerResponse>::decode(&response)? {
            PeerResponse::Error(err) => Err(from_remote(err)),
            response => Ok(response),
        }
    }
}

fn unexpected(request: &str, response: &PeerResponse) -> SyncError {
    SyncError::Protocol(format!("unexpected response to {request}: {response:?}"))
}

impl<C: WireClient> SyncPeer for WirePeer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> SyncResult<Option<ClockId>> {
        match self.call(PeerRequest::Identity)? {
            PeerResponse::Identity { clock_id } => Ok(clock_id),
            other => Err(unexpected("identity", &other)),
        }
    }

    fn remote_highs(&self) -> SyncResult<Vec<HighWaterMark>> {
        match self.call(PeerRequest::RemoteHighs)? {
            PeerResponse::RemoteHighs(highs) => Ok(highs),
            other => Err(unexpected("remote_highs", &other)),
        }
    }

    fn oplog_tail(&self, clock_id: ClockId, since: Tsn, limit: u32) -> SyncResult<OplogPage> {
        match self.call(PeerRequest::OplogTail {
            clock_id,
            since,
            limit,
        })? {
            PeerResponse::OplogTail(page) => Ok(page),
            other => Err(unexpected("oplog_tail", &other)),
        }
    }

    fn anti_entropy_get(&self, class: &str, clock_id: ClockId, tsn: Tsn) -> SyncResult<Option<Thing>> {
        let request = PeerRequest::Thing {
            class: class.to_string(),
            clock_id,
            tsn,
        };
        match self.call(request) {
            Ok(PeerResponse::Thing(thing)) => Ok(thing),
            Ok(other) => Err(unexpected("thing", &other)),
            Err(SyncError::Peer(NodeError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

impl<C: WireClient> std::fmt::Debug for WirePeer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WirePeer")
            .field("name", &self.name)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A wire client that routes requests directly to a handler in the same
/// process.
///
/// Useful for testing without actual network overhead; it can be switched
/// off to simulate an unreachable peer.
#[derive(Debug, Clone)]
pub struct LoopbackClient {
    handler: RequestHandler,
    healthy: Arc<AtomicBool>,
}

impl LoopbackClient {
    /// Creates a client connected to `handler`.
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            handler,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes requests fail (or succeed again).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl WireClient for LoopbackClient {
    fn send(&self, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        self.handler.handle_bytes(&body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{Config, KeyedStore};

    fn serving() -> (Arc<Session>, WirePeer<LoopbackClient>, LoopbackClient) {
        let config = Config::new().object_classes(["power"]);
        let session = Arc::new(Session::open_in_memory("b", &config).unwrap());
        let client = LoopbackClient::new(RequestHandler::new(Arc::clone(&session)));
        let peer = WirePeer::new("b", client.clone());
        (session, peer, client)
    }

    #[test]
    fn requests_round_trip() {
        let (session, peer, _client) = serving();
        assert_eq!(peer.identity().unwrap(), None);

        let me = session.register_local(None, "tcp://b", b"").unwrap();
        session.table("power").unwrap().put("k", vec![3]).unwrap();

        assert_eq!(peer.identity().unwrap(), Some(me));
        assert_eq!(peer.remote_highs().unwrap(), session.remote_highs().unwrap());
        let page = peer.oplog_tail(me, Tsn::ZERO, 10).unwrap();
        assert_eq!(page.entries, session.oplog_tail(me, Tsn::ZERO).unwrap());

        let thing = peer.anti_entropy_get("power", me, Tsn::new(1)).unwrap().unwrap();
        assert_eq!(thing.value, vec![3]);
        assert!(peer.anti_entropy_get("power", me, Tsn::new(2)).unwrap().is_none());
    }

    #[test]
    fn remote_errors_are_typed() {
        let (_session, peer, _client) = serving();
        assert!(matches!(
            peer.anti_entropy_get("users", ClockId::new(1), Tsn::new(1)),
            Err(SyncError::Peer(NodeError::UnknownObjectClass(_)))
        ));
    }

    #[test]
    fn garbage_is_bad_request() {
        let (session, _peer, _client) = serving();
        let handler = RequestHandler::new(session);
        let bytes = handler.handle_bytes(&[0xFF, 0x00]).unwrap();
        let response: PeerResponse = Envelope::decode(&bytes).unwrap();
        assert!(matches!(
            response,
            PeerResponse::Error(RemoteError {
                kind: RemoteErrorKind::BadRequest,
                ..
            })
        ));
    }

    #[test]
    fn unreachable_and_closed() {
        let (_session, peer, client) = serving();
        client.set_healthy(false);
        let err = peer.remote_highs().unwrap_err();
        assert!(err.is_retryable());
        assert!(peer.last_error().is_some());

        client.set_healthy(true);
        peer.remote_highs().unwrap();
        assert!(peer.last_error().is_none());

        peer.close();
        assert!(!peer.is_connected());
        assert!(matches!(peer.identity(), Err(SyncError::NotConnected)));
    }

    #[test]
    fn error_mapping_is_symmetric() {
        let errors = [
            NodeError::Connection("a".into()),
            NodeError::OplogRead("b".into()),
            NodeError::UnknownObjectClass("c".into()),
        ];
        for err in errors {
            match from_remote(to_remote(&err)) {
                SyncError::Peer(back) => {
                    assert_eq!(std::mem::discriminant(&back), std::mem::discriminant(&err))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
