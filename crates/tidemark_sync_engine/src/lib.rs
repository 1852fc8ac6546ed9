//! # Tidemark Sync Engine
//!
//! Pull-based anti-entropy between Tidemark nodes.
//!
//! This crate provides:
//! - The synchronizer state machine (idle → planning → pulling → synced)
//! - Peer abstraction over in-process sessions and byte transports
//! - The request handler that serves pulls from a session
//! - Retry with exponential backoff
//! - A tokio scheduler running periodic rounds
//!
//! ## Model
//!
//! A node pulls; it never pushes. For every origin it is interested in, it
//! asks the peer for the oplog tail above its own high-water mark, applies
//! each entry in tsn order together with the snapshot the peer holds for
//! it, then raises the mark. Because the mark only moves past applied
//! entries, an interrupted pull resumes where it stopped and a repeated
//! pull applies nothing.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tidemark_core::{Config, KeyedStore, Session};
//! use tidemark_sync_engine::{SessionPeer, SyncConfig, Synchronizer};
//!
//! let config = Config::new().object_classes(["power"]);
//! let a = Arc::new(Session::open_in_memory("a", &config).unwrap());
//! let b = Arc::new(Session::open_in_memory("b", &config).unwrap());
//! a.register_local(None, "tcp://a", b"").unwrap();
//! b.register_local(Some(a.as_ref()), "tcp://b", b"").unwrap();
//!
//! b.table("power").unwrap().put("pump-1", vec![42]).unwrap();
//!
//! let sync = Synchronizer::new(Arc::clone(&a), SyncConfig::default());
//! let report = sync.sync_from(&SessionPeer::new(b)).unwrap();
//! assert_eq!(report.total_applied(), 1);
//! assert_eq!(a.table("power").unwrap().get("pump-1").unwrap(), Some(vec![42]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod peer;
mod scheduler;
mod wire;

pub use config::{FrontierSource, RetryConfig, SyncConfig};
pub use engine::{OriginReport, SyncReport, SyncState, SyncStats, Synchronizer};
pub use error::{SyncError, SyncResult};
pub use peer::{MockPeer, SessionPeer, SyncPeer};
pub use scheduler::{SchedulerHandle, SyncPair, SyncScheduler};
pub use wire::{from_remote, to_remote, LoopbackClient, RequestHandler, WireClient, WirePeer};
