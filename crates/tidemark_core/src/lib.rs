//! # Tidemark Core
//!
//! Node-local replication state for Tidemark.
//!
//! This crate provides:
//! - Node registry and clock-id assignment
//! - Monotonic per-node sequence generation (TSN)
//! - The append-only operation log
//! - Per-origin high-water-mark tracking
//! - Object-class snapshot serving and replicated keyed tables
//! - A checksummed journal that persists all of the above
//! - Shared per-name sessions
//!
//! ## Example
//!
//! ```rust
//! use tidemark_core::{Config, KeyedStore, Session};
//! use tidemark_protocol::Tsn;
//!
//! let config = Config::new().object_classes(["power"]);
//! let master = Session::open_in_memory("master", &config).unwrap();
//! let engine = Session::open_in_memory("engine3", &config).unwrap();
//!
//! master.register_local(None, "tcp://master", b"").unwrap();
//! let me = engine.register_local(Some(&master), "tcp://engine3", b"").unwrap();
//!
//! engine.table("power").unwrap().put("meter-7", vec![42]).unwrap();
//! assert_eq!(engine.oplog_tail(me, Tsn::ZERO).unwrap().len(), 1);
//! assert_eq!(engine.check_high(me).unwrap(), Tsn::new(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod journal;
mod oplog;
mod registry;
mod sequence;
mod session;
mod sessions;
mod store;
mod table;
mod things;
mod watermark;

pub use config::{
    Config, StoreLocation, DATABASE_PLACEHOLDER, MEMORY_TEMPLATE, OBJECT_CLASSES_ENV, STORE_ENV,
};
pub use error::{NodeError, NodeResult, StoreError, StoreResult};
pub use journal::{compute_crc32, Journal, JournalRecord, RecordType, Replay, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use registry::Registration;
pub use sequence::SequenceSpace;
pub use session::Session;
pub use sessions::{get_session, global_registry, SessionRegistry, StoreConnector, TemplateConnector};
pub use store::{Change, JournalStore, LocalMutation, NodeStore};
pub use table::{KeyedStore, ReplicatedTable};
pub use things::{is_valid_class_name, SnapshotFetcher, ThingFetcher, ThingRegistry, MAX_CLASS_NAME_LEN};
