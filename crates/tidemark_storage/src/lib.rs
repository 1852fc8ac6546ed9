//! # Tidemark Storage
//!
//! Append-only byte backends underneath the Tidemark node journal.
//!
//! A backend is an **opaque byte log**: the journal above it owns record
//! framing, checksums and replay. Backends only append, read back, report
//! their length, make data durable and cut off a torn tail.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - volatile, with an offline switch for fault tests
//! - [`FileBackend`] - one journal file per node store
//!
//! ## Example
//!
//! ```rust
//! use tidemark_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
