//! # Tidemark Testkit
//!
//! Test utilities for Tidemark.
//!
//! This crate provides:
//! - Node fixtures backed by memory or a temporary directory
//! - Cluster scenarios with a master handing out clock ids
//! - A hand-driven pull for tests that bypass the synchronizer
//! - Property-based generators using proptest
//! - Crash simulation for journal recovery
//! - Stress helpers for concurrent sequence and oplog use
//!
//! ## Usage
//!
//! ```rust
//! use tidemark_core::KeyedStore;
//! use tidemark_testkit::prelude::*;
//!
//! let cluster = scenarios::cluster(2);
//! let engine = &cluster.nodes[0];
//! engine.table(TEST_CLASS).unwrap().put("meter-1", vec![1]).unwrap();
//!
//! let origin = engine.my_clock_id().unwrap();
//! assert_eq!(pull_origin(&cluster.master, engine, origin), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
