//! Object classes served to anti-entropy fetches.
//!
//! A peer can only fetch snapshots of classes this node allow-lists. Each
//! allowed class maps to a [`ThingFetcher`]; the default one reads the
//! snapshots the store retained when the version was written or applied.

use crate::error::{NodeError, NodeResult, Operation, StoreResult};
use crate::session::Session;
use crate::store::NodeStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tidemark_protocol::{ClockId, LogicalTimestamp, Thing, Tsn};

/// Longest accepted object-class name in bytes.
pub const MAX_CLASS_NAME_LEN: usize = 63;

/// Returns true if `name` is an ASCII identifier of acceptable length.
pub fn is_valid_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_CLASS_NAME_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Materializes one version of an object.
pub trait ThingFetcher: Send + Sync {
    /// Returns the snapshot of `class` written at `(clock_id, tsn)`, or
    /// `None` if this node has no such version.
    fn fetch(
        &self,
        store: &dyn NodeStore,
        class: &str,
        clock_id: ClockId,
        tsn: Tsn,
    ) -> StoreResult<Option<Thing>>;
}

/// Reads snapshots retained by the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotFetcher;

impl ThingFetcher for SnapshotFetcher {
    fn fetch(
        &self,
        store: &dyn NodeStore,
        class: &str,
        clock_id: ClockId,
        tsn: Tsn,
    ) -> StoreResult<Option<Thing>> {
        store.thing(class, clock_id, tsn)
    }
}

/// Allow-list of object classes and their fetchers.
#[derive(Clone, Default)]
pub struct ThingRegistry {
    handlers: BTreeMap<String, Arc<dyn ThingFetcher>>,
}

impl ThingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry allowing `classes` with the default fetcher.
    pub fn with_classes<I, S>(classes: I) -> NodeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for class in classes {
            registry.allow(class.as_ref())?;
        }
        Ok(registry)
    }

    /// Allows `class` with the default fetcher, keeping any custom one.
    pub fn allow(&mut self, class: &str) -> NodeResult<()> {
        check_name(class)?;
        self.handlers
            .entry(class.to_string())
            .or_insert_with(|| Arc::new(SnapshotFetcher));
        Ok(())
    }

    /// Allows `class` and serves it through `fetcher`.
    pub fn register(&mut self, class: &str, fetcher: Arc<dyn ThingFetcher>) -> NodeResult<()> {
        check_name(class)?;
        self.handlers.insert(class.to_string(), fetcher);
        Ok(())
    }

    /// Returns true if `class` is allowed.
    pub fn is_allowed(&self, class: &str) -> bool {
        self.handlers.contains_key(class)
    }

    /// Returns the allowed classes in order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Returns the fetcher for `class`.
    pub fn fetcher(&self, class: &str) -> NodeResult<&Arc<dyn ThingFetcher>> {
        self.handlers
            .get(class)
            .ok_or_else(|| NodeError::UnknownObjectClass(class.to_string()))
    }
}

impl fmt::Debug for ThingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

fn check_name(class: &str) -> NodeResult<()> {
    if is_valid_class_name(class) {
        Ok(())
    } else {
        Err(NodeError::UnknownObjectClass(class.to_string()))
    }
}

impl Session {
    /// Fetches the snapshot of `class` written at `(clock_id, tsn)`.
    ///
    /// # Errors
    ///
    /// - [`NodeError::UnknownObjectClass`] if the class is not allow-listed
    /// - [`NodeError::NotFound`] if this node has no such version
    pub fn anti_entropy_get(&self, class: &str, clock_id: ClockId, tsn: Tsn) -> NodeResult<Thing> {
        let fetcher = self.things().fetcher(class)?;
        fetcher
            .fetch(self.store().as_ref(), class, clock_id, tsn)
            .map_err(|e| e.fold(Operation::Other))?
            .ok_or_else(|| {
                NodeError::NotFound(format!("{class} {}", LogicalTimestamp::new(clock_id, tsn)))
            })
    }
}
