//! Node configuration.

use crate::error::{StoreError, StoreResult};
use std::env;
use std::path::PathBuf;

/// Environment variable holding the store connection template.
pub const STORE_ENV: &str = "TIDEMARK_STORE";

/// Environment variable holding the comma-separated object-class allow-list.
pub const OBJECT_CLASSES_ENV: &str = "TIDEMARK_OBJECT_CLASSES";

/// Placeholder replaced by the node name in a store template.
pub const DATABASE_PLACEHOLDER: &str = "$database$";

/// Template value selecting volatile in-memory stores.
pub const MEMORY_TEMPLATE: &str = "memory:";

/// Where the store for one node name lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Volatile in-memory store.
    Memory,
    /// Journal file.
    File(PathBuf),
}

/// Configuration shared by every session of a process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection template: `memory:` or a file path containing
    /// `$database$`.
    pub store_template: String,

    /// Whether to sync the journal after every record (safer but slower).
    pub sync_on_write: bool,

    /// Object classes served by anti-entropy fetches.
    pub object_classes: Vec<String>,

    /// Largest oplog page served to a peer in one response.
    pub max_tail_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_template: MEMORY_TEMPLATE.to_string(),
            sync_on_write: true,
            object_classes: Vec::new(),
            max_tail_batch: 1000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from `TIDEMARK_STORE` and
    /// `TIDEMARK_OBJECT_CLASSES`, falling back to defaults for unset values.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(template) = env::var(STORE_ENV) {
            if !template.trim().is_empty() {
                config.store_template = template.trim().to_string();
            }
        }
        if let Ok(classes) = env::var(OBJECT_CLASSES_ENV) {
            config.object_classes = parse_class_list(&classes);
        }
        config
    }

    /// Sets the store connection template.
    #[must_use]
    pub fn store_template(mut self, template: impl Into<String>) -> Self {
        self.store_template = template.into();
        self
    }

    /// Sets whether to sync the journal after every record.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the object-class allow-list.
    #[must_use]
    pub fn object_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the largest oplog page served to a peer.
    #[must_use]
    pub const fn max_tail_batch(mut self, size: usize) -> Self {
        self.max_tail_batch = size;
        self
    }

    /// Resolves the store location for a node name.
    ///
    /// Names are restricted to ASCII letters, digits, `-`, `_` and `.` so a
    /// name can never escape the directory of a file template.
    pub fn store_location(&self, name: &str) -> StoreResult<StoreLocation> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::Unreachable(format!("invalid node name {name:?}")));
        }

        if self.store_template == MEMORY_TEMPLATE {
            return Ok(StoreLocation::Memory);
        }
        if !self.store_template.contains(DATABASE_PLACEHOLDER) {
            return Err(StoreError::Unreachable(format!(
                "store template {:?} has no {DATABASE_PLACEHOLDER} placeholder",
                self.store_template
            )));
        }
        Ok(StoreLocation::File(PathBuf::from(
            self.store_template.replace(DATABASE_PLACEHOLDER, name),
        )))
    }
}

fn parse_class_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
