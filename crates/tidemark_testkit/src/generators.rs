//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small pool so that generated sequences revisit
//! keys, producing updates and deletes as well as inserts.

use proptest::prelude::*;
use std::collections::BTreeMap;
use tidemark_core::{KeyedStore, NodeResult, ReplicatedTable};

/// Strategy for keys from a pool of eight.
pub fn key_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|i| format!("key-{i}"))
}

/// Strategy for values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for valid object class names.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,62}").expect("Invalid regex")
}

/// A mutation applied through a [`ReplicatedTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Write a value.
    Put {
        /// Key written.
        key: String,
        /// Value written.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Key removed.
        key: String,
    },
}

impl Mutation {
    /// Applies the mutation to `table`.
    pub fn apply(&self, table: &ReplicatedTable<'_>) -> NodeResult<()> {
        match self {
            Mutation::Put { key, value } => table.put(key, value.clone()),
            Mutation::Delete { key } => table.delete(key),
        }
    }

    /// Applies the mutation to a plain map.
    pub fn apply_to_model(&self, model: &mut BTreeMap<String, Vec<u8>>) {
        match self {
            Mutation::Put { key, value } => {
                model.insert(key.clone(), value.clone());
            }
            Mutation::Delete { key } => {
                model.remove(key);
            }
        }
    }
}

/// Strategy for one mutation, weighted towards writes.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(key, value)| Mutation::Put { key, value }),
        1 => key_strategy().prop_map(|key| Mutation::Delete { key }),
    ]
}

/// Strategy for a sequence of mutations.
pub fn mutation_sequence_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::is_valid_class_name;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn class_names_are_valid(name in class_name_strategy()) {
            prop_assert!(is_valid_class_name(&name));
        }

        #[test]
        fn keys_come_from_pool(key in key_strategy()) {
            prop_assert!(key.starts_with("key-"));
            prop_assert_eq!(key.len(), 5);
        }
    }
}
