// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use autobonk_core::PublicKey;

/// Writers admitted to a context, derived while applying the log.
///
/// Starts out with the bootstrap writer (the context's creator) only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterSet {
    bootstrap: PublicKey,
    writers: BTreeMap<PublicKey, bool>,
}

impl WriterSet {
    pub fn new(bootstrap: PublicKey) -> Self {
        Self {
            bootstrap,
            writers: BTreeMap::from([(bootstrap, true)]),
        }
    }

    pub fn add_writer(&mut self, key: PublicKey, is_indexer: bool) {
        self.writers.insert(key, is_indexer);
    }

    /// Returns `false` if the key was not a writer.
    pub fn remove_writer(&mut self, key: &PublicKey) -> bool {
        self.writers.remove(key).is_some()
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.writers.contains_key(key)
    }

    pub fn is_indexer(&self, key: &PublicKey) -> bool {
        self.writers.get(key).copied().unwrap_or(false)
    }

    /// Forget all admissions, used before replaying the log from the start.
    pub fn reset(&mut self) {
        *self = Self::new(self.bootstrap);
    }
}
