// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use autobonk_core::{PrivateKey, PublicKey};
use thiserror::Error;

use crate::log::store::LogStore;

#[derive(Debug)]
struct Namespace {
    private_key: PrivateKey,
    logs: HashMap<PublicKey, LogStore>,
}

impl Namespace {
    fn new() -> Self {
        Self {
            private_key: PrivateKey::new(),
            logs: HashMap::new(),
        }
    }
}

/// Keyed storage of one peer, partitioned into namespaces.
///
/// Every namespace has its own local writer key pair and holds the logs of the contexts opened
/// in it. Logs outlive the contexts using them, re-opening a context in the same namespace
/// continues with the same local writer and all entries known so far.
#[derive(Clone, Debug, Default)]
pub struct Storage {
    inner: Arc<Mutex<HashMap<String, Namespace>>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Namespace>> {
        self.inner.lock().expect("acquire lock on storage")
    }

    /// Private key of the local writer in a namespace, created on first access.
    pub fn private_key(&self, namespace: &str) -> PrivateKey {
        self.lock()
            .entry(namespace.to_string())
            .or_insert_with(Namespace::new)
            .private_key
            .clone()
    }

    /// Log of a context in a namespace, created on first access.
    ///
    /// Without a context key the log of a new context is returned, its key is the namespace's
    /// local writer key.
    pub fn log(&self, namespace: &str, key: Option<PublicKey>) -> LogStore {
        let mut namespaces = self.lock();
        let namespace = namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::new);

        let private_key = namespace.private_key.clone();
        let key = key.unwrap_or_else(|| private_key.public_key());

        namespace
            .logs
            .entry(key)
            .or_insert_with(|| LogStore::new(key, private_key))
            .clone()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().contains_key(namespace)
    }

    /// Move all keys and logs of a namespace to a new name.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut namespaces = self.lock();

        if namespaces.contains_key(to) {
            return Err(StorageError::NamespaceExists(to.to_string()));
        }

        let namespace = namespaces
            .remove(from)
            .ok_or_else(|| StorageError::UnknownNamespace(from.to_string()))?;
        namespaces.insert(to.to_string(), namespace);

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("namespace {0} already exists")]
    NamespaceExists(String),

    #[error("namespace {0} does not exist")]
    UnknownNamespace(String),
}
