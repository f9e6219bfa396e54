// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definition of the local context index.
use std::fmt::{Debug, Display};

/// Ordered key-value store holding metadata of all contexts known to this process.
///
/// Keys are UTF-8 strings, values opaque bytes. Range queries return all entries whose key starts
/// with the given prefix, ordered by key.
///
/// Two variants of the trait are provided: one which is thread-safe (implementing `Sync`) and one
/// which is purely intended for single-threaded execution contexts.
#[trait_variant::make(ContextIndex: Send)]
pub trait LocalContextIndex: Clone {
    type Error: Display + Debug;

    /// Insert or replace the value stored under a key.
    async fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Self::Error>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Delete an entry.
    ///
    /// Returns `true` when the removal occurred and `false` when no entry was stored under that
    /// key.
    async fn delete(&mut self, key: &str) -> Result<bool, Self::Error>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Self::Error>;
}
