// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory indexed view holding the derived state of a context.
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use autobonk_core::Hash;
use autobonk_core::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Typed collection of records in the view.
///
/// Records are stored under the CBOR encoding of their key, inserting a record with an existing
/// key replaces it.
pub trait Collection {
    /// Name of the collection, unique within one view.
    const NAME: &'static str;

    type Key: Serialize;

    type Record: Serialize + DeserializeOwned;

    /// Extract the key from a record.
    fn key(record: &Self::Record) -> Self::Key;
}

/// Read access shared by the view itself and its readers.
pub trait ReadView {
    /// Record stored under the given key.
    fn record<C: Collection>(&self, key: &C::Key) -> Result<Option<C::Record>, ViewError>;

    /// All records of a collection, ordered by their encoded key.
    fn records<C: Collection>(&self) -> Result<Vec<C::Record>, ViewError>;
}

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Tables(BTreeMap<&'static str, Table>);

impl Tables {
    fn get(&self, collection: &'static str, key: &[u8]) -> Option<&Vec<u8>> {
        self.0.get(collection).and_then(|table| table.get(key))
    }

    fn set(&mut self, collection: &'static str, key: Vec<u8>, value: Option<Vec<u8>>) {
        match value {
            Some(value) => {
                self.0.entry(collection).or_default().insert(key, value);
            }
            None => {
                if let Some(table) = self.0.get_mut(collection) {
                    table.remove(&key);
                    if table.is_empty() {
                        self.0.remove(collection);
                    }
                }
            }
        }
    }

    fn table(&self, collection: &'static str) -> impl Iterator<Item = &Vec<u8>> {
        self.0.get(collection).into_iter().flat_map(|table| table.values())
    }
}

/// Position in the view's write journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Derived state of a context.
///
/// Writes are staged in a working copy and recorded in a journal until the view gets flushed.
/// Reads through the view itself observe staged writes, reads through a [`ViewReader`] only ever
/// observe flushed state.
#[derive(Debug)]
pub struct MemoryView {
    flushed: Arc<RwLock<Tables>>,
    staged: Tables,
    journal: Vec<(&'static str, Vec<u8>, Option<Vec<u8>>)>,
    truncated: bool,
}

impl MemoryView {
    pub fn new() -> Self {
        Self {
            flushed: Arc::new(RwLock::new(Tables::default())),
            staged: Tables::default(),
            journal: Vec::new(),
            truncated: false,
        }
    }

    /// Read-only handle on the flushed state of this view.
    pub fn reader(&self) -> ViewReader {
        ViewReader {
            inner: self.flushed.clone(),
        }
    }

    pub fn get<C: Collection>(&self, key: &C::Key) -> Result<Option<C::Record>, ViewError> {
        let key = encode_cbor(key)?;
        self.staged
            .get(C::NAME, &key)
            .map(|bytes| decode_cbor(&bytes[..]).map_err(ViewError::from))
            .transpose()
    }

    /// Lazily iterate over all records of a collection, ordered by their encoded key.
    pub fn find<C: Collection>(&self) -> impl Iterator<Item = Result<C::Record, ViewError>> + '_ {
        self.staged
            .table(C::NAME)
            .map(|bytes| decode_cbor(&bytes[..]).map_err(ViewError::from))
    }

    /// First record of a collection, if any.
    pub fn find_one<C: Collection>(&self) -> Result<Option<C::Record>, ViewError> {
        self.find::<C>().next().transpose()
    }

    /// Insert or replace a record.
    pub fn insert<C: Collection>(&mut self, record: &C::Record) -> Result<(), ViewError> {
        let key = encode_cbor(&C::key(record))?;
        let value = encode_cbor(record)?;
        self.write(C::NAME, key, Some(value));
        Ok(())
    }

    /// Delete a record, returns `false` if it did not exist.
    pub fn delete<C: Collection>(&mut self, key: &C::Key) -> Result<bool, ViewError> {
        let key = encode_cbor(key)?;
        if self.staged.get(C::NAME, &key).is_none() {
            return Ok(false);
        }
        self.write(C::NAME, key, None);
        Ok(true)
    }

    fn write(&mut self, collection: &'static str, key: Vec<u8>, value: Option<Vec<u8>>) {
        let previous = self.staged.get(collection, &key).cloned();
        self.staged.set(collection, key.clone(), value);
        self.journal.push((collection, key, previous));
    }

    /// Mark the current position of the write journal.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.journal.len())
    }

    /// Undo all staged writes made after the given savepoint.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.journal.len() > savepoint.0 {
            if let Some((collection, key, previous)) = self.journal.pop() {
                self.staged.set(collection, key, previous);
            }
        }
    }

    /// Drop all derived state, the next flush will publish an empty view plus whatever was
    /// written in between.
    ///
    /// Used when the linearised history changed and the log needs to be replayed from the start.
    pub fn reset(&mut self) {
        self.staged = Tables::default();
        self.journal.clear();
        self.truncated = true;
    }

    /// Publish all staged writes to readers.
    pub fn flush(&mut self) {
        let mut flushed = self
            .flushed
            .write()
            .expect("acquire exclusive write access on view");
        if self.truncated {
            *flushed = self.staged.clone();
        } else {
            for (collection, key, _) in self.journal.drain(..) {
                let value = self.staged.get(collection, &key).cloned();
                flushed.set(collection, key, value);
            }
        }
        drop(flushed);

        self.journal.clear();
        self.truncated = false;
    }
}

impl ReadView for MemoryView {
    fn record<C: Collection>(&self, key: &C::Key) -> Result<Option<C::Record>, ViewError> {
        self.get::<C>(key)
    }

    fn records<C: Collection>(&self) -> Result<Vec<C::Record>, ViewError> {
        self.find::<C>().collect()
    }
}

impl Default for MemoryView {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared read access to the flushed state of a view.
#[derive(Clone, Debug)]
pub struct ViewReader {
    inner: Arc<RwLock<Tables>>,
}

impl ViewReader {
    fn read_flushed(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner
            .read()
            .expect("acquire shared read access on view")
    }

    pub fn get<C: Collection>(&self, key: &C::Key) -> Result<Option<C::Record>, ViewError> {
        let key = encode_cbor(key)?;
        self.read_flushed()
            .get(C::NAME, &key)
            .map(|bytes| decode_cbor(&bytes[..]).map_err(ViewError::from))
            .transpose()
    }

    /// All records of a collection, ordered by their encoded key.
    pub fn find<C: Collection>(&self) -> Result<Vec<C::Record>, ViewError> {
        self.read_flushed()
            .table(C::NAME)
            .map(|bytes| decode_cbor(&bytes[..]).map_err(ViewError::from))
            .collect()
    }

    pub fn find_one<C: Collection>(&self) -> Result<Option<C::Record>, ViewError> {
        Ok(self.find::<C>()?.into_iter().next())
    }

    /// Hash over the complete flushed state.
    ///
    /// Two replicas which applied the same history have the same digest.
    pub fn digest(&self) -> Hash {
        Hash::new(digest_input(&self.read_flushed()))
    }
}

impl ReadView for ViewReader {
    fn record<C: Collection>(&self, key: &C::Key) -> Result<Option<C::Record>, ViewError> {
        self.get::<C>(key)
    }

    fn records<C: Collection>(&self) -> Result<Vec<C::Record>, ViewError> {
        self.find::<C>()
    }
}

fn digest_input(tables: &Tables) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (collection, table) in &tables.0 {
        bytes.extend_from_slice(&(collection.len() as u64).to_be_bytes());
        bytes.extend_from_slice(collection.as_bytes());
        for (key, value) in table {
            bytes.extend_from_slice(&(key.len() as u64).to_be_bytes());
            bytes.extend_from_slice(key);
            bytes.extend_from_slice(&(value.len() as u64).to_be_bytes());
            bytes.extend_from_slice(value);
        }
    }
    bytes
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("could not encode view record: {0}")]
    Encode(#[from] EncodeError),

    #[error("could not decode view record: {0}")]
    Decode(#[from] DecodeError),
}
