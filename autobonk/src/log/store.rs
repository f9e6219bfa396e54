// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use autobonk_core::cbor::EncodeError;
use autobonk_core::{PrivateKey, PublicKey};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::log::entry::Entry;

type EntryId = (PublicKey, u64);

#[derive(Debug)]
struct InnerLogStore {
    key: PublicKey,
    private_key: PrivateKey,
    entries: RwLock<BTreeMap<EntryId, Entry>>,
    peers: Mutex<Vec<Weak<InnerLogStore>>>,
    version: watch::Sender<u64>,
}

/// All entries of all writers of one context known to this replica.
///
/// Cloned instances share the same entries and replication links.
#[derive(Clone, Debug)]
pub struct LogStore {
    inner: Arc<InnerLogStore>,
}

impl LogStore {
    pub(crate) fn new(key: PublicKey, private_key: PrivateKey) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(InnerLogStore {
                key,
                private_key,
                entries: RwLock::new(BTreeMap::new()),
                peers: Mutex::new(Vec::new()),
                version,
            }),
        }
    }

    /// Key of the context, this is the key of its bootstrap writer.
    pub fn key(&self) -> PublicKey {
        self.inner.key
    }

    /// Key of the local writer.
    pub fn local_key(&self) -> PublicKey {
        self.inner.private_key.public_key()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<EntryId, Entry>> {
        self.inner
            .entries
            .read()
            .expect("acquire shared read access on log")
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<EntryId, Entry>> {
        self.inner
            .entries
            .write()
            .expect("acquire exclusive write access on log")
    }

    fn lock_peers(&self) -> MutexGuard<'_, Vec<Weak<InnerLogStore>>> {
        self.inner.peers.lock().expect("acquire lock on log peers")
    }

    /// Sign and append a payload to the local writer's log.
    pub fn append(&self, payload: Vec<u8>) -> Result<Entry, LogError> {
        let local_key = self.local_key();

        let entry = {
            let mut entries = self.write_entries();

            let seq = contiguous_len(&entries, &local_key);
            let clock = entries
                .values()
                .map(|entry| entry.clock)
                .max()
                .map_or(0, |clock| clock + 1);

            let mut heads = BTreeMap::new();
            for writer in writers(&entries) {
                if writer == local_key {
                    continue;
                }
                let len = contiguous_len(&entries, &writer);
                if len > 0 {
                    heads.insert(writer, len - 1);
                }
            }

            let entry = Entry::sign(&self.inner.private_key, seq, clock, heads, payload)?;
            entries.insert(entry.id(), entry.clone());
            entry
        };

        trace!(writer = %entry.writer, seq = entry.seq, clock = entry.clock, "append entry");

        self.notify();
        self.forward(&entry);

        Ok(entry)
    }

    /// Insert an entry received from another replica.
    ///
    /// Returns `true` when the insert occurred, or `false` when the entry already existed.
    pub fn ingest(&self, entry: Entry) -> Result<bool, LogError> {
        if !entry.verify() {
            return Err(LogError::InvalidSignature {
                writer: entry.writer,
                seq: entry.seq,
            });
        }

        let inserted = {
            let mut entries = self.write_entries();
            if entries.contains_key(&entry.id()) {
                false
            } else {
                entries.insert(entry.id(), entry.clone());
                true
            }
        };

        if inserted {
            trace!(writer = %entry.writer, seq = entry.seq, "ingest entry");
            self.notify();
            self.forward(&entry);
        }

        Ok(inserted)
    }

    fn notify(&self) {
        self.inner.version.send_modify(|version| *version += 1);
    }

    fn forward(&self, entry: &Entry) {
        // Upgrade first so no lock is held while other replicas process the entry.
        let peers: Vec<LogStore> = self
            .lock_peers()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| LogStore { inner })
            .collect();

        for peer in peers {
            if let Err(err) = peer.ingest(entry.clone()) {
                warn!(%err, "replica rejected forwarded entry");
            }
        }
    }

    /// Connect two replicas of the same context and exchange all entries they know about.
    ///
    /// Entries appended or ingested later are forwarded until the replicas get disconnected.
    pub fn replicate(&self, other: &LogStore) -> Result<(), LogError> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }

        if self.key() != other.key() {
            return Err(LogError::KeyMismatch);
        }

        if !self.is_connected(other) {
            self.lock_peers().push(Arc::downgrade(&other.inner));
            other.lock_peers().push(Arc::downgrade(&self.inner));
        }

        for entry in self.entries() {
            other.ingest(entry)?;
        }
        for entry in other.entries() {
            self.ingest(entry)?;
        }

        Ok(())
    }

    fn is_connected(&self, other: &LogStore) -> bool {
        self.lock_peers()
            .iter()
            .any(|peer| std::ptr::eq(peer.as_ptr(), Arc::as_ptr(&other.inner)))
    }

    pub fn disconnect(&self, other: &LogStore) {
        self.lock_peers()
            .retain(|peer| !std::ptr::eq(peer.as_ptr(), Arc::as_ptr(&other.inner)));
        other
            .lock_peers()
            .retain(|peer| !std::ptr::eq(peer.as_ptr(), Arc::as_ptr(&self.inner)));
    }

    /// Snapshot of all entries, ordered by writer and sequence number.
    pub fn entries(&self) -> Vec<Entry> {
        self.read_entries().values().cloned().collect()
    }

    /// Number of entries in the local writer's log.
    pub fn local_len(&self) -> u64 {
        contiguous_len(&self.read_entries(), &self.local_key())
    }

    /// Receiver of a counter increasing every time an entry was added.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }
}

fn writers(entries: &BTreeMap<EntryId, Entry>) -> Vec<PublicKey> {
    let mut writers: Vec<PublicKey> = entries.keys().map(|(writer, _)| *writer).collect();
    writers.dedup();
    writers
}

/// Number of entries of a writer without gaps, starting at sequence number 0.
fn contiguous_len(entries: &BTreeMap<EntryId, Entry>, writer: &PublicKey) -> u64 {
    let mut len = 0;
    for (_, seq) in entries.range((*writer, 0)..=(*writer, u64::MAX)).map(|(id, _)| *id) {
        if seq != len {
            break;
        }
        len += 1;
    }
    len
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("invalid signature on entry {seq} of writer {writer}")]
    InvalidSignature { writer: PublicKey, seq: u64 },

    #[error("can not replicate logs of different contexts")]
    KeyMismatch,
}
