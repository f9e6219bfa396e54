// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of all contexts known to the local process.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use autobonk_core::{EncryptionKey, PublicKey, now_ms};
use autobonk_store::{ContextIndex, MemoryIndex};
#[cfg(feature = "sqlite")]
use autobonk_store::{SqliteIndex, SqliteIndexBuilder, SqliteIndexError};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::apply::Application;
use crate::config::{ContextConfig, IndexConfig, ManagerConfig};
use crate::context::{Context, ContextError, ContextOptions};
use crate::log::{Storage, StorageError};
use crate::pairing::InviteToken;
use crate::swarm::Swarm;

const RECORD_PREFIX: &str = "contexts/";

/// Metadata of a locally known context as kept in the local index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Hex-encoded key of the context.
    pub key: String,

    /// Hex-encoded encryption key of the context.
    pub encryption_key: String,

    pub name: String,

    /// UNIX timestamp in milliseconds.
    pub created_at: u64,

    /// Whether the context was created locally, as opposed to joined through an invite.
    pub is_creator: bool,

    /// Storage namespace holding the local writer and the context's log.
    pub namespace: String,

    /// UNIX timestamp in milliseconds of the last time the context was opened.
    #[serde(default)]
    pub last_used: Option<u64>,
}

impl ContextRecord {
    fn index_key(key: &str) -> String {
        format!("{RECORD_PREFIX}{key}")
    }
}

/// Storage namespace of a context after it was created or joined.
fn context_namespace(key: &PublicKey) -> String {
    format!("ctx-{}", &key.to_hex()[..16])
}

/// Storage namespace for a context which does not know its final key yet.
fn temporary_namespace(prefix: &str) -> String {
    format!("{prefix}-{}-{:08x}", now_ms(), rand::random::<u32>())
}

#[derive(Clone, Debug, Default)]
pub struct CreateContextOptions {
    /// Human readable name, defaults to one derived from the context's key.
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct JoinContextOptions {
    pub name: Option<String>,
}

type SharedLoad<A> = Shared<BoxFuture<'static, Result<Option<Context<A>>, Arc<ManagerError>>>>;

struct InnerManager<I, A: Application> {
    storage: Storage,
    swarm: Swarm,
    app: A,
    config: ContextConfig,
    index: I,
    contexts: Mutex<HashMap<String, Context<A>>>,
    pending: Mutex<HashMap<String, SharedLoad<A>>>,
    closed: AtomicBool,
}

impl<I, A: Application> InnerManager<I, A> {
    fn contexts(&self) -> MutexGuard<'_, HashMap<String, Context<A>>> {
        self.contexts.lock().expect("acquire lock on open contexts")
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, SharedLoad<A>>> {
        self.pending.lock().expect("acquire lock on pending contexts")
    }
}

/// Creates, joins, opens and forgets contexts and keeps track of them in a local index.
///
/// Opened contexts are cached, concurrent requests to open the same context share one load.
pub struct Manager<I, A: Application = ()> {
    inner: Arc<InnerManager<I, A>>,
}

impl<I, A: Application> Clone for Manager<I, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Application> Manager<LocalIndex, A> {
    /// Manager with the local index backend chosen by the configuration.
    pub async fn from_config(
        config: ManagerConfig,
        swarm: Swarm,
        app: A,
    ) -> Result<Self, ManagerError> {
        let index = LocalIndex::from_config(&config.index).await?;
        Ok(Self::new(index, swarm, app, config.context))
    }
}

impl<I, A> Manager<I, A>
where
    I: ContextIndex + Sync + 'static,
    A: Application,
{
    pub fn new(index: I, swarm: Swarm, app: A, config: ContextConfig) -> Self {
        Self::with_storage(Storage::new(), index, swarm, app, config)
    }

    pub fn with_storage(
        storage: Storage,
        index: I,
        swarm: Swarm,
        app: A,
        config: ContextConfig,
    ) -> Self {
        Self {
            inner: Arc::new(InnerManager {
                storage,
                swarm,
                app,
                config,
                index,
                contexts: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), ManagerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ManagerError::Closed);
        }
        Ok(())
    }

    /// Create a new context with the local writer as its owner.
    pub async fn create_context(
        &self,
        options: CreateContextOptions,
    ) -> Result<Context<A>, ManagerError> {
        self.ensure_open()?;

        let ephemeral = temporary_namespace("ctx");
        let context = Context::open(
            &self.inner.storage,
            &self.inner.swarm,
            self.inner.app.clone(),
            ContextOptions {
                namespace: ephemeral.clone(),
                key: None,
                encryption_key: None,
                config: self.inner.config.clone(),
            },
        )
        .await?;

        let record = self
            .settle(context, &ephemeral, options.name, true)
            .await?;
        info!(key = %record.key, name = %record.name, "created context");

        self.cached(&record.key)
            .ok_or(ManagerError::Context(ContextError::Closed))
    }

    /// Redeem an invite and join the context it was issued for.
    pub async fn join_context(
        &self,
        invite: &str,
        options: JoinContextOptions,
    ) -> Result<Context<A>, ManagerError> {
        self.ensure_open()?;

        let token: InviteToken = invite.parse().map_err(ContextError::from)?;
        let temporary = temporary_namespace("temp-join");
        let context = Context::join(
            &self.inner.storage,
            &self.inner.swarm,
            self.inner.app.clone(),
            &token,
            &temporary,
            self.inner.config.clone(),
        )
        .await?;

        let record = self
            .settle(context, &temporary, options.name, false)
            .await?;
        info!(key = %record.key, name = %record.name, "joined context");

        self.cached(&record.key)
            .ok_or(ManagerError::Context(ContextError::Closed))
    }

    /// Move a context opened under a temporary namespace to its final one and record it.
    async fn settle(
        &self,
        context: Context<A>,
        temporary: &str,
        name: Option<String>,
        is_creator: bool,
    ) -> Result<ContextRecord, ManagerError> {
        let key = context.key();
        let key_hex = key.to_hex();
        let now = now_ms();

        let record = ContextRecord {
            key: key_hex.clone(),
            encryption_key: context.encryption_key().to_hex(),
            name: name.unwrap_or_else(|| format!("Context {}", &key_hex[..8])),
            created_at: now,
            is_creator,
            namespace: context_namespace(&key),
            last_used: Some(now),
        };

        context.close().await;
        self.inner.storage.rename(temporary, &record.namespace)?;

        let context = open_record(&self.inner, &record).await?;
        put_record(&self.inner.index, &record).await?;
        self.inner.contexts().insert(key_hex, context);

        Ok(record)
    }

    fn cached(&self, key: &str) -> Option<Context<A>> {
        self.inner.contexts().get(key).cloned()
    }

    /// Open a known context by its hex-encoded key.
    ///
    /// Returns `None` if the context is not in the local index.
    pub async fn get_context(&self, key: &str) -> Result<Option<Context<A>>, ManagerError> {
        self.ensure_open()?;

        let context = match self.cached(key) {
            Some(context) => Some(context),
            None => {
                let load = {
                    let mut pending = self.inner.pending();
                    pending
                        .entry(key.to_string())
                        .or_insert_with(|| {
                            load_context(self.inner.clone(), key.to_string())
                                .boxed()
                                .shared()
                        })
                        .clone()
                };
                load.await.map_err(ManagerError::Load)?
            }
        };

        if context.is_some() {
            self.touch(key).await?;
        }

        Ok(context)
    }

    /// Update the time the context was last used.
    async fn touch(&self, key: &str) -> Result<(), ManagerError> {
        if let Some(mut record) = get_record(&self.inner.index, key).await? {
            record.last_used = Some(now_ms());
            put_record(&self.inner.index, &record).await?;
        }
        Ok(())
    }

    /// Records of all known contexts, most recently created first.
    pub async fn list_contexts(&self) -> Result<Vec<ContextRecord>, ManagerError> {
        let entries = self
            .inner
            .index
            .range(RECORD_PREFIX)
            .await
            .map_err(|err| ManagerError::Index(err.to_string()))?;

        let mut records = entries
            .iter()
            .map(|(_, value)| serde_json::from_slice::<ContextRecord>(value))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records)
    }

    /// Close a context and forget it.
    ///
    /// Returns `false` if the context was not known.
    pub async fn remove_context(&self, key: &str) -> Result<bool, ManagerError> {
        self.ensure_open()?;

        if get_record(&self.inner.index, key).await?.is_none() {
            return Ok(false);
        }

        let context = self.inner.contexts().remove(key);
        if let Some(context) = context {
            context.close().await;
        }

        let mut index = self.inner.index.clone();
        let removed = index
            .delete(&ContextRecord::index_key(key))
            .await
            .map_err(|err| ManagerError::Index(err.to_string()))?;

        debug!(%key, "removed context");
        Ok(removed)
    }

    /// Close all open contexts.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.pending().clear();
        let contexts: Vec<Context<A>> = self.inner.contexts().drain().map(|(_, c)| c).collect();
        for context in contexts {
            context.close().await;
        }

        debug!("closed context manager");
    }
}

async fn load_context<I, A>(
    inner: Arc<InnerManager<I, A>>,
    key: String,
) -> Result<Option<Context<A>>, Arc<ManagerError>>
where
    I: ContextIndex + Sync + 'static,
    A: Application,
{
    let result = async {
        let Some(record) = get_record(&inner.index, &key).await? else {
            return Ok(None);
        };

        let context = open_record(&inner, &record).await?;
        inner.contexts().insert(key.clone(), context.clone());
        debug!(%key, "loaded context");
        Ok(Some(context))
    }
    .await;

    inner.pending().remove(&key);
    result.map_err(Arc::new)
}

async fn open_record<I, A: Application>(
    inner: &InnerManager<I, A>,
    record: &ContextRecord,
) -> Result<Context<A>, ManagerError> {
    let key: PublicKey = record
        .key
        .parse()
        .map_err(|_| ManagerError::InvalidRecord(record.key.clone()))?;
    let encryption_key: EncryptionKey = record
        .encryption_key
        .parse()
        .map_err(|_| ManagerError::InvalidRecord(record.key.clone()))?;

    let context = Context::open(
        &inner.storage,
        &inner.swarm,
        inner.app.clone(),
        ContextOptions {
            namespace: record.namespace.clone(),
            key: Some(key),
            encryption_key: Some(encryption_key),
            config: inner.config.clone(),
        },
    )
    .await?;

    Ok(context)
}

async fn get_record<I: ContextIndex>(
    index: &I,
    key: &str,
) -> Result<Option<ContextRecord>, ManagerError> {
    let value = index
        .get(&ContextRecord::index_key(key))
        .await
        .map_err(|err| ManagerError::Index(err.to_string()))?;

    match value {
        Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
        None => Ok(None),
    }
}

async fn put_record<I: ContextIndex>(
    index: &I,
    record: &ContextRecord,
) -> Result<(), ManagerError> {
    let mut index = index.clone();
    index
        .put(
            &ContextRecord::index_key(&record.key),
            serde_json::to_vec(record)?,
        )
        .await
        .map_err(|err| ManagerError::Index(err.to_string()))
}

/// Local index backend selected through [`IndexConfig`].
#[derive(Clone, Debug)]
pub enum LocalIndex {
    Memory(MemoryIndex),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteIndex),
}

impl LocalIndex {
    pub async fn from_config(config: &IndexConfig) -> Result<Self, IndexError> {
        let index = match config {
            IndexConfig::Memory => LocalIndex::Memory(MemoryIndex::new()),
            #[cfg(feature = "sqlite")]
            IndexConfig::Sqlite {
                url,
                max_connections,
            } => {
                let mut builder = SqliteIndexBuilder::new().database_url(url);
                if let Some(max_connections) = max_connections {
                    builder = builder.max_connections(*max_connections);
                }
                LocalIndex::Sqlite(builder.build().await?)
            }
        };
        Ok(index)
    }
}

impl ContextIndex for LocalIndex {
    type Error = IndexError;

    async fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Self::Error> {
        match self {
            LocalIndex::Memory(index) => index.put(key, value).await.map_err(|err| match err {}),
            #[cfg(feature = "sqlite")]
            LocalIndex::Sqlite(index) => Ok(index.put(key, value).await?),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        match self {
            LocalIndex::Memory(index) => index.get(key).await.map_err(|err| match err {}),
            #[cfg(feature = "sqlite")]
            LocalIndex::Sqlite(index) => Ok(index.get(key).await?),
        }
    }

    async fn delete(&mut self, key: &str) -> Result<bool, Self::Error> {
        match self {
            LocalIndex::Memory(index) => index.delete(key).await.map_err(|err| match err {}),
            #[cfg(feature = "sqlite")]
            LocalIndex::Sqlite(index) => Ok(index.delete(key).await?),
        }
    }

    async fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Self::Error> {
        match self {
            LocalIndex::Memory(index) => index.range(prefix).await.map_err(|err| match err {}),
            #[cfg(feature = "sqlite")]
            LocalIndex::Sqlite(index) => Ok(index.range(prefix).await?),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] SqliteIndexError),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    IndexBackend(#[from] IndexError),

    #[error("local index error: {0}")]
    Index(String),

    #[error("could not encode context record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("invalid context record {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Load(Arc<ManagerError>),

    #[error("context manager is closed")]
    Closed,
}
