// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use autobonk_auth::{
    PermissionError, Rbac, RbacError, ROLE_ASSIGN, ROLE_CREATE, ROLE_REVOKE, RevisionConflict,
    USER_INVITE, USER_REMOVE, ValidationError, denounced_acl_entry, next_acl_entry,
    next_role_def, revoked_acl_entry,
};
use autobonk_core::{
    AclEntry, AclUpdate, AddWriter, ContextInit, CoreOperation, DefineRole, DenounceRole,
    EncryptionKey, Hash, Invite, InviteId, Operation, OperationError, Ordinal, PublicKey,
    RemoveWriter, RoleDef, Writer, now_ms,
};
use autobonk_store::{Invites, ViewError, ViewReader, Writers};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::apply::{Application, ApplyProgress, ApplyState, EntryFault};
use crate::config::ContextConfig;
use crate::log::{LogError, LogStore, Storage, linearize};
use crate::pairing::{self, Candidate, InviteToken, Member, PairingError};
use crate::swarm::{Membership, Swarm};

/// Capacity of the channel delivering pairing sessions to the member.
const PAIRING_CHANNEL_CAPACITY: usize = 32;

/// Derive the topic under which the replicas of a context find each other.
pub fn discovery_key(key: &PublicKey) -> Hash {
    Hash::derive("autobonk discovery v1", key.as_bytes())
}

/// Where and how to open a context.
#[derive(Clone, Debug)]
pub struct ContextOptions {
    /// Storage namespace holding the local writer and the context's log.
    pub namespace: String,

    /// Key of an existing context, `None` creates a new one with the local writer as creator.
    pub key: Option<PublicKey>,

    /// Encryption key of an existing context, `None` generates a new one.
    pub encryption_key: Option<EncryptionKey>,

    pub config: ContextConfig,
}

impl ContextOptions {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: None,
            encryption_key: None,
            config: ContextConfig::default(),
        }
    }
}

struct InnerContext<A: Application> {
    app: A,
    config: ContextConfig,
    log: LogStore,
    key: PublicKey,
    discovery_key: Hash,
    encryption_key: EncryptionKey,
    local_key: PublicKey,
    swarm: Swarm,
    state: tokio::sync::Mutex<ApplyState>,
    reader: ViewReader,
    writable: AtomicBool,
    closed: AtomicBool,
    updates: watch::Sender<ApplyProgress>,
    membership: Mutex<Option<Membership>>,
    member_task: Mutex<Option<JoinHandle<()>>>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Application> InnerContext<A> {
    fn lock_membership(&self) -> MutexGuard<'_, Option<Membership>> {
        self.membership
            .lock()
            .expect("acquire lock on swarm membership")
    }

    fn take_task(task: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
        task.lock().expect("acquire lock on context task").take()
    }

    /// Stop the pairing member, leave the swarm and stop following the log, in that order.
    fn shutdown(&self) {
        if let Some(task) = Self::take_task(&self.member_task) {
            task.abort();
        }

        if let Some(membership) = self.lock_membership().take() {
            self.swarm.leave(&membership);
        }

        if let Some(task) = Self::take_task(&self.update_task) {
            task.abort();
        }
    }
}

impl<A: Application> Drop for InnerContext<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Replicated, access-controlled context.
///
/// A context is one shared history written by many writers. All replicas apply the same
/// linearised history and arrive at the same derived state: the admitted writers, roles and
/// their assignments, invites and whatever the [`Application`] maintains next to them.
///
/// Mutations are appended to the local writer's log and applied before the call returns. They
/// are checked against the local state first, so callers learn about missing permissions or
/// revision conflicts right away. The final decision is taken while applying, where concurrent
/// mutations of other writers may win.
///
/// Cloned instances refer to the same context.
pub struct Context<A: Application = ()> {
    inner: Arc<InnerContext<A>>,
}

impl<A: Application> Clone for Context<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Application> std::fmt::Debug for Context<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("key", &self.inner.key)
            .field("local_key", &self.inner.local_key)
            .field("writable", &self.writable())
            .finish_non_exhaustive()
    }
}

impl<A: Application> Context<A> {
    /// Open a context, replay its log and join its topic on the swarm.
    ///
    /// A new context is initialised right away by appending `init-context` as the first entry of
    /// its creator.
    pub async fn open(
        storage: &Storage,
        swarm: &Swarm,
        app: A,
        options: ContextOptions,
    ) -> Result<Self, ContextError> {
        let log = storage.log(&options.namespace, options.key);
        let key = log.key();
        let local_key = log.local_key();

        let state = ApplyState::new(key);
        let reader = state.view.reader();
        let (updates, _) = watch::channel(ApplyProgress::default());

        let context = Self {
            inner: Arc::new(InnerContext {
                app,
                config: options.config,
                log: log.clone(),
                key,
                discovery_key: discovery_key(&key),
                encryption_key: options
                    .encryption_key
                    .unwrap_or_else(EncryptionKey::random),
                local_key,
                swarm: swarm.clone(),
                state: tokio::sync::Mutex::new(state),
                reader,
                writable: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                updates,
                membership: Mutex::new(None),
                member_task: Mutex::new(None),
                update_task: Mutex::new(None),
            }),
        };

        let mut entries_rx = log.subscribe();
        context.update().await?;

        if local_key == key && log.local_len() == 0 {
            context
                .append(CoreOperation::InitContext(ContextInit {
                    creator_key: local_key,
                    index: 0,
                    timestamp: now_ms(),
                }))
                .await?;
        }

        let weak = context.downgrade();
        let update_task = tokio::spawn(async move {
            while entries_rx.changed().await.is_ok() {
                let Some(context) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = context.update().await {
                    error!(key = %context.key(), %err, "could not apply log");
                }
            }
        });
        *context
            .inner
            .update_task
            .lock()
            .expect("acquire lock on context task") = Some(update_task);

        let (pairing_tx, pairing_rx) = mpsc::channel(PAIRING_CHANNEL_CAPACITY);
        let member = Member::new(context.downgrade());
        let member_task = tokio::spawn(member.run(pairing_rx));
        *context
            .inner
            .member_task
            .lock()
            .expect("acquire lock on context task") = Some(member_task);

        let membership = swarm.join(context.inner.discovery_key, log, pairing_tx)?;
        *context.inner.lock_membership() = Some(membership);

        debug!(
            key = %key,
            local_key = %local_key,
            writable = context.writable(),
            "opened context"
        );

        Ok(context)
    }

    /// Redeem an invite and open the context it was issued for.
    ///
    /// Resolves once the admitting member's `add-writer` operation was applied locally and the
    /// context is writable.
    pub async fn join(
        storage: &Storage,
        swarm: &Swarm,
        app: A,
        token: &InviteToken,
        namespace: &str,
        config: ContextConfig,
    ) -> Result<Self, ContextError> {
        let user_data = storage.private_key(namespace).public_key();
        let mut candidate = Candidate::new(token.clone(), user_data);
        let confirm = pairing::pair(swarm, &mut candidate, &config).await?;

        let pairing_timeout = config.pairing_timeout;
        let context = Self::open(
            storage,
            swarm,
            app,
            ContextOptions {
                namespace: namespace.to_string(),
                key: Some(confirm.key),
                encryption_key: Some(confirm.encryption_key),
                config,
            },
        )
        .await?;

        if let Err(err) = context.wait_writable(pairing_timeout).await {
            context.close().await;
            return Err(err);
        }

        Ok(context)
    }

    pub(crate) fn downgrade(&self) -> WeakContext<A> {
        WeakContext(Arc::downgrade(&self.inner))
    }

    /// Apply all entries which were not applied yet.
    ///
    /// Replays the whole log from the start if the linearised order changed.
    pub(crate) async fn update(&self) -> Result<(), ContextError> {
        let mut state = self.inner.state.lock().await;
        if self.is_closed() {
            return Ok(());
        }

        let order = linearize(&self.inner.log.entries());
        let is_prefix = state.applied.len() <= order.len()
            && state
                .applied
                .iter()
                .zip(&order)
                .all(|(id, entry)| *id == entry.id());

        if !is_prefix {
            debug!(key = %self.inner.key, "order of log changed, replay from start");
            state.reset();
        }

        let position = state.applied.len();
        let advanced = !is_prefix || position < order.len();
        if advanced {
            state.apply_batch(&self.inner.app, &order[position..]);
        }

        let writable = state.writers.contains(&self.inner.local_key);
        self.inner.writable.store(writable, Ordering::SeqCst);

        if advanced {
            self.inner.updates.send_replace(state.progress());
        }

        Ok(())
    }

    /// Append an operation and apply it.
    ///
    /// Returns the position of the new entry in the local writer's log.
    pub async fn append(
        &self,
        operation: impl Into<Operation<A::Operation>>,
    ) -> Result<u64, ContextError> {
        if self.is_closed() {
            return Err(ContextError::Closed);
        }

        if !self.writable() {
            return Err(ContextError::NotWritable);
        }

        let operation: Operation<A::Operation> = operation.into();
        let bytes = operation.encode()?;
        let entry = self.inner.log.append(bytes)?;
        self.update().await?;

        Ok(entry.seq)
    }

    /// Wait until the local writer was admitted.
    pub async fn wait_writable(&self, timeout: Duration) -> Result<(), ContextError> {
        let mut updates = self.subscribe();
        let wait = async {
            loop {
                if self.writable() {
                    return Ok(());
                }
                if updates.changed().await.is_err() {
                    return Err(ContextError::Closed);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ContextError::Pairing(PairingError::Timeout))?
    }

    /// Key of the context, equal to the key of its creator.
    pub fn key(&self) -> PublicKey {
        self.inner.key
    }

    pub fn discovery_key(&self) -> Hash {
        self.inner.discovery_key
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        self.inner.encryption_key
    }

    /// Key of the local writer.
    pub fn local_key(&self) -> PublicKey {
        self.inner.local_key
    }

    /// Returns `true` if the local writer is admitted to the context.
    pub fn writable(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Receiver of the apply progress, changes every time the state advanced.
    pub fn subscribe(&self) -> watch::Receiver<ApplyProgress> {
        self.inner.updates.subscribe()
    }

    /// Entries of admitted writers which could not be decoded while applying the log.
    pub fn faults(&self) -> Vec<EntryFault> {
        self.inner.updates.borrow().faults.clone()
    }

    /// Read access to the applied state.
    pub fn view(&self) -> &ViewReader {
        &self.inner.reader
    }

    /// Replica of the context's log.
    pub fn log(&self) -> &LogStore {
        &self.inner.log
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn rbac(&self) -> Rbac<'_, ViewReader> {
        Rbac::new(&self.inner.reader)
    }

    /// Local check of a permission of the local writer, mirroring the check while applying.
    pub(crate) fn require_local_permission(&self, permission: &str) -> Result<(), ContextError> {
        let rbac = self.rbac();
        if !rbac.is_initialized()? {
            return Ok(());
        }
        rbac.require_permission(&self.inner.local_key, permission)?;
        Ok(())
    }

    pub fn has_permission(
        &self,
        subject: &PublicKey,
        permission: &str,
    ) -> Result<bool, ContextError> {
        Ok(self.rbac().has_permission(subject, permission)?)
    }

    pub fn require_permission(
        &self,
        subject: &PublicKey,
        permission: &str,
    ) -> Result<(), ContextError> {
        self.rbac().require_permission(subject, permission)?;
        Ok(())
    }

    pub fn get_role(&self, name: &str) -> Result<Option<RoleDef>, ContextError> {
        Ok(self.rbac().role(name)?)
    }

    /// Roles held by a subject.
    pub fn get_roles(&self, subject: &PublicKey) -> Result<Vec<String>, ContextError> {
        Ok(self.rbac().roles_of(subject)?)
    }

    pub fn acl_entry(&self, subject: &PublicKey) -> Result<Option<AclEntry>, ContextError> {
        Ok(self.rbac().acl_entry(subject)?)
    }

    pub fn list_roles(&self) -> Result<Vec<RoleDef>, ContextError> {
        Ok(self.rbac().roles()?)
    }

    pub fn list_writers(&self) -> Result<Vec<Writer>, ContextError> {
        Ok(self.inner.reader.find::<Writers>()?)
    }

    pub fn context_init(&self) -> Result<Option<ContextInit>, ContextError> {
        Ok(self.rbac().context_init()?)
    }

    pub(crate) fn find_invite(&self, id: &InviteId) -> Result<Option<Invite>, ContextError> {
        Ok(self.inner.reader.get::<Invites>(id)?)
    }

    /// Admit a writer, requires `user:invite`.
    pub async fn add_writer(&self, key: PublicKey, is_indexer: bool) -> Result<bool, ContextError> {
        self.require_local_permission(USER_INVITE)?;
        self.append(CoreOperation::AddWriter(AddWriter { key, is_indexer }))
            .await?;
        Ok(true)
    }

    /// Remove a writer, requires `user:remove`.
    pub async fn remove_writer(&self, key: PublicKey) -> Result<bool, ContextError> {
        self.require_local_permission(USER_REMOVE)?;
        self.append(CoreOperation::RemoveWriter(RemoveWriter { key }))
            .await?;
        Ok(true)
    }

    /// Define a role or replace its permissions, requires `role:create`.
    ///
    /// `rev` needs to be the revision following the current one, 1 for a new role.
    pub async fn define_role<I, P>(
        &self,
        name: &str,
        permissions: I,
        rev: u64,
    ) -> Result<(), ContextError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.require_local_permission(ROLE_CREATE)?;

        let permissions: BTreeSet<String> = permissions.into_iter().map(Into::into).collect();
        let current = self.get_role(name)?;
        next_role_def(
            current.as_ref(),
            name,
            permissions.clone(),
            rev,
            Ordinal::default(),
        )?;

        self.append(CoreOperation::DefineRole(DefineRole {
            name: name.to_string(),
            permissions,
            rev,
        }))
        .await?;

        Ok(())
    }

    /// Replace the roles of a subject, requires `role:assign`.
    pub async fn grant_roles<I, R>(
        &self,
        subject: PublicKey,
        roles: I,
        rev: u64,
    ) -> Result<(), ContextError>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.require_local_permission(ROLE_ASSIGN)?;

        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        let current = self.acl_entry(&subject)?;
        next_acl_entry(
            current.as_ref(),
            subject,
            &roles,
            rev,
            Ordinal::default(),
            |role| self.rbac().role(role).is_ok_and(|role| role.is_some()),
        )?;

        self.append(CoreOperation::GrantRoles(AclUpdate {
            subject_key: subject,
            roles,
            rev,
            invite_id: None,
        }))
        .await?;

        Ok(())
    }

    /// Grant the roles of a redeemed invite to the candidate who redeemed it.
    pub(crate) async fn grant_invited_roles(
        &self,
        subject: PublicKey,
        invite: &Invite,
    ) -> Result<(), ContextError> {
        self.require_local_permission(USER_INVITE)?;

        if self.acl_entry(&subject)?.is_some() {
            return Err(
                ValidationError::InvalidInviteGrant("subject already holds an acl entry").into(),
            );
        }

        self.append(CoreOperation::GrantRoles(AclUpdate {
            subject_key: subject,
            roles: invite.roles.clone(),
            rev: 1,
            invite_id: Some(invite.id),
        }))
        .await?;

        Ok(())
    }

    /// Remove all roles of a subject, requires `role:revoke`.
    pub async fn revoke_roles(&self, subject: PublicKey, rev: u64) -> Result<(), ContextError> {
        self.require_local_permission(ROLE_REVOKE)?;

        let current = self.acl_entry(&subject)?;
        revoked_acl_entry(current.as_ref(), subject, rev, Ordinal::default())?;

        self.append(CoreOperation::RevokeRoles(AclUpdate {
            subject_key: subject,
            roles: Vec::new(),
            rev,
            invite_id: None,
        }))
        .await?;

        Ok(())
    }

    /// Give up one of the local writer's own roles.
    pub async fn denounce_role(&self, role: &str, rev: u64) -> Result<(), ContextError> {
        let current = self.acl_entry(&self.inner.local_key)?;
        denounced_acl_entry(current.as_ref(), role, rev, Ordinal::default())?;

        self.append(CoreOperation::DenounceRole(DenounceRole {
            role: role.to_string(),
            rev,
        }))
        .await?;

        Ok(())
    }

    /// Stop the pairing member, leave the swarm and stop following the log.
    ///
    /// Waits for an application of the log which might currently be in progress.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown();

        let _state = self.inner.state.lock().await;
        self.inner.writable.store(false, Ordering::SeqCst);

        debug!(key = %self.inner.key, "closed context");
    }
}

/// Reference to a context which does not keep it alive.
pub(crate) struct WeakContext<A: Application>(Weak<InnerContext<A>>);

impl<A: Application> WeakContext<A> {
    pub fn upgrade(&self) -> Option<Context<A>> {
        self.0.upgrade().map(|inner| Context { inner })
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    RevisionConflict(#[from] RevisionConflict),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error("local writer is not admitted to the context")]
    NotWritable,

    #[error("context is closed")]
    Closed,
}

impl From<RbacError> for ContextError {
    fn from(value: RbacError) -> Self {
        match value {
            RbacError::Permission(err) => ContextError::Permission(err),
            RbacError::RevisionConflict(err) => ContextError::RevisionConflict(err),
            RbacError::Validation(err) => ContextError::Validation(err),
            RbacError::View(err) => ContextError::View(err),
        }
    }
}
