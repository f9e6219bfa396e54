// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic replay of the linearised log into the view.
//!
//! Every replica, including the author of an operation, applies every operation exactly once and
//! in the same order. Each operation runs against a savepoint of the view: if it fails, all of
//! its writes are discarded and the failure is logged, it never reaches the caller who appended
//! it and never stops the replay of the following operations.
use std::collections::BTreeSet;

use autobonk_auth::{
    OWNER_ROLE, PermissionError, Rbac, RbacError, ROLE_ASSIGN, ROLE_CREATE, ROLE_REVOKE,
    RevisionConflict, USER_INVITE, USER_REMOVE, ValidationError, denounced_acl_entry,
    next_acl_entry, next_role_def, owner_acl_entry, owner_role_def, revoked_acl_entry,
};
use autobonk_core::{
    AclEntry, AclUpdate, ContextInit, CoreOperation, Extension, Invite, InviteId, NoExtension,
    Operation, OperationError, Ordinal, PublicKey, RoleDef, Writer,
};
use autobonk_store::{
    AclEntries, ContextInits, Invites, MemoryView, RoleDefs, ViewError, Writers,
};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::log::{Entry, WriterSet};
use crate::pairing::{InviteToken, invite_id};

/// Application built on top of a context.
///
/// Applications bring their own closed set of operations and apply them to the view next to the
/// core operations. Handlers need to be deterministic: they may only depend on the operation, the
/// view and the information provided by the [`ApplyContext`], never on wall-clock time,
/// randomness or local state.
pub trait Application: Clone + Send + Sync + 'static {
    type Operation: Extension + Send + Sync + 'static;

    fn apply(
        &self,
        operation: &Self::Operation,
        cx: &mut ApplyContext<'_>,
    ) -> Result<(), ApplyError>;
}

/// Context without any application operations.
impl Application for () {
    type Operation = NoExtension;

    fn apply(&self, operation: &NoExtension, _cx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        match *operation {}
    }
}

/// Access to the view and the log while applying one operation.
///
/// Role mutations issued through this context are written to the view directly instead of being
/// appended as new operations. Their records are stamped with deterministic ordinals derived
/// from the applied entry's position.
#[derive(Debug)]
pub struct ApplyContext<'a> {
    view: &'a mut MemoryView,
    writers: &'a mut WriterSet,
    writer: PublicKey,
    block_index: u64,
    order: u32,
}

impl<'a> ApplyContext<'a> {
    fn new(
        view: &'a mut MemoryView,
        writers: &'a mut WriterSet,
        writer: PublicKey,
        block_index: u64,
    ) -> Self {
        Self {
            view,
            writers,
            writer,
            block_index,
            order: 0,
        }
    }

    /// Writer who authored the applied operation.
    pub fn writer(&self) -> PublicKey {
        self.writer
    }

    /// Position of the applied operation in its writer's log.
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    pub fn view(&self) -> &MemoryView {
        self.view
    }

    pub fn view_mut(&mut self) -> &mut MemoryView {
        self.view
    }

    pub fn rbac(&self) -> Rbac<'_, MemoryView> {
        Rbac::new(self.view)
    }

    /// Ordinal for the next write of the applied operation.
    pub fn next_ordinal(&mut self) -> Ordinal {
        let ordinal = Ordinal::new(self.block_index, self.order);
        self.order = self.order.saturating_add(1);
        ordinal
    }

    /// Check that the author of the applied operation holds a permission.
    ///
    /// Always succeeds until the context was initialised.
    pub fn require_permission(&self, permission: &str) -> Result<(), ApplyError> {
        let rbac = self.rbac();
        if !rbac.is_initialized()? {
            return Ok(());
        }
        rbac.require_permission(&self.writer, permission)?;
        Ok(())
    }

    fn add_writer(&mut self, key: PublicKey, is_indexer: bool) -> Result<(), ApplyError> {
        self.view.insert::<Writers>(&Writer {
            key,
            is_indexer,
            added_by: self.writer,
        })?;
        self.writers.add_writer(key, is_indexer);
        Ok(())
    }

    fn remove_writer(&mut self, key: &PublicKey) -> Result<(), ApplyError> {
        self.view.delete::<Writers>(key)?;
        if !self.writers.remove_writer(key) {
            debug!(%key, "removed writer was not admitted");
        }
        Ok(())
    }

    fn init_context(&mut self, init: &ContextInit) -> Result<(), ApplyError> {
        if self.rbac().is_initialized()? {
            return Err(ValidationError::AlreadyInitialized.into());
        }

        if init.creator_key != self.writer {
            return Err(ValidationError::CreatorMismatch {
                expected: init.creator_key,
                writer: self.writer,
            }
            .into());
        }

        if self.block_index != 0 {
            return Err(ValidationError::NotFirstEntry.into());
        }

        self.view.insert::<ContextInits>(init)?;

        if self.rbac().role(OWNER_ROLE)?.is_none() {
            let owner = owner_role_def(self.next_ordinal());
            self.view.insert::<RoleDefs>(&owner)?;
        }

        let current = self.rbac().acl_entry(&self.writer)?;
        let entry = owner_acl_entry(current.as_ref(), self.writer, self.next_ordinal());
        self.view.insert::<AclEntries>(&entry)?;

        self.add_writer(self.writer, true)
    }

    /// Record an invite. Invites carrying roles additionally require `role:assign`.
    fn add_invite(&mut self, invite: &Invite) -> Result<(), ApplyError> {
        validate_invite(invite, &self.writer)?;

        if !invite.roles.is_empty() {
            self.require_permission(ROLE_ASSIGN)?;
        }

        if self.view.get::<Invites>(&invite.id)?.is_some() {
            return Err(ValidationError::InvalidInvite("invite id already exists").into());
        }

        self.view.insert::<Invites>(invite)?;
        Ok(())
    }

    fn revoke_invite(&mut self, id: &InviteId, revoked_at: u64) -> Result<(), ApplyError> {
        let Some(mut invite) = self.view.get::<Invites>(id)? else {
            return Ok(());
        };

        if invite.is_revoked() {
            return Ok(());
        }

        invite.revoked_at = Some(revoked_at);
        self.view.insert::<Invites>(&invite)?;
        Ok(())
    }

    /// Define a role or replace its permissions, requires `role:create`.
    pub fn define_role(
        &mut self,
        name: &str,
        permissions: BTreeSet<String>,
        rev: u64,
    ) -> Result<RoleDef, ApplyError> {
        self.require_permission(ROLE_CREATE)?;

        let current = self.rbac().role(name)?;
        let role = next_role_def(current.as_ref(), name, permissions, rev, self.next_ordinal())?;
        self.view.insert::<RoleDefs>(&role)?;

        Ok(role)
    }

    /// Replace the roles of a subject, requires `role:assign`.
    pub fn grant_roles(
        &mut self,
        subject: PublicKey,
        roles: &[String],
        rev: u64,
    ) -> Result<AclEntry, ApplyError> {
        self.require_permission(ROLE_ASSIGN)?;
        self.write_acl_entry(subject, roles, rev)
    }

    /// Grant the roles of a redeemed invite, requires `user:invite`.
    ///
    /// The roles need to match the non-empty roles frozen into the invite and the invite must
    /// neither be revoked nor redeemed before. The subject needs to be a writer admitted by the
    /// same author and may not hold an ACL entry yet.
    fn grant_invited_roles(
        &mut self,
        update: &AclUpdate,
        id: &InviteId,
    ) -> Result<AclEntry, ApplyError> {
        self.require_permission(USER_INVITE)?;

        let mut invite = self
            .view
            .get::<Invites>(id)?
            .filter(|invite| !invite.is_revoked())
            .ok_or_else(|| ValidationError::InviteMismatch(id.to_hex()))?;

        if invite.redeemed_by.is_some() {
            return Err(ValidationError::InviteRedeemed(id.to_hex()).into());
        }

        if invite.roles.is_empty() {
            return Err(ValidationError::InvalidInviteGrant("invite carries no roles").into());
        }

        let granted: BTreeSet<&String> = update.roles.iter().collect();
        let invited: BTreeSet<&String> = invite.roles.iter().collect();
        if granted != invited {
            return Err(ValidationError::InviteMismatch(id.to_hex()).into());
        }

        let admitted = self
            .view
            .get::<Writers>(&update.subject_key)?
            .is_some_and(|writer| writer.added_by == self.writer);
        if !admitted {
            return Err(
                ValidationError::InvalidInviteGrant("subject was not admitted by author").into(),
            );
        }

        if self.rbac().acl_entry(&update.subject_key)?.is_some() {
            return Err(
                ValidationError::InvalidInviteGrant("subject already holds an acl entry").into(),
            );
        }

        let entry = self.write_acl_entry(update.subject_key, &update.roles, update.rev)?;

        invite.redeemed_by = Some(update.subject_key);
        self.view.insert::<Invites>(&invite)?;

        Ok(entry)
    }

    fn write_acl_entry(
        &mut self,
        subject: PublicKey,
        roles: &[String],
        rev: u64,
    ) -> Result<AclEntry, ApplyError> {
        let rbac = self.rbac();
        let current = rbac.acl_entry(&subject)?;
        let ordinal = Ordinal::new(self.block_index, self.order);
        let entry = next_acl_entry(current.as_ref(), subject, roles, rev, ordinal, |role| {
            rbac.role(role).is_ok_and(|role| role.is_some())
        })?;
        self.order = self.order.saturating_add(1);

        self.view.insert::<AclEntries>(&entry)?;
        Ok(entry)
    }

    /// Remove all roles of a subject, requires `role:revoke`.
    pub fn revoke_roles(&mut self, subject: PublicKey, rev: u64) -> Result<AclEntry, ApplyError> {
        self.require_permission(ROLE_REVOKE)?;

        let current = self.rbac().acl_entry(&subject)?;
        let entry = revoked_acl_entry(current.as_ref(), subject, rev, self.next_ordinal())?;
        self.view.insert::<AclEntries>(&entry)?;

        Ok(entry)
    }

    /// Remove one role from the author's own entry, requires no permission.
    pub fn denounce_role(&mut self, role: &str, rev: u64) -> Result<AclEntry, ApplyError> {
        let current = self.rbac().acl_entry(&self.writer)?;
        let entry = denounced_acl_entry(current.as_ref(), role, rev, self.next_ordinal())?;
        self.view.insert::<AclEntries>(&entry)?;

        Ok(entry)
    }

    fn apply_core(&mut self, operation: &CoreOperation) -> Result<(), ApplyError> {
        match operation {
            CoreOperation::AddWriter(payload) => {
                self.require_permission(USER_INVITE)?;
                self.add_writer(payload.key, payload.is_indexer)
            }
            CoreOperation::RemoveWriter(payload) => {
                self.require_permission(USER_REMOVE)?;
                self.remove_writer(&payload.key)
            }
            CoreOperation::InitContext(init) => self.init_context(init),
            CoreOperation::AddInvite(invite) => {
                self.require_permission(USER_INVITE)?;
                self.add_invite(invite)
            }
            CoreOperation::RevokeInvite(payload) => {
                self.require_permission(USER_INVITE)?;
                self.revoke_invite(&payload.id, payload.revoked_at)
            }
            CoreOperation::DefineRole(payload) => self
                .define_role(&payload.name, payload.permissions.clone(), payload.rev)
                .map(|_| ()),
            CoreOperation::GrantRoles(payload) => match &payload.invite_id {
                Some(id) => self.grant_invited_roles(payload, id).map(|_| ()),
                None => self
                    .grant_roles(payload.subject_key, &payload.roles, payload.rev)
                    .map(|_| ()),
            },
            CoreOperation::RevokeRoles(payload) => {
                if !payload.roles.is_empty() {
                    return Err(ValidationError::RolesOnRevoke.into());
                }
                self.revoke_roles(payload.subject_key, payload.rev)
                    .map(|_| ())
            }
            CoreOperation::DenounceRole(payload) => {
                self.denounce_role(&payload.role, payload.rev).map(|_| ())
            }
        }
    }
}

/// Check that an invite record is well-formed and was created by the author of the operation.
fn validate_invite(invite: &Invite, writer: &PublicKey) -> Result<(), ValidationError> {
    if invite.created_by != *writer {
        return Err(ValidationError::InvalidInvite("creator is not the author"));
    }

    if invite.roles.iter().any(|role| role.is_empty()) {
        return Err(ValidationError::InvalidInvite("empty role name"));
    }

    if invite.redeemed_by.is_some() {
        return Err(ValidationError::InvalidInvite("new invite is already redeemed"));
    }

    let token = InviteToken::from_bytes(&invite.invite)
        .map_err(|_| ValidationError::InvalidInvite("malformed invite secret"))?;

    if token.public_key() != invite.public_key {
        return Err(ValidationError::InvalidInvite("public key does not match secret"));
    }

    if invite_id(&invite.public_key) != invite.id {
        return Err(ValidationError::InvalidInvite("id does not match public key"));
    }

    Ok(())
}

/// Entry of an admitted writer which could not be decoded.
///
/// Undecodable entries are skipped on every replica alike, but point at a corrupted log or an
/// incompatible writer and need the host's attention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFault {
    pub writer: PublicKey,
    pub seq: u64,
    pub reason: String,
}

/// Progress of applying a context's log, published after every batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyProgress {
    /// Number of applied batches.
    pub batches: u64,

    pub faults: Vec<EntryFault>,
}

/// Derived state of a context and the position of the log it reflects.
#[derive(Debug)]
pub(crate) struct ApplyState {
    pub view: MemoryView,
    pub writers: WriterSet,
    pub applied: Vec<(PublicKey, u64)>,
    pub batches: u64,
    pub faults: Vec<EntryFault>,
}

impl ApplyState {
    pub fn new(bootstrap: PublicKey) -> Self {
        Self {
            view: MemoryView::new(),
            writers: WriterSet::new(bootstrap),
            applied: Vec::new(),
            batches: 0,
            faults: Vec::new(),
        }
    }

    pub fn progress(&self) -> ApplyProgress {
        ApplyProgress {
            batches: self.batches,
            faults: self.faults.clone(),
        }
    }

    /// Forget all derived state before replaying the log from the start.
    pub fn reset(&mut self) {
        self.view.reset();
        self.writers.reset();
        self.applied.clear();
        self.faults.clear();
    }

    /// Apply a batch of linearised entries and flush the view.
    pub fn apply_batch<A: Application>(&mut self, app: &A, batch: &[Entry]) {
        for entry in batch {
            self.applied.push(entry.id());

            if !self.writers.contains(&entry.writer) {
                debug!(writer = %entry.writer, seq = entry.seq, "skip entry of non-writer");
                continue;
            }

            let operation = match Operation::<A::Operation>::decode(&entry.payload) {
                Ok(operation) => operation,
                Err(err) => {
                    error!(
                        writer = %entry.writer,
                        seq = entry.seq,
                        %err,
                        "could not decode operation"
                    );
                    self.faults.push(EntryFault {
                        writer: entry.writer,
                        seq: entry.seq,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let savepoint = self.view.savepoint();
            let writers = self.writers.clone();

            let result = {
                let mut cx =
                    ApplyContext::new(&mut self.view, &mut self.writers, entry.writer, entry.seq);
                match &operation {
                    Operation::Core(operation) => cx.apply_core(operation),
                    Operation::App(operation) => app.apply(operation, &mut cx),
                    Operation::Unknown(kind) => {
                        Err(ValidationError::UnknownOperation(kind.clone()).into())
                    }
                }
            };

            match result {
                Ok(()) => {
                    trace!(
                        writer = %entry.writer,
                        seq = entry.seq,
                        kind = %operation.kind(),
                        "applied operation"
                    );
                }
                Err(err) => {
                    self.view.rollback_to(savepoint);
                    self.writers = writers;
                    warn!(
                        writer = %entry.writer,
                        seq = entry.seq,
                        kind = %operation.kind(),
                        %err,
                        "rejected operation"
                    );
                }
            }
        }

        self.view.flush();
        self.batches += 1;
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    RevisionConflict(#[from] RevisionConflict),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Operation rejected by an application handler.
    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl From<RbacError> for ApplyError {
    fn from(value: RbacError) -> Self {
        match value {
            RbacError::Permission(err) => ApplyError::Permission(err),
            RbacError::RevisionConflict(err) => ApplyError::RevisionConflict(err),
            RbacError::Validation(err) => ApplyError::Validation(err),
            RbacError::View(err) => ApplyError::View(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use autobonk_auth::{OWNER_ROLE, Rbac};
    use autobonk_core::cbor::encode_cbor;
    use autobonk_auth::{ROLE_CREATE, USER_INVITE};
    use autobonk_core::{
        AclUpdate, AddWriter, ContextInit, CoreOperation, DefineRole, Invite, InviteId,
        NoExtension, Operation, PrivateKey, RoleDef,
    };
    use autobonk_store::{ContextInits, Invites};
    use serde::Serialize;

    use crate::context::discovery_key;
    use crate::log::Entry;
    use crate::pairing::create_invite;

    use super::ApplyState;

    fn entry(private_key: &PrivateKey, seq: u64, operation: CoreOperation) -> Entry {
        let payload = Operation::<NoExtension>::Core(operation).encode().unwrap();
        Entry::sign(private_key, seq, seq, BTreeMap::new(), payload).unwrap()
    }

    fn init(private_key: &PrivateKey) -> CoreOperation {
        CoreOperation::InitContext(ContextInit {
            creator_key: private_key.public_key(),
            index: 0,
            timestamp: 1_700_000_000_000,
        })
    }

    fn define_role(name: &str, rev: u64) -> CoreOperation {
        CoreOperation::DefineRole(DefineRole {
            name: name.to_string(),
            permissions: BTreeSet::from(["post:create".to_string()]),
            rev,
        })
    }

    fn role_with(name: &str, permissions: &[&str], rev: u64) -> CoreOperation {
        CoreOperation::DefineRole(DefineRole {
            name: name.to_string(),
            permissions: permissions.iter().map(|permission| permission.to_string()).collect(),
            rev,
        })
    }

    fn add_writer(key: &PrivateKey) -> CoreOperation {
        CoreOperation::AddWriter(AddWriter {
            key: key.public_key(),
            is_indexer: false,
        })
    }

    fn add_invite(
        context: &PrivateKey,
        creator: &PrivateKey,
        roles: &[&str],
    ) -> (InviteId, CoreOperation) {
        let created = create_invite(discovery_key(&context.public_key()), u64::MAX).unwrap();
        let id = created.id;
        let invite = Invite {
            id,
            invite: created.invite,
            public_key: created.public_key,
            expires: created.expires,
            roles: roles.iter().map(|role| role.to_string()).collect(),
            created_by: creator.public_key(),
            created_at: 0,
            revoked_at: None,
            redeemed_by: None,
        };
        (id, CoreOperation::AddInvite(invite))
    }

    fn grant_invited(
        subject: &PrivateKey,
        roles: &[&str],
        rev: u64,
        id: InviteId,
    ) -> CoreOperation {
        CoreOperation::GrantRoles(AclUpdate {
            subject_key: subject.public_key(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
            rev,
            invite_id: Some(id),
        })
    }

    fn roles_of(state: &ApplyState, key: &PrivateKey) -> Vec<String> {
        Rbac::new(&state.view).roles_of(&key.public_key()).unwrap()
    }

    fn role(state: &ApplyState, name: &str) -> Option<RoleDef> {
        Rbac::new(&state.view).role(name).unwrap()
    }

    #[test]
    fn init_context_applies_once() {
        let alice = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(
            &(),
            &[entry(&alice, 0, init(&alice)), entry(&alice, 1, init(&alice))],
        );

        let inits: Vec<ContextInit> = state
            .view
            .find::<ContextInits>()
            .map(|init| init.unwrap())
            .collect();
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0].creator_key, alice.public_key());

        let rbac = Rbac::new(&state.view);
        assert_eq!(rbac.roles_of(&alice.public_key()).unwrap(), vec![OWNER_ROLE.to_string()]);
        assert_eq!(role(&state, OWNER_ROLE).unwrap().rev, 1);
        assert_eq!(state.batches, 1);
    }

    #[test]
    fn init_context_must_be_self_attested() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(&(), &[entry(&alice, 0, init(&bob))]);

        assert!(!Rbac::new(&state.view).is_initialized().unwrap());
        assert!(role(&state, OWNER_ROLE).is_none());
    }

    #[test]
    fn init_context_must_be_first_entry() {
        let alice = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(&(), &[entry(&alice, 3, init(&alice))]);

        assert!(!Rbac::new(&state.view).is_initialized().unwrap());
    }

    #[test]
    fn stale_revision_leaves_role_unchanged() {
        let alice = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                entry(&alice, 1, define_role("editor", 1)),
                entry(&alice, 2, define_role("editor", 1)),
                entry(&alice, 3, define_role("editor", 2)),
            ],
        );

        assert_eq!(role(&state, "editor").unwrap().rev, 2);
    }

    #[test]
    fn entries_of_non_writers_are_skipped() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                entry(&bob, 0, define_role("editor", 1)),
            ],
        );
        assert!(role(&state, "editor").is_none());

        state.apply_batch(
            &(),
            &[
                entry(
                    &alice,
                    1,
                    CoreOperation::AddWriter(AddWriter {
                        key: bob.public_key(),
                        is_indexer: false,
                    }),
                ),
                entry(&bob, 1, define_role("editor", 1)),
            ],
        );

        // Admitted as a writer, but without a role allowing to define roles.
        assert!(state.writers.contains(&bob.public_key()));
        assert!(role(&state, "editor").is_none());
    }

    #[test]
    fn unknown_operation_fails_closed() {
        #[derive(Serialize)]
        struct Envelope {
            #[serde(rename = "type")]
            kind: &'static str,
            payload: ciborium::Value,
        }

        let alice = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        let payload = encode_cbor(&Envelope {
            kind: "core/self-destruct",
            payload: ciborium::Value::Null,
        })
        .unwrap();
        let unknown = Entry::sign(&alice, 1, 1, BTreeMap::new(), payload).unwrap();

        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                unknown,
                entry(&alice, 2, define_role("editor", 1)),
            ],
        );

        assert_eq!(state.applied.len(), 3);
        assert_eq!(role(&state, "editor").unwrap().rev, 1);
    }

    #[test]
    fn invite_permission_does_not_grant_roles() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                entry(&alice, 1, role_with("inviter", &[USER_INVITE], 1)),
                entry(&alice, 2, add_writer(&bob)),
                entry(
                    &alice,
                    3,
                    CoreOperation::GrantRoles(AclUpdate {
                        subject_key: bob.public_key(),
                        roles: vec!["inviter".to_string()],
                        rev: 1,
                        invite_id: None,
                    }),
                ),
            ],
        );
        assert_eq!(roles_of(&state, &bob), vec!["inviter".to_string()]);

        let (empty, add_empty) = add_invite(&alice, &bob, &[]);
        let (owner, add_owner) = add_invite(&alice, &bob, &[OWNER_ROLE]);
        state.apply_batch(
            &(),
            &[
                entry(&bob, 0, add_empty),
                entry(&bob, 1, add_owner),
                entry(&bob, 2, grant_invited(&alice, &[], 2, empty)),
                entry(&bob, 3, grant_invited(&bob, &[OWNER_ROLE], 2, owner)),
            ],
        );

        // Inviting with roles requires `role:assign`, invites without roles grant nothing.
        assert!(state.view.get::<Invites>(&empty).unwrap().is_some());
        assert!(state.view.get::<Invites>(&owner).unwrap().is_none());
        assert_eq!(roles_of(&state, &alice), vec![OWNER_ROLE.to_string()]);
        assert_eq!(roles_of(&state, &bob), vec!["inviter".to_string()]);

        let rbac = Rbac::new(&state.view);
        assert!(!rbac.has_permission(&bob.public_key(), ROLE_CREATE).unwrap());
    }

    #[test]
    fn invite_grants_its_roles_once_to_admitted_writer() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let carol = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        let (id, add) = add_invite(&alice, &alice, &["editor"]);
        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                entry(&alice, 1, define_role("editor", 1)),
                entry(&alice, 2, add),
                // Not admitted as a writer yet.
                entry(&alice, 3, grant_invited(&bob, &["editor"], 1, id)),
            ],
        );
        assert!(roles_of(&state, &bob).is_empty());

        state.apply_batch(
            &(),
            &[
                entry(&alice, 4, add_writer(&bob)),
                entry(&alice, 5, grant_invited(&bob, &["editor"], 1, id)),
                entry(&alice, 6, add_writer(&carol)),
                entry(&alice, 7, grant_invited(&carol, &["editor"], 1, id)),
            ],
        );

        assert_eq!(roles_of(&state, &bob), vec!["editor".to_string()]);
        assert!(roles_of(&state, &carol).is_empty());
        let invite = state.view.get::<Invites>(&id).unwrap().unwrap();
        assert_eq!(invite.redeemed_by, Some(bob.public_key()));
    }

    #[test]
    fn undecodable_entries_are_recorded() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let mut state = ApplyState::new(alice.public_key());

        let garbage = Entry::sign(&alice, 1, 1, BTreeMap::new(), vec![0xff, 0x00]).unwrap();
        let foreign = Entry::sign(&bob, 0, 1, BTreeMap::new(), vec![0xff]).unwrap();
        state.apply_batch(
            &(),
            &[
                entry(&alice, 0, init(&alice)),
                garbage,
                foreign,
                entry(&alice, 2, define_role("editor", 1)),
            ],
        );

        // Entries of non-writers are never decoded.
        let progress = state.progress();
        assert_eq!(progress.faults.len(), 1);
        assert_eq!(progress.faults[0].writer, alice.public_key());
        assert_eq!(progress.faults[0].seq, 1);
        assert!(role(&state, "editor").is_some());

        state.reset();
        assert!(state.progress().faults.is_empty());
    }
}
