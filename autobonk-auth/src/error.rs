// SPDX-License-Identifier: MIT OR Apache-2.0

use autobonk_core::PublicKey;
use autobonk_store::ViewError;
use thiserror::Error;

/// Subject lacks a permission required for an action.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{subject} lacks permission {permission}")]
pub struct PermissionError {
    pub permission: String,
    pub subject: PublicKey,
}

/// Supplied revision of a role or ACL mutation is not the next one.
///
/// Callers need to re-read the record and retry with the expected revision.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("revision conflict: expected {expected}, got {supplied}")]
pub struct RevisionConflict {
    pub expected: u64,
    pub supplied: u64,
}

/// Malformed or semantically invalid operation payload.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("role name must not be empty")]
    EmptyRoleName,

    #[error("role {0} has an empty permission")]
    EmptyPermission(String),

    #[error("role {0} is not defined")]
    UnknownRole(String),

    #[error("role {0} is not held")]
    RoleNotHeld(String),

    #[error("revoking roles must not name any roles")]
    RolesOnRevoke,

    #[error("context is already initialised")]
    AlreadyInitialized,

    #[error("context must be initialised by its creator {expected}, not {writer}")]
    CreatorMismatch {
        expected: PublicKey,
        writer: PublicKey,
    },

    #[error("context must be initialised with the first entry of its creator")]
    NotFirstEntry,

    #[error("invalid invite: {0}")]
    InvalidInvite(&'static str),

    #[error("grant does not match invite {0}")]
    InviteMismatch(String),

    #[error("invite {0} was already redeemed")]
    InviteRedeemed(String),

    #[error("invalid grant through invite: {0}")]
    InvalidInviteGrant(&'static str),

    #[error("unknown operation type {0}")]
    UnknownOperation(String),
}

#[derive(Debug, Error)]
pub enum RbacError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    RevisionConflict(#[from] RevisionConflict),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    View(#[from] ViewError),
}
