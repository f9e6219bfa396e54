// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role-based access control for replicated contexts.
//!
//! Subjects (writer public keys) hold roles through their [`AclEntry`](autobonk_core::AclEntry),
//! roles bundle permissions through their [`RoleDef`](autobonk_core::RoleDef). A subject holds a
//! permission if any of its roles grants it.
//!
//! Both records carry a revision counter. Every mutation has to name the next revision
//! explicitly ([`assert_next_revision`]), which turns it into a compare-and-swap: replaying two
//! concurrently authored mutations of the same record in log order lets the first one win and
//! rejects the second one identically on every replica.
//!
//! Computing the next version of a record is pure ([`next_role_def`], [`next_acl_entry`],
//! [`revoked_acl_entry`], [`denounced_acl_entry`]). Whether the result is appended to the log as
//! a new operation or written directly into the view while replaying is decided by the caller.
mod error;
mod permission;
mod rbac;
mod records;
mod revision;

pub use error::{PermissionError, RbacError, RevisionConflict, ValidationError};
pub use permission::{
    OWNER_ROLE, ROLE_ASSIGN, ROLE_CREATE, ROLE_REVOKE, USER_INVITE, USER_REMOVE,
    owner_permissions,
};
pub use rbac::Rbac;
pub use records::{
    denounced_acl_entry, next_acl_entry, next_role_def, owner_acl_entry, owner_role_def,
    revoked_acl_entry,
};
pub use revision::assert_next_revision;
