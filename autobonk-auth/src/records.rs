// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure functions computing the next version of RBAC records.
//!
//! None of these functions read or write any state, they only validate a mutation against the
//! current record and return its successor.
use std::collections::BTreeSet;

use autobonk_core::{AclEntry, Ordinal, PublicKey, RoleDef};

use crate::error::{RbacError, RevisionConflict, ValidationError};
use crate::permission::{OWNER_ROLE, owner_permissions};
use crate::revision::assert_next_revision;

/// Define a new role or replace the permissions of an existing one.
pub fn next_role_def(
    current: Option<&RoleDef>,
    name: &str,
    permissions: BTreeSet<String>,
    rev: u64,
    updated: Ordinal,
) -> Result<RoleDef, RbacError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyRoleName.into());
    }

    if permissions.iter().any(|permission| permission.is_empty()) {
        return Err(ValidationError::EmptyPermission(name.to_string()).into());
    }

    let rev = assert_next_revision(current.map(|role| role.rev), rev)?;

    Ok(RoleDef {
        name: name.to_string(),
        permissions,
        rev,
        updated,
    })
}

/// Replace the roles of a subject.
///
/// Every role needs to be defined, duplicates are removed while keeping the order of first
/// occurrence.
pub fn next_acl_entry(
    current: Option<&AclEntry>,
    subject: PublicKey,
    roles: &[String],
    rev: u64,
    updated: Ordinal,
    is_defined: impl Fn(&str) -> bool,
) -> Result<AclEntry, RbacError> {
    if let Some(unknown) = roles.iter().find(|role| !is_defined(role)) {
        return Err(ValidationError::UnknownRole(unknown.clone()).into());
    }

    let rev = assert_next_revision(current.map(|entry| entry.rev), rev)?;

    Ok(AclEntry {
        subject_key: subject,
        roles: dedup(roles.iter().cloned()),
        rev,
        updated,
    })
}

/// Remove all roles of a subject.
///
/// The entry is kept with an empty role list, records are never deleted.
pub fn revoked_acl_entry(
    current: Option<&AclEntry>,
    subject: PublicKey,
    rev: u64,
    updated: Ordinal,
) -> Result<AclEntry, RevisionConflict> {
    let rev = assert_next_revision(current.map(|entry| entry.rev), rev)?;

    Ok(AclEntry {
        subject_key: subject,
        roles: Vec::new(),
        rev,
        updated,
    })
}

/// Remove a single role from the subject's own entry.
pub fn denounced_acl_entry(
    current: Option<&AclEntry>,
    role: &str,
    rev: u64,
    updated: Ordinal,
) -> Result<AclEntry, RbacError> {
    let Some(current) = current.filter(|entry| entry.roles.iter().any(|held| held == role)) else {
        return Err(ValidationError::RoleNotHeld(role.to_string()).into());
    };

    let rev = assert_next_revision(Some(current.rev), rev)?;

    Ok(AclEntry {
        subject_key: current.subject_key,
        roles: current
            .roles
            .iter()
            .filter(|held| *held != role)
            .cloned()
            .collect(),
        rev,
        updated,
    })
}

/// Owner role as seeded when a context gets initialised.
pub fn owner_role_def(updated: Ordinal) -> RoleDef {
    RoleDef {
        name: OWNER_ROLE.to_string(),
        permissions: owner_permissions(),
        rev: 1,
        updated,
    }
}

/// Add the owner role to the roles the subject already holds.
pub fn owner_acl_entry(
    current: Option<&AclEntry>,
    subject: PublicKey,
    updated: Ordinal,
) -> AclEntry {
    let held = current.map(|entry| entry.roles.clone()).unwrap_or_default();

    AclEntry {
        subject_key: subject,
        roles: dedup(held.into_iter().chain([OWNER_ROLE.to_string()])),
        rev: current.map_or(1, |entry| entry.rev.saturating_add(1)),
        updated,
    }
}

fn dedup(roles: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    roles.filter(|role| seen.insert(role.clone())).collect()
}
