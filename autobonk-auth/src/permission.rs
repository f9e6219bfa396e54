// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

/// Define and update roles.
pub const ROLE_CREATE: &str = "role:create";

/// Grant roles to subjects.
pub const ROLE_ASSIGN: &str = "role:assign";

/// Revoke all roles of a subject.
pub const ROLE_REVOKE: &str = "role:revoke";

/// Create, list and revoke invites and admit writers.
pub const USER_INVITE: &str = "user:invite";

/// Remove writers.
pub const USER_REMOVE: &str = "user:remove";

/// Role seeded for the creator of every context.
pub const OWNER_ROLE: &str = "owner";

/// Fixed permission set of the owner role.
pub fn owner_permissions() -> BTreeSet<String> {
    [ROLE_CREATE, ROLE_ASSIGN, ROLE_REVOKE, USER_INVITE, USER_REMOVE]
        .into_iter()
        .map(String::from)
        .collect()
}
