// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collections of the derived state every context maintains.
use autobonk_core::{AclEntry, ContextInit, Invite, InviteId, PublicKey, RoleDef, Writer};

use crate::view::Collection;

/// Admitted writers, keyed by public key.
pub struct Writers;

impl Collection for Writers {
    const NAME: &'static str = "core/writers";
    type Key = PublicKey;
    type Record = Writer;

    fn key(record: &Self::Record) -> Self::Key {
        record.key
    }
}

/// Holds at most one record, the bootstrap of the context.
pub struct ContextInits;

impl Collection for ContextInits {
    const NAME: &'static str = "core/context-init";
    type Key = ();
    type Record = ContextInit;

    fn key(_record: &Self::Record) -> Self::Key {}
}

/// Role definitions, keyed by role name.
pub struct RoleDefs;

impl Collection for RoleDefs {
    const NAME: &'static str = "core/roles";
    type Key = String;
    type Record = RoleDef;

    fn key(record: &Self::Record) -> Self::Key {
        record.name.clone()
    }
}

/// Role assignments, keyed by subject.
pub struct AclEntries;

impl Collection for AclEntries {
    const NAME: &'static str = "core/acl";
    type Key = PublicKey;
    type Record = AclEntry;

    fn key(record: &Self::Record) -> Self::Key {
        record.subject_key
    }
}

/// Invites, keyed by invite id.
pub struct Invites;

impl Collection for Invites {
    const NAME: &'static str = "core/invites";
    type Key = InviteId;
    type Record = Invite;

    fn key(record: &Self::Record) -> Self::Key {
        record.id
    }
}
