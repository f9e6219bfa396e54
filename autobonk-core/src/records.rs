// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyed records of a context's derived state.
//!
//! All records are written exclusively while applying the log and are identical on every replica
//! after replaying the same linearised history.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hash::{Hash, HashError};
use crate::identity::PublicKey;

/// Admitted writer of a context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Writer {
    pub key: PublicKey,
    pub is_indexer: bool,
    /// Writer whose `add-writer` operation admitted this key.
    pub added_by: PublicKey,
}

/// Bootstrap record of a context, written exactly once by its creator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInit {
    pub creator_key: PublicKey,
    pub index: u64,
    pub timestamp: u64,
}

/// Deterministic position of a derived write within the linearised log.
///
/// Operations which cause more than one write (for example seeding the owner role and granting it
/// to the creator while applying `init-context`) are sub-ordered by `order` inside the same block.
/// Ordinals compare as tuples so there is no upper bound on the number of sub-operations.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Ordinal {
    pub block_index: u64,
    pub order: u32,
}

impl Ordinal {
    pub fn new(block_index: u64, order: u32) -> Self {
        Self { block_index, order }
    }

    /// Next ordinal within the same block.
    pub fn next(&self) -> Self {
        Self {
            block_index: self.block_index,
            order: self.order.saturating_add(1),
        }
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block_index, self.order)
    }
}

/// Named bundle of permissions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDef {
    pub name: String,
    pub permissions: BTreeSet<String>,
    pub rev: u64,
    pub updated: Ordinal,
}

impl RoleDef {
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Roles held by one subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    pub subject_key: PublicKey,
    pub roles: Vec<String>,
    pub rev: u64,
    pub updated: Ordinal,
}

/// Random identifier of an invite.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InviteId(Hash);

impl InviteId {
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl From<Hash> for InviteId {
    fn from(value: Hash) -> Self {
        Self(value)
    }
}

impl FromStr for InviteId {
    type Err = HashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(value.parse()?))
    }
}

impl fmt::Display for InviteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl fmt::Debug for InviteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InviteId").field(&self.0.to_hex()).finish()
    }
}

/// Role-scoped, time-bound and revocable invitation to become a writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: InviteId,
    /// Redeemable secret handed out as part of the invite token.
    #[serde(with = "serde_bytes")]
    pub invite: Vec<u8>,
    /// Key against which candidates prove knowledge of the secret.
    pub public_key: PublicKey,
    /// Expiry as UNIX timestamp in milliseconds.
    pub expires: u64,
    pub roles: Vec<String>,
    pub created_by: PublicKey,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
    /// Subject which was granted the invite's roles, an invite grants its roles only once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_by: Option<PublicKey>,
}

impl Invite {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires <= now
    }

    /// Neither revoked nor expired.
    pub fn is_live(&self, now: u64) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}
