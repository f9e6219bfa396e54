// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data-types of replicated, access-controlled contexts.
//!
//! A context is one shared, append-only history written by many independent peers. Every peer
//! replays the same linearised history through the same deterministic state machine and arrives
//! at identical derived state. This crate contains the vocabulary all other crates share:
//!
//! * Ed25519 identities ([`PublicKey`], [`PrivateKey`], [`Signature`]) and BLAKE3 [`Hash`]es
//! * The keyed records of the derived state ([`records`])
//! * The closed set of operations which can be appended to a context's log and their namespaced
//!   wire encoding ([`operation`])
//! * Helpers to encode and decode values in CBOR ([`cbor`])
pub mod cbor;
pub mod hash;
pub mod identity;
pub mod operation;
pub mod records;
mod serde;

pub use hash::{HASH_LEN, Hash, HashError};
pub use identity::{EncryptionKey, IdentityError, PrivateKey, PublicKey, Signature};
pub use operation::{
    AclUpdate, AddWriter, CORE_NAMESPACE, CoreOperation, DefineRole, DenounceRole, Extension,
    NoExtension, Operation, OperationError, RemoveWriter, RevokeInvite,
};
pub use records::{AclEntry, ContextInit, Invite, InviteId, Ordinal, RoleDef, Writer};

/// Current UNIX time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
