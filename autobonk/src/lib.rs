// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replicated, access-controlled multi-writer contexts.
//!
//! A [`Context`] is one shared history written by many peers. Every peer appends operations to
//! its own signed log, the logs of all writers are replicated between the peers of a context and
//! linearised into one deterministic order. Applying that order produces identical state on
//! every replica: the admitted writers, roles and permissions, invites and the state of the
//! [`Application`] built on top.
//!
//! ## Access control
//!
//! Roles are named sets of permissions, subjects hold a list of roles. The creator of a context
//! holds the `owner` role which grants all core permissions. Every mutation of a role or of a
//! subject's roles carries the revision it expects to produce, concurrent mutations based on the
//! same revision are resolved by applying the first one in log order and rejecting the others.
//!
//! ## Invites and pairing
//!
//! Writers holding `user:invite` create invites. Writers also holding `role:assign` may attach
//! roles, which go to the first candidate redeeming the invite. A candidate redeems an invite by announcing a pairing request on the context's topic,
//! any member answers it by admitting the candidate as a writer and revealing the context's keys
//! to it. See [`pairing`].
//!
//! ## Managing contexts
//!
//! The [`Manager`] creates, joins and re-opens contexts and keeps their metadata in a local index
//! which is either held in memory or persisted in SQLite.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use autobonk::{ContextConfig, CreateContextOptions, Manager, MemoryIndex, Swarm};
//!
//! let manager: Manager<MemoryIndex> =
//!     Manager::new(MemoryIndex::new(), Swarm::new(), (), ContextConfig::default());
//!
//! let context = manager.create_context(CreateContextOptions::default()).await?;
//! context.define_role("editor", ["doc:write"], 1).await?;
//! assert!(context.get_role("editor")?.is_some());
//!
//! manager.close().await;
//! # Ok(())
//! # }
//! ```
pub mod apply;
pub mod config;
pub mod context;
pub mod invite;
pub mod log;
pub mod manager;
pub mod pairing;
pub mod swarm;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use apply::{Application, ApplyContext, ApplyError, ApplyProgress, EntryFault};
pub use autobonk_auth::{
    OWNER_ROLE, PermissionError, ROLE_ASSIGN, ROLE_CREATE, ROLE_REVOKE, RevisionConflict,
    USER_INVITE, USER_REMOVE, ValidationError,
};
pub use autobonk_core::{
    AclEntry, ContextInit, EncryptionKey, Hash, Invite, InviteId, PrivateKey, PublicKey,
    RoleDef, Writer,
};
pub use autobonk_store::{Collection, ContextIndex, MemoryIndex, ReadView, ViewReader};
#[cfg(feature = "sqlite")]
pub use autobonk_store::{SqliteIndex, SqliteIndexBuilder};
pub use config::{ContextConfig, IndexConfig, ManagerConfig};
pub use context::{Context, ContextError, ContextOptions, discovery_key};
pub use invite::{InviteOptions, ListInvitesOptions};
pub use manager::{
    ContextRecord, CreateContextOptions, IndexError, JoinContextOptions, LocalIndex, Manager,
    ManagerError,
};
pub use pairing::{DenyStatus, InviteToken, PairingError};
pub use swarm::Swarm;
