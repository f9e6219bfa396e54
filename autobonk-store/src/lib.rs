// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence layers of replicated access-controlled contexts.
//!
//! Two very different stores live in this crate:
//!
//! ## Indexed view
//!
//! Every context owns exactly one [`MemoryView`], the derived state produced by replaying the
//! context's log. It is organised in typed [`Collection`]s and is only ever mutated while applying
//! log operations. Writes are staged and become visible to outside readers ([`ViewReader`]) only
//! after the view was flushed at the end of an applied batch. Savepoints allow discarding the
//! writes of a single failed operation so no operation is ever partially applied.
//!
//! Records and keys are stored as CBOR in ordered maps, which makes the flushed state of two
//! replicas which replayed the same history byte-identical, see [`ViewReader::digest`].
//!
//! ## Local index
//!
//! The [`ContextIndex`] is a small ordered key-value store private to one process, holding
//! metadata about all contexts known locally. An in-memory implementation is always available,
//! a SQLite implementation is gated by the `sqlite` feature flag (enabled by default).
pub mod collections;
pub mod index;
pub mod memory_index;
#[cfg(feature = "sqlite")]
pub mod sqlite_index;
pub mod view;

pub use collections::{AclEntries, ContextInits, Invites, RoleDefs, Writers};
pub use index::{ContextIndex, LocalContextIndex};
pub use memory_index::MemoryIndex;
#[cfg(feature = "sqlite")]
pub use sqlite_index::{SqliteIndex, SqliteIndexBuilder, SqliteIndexError};
pub use view::{Collection, MemoryView, ReadView, Savepoint, ViewError, ViewReader};
