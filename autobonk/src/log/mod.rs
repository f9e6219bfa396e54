// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process multi-writer log.
//!
//! Every writer of a context appends signed entries to its own log. Entries carry a Lamport clock
//! and the heads of all other writers known at the time of writing, which allows every replica
//! to [`linearize`] the union of all logs into the same causal total order.
//!
//! Replicas of one context are connected with [`LogStore::replicate`]. New entries are flooded to
//! all connected replicas and verified on ingest. Which writers are admitted is not decided here,
//! the log accepts entries of anyone and the apply step skips entries of writers which are not
//! part of the derived [`WriterSet`].
mod entry;
mod linearize;
mod storage;
mod store;
mod writers;

pub use entry::Entry;
pub use linearize::linearize;
pub use storage::{Storage, StorageError};
pub use store::{LogError, LogStore};
pub use writers::WriterSet;
