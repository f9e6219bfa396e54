// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::RevisionConflict;

/// Check that `supplied` is the revision following `current`.
///
/// The first revision of a record is 1. Returns the accepted revision.
pub fn assert_next_revision(current: Option<u64>, supplied: u64) -> Result<u64, RevisionConflict> {
    let expected = current.map_or(1, |rev| rev.saturating_add(1));
    if supplied != expected {
        return Err(RevisionConflict { expected, supplied });
    }
    Ok(expected)
}
