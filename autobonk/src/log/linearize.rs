// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use autobonk_core::PublicKey;

use crate::log::entry::Entry;

/// Deterministic causal total order of all entries of a context.
///
/// An entry can only be placed after its predecessor in the writer's own log and after every
/// head it names. Among all entries ready to be placed the one with the lowest `(clock, writer,
/// seq)` goes first. Entries with missing dependencies are left out until these arrive.
///
/// Every replica holding the same set of entries computes the same order.
pub fn linearize(entries: &[Entry]) -> Vec<Entry> {
    let mut logs: BTreeMap<PublicKey, Vec<&Entry>> = BTreeMap::new();
    for entry in entries {
        let log = logs.entry(entry.writer).or_default();
        if entry.seq == log.len() as u64 {
            log.push(entry);
        }
    }
    // Entries need to be visited in sequence order for the contiguity check above.
    debug_assert!(entries.windows(2).all(|pair| pair[0].id() <= pair[1].id()));

    let mut included: BTreeMap<PublicKey, u64> = BTreeMap::new();
    let mut order = Vec::with_capacity(entries.len());

    loop {
        let next = logs
            .iter()
            .filter_map(|(writer, log)| {
                let position = included.get(writer).copied().unwrap_or(0);
                log.get(position as usize).copied()
            })
            .filter(|entry| {
                entry.heads.iter().all(|(writer, seq)| {
                    included.get(writer).is_some_and(|included| included > seq)
                })
            })
            .min_by_key(|entry| (entry.clock, entry.writer, entry.seq));

        let Some(entry) = next else {
            break;
        };

        *included.entry(entry.writer).or_default() += 1;
        order.push(entry.clone());
    }

    order
}
