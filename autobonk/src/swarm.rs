// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process topic-based transport.
//!
//! Peers join the topic of a context (its discovery key) with their replica of the context's log
//! and a channel receiving pairing sessions. Joining connects the peer's log with the logs of all
//! other peers already on the topic. Candidates who are not part of a context yet announce
//! pairing requests to every peer on the topic.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use autobonk_core::Hash;
use tokio::sync::mpsc;
use tracing::debug;

use crate::log::{LogError, LogStore};
use crate::pairing::{PairingReply, PairingRequest};

/// Pairing request of a candidate together with the channel to answer it on.
#[derive(Debug)]
pub struct PairingSession {
    pub request: PairingRequest,
    pub reply: mpsc::Sender<PairingReply>,
}

#[derive(Debug)]
struct Peer {
    id: u64,
    log: LogStore,
    pairing: mpsc::Sender<PairingSession>,
}

#[derive(Debug, Default)]
struct SwarmState {
    next_id: u64,
    topics: HashMap<Hash, Vec<Peer>>,
}

/// Handle on a joined topic, required to leave it again.
#[derive(Debug)]
pub struct Membership {
    topic: Hash,
    id: u64,
}

impl Membership {
    pub fn topic(&self) -> Hash {
        self.topic
    }
}

/// Shared in-process network all peers of a test or application connect to.
#[derive(Clone, Debug, Default)]
pub struct Swarm {
    inner: Arc<Mutex<SwarmState>>,
}

impl Swarm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SwarmState> {
        self.inner.lock().expect("acquire lock on swarm")
    }

    /// Join a topic and connect with every peer on it.
    pub fn join(
        &self,
        topic: Hash,
        log: LogStore,
        pairing: mpsc::Sender<PairingSession>,
    ) -> Result<Membership, LogError> {
        let (id, others) = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;

            let peers = state.topics.entry(topic).or_default();
            let others: Vec<LogStore> = peers.iter().map(|peer| peer.log.clone()).collect();
            peers.push(Peer {
                id,
                log: log.clone(),
                pairing,
            });
            (id, others)
        };

        debug!(%topic, peers = others.len(), "join topic");

        for other in &others {
            log.replicate(other)?;
        }

        Ok(Membership { topic, id })
    }

    /// Leave a topic and disconnect from every peer on it.
    pub fn leave(&self, membership: &Membership) {
        let (left, remaining) = {
            let mut state = self.lock();
            let Some(peers) = state.topics.get_mut(&membership.topic) else {
                return;
            };

            let Some(position) = peers.iter().position(|peer| peer.id == membership.id) else {
                return;
            };
            let left = peers.remove(position);
            let remaining: Vec<LogStore> = peers.iter().map(|peer| peer.log.clone()).collect();

            if peers.is_empty() {
                state.topics.remove(&membership.topic);
            }

            (left, remaining)
        };

        debug!(topic = %membership.topic, "leave topic");

        for other in &remaining {
            left.log.disconnect(other);
        }
    }

    /// Send a pairing request to every peer on a topic.
    ///
    /// Returns the number of peers the request was delivered to.
    pub fn announce(
        &self,
        topic: Hash,
        request: &PairingRequest,
        reply: &mpsc::Sender<PairingReply>,
    ) -> usize {
        let state = self.lock();
        let Some(peers) = state.topics.get(&topic) else {
            return 0;
        };

        peers
            .iter()
            .filter(|peer| {
                peer.pairing
                    .try_send(PairingSession {
                        request: request.clone(),
                        reply: reply.clone(),
                    })
                    .is_ok()
            })
            .count()
    }
}
