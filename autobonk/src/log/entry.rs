// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use autobonk_core::cbor::{EncodeError, encode_cbor};
use autobonk_core::{PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Signed entry of a writer's log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub writer: PublicKey,

    /// Position in the writer's own log, starting at 0.
    pub seq: u64,

    /// Lamport clock, greater than the clock of every entry known to the writer when appending.
    pub clock: u64,

    /// Latest contiguous sequence number of every other writer this entry depends on.
    pub heads: BTreeMap<PublicKey, u64>,

    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    pub signature: Signature,
}

impl Entry {
    pub(crate) fn sign(
        private_key: &PrivateKey,
        seq: u64,
        clock: u64,
        heads: BTreeMap<PublicKey, u64>,
        payload: Vec<u8>,
    ) -> Result<Self, EncodeError> {
        let writer = private_key.public_key();
        let bytes = signing_bytes(&writer, seq, clock, &heads, &payload)?;
        let signature = private_key.sign(&bytes);

        Ok(Self {
            writer,
            seq,
            clock,
            heads,
            payload,
            signature,
        })
    }

    /// Unique identifier of the entry across all logs of a context.
    pub fn id(&self) -> (PublicKey, u64) {
        (self.writer, self.seq)
    }

    /// Returns `true` if the signature was created by the entry's writer.
    pub fn verify(&self) -> bool {
        match signing_bytes(
            &self.writer,
            self.seq,
            self.clock,
            &self.heads,
            &self.payload,
        ) {
            Ok(bytes) => self.writer.verify(&bytes, &self.signature),
            Err(_) => false,
        }
    }
}

fn signing_bytes(
    writer: &PublicKey,
    seq: u64,
    clock: u64,
    heads: &BTreeMap<PublicKey, u64>,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    encode_cbor(&(writer, seq, clock, heads, serde_bytes::Bytes::new(payload)))
}
