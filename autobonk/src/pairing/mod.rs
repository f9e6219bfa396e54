// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admission of new writers through invites.
//!
//! An invite is a random 32 byte seed. The seed derives an Ed25519 key pair, the invite's public
//! key is recorded in the context while the seed is handed out as part of a shareable
//! [`InviteToken`]. Candidates prove knowledge of the seed by signing their own writer key with
//! it ([`PairingRequest`]), members verify that proof against the recorded public key. The
//! confirmation revealing the context's key and encryption key is sealed with a symmetric key
//! derived from the same seed, so only holders of the invite can read it.
//!
//! The protocol is driven by two state machines: the [`Candidate`] on the side of the joining
//! peer and the [`Member`] on the side of every peer already writing to the context.
mod candidate;
mod member;

use std::fmt;
use std::str::FromStr;

use autobonk_core::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use autobonk_core::{EncryptionKey, Hash, InviteId, PrivateKey, PublicKey, Signature};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use candidate::{Candidate, CandidateState};
pub use member::{Member, MemberState};
pub(crate) use candidate::pair;

const INVITE_SEED_LEN: usize = 32;

const SEALING_CONTEXT: &str = "autobonk pairing confirmation v1";

/// Everything a candidate needs to find a context and prove it was invited.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteToken {
    pub discovery_key: Hash,
    #[serde(with = "serde_bytes")]
    seed: Vec<u8>,
}

impl InviteToken {
    fn generate(discovery_key: Hash) -> Self {
        let mut seed = vec![0; INVITE_SEED_LEN];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            discovery_key,
            seed,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PairingError> {
        let token: Self = decode_cbor(bytes)?;
        if token.seed.len() != INVITE_SEED_LEN {
            return Err(PairingError::InvalidToken);
        }
        Ok(token)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PairingError> {
        Ok(encode_cbor(self)?)
    }

    fn private_key(&self) -> PrivateKey {
        let mut seed = [0; INVITE_SEED_LEN];
        seed.copy_from_slice(&self.seed);
        PrivateKey::from_bytes(&seed)
    }

    /// Key against which proofs of this invite are verified.
    pub fn public_key(&self) -> PublicKey {
        self.private_key().public_key()
    }

    pub fn id(&self) -> InviteId {
        invite_id(&self.public_key())
    }

    fn sealing_cipher(&self) -> ChaCha20Poly1305 {
        let key = Hash::derive(SEALING_CONTEXT, &self.seed);
        ChaCha20Poly1305::new(key.as_bytes().into())
    }
}

impl fmt::Display for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes().map_err(|_| fmt::Error)?;
        write!(f, "{}", hex::encode(bytes))
    }
}

impl fmt::Debug for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteToken")
            .field("discovery_key", &self.discovery_key)
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl FromStr for InviteToken {
    type Err = PairingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(value.trim()).map_err(|_| PairingError::InvalidToken)?;
        Self::from_bytes(&bytes)
    }
}

/// Identifier of the invite with the given public key.
pub fn invite_id(public_key: &PublicKey) -> InviteId {
    InviteId::from(Hash::new(public_key.as_bytes()))
}

/// Freshly generated invite.
#[derive(Clone, Debug)]
pub struct CreatedInvite {
    pub id: InviteId,
    /// Encoded [`InviteToken`].
    pub invite: Vec<u8>,
    pub public_key: PublicKey,
    pub expires: u64,
}

/// Generate a new invite for the context with the given discovery key.
pub fn create_invite(discovery_key: Hash, expires: u64) -> Result<CreatedInvite, PairingError> {
    let token = InviteToken::generate(discovery_key);
    Ok(CreatedInvite {
        id: token.id(),
        invite: token.to_bytes()?,
        public_key: token.public_key(),
        expires,
    })
}

/// Request of a candidate to be admitted, proving knowledge of an invite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub invite_id: InviteId,
    /// Writer key of the candidate.
    pub user_data: PublicKey,
    proof: Signature,
}

impl PairingRequest {
    pub fn new(token: &InviteToken, user_data: PublicKey) -> Result<Self, PairingError> {
        let invite_id = token.id();
        let proof = token
            .private_key()
            .sign(&proof_bytes(&invite_id, &user_data)?);
        Ok(Self {
            invite_id,
            user_data,
            proof,
        })
    }

    /// Verify the proof against the public key of the invite.
    pub fn open(&self, public_key: &PublicKey) -> Result<(), PairingError> {
        let bytes = proof_bytes(&self.invite_id, &self.user_data)?;
        if !public_key.verify(&bytes, &self.proof) {
            return Err(PairingError::InvalidProof);
        }
        Ok(())
    }
}

fn proof_bytes(invite_id: &InviteId, user_data: &PublicKey) -> Result<Vec<u8>, EncodeError> {
    encode_cbor(&(invite_id, user_data))
}

/// Secrets revealed to an admitted candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPayload {
    pub key: PublicKey,
    pub encryption_key: EncryptionKey,
}

/// Confirmation payload encrypted for holders of the invite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedConfirm {
    #[serde(with = "serde_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

impl SealedConfirm {
    pub fn seal(token: &InviteToken, payload: &ConfirmPayload) -> Result<Self, PairingError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let plaintext = encode_cbor(payload)?;
        let ciphertext = token
            .sealing_cipher()
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| PairingError::Seal)?;
        Ok(Self {
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    pub fn open(&self, token: &InviteToken) -> Result<ConfirmPayload, PairingError> {
        if self.nonce.len() != 12 {
            return Err(PairingError::Seal);
        }
        let plaintext = token
            .sealing_cipher()
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map_err(|_| PairingError::Seal)?;
        Ok(decode_cbor(&plaintext[..])?)
    }
}

/// Reason a member refused to admit a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DenyStatus {
    Revoked,
    Expired,
    Unauthorized,
    /// The invite's roles were already granted to another candidate.
    Redeemed,
}

impl fmt::Display for DenyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            DenyStatus::Revoked => "revoked",
            DenyStatus::Expired => "expired",
            DenyStatus::Unauthorized => "unauthorized",
            DenyStatus::Redeemed => "redeemed",
        };
        write!(f, "{status}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingReply {
    Confirm(SealedConfirm),
    Deny(DenyStatus),
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid invite token")]
    InvalidToken,

    #[error("invalid proof of invite")]
    InvalidProof,

    #[error("could not seal or open pairing confirmation")]
    Seal,

    #[error("pairing was denied: {0}")]
    Denied(DenyStatus),

    #[error("no member admitted the candidate in time")]
    Timeout,

    #[error("pairing was closed")]
    Closed,
}
