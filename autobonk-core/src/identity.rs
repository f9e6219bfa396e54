// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 key pairs identifying writers, and symmetric key material of a context.
use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{
    PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH, Signer, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use thiserror::Error;

/// Private ed25519 key used for signing.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generates a new private key using the systems random number generator (CSPRNG) as a seed.
    pub fn new() -> Self {
        let mut csprng = OsRng;
        Self(SigningKey::generate(&mut csprng))
    }

    /// Create a private key from a 32 byte seed.
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    /// Bytes of the private key.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        self.0.as_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(self.0.sign(bytes).to_bytes())
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.public_key().to_hex())
            .finish()
    }
}

/// Public ed25519 key identifying a writer or the subject of an ACL entry.
///
/// Keys are validated to be a point on the curve when constructed from bytes, so any value of
/// this type can be used to verify signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<Self, IdentityError> {
        VerifyingKey::from_bytes(bytes)?;
        Ok(Self(*bytes))
    }

    /// Bytes of the public key.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over the given bytes.
    ///
    /// Uses strict verification and rejects weak keys and malleable signatures.
    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key.verify_strict(bytes, &signature).is_ok()
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(value.len(), PUBLIC_KEY_LENGTH))?;
        Self::from_bytes(&bytes)
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(value)?.as_slice())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LENGTH]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_LENGTH] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(value.len(), SIGNATURE_LENGTH))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Length of symmetric key material.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Symmetric key shared by all writers of a context.
///
/// Handed to new writers as part of a successful pairing.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionKey {
    /// Generate fresh key material from the system's random number generator.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ENCRYPTION_KEY_LEN] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(value.len(), ENCRYPTION_KEY_LEN))?;
        Ok(Self(bytes))
    }
}

impl FromStr for EncryptionKey {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(value)?.as_slice())
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid length {0} bytes, expected {1} bytes")]
    InvalidLength(usize, usize),

    #[error("invalid hex encoding in key string")]
    InvalidHexEncoding(#[from] hex::FromHexError),

    /// Bytes do not describe a valid ed25519 public key.
    #[error(transparent)]
    Ed25519(#[from] ed25519_dalek::SignatureError),
}
