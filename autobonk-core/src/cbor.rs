// SPDX-License-Identifier: MIT OR Apache-2.0

//! CBOR codec shared by log entries, operation envelopes, invite tokens and view records.
//!
//! Decoding is strict: a buffer needs to hold exactly one value. Replicas refuse entries with
//! trailing bytes instead of silently ignoring them.
use ciborium::de::Error as DeserializeError;
use ciborium::ser::Error as SerializeError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decode one value, failing if the buffer holds anything after it.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut remaining = bytes;
    let value = ciborium::de::from_reader(&mut remaining)?;

    if !remaining.is_empty() {
        return Err(DecodeError::TrailingBytes(remaining.len()));
    }

    Ok(value)
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not write cbor: {0}")]
    Io(std::io::Error),

    #[error("value can not be encoded: {0}")]
    Value(String),
}

impl From<SerializeError<std::io::Error>> for EncodeError {
    fn from(value: SerializeError<std::io::Error>) -> Self {
        match value {
            SerializeError::Io(err) => EncodeError::Io(err),
            SerializeError::Value(reason) => EncodeError::Value(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not read cbor: {0}")]
    Io(std::io::Error),

    /// Malformed input, holds the byte offset of the first invalid item.
    #[error("malformed cbor at byte {0}")]
    Syntax(usize),

    /// Well-formed input which does not match the expected shape.
    #[error("unexpected cbor value: {1}")]
    Semantic(Option<usize>, String),

    #[error("cbor nested too deeply")]
    RecursionLimitExceeded,

    #[error("{0} trailing bytes after cbor value")]
    TrailingBytes(usize),
}

impl From<DeserializeError<std::io::Error>> for DecodeError {
    fn from(value: DeserializeError<std::io::Error>) -> Self {
        match value {
            DeserializeError::Io(err) => DecodeError::Io(err),
            DeserializeError::Syntax(offset) => DecodeError::Syntax(offset),
            DeserializeError::Semantic(offset, reason) => DecodeError::Semantic(offset, reason),
            DeserializeError::RecursionLimitExceeded => DecodeError::RecursionLimitExceeded,
        }
    }
}
