// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operations which can be appended to a context's log.
//!
//! The set of operations is closed: the core operations managing writers, invites and roles are
//! enumerated in [`CoreOperation`] and applications add their own closed set through the
//! [`Extension`] trait. On the wire every operation is an envelope of a two-part namespaced type
//! string (`<namespace>/<action>`, for example `core/grant-roles`) and a CBOR payload.
//!
//! Decoding an envelope of an unrecognised type does not fail, it yields
//! [`Operation::Unknown`]. Unknown operations can never be encoded and are rejected when applied,
//! so they fail closed instead of being silently skipped.
use std::collections::BTreeSet;
use std::fmt::Debug;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::identity::PublicKey;
use crate::records::{ContextInit, Invite, InviteId};

/// Namespace of all operations defined by this crate.
pub const CORE_NAMESPACE: &str = "core";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWriter {
    pub key: PublicKey,
    pub is_indexer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveWriter {
    pub key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeInvite {
    pub id: InviteId,
    pub revoked_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineRole {
    pub name: String,
    pub permissions: BTreeSet<String>,
    pub rev: u64,
}

/// Replaces the roles of a subject.
///
/// Used by both `grant-roles` and `revoke-roles`, the latter always carrying an empty role list.
/// Grants issued while redeeming an invite name the invite they were derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclUpdate {
    pub subject_key: PublicKey,
    pub roles: Vec<String>,
    pub rev: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<InviteId>,
}

/// Removes one role from the author's own ACL entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenounceRole {
    pub role: String,
    pub rev: u64,
}

/// Operations managing writers, invites and roles of a context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreOperation {
    AddWriter(AddWriter),
    RemoveWriter(RemoveWriter),
    InitContext(ContextInit),
    AddInvite(Invite),
    RevokeInvite(RevokeInvite),
    DefineRole(DefineRole),
    GrantRoles(AclUpdate),
    RevokeRoles(AclUpdate),
    DenounceRole(DenounceRole),
}

impl CoreOperation {
    /// Action name of the operation within the core namespace.
    pub fn action(&self) -> &'static str {
        match self {
            CoreOperation::AddWriter(_) => "add-writer",
            CoreOperation::RemoveWriter(_) => "remove-writer",
            CoreOperation::InitContext(_) => "init-context",
            CoreOperation::AddInvite(_) => "add-invite",
            CoreOperation::RevokeInvite(_) => "revoke-invite",
            CoreOperation::DefineRole(_) => "define-role",
            CoreOperation::GrantRoles(_) => "grant-roles",
            CoreOperation::RevokeRoles(_) => "revoke-roles",
            CoreOperation::DenounceRole(_) => "denounce-role",
        }
    }

    fn to_payload(&self) -> Result<Value, OperationError> {
        let value = match self {
            CoreOperation::AddWriter(payload) => Value::serialized(payload),
            CoreOperation::RemoveWriter(payload) => Value::serialized(payload),
            CoreOperation::InitContext(payload) => Value::serialized(payload),
            CoreOperation::AddInvite(payload) => Value::serialized(payload),
            CoreOperation::RevokeInvite(payload) => Value::serialized(payload),
            CoreOperation::DefineRole(payload) => Value::serialized(payload),
            CoreOperation::GrantRoles(payload) => Value::serialized(payload),
            CoreOperation::RevokeRoles(payload) => Value::serialized(payload),
            CoreOperation::DenounceRole(payload) => Value::serialized(payload),
        };
        value.map_err(|err| OperationError::Payload(err.to_string()))
    }

    fn from_payload(action: &str, payload: &Value) -> Result<Option<Self>, OperationError> {
        let operation = match action {
            "add-writer" => CoreOperation::AddWriter(deserialize_payload(payload)?),
            "remove-writer" => CoreOperation::RemoveWriter(deserialize_payload(payload)?),
            "init-context" => CoreOperation::InitContext(deserialize_payload(payload)?),
            "add-invite" => CoreOperation::AddInvite(deserialize_payload(payload)?),
            "revoke-invite" => CoreOperation::RevokeInvite(deserialize_payload(payload)?),
            "define-role" => CoreOperation::DefineRole(deserialize_payload(payload)?),
            "grant-roles" => CoreOperation::GrantRoles(deserialize_payload(payload)?),
            "revoke-roles" => CoreOperation::RevokeRoles(deserialize_payload(payload)?),
            "denounce-role" => CoreOperation::DenounceRole(deserialize_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(operation))
    }
}

/// Deserialize a typed payload from a CBOR value.
pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(
    payload: &Value,
) -> Result<T, OperationError> {
    payload
        .deserialized()
        .map_err(|err| OperationError::Payload(err.to_string()))
}

/// Serialize a typed payload into a CBOR value.
pub fn serialize_payload<T: Serialize>(payload: &T) -> Result<Value, OperationError> {
    Value::serialized(payload).map_err(|err| OperationError::Payload(err.to_string()))
}

/// Application-defined operations living in their own namespace.
///
/// ```
/// use autobonk_core::operation::{Extension, OperationError, deserialize_payload, serialize_payload};
/// use ciborium::Value;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// pub struct SendMessage {
///     pub text: String,
/// }
///
/// #[derive(Clone, Debug)]
/// pub enum RoomOperation {
///     SendMessage(SendMessage),
/// }
///
/// impl Extension for RoomOperation {
///     const NAMESPACE: &'static str = "room";
///
///     fn action(&self) -> &'static str {
///         match self {
///             RoomOperation::SendMessage(_) => "send-message",
///         }
///     }
///
///     fn to_payload(&self) -> Result<Value, OperationError> {
///         match self {
///             RoomOperation::SendMessage(payload) => serialize_payload(payload),
///         }
///     }
///
///     fn from_payload(action: &str, payload: &Value) -> Result<Option<Self>, OperationError> {
///         match action {
///             "send-message" => Ok(Some(RoomOperation::SendMessage(deserialize_payload(payload)?))),
///             _ => Ok(None),
///         }
///     }
/// }
/// ```
pub trait Extension: Clone + Debug + Sized {
    /// Namespace of the application's operations, must not be "core".
    const NAMESPACE: &'static str;

    fn action(&self) -> &'static str;

    fn to_payload(&self) -> Result<Value, OperationError>;

    /// Decode the payload of the given action.
    ///
    /// Returns `None` if the action is not known to the application.
    fn from_payload(action: &str, payload: &Value) -> Result<Option<Self>, OperationError>;
}

/// Applications without operations of their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoExtension {}

impl Extension for NoExtension {
    const NAMESPACE: &'static str = "";

    fn action(&self) -> &'static str {
        match *self {}
    }

    fn to_payload(&self) -> Result<Value, OperationError> {
        match *self {}
    }

    fn from_payload(_action: &str, _payload: &Value) -> Result<Option<Self>, OperationError> {
        Ok(None)
    }
}

/// Any operation which can appear in a context's log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation<X = NoExtension> {
    Core(CoreOperation),
    App(X),
    /// Operation of a type unknown to this replica, holds the full type string.
    Unknown(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    payload: Value,
}

impl<X> Operation<X>
where
    X: Extension,
{
    /// Full namespaced type string of the operation.
    pub fn kind(&self) -> String {
        match self {
            Operation::Core(operation) => format!("{CORE_NAMESPACE}/{}", operation.action()),
            Operation::App(operation) => format!("{}/{}", X::NAMESPACE, operation.action()),
            Operation::Unknown(kind) => kind.clone(),
        }
    }

    /// Encode the operation into its wire envelope.
    pub fn encode(&self) -> Result<Vec<u8>, OperationError> {
        let payload = match self {
            Operation::Core(operation) => operation.to_payload()?,
            Operation::App(operation) => operation.to_payload()?,
            Operation::Unknown(kind) => return Err(OperationError::UnknownType(kind.clone())),
        };

        let envelope = Envelope {
            kind: self.kind(),
            payload,
        };

        Ok(encode_cbor(&envelope)?)
    }

    /// Decode an operation from its wire envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, OperationError> {
        let envelope: Envelope = decode_cbor(bytes)?;

        let Some((namespace, action)) = envelope.kind.split_once('/') else {
            return Ok(Operation::Unknown(envelope.kind));
        };

        let operation = if namespace == CORE_NAMESPACE {
            CoreOperation::from_payload(action, &envelope.payload)?.map(Operation::Core)
        } else if !X::NAMESPACE.is_empty() && namespace == X::NAMESPACE {
            X::from_payload(action, &envelope.payload)?.map(Operation::App)
        } else {
            None
        };

        Ok(operation.unwrap_or(Operation::Unknown(envelope.kind)))
    }
}

impl<X> From<CoreOperation> for Operation<X> {
    fn from(value: CoreOperation) -> Self {
        Operation::Core(value)
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("malformed operation payload: {0}")]
    Payload(String),

    #[error("operation type {0} is unknown and can not be encoded")]
    UnknownType(String),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;
    use ciborium::Value;
    use serde::{Deserialize, Serialize};

    use crate::cbor::encode_cbor;
    use crate::identity::PrivateKey;
    use crate::records::ContextInit;

    use super::{
        AclUpdate, CoreOperation, DefineRole, Extension, NoExtension, Operation, OperationError,
        deserialize_payload, serialize_payload,
    };

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct SendMessage {
        text: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum RoomOperation {
        SendMessage(SendMessage),
    }

    impl Extension for RoomOperation {
        const NAMESPACE: &'static str = "room";

        fn action(&self) -> &'static str {
            match self {
                RoomOperation::SendMessage(_) => "send-message",
            }
        }

        fn to_payload(&self) -> Result<Value, OperationError> {
            match self {
                RoomOperation::SendMessage(payload) => serialize_payload(payload),
            }
        }

        fn from_payload(action: &str, payload: &Value) -> Result<Option<Self>, OperationError> {
            match action {
                "send-message" => Ok(Some(RoomOperation::SendMessage(deserialize_payload(
                    payload,
                )?))),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn core_operation_kinds_are_namespaced() {
        let operation: Operation = CoreOperation::DefineRole(DefineRole {
            name: "editor".into(),
            permissions: BTreeSet::from(["post:create".to_string()]),
            rev: 1,
        })
        .into();
        assert_eq!(operation.kind(), "core/define-role");

        let bytes = operation.encode().unwrap();
        assert_eq!(Operation::<NoExtension>::decode(&bytes).unwrap(), operation);
    }

    #[test]
    fn optional_invite_id_is_omitted() {
        let subject_key = PrivateKey::new().public_key();
        let operation: Operation = CoreOperation::GrantRoles(AclUpdate {
            subject_key,
            roles: vec!["editor".into()],
            rev: 1,
            invite_id: None,
        })
        .into();

        let bytes = operation.encode().unwrap();
        let decoded = Operation::<NoExtension>::decode(&bytes).unwrap();
        assert_matches!(
            decoded,
            Operation::Core(CoreOperation::GrantRoles(AclUpdate { invite_id: None, .. }))
        );
    }

    #[test]
    fn application_operations() {
        let operation = Operation::App(RoomOperation::SendMessage(SendMessage {
            text: "Hello from room1".into(),
        }));
        assert_eq!(operation.kind(), "room/send-message");

        let bytes = operation.encode().unwrap();
        assert_eq!(Operation::<RoomOperation>::decode(&bytes).unwrap(), operation);

        // Replicas without the application extension see an unknown operation.
        assert_matches!(
            Operation::<NoExtension>::decode(&bytes).unwrap(),
            Operation::Unknown(kind) if kind == "room/send-message"
        );
    }

    #[test]
    fn unknown_types_fail_closed() {
        #[derive(Serialize)]
        struct Envelope {
            #[serde(rename = "type")]
            kind: String,
            payload: Value,
        }

        for kind in ["core/drop-tables", "forum/create-post", "no-namespace"] {
            let bytes = encode_cbor(&Envelope {
                kind: kind.to_string(),
                payload: Value::Null,
            })
            .unwrap();

            let operation = Operation::<NoExtension>::decode(&bytes).unwrap();
            assert_matches!(&operation, Operation::Unknown(unknown) if unknown == kind);
            assert_matches!(operation.encode(), Err(OperationError::UnknownType(_)));
        }
    }

    #[test]
    fn malformed_payload_is_an_error() {
        #[derive(Serialize)]
        struct Envelope {
            #[serde(rename = "type")]
            kind: String,
            payload: Value,
        }

        let bytes = encode_cbor(&Envelope {
            kind: "core/init-context".into(),
            payload: Value::Text("not a record".into()),
        })
        .unwrap();

        assert_matches!(
            Operation::<NoExtension>::decode(&bytes),
            Err(OperationError::Payload(_))
        );
    }

    #[test]
    fn context_init_uses_camel_case_fields() {
        let creator_key = PrivateKey::new().public_key();
        let operation: Operation = CoreOperation::InitContext(ContextInit {
            creator_key,
            index: 0,
            timestamp: 1,
        })
        .into();

        let bytes = operation.encode().unwrap();
        let envelope: Value = ciborium::from_reader(&bytes[..]).unwrap();
        let Value::Map(entries) = envelope else {
            panic!("expected map");
        };
        let payload = entries
            .iter()
            .find(|(key, _)| key == &Value::Text("payload".into()))
            .map(|(_, value)| value.clone())
            .unwrap();
        let Value::Map(fields) = payload else {
            panic!("expected map");
        };
        assert!(
            fields
                .iter()
                .any(|(key, _)| key == &Value::Text("creatorKey".into()))
        );
    }
}
