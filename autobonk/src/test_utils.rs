// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for testing contexts: logging and a minimal chat room application.
use std::future::Future;
use std::time::Duration;

use autobonk_core::operation::{
    Extension, OperationError, deserialize_payload, serialize_payload,
};
use autobonk_core::{Operation, PublicKey};
use autobonk_store::Collection;
use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::apply::{Application, ApplyContext, ApplyError};
use crate::context::{Context, ContextError};

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Poll a condition until it holds or the timeout elapsed.
///
/// Returns whether the condition was met.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

/// Poll an async condition until it holds or the timeout elapsed.
pub async fn wait_for_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomOperation {
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

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub index: u64,
    pub text: String,
    pub author: PublicKey,
}

pub struct Messages;

impl Collection for Messages {
    const NAME: &'static str = "room/messages";
    type Key = u64;
    type Record = Message;

    fn key(record: &Self::Record) -> Self::Key {
        record.index
    }
}

/// Chat room keeping a totally ordered list of messages.
#[derive(Clone, Debug, Default)]
pub struct Room;

impl Application for Room {
    type Operation = RoomOperation;

    fn apply(
        &self,
        operation: &RoomOperation,
        cx: &mut ApplyContext<'_>,
    ) -> Result<(), ApplyError> {
        match operation {
            RoomOperation::SendMessage(SendMessage { text }) => {
                if text.is_empty() {
                    return Err(ApplyError::Rejected("empty message".into()));
                }

                let mut last = 0;
                for message in cx.view().find::<Messages>() {
                    last = message?.index;
                }

                let message = Message {
                    index: last + 1,
                    text: text.clone(),
                    author: cx.writer(),
                };
                cx.view_mut().insert::<Messages>(&message)?;
                Ok(())
            }
        }
    }
}

pub async fn send_message(context: &Context<Room>, text: &str) -> Result<u64, ContextError> {
    context
        .append(Operation::App(RoomOperation::SendMessage(SendMessage {
            text: text.to_string(),
        })))
        .await
}

pub fn messages(context: &Context<Room>) -> Vec<Message> {
    context.view().find::<Messages>().unwrap_or_default()
}
