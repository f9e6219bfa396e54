// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lifetime of an invite when no explicit expiry was given.
pub const DEFAULT_INVITE_EXPIRY: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// How long a candidate waits for being admitted before giving up.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval in which a candidate repeats its announcement while no member replied.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextConfig {
    pub invite_expiry: Duration,
    pub pairing_timeout: Duration,
    pub announce_interval: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            invite_expiry: DEFAULT_INVITE_EXPIRY,
            pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
        }
    }
}

/// Backend of the local context index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum IndexConfig {
    #[default]
    Memory,
    #[cfg(feature = "sqlite")]
    #[serde(rename_all = "camelCase")]
    Sqlite {
        url: String,
        /// Size of the connection pool, in-memory databases need a single connection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_connections: Option<u32>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    pub context: ContextConfig,
    pub index: IndexConfig,
}
