use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle status shared by nodes, subscriptions and sessions on the ledger.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Unspecified,
    Active,
    InactivePending,
    Inactive,
}

impl Status {
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Account {
    pub address: String,
    /// Base64 encoded ed25519 public key, absent until the account signs its first transaction.
    #[serde(default)]
    pub pub_key: Option<String>,
    #[serde(default)]
    pub account_number: u64,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Node {
    pub address: String,
    #[serde(default)]
    pub remote_url: String,
    pub status: Status,
    pub status_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct Bandwidth {
    pub upload: i64,
    pub download: i64,
}

/// Session as recorded on the ledger.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct LedgerSession {
    pub id: u64,
    pub subscription_id: u64,
    pub node_address: String,
    pub address: String,
    /// Last bandwidth reported by the node.
    #[serde(default)]
    pub bandwidth: Bandwidth,
    #[serde(default)]
    pub duration_secs: u64,
    pub status: Status,
    pub status_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: u64,
    pub address: String,
    /// Set for subscriptions bought directly from a node.
    #[serde(default)]
    pub node_address: Option<String>,
    /// Set for subscriptions to a plan.
    #[serde(default)]
    pub plan_id: Option<u64>,
    pub status: Status,
    pub status_at: DateTime<Utc>,
}

/// Bandwidth allocation of a single account within a subscription, in bytes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub address: String,
    pub allocated: i64,
    pub consumed: i64,
}

impl Quota {
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.allocated.saturating_sub(self.consumed)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Usage of a single session reported to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUsage {
    pub id: u64,
    pub duration_secs: u64,
    pub upload: i64,
    pub download: i64,
}

/// Ledger messages a node is allowed to send.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    UpdateNodeStatus {
        from: String,
        status: Status,
    },
    UpdateSession {
        from: String,
        id: u64,
        duration_secs: u64,
        upload: i64,
        download: i64,
    },
}

impl Message {
    #[must_use]
    pub fn update_session(from: &str, usage: &SessionUsage) -> Self {
        Self::UpdateSession {
            from: from.into(),
            id: usage.id,
            duration_secs: usage.duration_secs,
            upload: usage.upload,
            download: usage.download,
        }
    }
}

/// Result of a transaction broadcast in sync mode.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct TxResponse {
    pub code: u32,
    #[serde(default)]
    pub txhash: String,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
}

/// Transaction was accepted into the mempool.
pub const CODE_OK: u32 = 0;
/// Identical transaction is already in the mempool cache.
pub const CODE_TX_IN_MEMPOOL_CACHE: u32 = 19;

impl TxResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.code, CODE_OK | CODE_TX_IN_MEMPOOL_CACHE)
    }
}
