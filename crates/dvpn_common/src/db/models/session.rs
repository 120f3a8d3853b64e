use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor, query, query_as};

/// Single metered VPN session linking a ledger subscription to a VPN peer.
///
/// `id` is the ledger session identifier and `key` is the base64 encoded
/// identity of the VPN peer. Both are unique among persisted sessions.
#[derive(Clone, Debug, FromRow, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub subscription_id: i64,
    pub key: String,
    pub address: String,
    /// Remaining quota in bytes at the moment this session was admitted.
    pub available: i64,
    pub upload_bytes: i64,
    pub download_bytes: i64,
    pub connected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.address)
    }
}

impl Session {
    #[must_use]
    pub fn new<S: Into<String>>(
        id: i64,
        subscription_id: i64,
        key: S,
        address: S,
        available: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            subscription_id,
            key: key.into(),
            address: address.into(),
            available,
            upload_bytes: 0,
            download_bytes: 0,
            connected_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ledger identifier of this session.
    #[must_use]
    pub fn ledger_id(&self) -> u64 {
        // ids are always written from unsigned ledger values
        self.id as u64
    }

    #[must_use]
    pub fn consumed(&self) -> i64 {
        self.upload_bytes.saturating_add(self.download_bytes)
    }

    #[must_use]
    pub fn quota_exceeded(&self) -> bool {
        self.consumed() >= self.available
    }

    /// Replaces local traffic counters with values reported by the VPN backend.
    pub fn set_usage(&mut self, upload_bytes: i64, download_bytes: i64) {
        self.upload_bytes = upload_bytes;
        self.download_bytes = download_bytes;
        self.updated_at = Utc::now();
    }

    pub async fn save<'e, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query(
            "INSERT INTO session (id, subscription_id, key, address, available, upload_bytes, \
            download_bytes, connected_at, created_at, updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(self.id)
        .bind(self.subscription_id)
        .bind(&self.key)
        .bind(&self.address)
        .bind(self.available)
        .bind(self.upload_bytes)
        .bind(self.download_bytes)
        .bind(self.connected_at)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Persists current traffic counters.
    pub async fn update_usage<'e, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query(
            "UPDATE session SET upload_bytes = $2, download_bytes = $3, updated_at = $4 \
            WHERE id = $1",
        )
        .bind(self.id)
        .bind(self.upload_bytes)
        .bind(self.download_bytes)
        .bind(self.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Self>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query_as("SELECT * FROM session WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_key<'e, E>(executor: E, key: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query_as("SELECT * FROM session WHERE key = $1")
            .bind(key)
            .fetch_optional(executor)
            .await
    }

    pub async fn all<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query_as("SELECT * FROM session ORDER BY created_at, id")
            .fetch_all(executor)
            .await
    }

    /// Fetch all sessions an account opened using a given subscription.
    pub async fn find_by_subscription_and_address<'e, E>(
        executor: E,
        subscription_id: i64,
        address: &str,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        query_as("SELECT * FROM session WHERE subscription_id = $1 AND address = $2")
            .bind(subscription_id)
            .bind(address)
            .fetch_all(executor)
            .await
    }

    /// Returns `true` if a session was removed.
    pub async fn delete_by_key<'e, E>(executor: E, key: &str) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = query("DELETE FROM session WHERE key = $1")
            .bind(key)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
