//! SQLite-backed [`KvStore`].
//!
//! Values live in `kv_entries` as JSON text with an optional expiry
//! (Unix milliseconds); set members live in `kv_set_members`. Expired
//! entries are treated as absent on read and removed lazily.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use super::KvStore;
use crate::error::StoreError;

pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Wrap a pool whose schema has been created by
    /// [`crate::migrate::apply`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Utc::now().timestamp_millis() + d.as_millis() as i64);
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((raw, expires_at)) = row else {
            return Ok(None);
        };

        if let Some(at) = expires_at {
            if at <= Utc::now().timestamp_millis() {
                sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at = ?")
                    .bind(key)
                    .bind(at)
                    .execute(&self.pool)
                    .await?;
                return Ok(None);
            }
        }

        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO kv_set_members (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> =
            sqlx::query_scalar("SELECT member FROM kv_set_members WHERE key = ? ORDER BY rowid")
                .bind(key)
                .fetch_all(&self.pool)
                .await?;
        Ok(members)
    }
}
