//! Key-value storage abstraction.
//!
//! The [`KvStore`] trait is the narrow contract the site record store needs:
//! JSON values under string keys, plus string sets for the site index. Each
//! call is atomic on its own; there are no transactions across calls.
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`SqliteKv`] | Durable store used by the CLI and server |
//! | [`MemoryKv`] | In-process store for tests |

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    ///
    /// With `ttl`, the entry reads as absent once the duration has elapsed.
    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Read the value under `key`, or `None` if absent or expired.
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Add `member` to the set at `key`. Adding an existing member is a no-op.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of the set at `key`, in insertion order.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
