//! In-memory [`KvStore`] implementation for tests.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Expiry is checked on read.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::KvStore;
use crate::error::StoreError;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory key-value store.
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).and_then(|entry| match entry.expires_at {
            Some(at) if at <= Instant::now() => None,
            _ => Some(entry.value.clone()),
        }))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut sets = self.sets.write().unwrap();
        let members = sets.entry(key.to_string()).or_default();
        if !members.iter().any(|m| m == member) {
            members.push(member.to_string());
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let sets = self.sets.read().unwrap();
        Ok(sets.get(key).cloned().unwrap_or_default())
    }
}
