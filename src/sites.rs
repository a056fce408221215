//! Site record store.
//!
//! Each [`SiteRecord`] is one JSON value under `wp_site:<site_id>`; the set
//! `wp_sites` indexes every registered id. All writes replace the whole
//! record. There is no locking: two writers racing on `get`/`update` for the
//! same site lose one update, so only one process may reconcile a given site
//! at a time.

use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::kv::KvStore;
use crate::models::{epoch, SiteRecord};

/// Set holding every registered site id.
pub const SITES_INDEX_KEY: &str = "wp_sites";

pub fn site_key(site_id: &str) -> String {
    format!("wp_site:{}", site_id)
}

#[derive(Clone)]
pub struct SiteStore {
    kv: Arc<dyn KvStore>,
}

impl SiteStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Register a site: write its record, then add it to the index.
    pub async fn add(&self, record: &SiteRecord) -> Result<(), StoreError> {
        self.put(record).await?;
        self.kv.set_add(SITES_INDEX_KEY, &record.site_id).await
    }

    pub async fn get(&self, site_id: &str) -> Result<SiteRecord, StoreError> {
        match self.kv.get_json(&site_key(site_id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(StoreError::NotFound(site_id.to_string())),
        }
    }

    /// Replace a site's record.
    ///
    /// Fails with [`StoreError::WatermarkRegression`] if the stored watermark
    /// is newer than `record.watermark`; use [`reset_mapping`](Self::reset_mapping)
    /// to rewind deliberately.
    pub async fn update(&self, record: &SiteRecord) -> Result<(), StoreError> {
        if let Some(value) = self.kv.get_json(&site_key(&record.site_id)).await? {
            let current: SiteRecord = serde_json::from_value(value)?;
            if record.watermark < current.watermark {
                return Err(StoreError::WatermarkRegression {
                    site_id: record.site_id.clone(),
                    current: current.watermark.to_rfc3339(),
                    proposed: record.watermark.to_rfc3339(),
                });
            }
        }
        self.put(record).await
    }

    /// All indexed sites. Ids whose record is missing or unreadable are
    /// skipped with a warning.
    pub async fn list(&self) -> Result<Vec<SiteRecord>, StoreError> {
        let ids = self.kv.set_members(SITES_INDEX_KEY).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(record) => records.push(record),
                Err(err @ (StoreError::NotFound(_) | StoreError::Serde(_))) => {
                    tracing::warn!(site_id = %id, error = %err, "skipping unreadable site record");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    /// Clear the mapping and rewind the watermark to the epoch, forcing the
    /// next pass to recreate every item.
    pub async fn reset_mapping(&self, site_id: &str) -> Result<SiteRecord, StoreError> {
        let mut record = self.get(site_id).await?;
        record.item_to_document.clear();
        record.watermark = epoch();
        self.put(&record).await?;
        Ok(record)
    }

    /// Drop one mapping entry so the item is created afresh. Returns the
    /// document id that was mapped, if any.
    pub async fn remove_mapping_entry(
        &self,
        site_id: &str,
        item_id: u64,
    ) -> Result<Option<String>, StoreError> {
        let mut record = self.get(site_id).await?;
        let removed = record.item_to_document.remove(&item_id);
        if removed.is_some() {
            self.put(&record).await?;
        }
        Ok(removed)
    }

    pub async fn set_content_types(
        &self,
        site_id: &str,
        content_types: Vec<String>,
    ) -> Result<SiteRecord, StoreError> {
        let mut record = self.get(site_id).await?;
        record.content_types = content_types;
        self.put(&record).await?;
        Ok(record)
    }

    async fn put(&self, record: &SiteRecord) -> Result<(), StoreError> {
        let value: Value = serde_json::to_value(record)?;
        self.kv.set_json(&site_key(&record.site_id), &value, None).await
    }
}

/// Parse a comma-separated content type list: trimmed, empty entries
/// dropped, duplicates removed keeping the first occurrence.
pub fn parse_content_types(raw: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if !part.is_empty() && !types.iter().any(|t| t == part) {
            types.push(part.to_string());
        }
    }
    types
}
