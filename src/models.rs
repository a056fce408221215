//! Core data models used throughout press-sync.
//!
//! A [`SiteRecord`] is the durable per-site state; an [`Item`] is one piece
//! of source content fetched during a pass and dropped afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type synchronized when a site has not selected any.
pub const DEFAULT_CONTENT_TYPE: &str = "post";

/// Durable state for one registered site.
///
/// Written wholesale; see [`crate::sites::SiteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    /// WordPress.com blog id or Jetpack site id.
    pub site_id: String,
    /// Bearer token for the source API.
    pub access_credential: String,
    /// Blog URL of the source collection.
    pub source_collection_ref: String,
    /// Destination dataset id. Set at onboarding, never changed.
    pub destination_collection_id: String,
    /// Items modified strictly after this instant are fetched next pass.
    #[serde(default = "epoch")]
    pub watermark: DateTime<Utc>,
    /// Source item id → destination document id.
    #[serde(default)]
    pub item_to_document: BTreeMap<u64, String>,
    /// Content types to synchronize, in order. Empty means the default.
    #[serde(default)]
    pub content_types: Vec<String>,
}

impl SiteRecord {
    /// A freshly onboarded site: empty mapping, watermark at the epoch.
    pub fn new(
        site_id: impl Into<String>,
        access_credential: impl Into<String>,
        source_collection_ref: impl Into<String>,
        destination_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            access_credential: access_credential.into(),
            source_collection_ref: source_collection_ref.into(),
            destination_collection_id: destination_collection_id.into(),
            watermark: epoch(),
            item_to_document: BTreeMap::new(),
            content_types: Vec::new(),
        }
    }

    /// The content types a pass walks: the declared list, or `default`.
    pub fn effective_content_types(&self, default: &str) -> Vec<String> {
        if self.content_types.is_empty() {
            vec![default.to_string()]
        } else {
            self.content_types.clone()
        }
    }
}

/// The zero watermark.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One unit of source content, as fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: u64,
    pub content_type: String,
    pub modified: DateTime<Utc>,
    /// Raw title as delivered (may contain HTML entities).
    pub title: String,
    /// Raw HTML body.
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_is_empty() {
        let record = SiteRecord::new("123", "tok", "https://blog.example", "ds-1");
        assert_eq!(record.watermark, epoch());
        assert!(record.item_to_document.is_empty());
        assert_eq!(record.effective_content_types("post"), vec!["post"]);
    }

    #[test]
    fn test_declared_content_types_win() {
        let mut record = SiteRecord::new("123", "tok", "https://blog.example", "ds-1");
        record.content_types = vec!["page".into(), "post".into()];
        assert_eq!(record.effective_content_types("post"), vec!["page", "post"]);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = SiteRecord::new("123", "tok", "https://blog.example", "ds-1");
        record.watermark = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        record.item_to_document.insert(42, "doc-42".into());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["item_to_document"]["42"], "doc-42");
        assert_eq!(value["watermark"], "2024-05-01T10:00:00Z");

        let back: SiteRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_missing_optional_fields() {
        let record: SiteRecord = serde_json::from_str(
            r#"{"site_id":"9","access_credential":"t","source_collection_ref":"u","destination_collection_id":"d"}"#,
        )
        .unwrap();
        assert_eq!(record.watermark, epoch());
        assert!(record.item_to_document.is_empty());
        assert!(record.content_types.is_empty());
    }
}
