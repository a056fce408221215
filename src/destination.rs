//! Dify knowledge-base client.
//!
//! Two seams: [`DocumentSink`] (create/update text documents, used by every
//! reconciliation pass) and [`CollectionAdmin`] (dataset management, used at
//! onboarding). [`DifyClient`] implements both.
//!
//! Calls are single-shot: no retries and no local idempotency guard. A
//! create that succeeds remotely but whose response is lost will produce a
//! duplicate document on the next pass.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DestinationConfig;
use crate::error::{truncate_body, DestinationError};

/// Datasets requested per page when searching for one by id.
pub const DATASET_PAGE_SIZE: usize = 20;

/// Writes documents into a destination collection.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Create a document; returns its new id.
    async fn create_document(
        &self,
        collection_id: &str,
        title: &str,
        text: &str,
    ) -> Result<String, DestinationError>;

    /// Replace an existing document's title and text; returns its id.
    async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        title: &str,
        text: &str,
    ) -> Result<String, DestinationError>;
}

/// Creates and looks up destination collections.
#[async_trait]
pub trait CollectionAdmin: Send + Sync {
    async fn create_collection(&self, name: &str) -> Result<String, DestinationError>;
    async fn collection_exists(&self, collection_id: &str) -> Result<bool, DestinationError>;
}

pub struct DifyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    indexing_technique: String,
}

impl DifyClient {
    /// Build a client, reading the API key from the configured environment
    /// variable.
    pub fn new(config: &DestinationConfig) -> Result<Self, DestinationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DestinationError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &DestinationConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, DestinationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            indexing_technique: config.indexing_technique.clone(),
        })
    }

    /// One page of datasets visible to the API key. Pages start at 1.
    pub async fn list_collections(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<DatasetList, DestinationError> {
        let page = page.to_string();
        let limit = limit.to_string();
        let resp = self
            .http
            .get(format!("{}/datasets", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("page", page.as_str()), ("limit", limit.as_str())])
            .send()
            .await?;
        decode(resp).await
    }

    async fn post_json<B, T>(&self, url: String, body: &B) -> Result<T, DestinationError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }
}

#[async_trait]
impl DocumentSink for DifyClient {
    async fn create_document(
        &self,
        collection_id: &str,
        title: &str,
        text: &str,
    ) -> Result<String, DestinationError> {
        let url = format!(
            "{}/datasets/{}/document/create-by-text",
            self.base_url, collection_id
        );
        let body = CreateDocumentRequest {
            name: title,
            text,
            indexing_technique: &self.indexing_technique,
            process_rule: ProcessRule { mode: "automatic" },
        };
        let resp: DocumentResponse = self.post_json(url, &body).await?;
        Ok(resp.document.id)
    }

    async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        title: &str,
        text: &str,
    ) -> Result<String, DestinationError> {
        let url = format!(
            "{}/datasets/{}/documents/{}/update_by_text",
            self.base_url, collection_id, document_id
        );
        let body = UpdateDocumentRequest { name: title, text };
        let resp: DocumentResponse = self.post_json(url, &body).await?;
        Ok(resp.document.id)
    }
}

#[async_trait]
impl CollectionAdmin for DifyClient {
    async fn create_collection(&self, name: &str) -> Result<String, DestinationError> {
        let body = CreateDatasetRequest {
            name,
            permission: "only_me",
        };
        let resp: DatasetInfo = self
            .post_json(format!("{}/datasets", self.base_url), &body)
            .await?;
        Ok(resp.id)
    }

    async fn collection_exists(&self, collection_id: &str) -> Result<bool, DestinationError> {
        let mut page = 1;
        loop {
            let list = self.list_collections(page, DATASET_PAGE_SIZE).await?;
            if list.data.iter().any(|ds| ds.id == collection_id) {
                return Ok(true);
            }
            if list.data.is_empty() || !list.has_more || page * DATASET_PAGE_SIZE >= list.total {
                return Ok(false);
            }
            page += 1;
        }
    }
}

#[derive(Serialize)]
struct CreateDatasetRequest<'a> {
    name: &'a str,
    permission: &'a str,
}

#[derive(Serialize)]
struct CreateDocumentRequest<'a> {
    name: &'a str,
    text: &'a str,
    indexing_technique: &'a str,
    process_rule: ProcessRule<'a>,
}

#[derive(Serialize)]
struct ProcessRule<'a> {
    mode: &'a str,
}

#[derive(Serialize)]
struct UpdateDocumentRequest<'a> {
    name: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    document: DocumentRef,
}

#[derive(Debug, Deserialize)]
struct DocumentRef {
    id: String,
}

/// A page of `GET /datasets`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetList {
    #[serde(default)]
    pub data: Vec<DatasetInfo>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub page: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub document_count: u64,
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, DestinationError> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.as_u16() >= 300 {
        return Err(DestinationError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }
    serde_json::from_str(&body).map_err(|e| DestinationError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_document_body() {
        let body = CreateDocumentRequest {
            name: "Hello",
            text: "world",
            indexing_technique: "high_quality",
            process_rule: ProcessRule { mode: "automatic" },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "Hello",
                "text": "world",
                "indexing_technique": "high_quality",
                "process_rule": {"mode": "automatic"}
            })
        );
    }

    #[test]
    fn test_dataset_list_tolerates_missing_fields() {
        let list: DatasetList =
            serde_json::from_str(r#"{"data": [{"id": "a", "name": "x"}], "has_more": false}"#)
                .unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.total, 0);
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = DestinationConfig {
            api_key_env: "PRESS_SYNC_TEST_UNSET_KEY".into(),
            ..DestinationConfig::default()
        };
        let err = DifyClient::new(&config).err().unwrap();
        assert!(
            matches!(err, DestinationError::MissingCredential(ref name) if name == "PRESS_SYNC_TEST_UNSET_KEY")
        );
    }
}
