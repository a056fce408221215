//! WordPress.com REST connector.
//!
//! Lists a site's posts through the public v1.1 API, newest modification
//! first, one content type per request. The [`ItemSource`] trait is the
//! seam the fetcher and reconciler depend on; [`WpcomClient`] is the only
//! production implementation.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! api_base = "https://public-api.wordpress.com/rest/v1.1"
//! page_size = 100
//! timeout_secs = 30
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;

use crate::config::SourceConfig;
use crate::error::{truncate_body, SourceError};
use crate::models::{Item, SiteRecord, DEFAULT_CONTENT_TYPE};

/// Fields requested for every post; keeps payloads small.
pub const POST_FIELDS: &str = "ID,date,modified,title,content,type";

/// One page request against a site's item listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub content_type: String,
    pub offset: usize,
    pub limit: usize,
}

/// One page of items plus the total the source reports for the listing.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub found: usize,
    pub items: Vec<Item>,
}

/// Read access to a site's content.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// One page of items of `query.content_type`, most recently modified
    /// first.
    async fn list_items(
        &self,
        site: &SiteRecord,
        query: &PageQuery,
    ) -> Result<ItemPage, SourceError>;

    /// A single item by id, whatever its modification time.
    async fn get_item(&self, site: &SiteRecord, item_id: u64) -> Result<Item, SourceError>;
}

pub struct WpcomClient {
    http: reqwest::Client,
    api_base: String,
}

impl WpcomClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn posts_url(&self, site_id: &str) -> String {
        format!("{}/sites/{}/posts", self.api_base, site_id)
    }
}

#[async_trait]
impl ItemSource for WpcomClient {
    async fn list_items(
        &self,
        site: &SiteRecord,
        query: &PageQuery,
    ) -> Result<ItemPage, SourceError> {
        let number = query.limit.to_string();
        let offset = query.offset.to_string();
        let resp = self
            .http
            .get(self.posts_url(&site.site_id))
            .bearer_auth(&site.access_credential)
            .query(&[
                ("number", number.as_str()),
                ("offset", offset.as_str()),
                ("order_by", "modified"),
                ("order", "DESC"),
                ("fields", POST_FIELDS),
                ("type", query.content_type.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        let page: PostsResponse = decode_response(status, &body)?;

        let mut items = Vec::with_capacity(page.posts.len());
        for post in page.posts {
            items.push(post.into_item(&query.content_type)?);
        }
        Ok(ItemPage {
            found: page.found,
            items,
        })
    }

    async fn get_item(&self, site: &SiteRecord, item_id: u64) -> Result<Item, SourceError> {
        let url = format!("{}/{}", self.posts_url(&site.site_id), item_id);
        let resp = self
            .http
            .get(url)
            .bearer_auth(&site.access_credential)
            .query(&[("fields", POST_FIELDS)])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        let post: WpPost = decode_response(status, &body)?;
        post.into_item(DEFAULT_CONTENT_TYPE)
    }
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    found: usize,
    posts: Vec<WpPost>,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    #[serde(rename = "ID")]
    id: u64,
    modified: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    post_type: Option<String>,
}

impl WpPost {
    fn into_item(self, fallback_type: &str) -> Result<Item, SourceError> {
        let modified = parse_timestamp(&self.modified).ok_or_else(|| {
            SourceError::Decode(format!(
                "item {} has invalid modified time {:?}",
                self.id, self.modified
            ))
        })?;
        Ok(Item {
            id: self.id,
            content_type: self
                .post_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| fallback_type.to_string()),
            modified,
            title: self.title,
            content: self.content,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    message: String,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode a response body, mapping the platform's error payloads.
///
/// The API reports some failures as `{"error", "message"}` with a 200
/// status, so the error shape is checked before the expected one.
fn decode_response<T: serde::de::DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<T, SourceError> {
    if let Ok(api) = serde_json::from_str::<ApiError>(body) {
        return Err(SourceError::Api {
            status: status.as_u16(),
            code: api.error,
            message: api.message,
        });
    }

    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            body: truncate_body(body),
        });
    }

    serde_json::from_str::<T>(body).map_err(|err| SourceError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::StatusCode;

    #[test]
    fn test_decode_posts_page() {
        let body = r#"{
            "found": 2,
            "posts": [
                {"ID": 42, "date": "2024-01-01T09:00:00+00:00", "modified": "2024-01-02T10:30:00+02:00",
                 "title": "Hello &amp; welcome", "content": "<p>hi</p>", "type": "post"},
                {"ID": 7, "modified": "2024-01-01T00:00:00+00:00"}
            ]
        }"#;
        let page: PostsResponse = decode_response(StatusCode::OK, body).unwrap();
        assert_eq!(page.found, 2);

        let items: Vec<Item> = page
            .posts
            .into_iter()
            .map(|p| p.into_item("page").unwrap())
            .collect();
        assert_eq!(items[0].id, 42);
        assert_eq!(
            items[0].modified,
            Utc.with_ymd_and_hms(2024, 1, 2, 8, 30, 0).unwrap()
        );
        assert_eq!(items[0].content_type, "post");
        assert_eq!(items[1].content_type, "page");
        assert_eq!(items[1].title, "");
    }

    #[test]
    fn test_error_payload_with_failure_status() {
        let body = r#"{"error": "unauthorized", "message": "User cannot view posts"}"#;
        let err = decode_response::<PostsResponse>(StatusCode::FORBIDDEN, body).unwrap_err();
        match err {
            SourceError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(code, "unauthorized");
                assert_eq!(message, "User cannot view posts");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_payload_with_ok_status() {
        let body = r#"{"error": "unknown_blog", "message": "Unknown blog"}"#;
        let err = decode_response::<WpPost>(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, SourceError::Api { code, .. } if code == "unknown_blog"));
    }

    #[test]
    fn test_page_error_payload_with_ok_status() {
        let body = r#"{"error": "unknown_blog", "message": "Unknown blog"}"#;
        let err = decode_response::<PostsResponse>(StatusCode::OK, body).unwrap_err();
        assert!(matches!(
            err,
            SourceError::Api { status: 200, code, .. } if code == "unknown_blog"
        ));
    }

    #[test]
    fn test_page_missing_fields_is_decode_error() {
        let err = decode_response::<PostsResponse>(StatusCode::OK, "{}").unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_plain_failure_status() {
        let err = decode_response::<PostsResponse>(StatusCode::BAD_GATEWAY, "<html>oops</html>")
            .unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 502, .. }));
    }

    #[test]
    fn test_undecodable_body() {
        let err = decode_response::<PostsResponse>(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_bad_modified_time() {
        let post: WpPost =
            serde_json::from_str(r#"{"ID": 1, "modified": "yesterday"}"#).unwrap();
        assert!(matches!(
            post.into_item("post").unwrap_err(),
            SourceError::Decode(_)
        ));
    }
}
