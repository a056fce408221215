//! Error types for the reconciliation core.
//!
//! Command handlers wrap these in `anyhow` with context; the library keeps
//! them typed so callers can tell a source outage from a missing site.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures talking to the source content platform.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection, timeout, or body read failure.
    #[error("source request failed: {0}")]
    Transport(#[source] BoxError),

    /// Non-success status without a structured error body.
    #[error("source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Structured `{"error", "message"}` payload reported by the platform.
    #[error("source API error ({status}): {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("failed to decode source response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(Box::new(err))
    }
}

/// Failures talking to the destination knowledge base.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("destination request failed: {0}")]
    Transport(#[source] BoxError),

    #[error("destination returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode destination response: {0}")]
    Decode(String),

    #[error("environment variable {0} is not set")]
    MissingCredential(String),
}

impl From<reqwest::Error> for DestinationError {
    fn from(err: reqwest::Error) -> Self {
        DestinationError::Transport(Box::new(err))
    }
}

/// Failures reading or writing site records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("site not found: {0}")]
    NotFound(String),

    #[error("refusing to move watermark of site {site_id} back from {current} to {proposed}")]
    WatermarkRegression {
        site_id: String,
        current: String,
        proposed: String,
    },
}

/// Failures that abort a reconciliation pass.
///
/// Per-item destination failures never surface here during a pass; they
/// are reported and the pass continues.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed for site {site_id}: {source}")]
    Source {
        site_id: String,
        #[source]
        source: SourceError,
    },

    #[error("upsert of item {item_id} failed for site {site_id}: {source}")]
    Destination {
        site_id: String,
        item_id: u64,
        #[source]
        source: DestinationError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sync cancelled")]
    Cancelled,
}

/// Shorten a response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(500).collect()
}
