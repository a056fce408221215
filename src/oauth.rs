//! WordPress.com OAuth onboarding.
//!
//! A site owner authorizes the app at [`authorize_url`]; WordPress.com
//! redirects back to `/oauth/callback?code=...`, and [`Onboarding::complete`]
//! turns that code into a registered site with its own destination dataset.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::config::OAuthConfig;
use crate::destination::CollectionAdmin;
use crate::error::{truncate_body, DestinationError, StoreError};
use crate::models::SiteRecord;
use crate::sites::SiteStore;

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub blog_id: String,
    #[serde(default)]
    pub blog_url: String,
    #[serde(default)]
    pub token_type: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode token response: {0}")]
    Decode(String),

    #[error("invalid authorize url: {0}")]
    Url(String),
}

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("code exchange failed: {0}")]
    Exchange(#[from] OAuthError),

    #[error("dataset setup failed: {0}")]
    Collection(#[from] DestinationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// URL the site owner visits to grant access.
pub fn authorize_url(config: &OAuthConfig) -> Result<String, OAuthError> {
    let url = reqwest::Url::parse_with_params(
        &config.authorize_url,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
        ],
    )
    .map_err(|e| OAuthError::Url(e.to_string()))?;
    Ok(url.to_string())
}

/// Exchanges an authorization code for a site token.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<TokenResponse, OAuthError>;
}

pub struct WpcomOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_url: String,
}

impl WpcomOAuth {
    pub fn new(config: &OAuthConfig, client_secret: impl Into<String>) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: client_secret.into(),
            redirect_uri: config.redirect_uri.clone(),
            token_url: config.token_url.clone(),
        })
    }
}

#[async_trait]
impl TokenExchanger for WpcomOAuth {
    async fn exchange(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        let resp = self.http.post(&self.token_url).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(OAuthError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| OAuthError::Decode(e.to_string()))
    }
}

/// Result of a completed onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Onboarded {
    pub site_id: String,
    pub blog_url: String,
    pub dataset_id: String,
    /// `true` when the site was already registered and its dataset kept.
    pub reused: bool,
}

#[derive(Clone)]
pub struct Onboarding {
    exchanger: Arc<dyn TokenExchanger>,
    collections: Arc<dyn CollectionAdmin>,
    store: SiteStore,
}

impl Onboarding {
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        collections: Arc<dyn CollectionAdmin>,
        store: SiteStore,
    ) -> Self {
        Self {
            exchanger,
            collections,
            store,
        }
    }

    /// Exchange `code` and register the site.
    ///
    /// Re-authorizing a known site refreshes its token and keeps its
    /// mapping, watermark, and dataset, provided the dataset still exists.
    /// Otherwise a new dataset named after the blog URL is created and the
    /// site starts from scratch.
    pub async fn complete(&self, code: &str) -> Result<Onboarded, OnboardingError> {
        let token = self.exchanger.exchange(code).await?;
        let blog_url = if token.blog_url.is_empty() {
            format!("site {}", token.blog_id)
        } else {
            token.blog_url.clone()
        };

        match self.store.get(&token.blog_id).await {
            Ok(mut existing) => {
                if self
                    .collections
                    .collection_exists(&existing.destination_collection_id)
                    .await?
                {
                    existing.access_credential = token.access_token;
                    existing.source_collection_ref = blog_url.clone();
                    self.store.update(&existing).await?;
                    tracing::info!(site_id = %existing.site_id, "site re-authorized");
                    return Ok(Onboarded {
                        site_id: existing.site_id,
                        blog_url,
                        dataset_id: existing.destination_collection_id,
                        reused: true,
                    });
                }
                tracing::warn!(
                    site_id = %existing.site_id,
                    dataset_id = %existing.destination_collection_id,
                    "dataset of known site is gone, creating a new one"
                );
            }
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let dataset_id = self.collections.create_collection(&blog_url).await?;
        let record = SiteRecord::new(
            token.blog_id.clone(),
            token.access_token,
            blog_url.clone(),
            dataset_id.clone(),
        );
        self.store.add(&record).await?;
        tracing::info!(site_id = %record.site_id, %dataset_id, "site onboarded");

        Ok(Onboarded {
            site_id: record.site_id,
            blog_url,
            dataset_id,
            reused: false,
        })
    }
}
