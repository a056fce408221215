//! TOML configuration for `psync`.
//!
//! Every section except `[store]` has defaults. Secrets (the destination API
//! key and the OAuth client secret) are never read from the file; the config
//! names the environment variables that hold them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::DEFAULT_CONTENT_TYPE;

/// Largest page the source API accepts for a single listing request.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_api_base")]
    pub api_base: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Stop walking a content type once a whole page is at or before the
    /// watermark. Only correct when the source honors modified-desc order.
    #[serde(default)]
    pub early_exit: bool,
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: default_source_api_base(),
            page_size: default_page_size(),
            timeout_secs: default_source_timeout(),
            user_agent: default_user_agent(),
            early_exit: false,
            default_content_type: default_content_type(),
        }
    }
}

fn default_source_api_base() -> String {
    "https://public-api.wordpress.com/rest/v1.1".to_string()
}
fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}
fn default_source_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("press-sync/{}", env!("CARGO_PKG_VERSION"))
}
fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestinationConfig {
    #[serde(default = "default_destination_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_destination_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_indexing_technique")]
    pub indexing_technique: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            base_url: default_destination_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_destination_timeout(),
            indexing_technique: default_indexing_technique(),
        }
    }
}

fn default_destination_base_url() -> String {
    "https://api.dify.ai/v1".to_string()
}
fn default_api_key_env() -> String {
    "DIFY_API_KEY".to_string()
}
fn default_destination_timeout() -> u64 {
    15
}
fn default_indexing_technique() -> String {
    "high_quality".to_string()
}

/// When mapping entries become durable during a reconciliation pass.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Persist the record after every successful create, then once more at
    /// the end of the pass with the new watermark.
    #[default]
    PerItem,
    /// Persist once, at the end of the pass.
    EndOfPass,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub commit: CommitPolicy,
    /// Period of the background trigger in `psync serve`; `0` disables it.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            commit: CommitPolicy::default(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_client_secret_env() -> String {
    "WPCOM_CLIENT_SECRET".to_string()
}
fn default_authorize_url() -> String {
    "https://public-api.wordpress.com/oauth2/authorize".to_string()
}
fn default_token_url() -> String {
    "https://public-api.wordpress.com/oauth2/token".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// The `[oauth]` section, or an error naming the command that needs it.
    pub fn oauth(&self) -> Result<&OAuthConfig> {
        self.oauth
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[oauth] section is required for this command"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.source.page_size == 0 || config.source.page_size > MAX_PAGE_SIZE {
        anyhow::bail!("source.page_size must be in [1, {}]", MAX_PAGE_SIZE);
    }

    if config.source.timeout_secs == 0 || config.destination.timeout_secs == 0 {
        anyhow::bail!("timeout_secs must be > 0");
    }

    if config.source.default_content_type.trim().is_empty() {
        anyhow::bail!("source.default_content_type must not be empty");
    }

    if config.destination.api_key_env.trim().is_empty() {
        anyhow::bail!("destination.api_key_env must name an environment variable");
    }

    if let Some(oauth) = &config.oauth {
        if oauth.client_id.is_empty() || oauth.redirect_uri.is_empty() {
            anyhow::bail!("oauth.client_id and oauth.redirect_uri must be set");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[store]\npath = \"/tmp/psync.sqlite\"\n");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.store.path, PathBuf::from("/tmp/psync.sqlite"));
        assert_eq!(config.source.page_size, 100);
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.source.default_content_type, "post");
        assert!(!config.source.early_exit);
        assert_eq!(config.destination.base_url, "https://api.dify.ai/v1");
        assert_eq!(config.destination.timeout_secs, 15);
        assert_eq!(config.sync.commit, CommitPolicy::PerItem);
        assert_eq!(config.sync.interval_secs, 3600);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.oauth.is_none());
        assert!(config.oauth().is_err());
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
[store]
path = "./data/psync.sqlite"

[source]
page_size = 50
early_exit = true

[destination]
base_url = "http://localhost:5001/v1"
api_key_env = "KB_KEY"

[sync]
commit = "end_of_pass"
interval_secs = 0

[oauth]
client_id = "1234"
redirect_uri = "https://example.com/oauth/callback"

[log]
level = "debug"
format = "json"
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.source.page_size, 50);
        assert!(config.source.early_exit);
        assert_eq!(config.destination.api_key_env, "KB_KEY");
        assert_eq!(config.sync.commit, CommitPolicy::EndOfPass);
        assert_eq!(config.sync.interval_secs, 0);
        let oauth = config.oauth().unwrap();
        assert_eq!(oauth.client_secret_env, "WPCOM_CLIENT_SECRET");
        assert_eq!(
            oauth.token_url,
            "https://public-api.wordpress.com/oauth2/token"
        );
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_oversized_page() {
        let file = write_config("[store]\npath = \"x.sqlite\"\n\n[source]\npage_size = 500\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_rejects_unknown_commit_policy() {
        let file = write_config("[store]\npath = \"x.sqlite\"\n\n[sync]\ncommit = \"sometimes\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/psync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
