use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::kv::SqliteKv;
use crate::migrate;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.store.path).await
}

pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;

    Ok(pool)
}

/// Open the configured store, creating its schema if needed.
pub async fn open_kv(config: &Config) -> Result<SqliteKv> {
    let pool = connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteKv::new(pool))
}
