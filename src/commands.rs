//! Command handlers behind the `psync` subcommands.
//!
//! Each `run_*` function loads what it needs from the config, performs one
//! operation, and prints a short human-readable summary to stdout. Errors
//! carry context and end the process with a non-zero exit code.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connector_wpcom::WpcomClient;
use crate::db;
use crate::destination::{CollectionAdmin, DifyClient, DocumentSink};
use crate::migrate;
use crate::oauth::{self, Onboarding, WpcomOAuth};
use crate::progress::SyncReporter;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::scheduler;
use crate::server;
use crate::sites::{parse_content_types, SiteStore};

async fn open_store(config: &Config) -> Result<SiteStore> {
    let kv = db::open_kv(config).await?;
    Ok(SiteStore::new(Arc::new(kv)))
}

fn dify_client(config: &Config) -> Result<Arc<DifyClient>> {
    let client = DifyClient::new(&config.destination)
        .context("Failed to configure destination client")?;
    Ok(Arc::new(client))
}

fn build_reconciler(
    config: &Config,
    store: SiteStore,
    sink: Arc<dyn DocumentSink>,
    reporter: Arc<dyn SyncReporter>,
) -> Result<Reconciler> {
    let source = WpcomClient::new(&config.source).context("Failed to configure source client")?;
    Ok(Reconciler::new(
        store,
        Arc::new(source),
        sink,
        reporter,
        ReconcileOptions::from_config(config),
    ))
}

/// A token cancelled on the first ctrl-c.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Store initialized at {}", config.store.path.display());
    Ok(())
}

pub async fn run_list_sites(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let sites = store.list().await?;
    if sites.is_empty() {
        println!("No sites registered.");
        return Ok(());
    }

    println!(
        "{:<14} {:<36} {:<38} {:>6}  {:<26} TYPES",
        "SITE", "BLOG", "DATASET", "ITEMS", "WATERMARK"
    );
    for site in sites {
        let types = if site.content_types.is_empty() {
            format!("({})", config.source.default_content_type)
        } else {
            site.content_types.join(",")
        };
        println!(
            "{:<14} {:<36} {:<38} {:>6}  {:<26} {}",
            site.site_id,
            site.source_collection_ref,
            site.destination_collection_id,
            site.item_to_document.len(),
            site.watermark.to_rfc3339(),
            types
        );
    }
    Ok(())
}

pub async fn run_sync_site(
    config: &Config,
    site_id: &str,
    reporter: Arc<dyn SyncReporter>,
) -> Result<()> {
    let store = open_store(config).await?;
    let reconciler = build_reconciler(config, store, dify_client(config)?, reporter)?;
    let cancel = cancel_on_ctrl_c();

    let report = reconciler
        .sync_site(site_id, &cancel)
        .await
        .with_context(|| format!("Sync of site {} failed", site_id))?;
    println!("{}", report);
    println!("ok");
    Ok(())
}

/// Sync every site. Failed sites are listed but do not fail the command.
pub async fn run_sync_all(config: &Config, reporter: Arc<dyn SyncReporter>) -> Result<()> {
    let store = open_store(config).await?;
    let reconciler = build_reconciler(config, store, dify_client(config)?, reporter)?;
    let cancel = cancel_on_ctrl_c();

    let outcomes = reconciler.sync_all(&cancel).await?;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!("{}", report),
            Err(err) => {
                failed += 1;
                println!("sync site {}\n  error: {}", outcome.site_id, err);
            }
        }
    }
    println!("synced {} sites, {} failed", outcomes.len() - failed, failed);
    Ok(())
}

pub async fn run_force_sync_site(
    config: &Config,
    site_id: &str,
    reset_only: bool,
    reporter: Arc<dyn SyncReporter>,
) -> Result<()> {
    let store = open_store(config).await?;
    let record = store
        .reset_mapping(site_id)
        .await
        .with_context(|| format!("Failed to reset site {}", site_id))?;
    println!("reset site {}: mapping cleared, watermark at epoch", site_id);
    if reset_only {
        return Ok(());
    }

    let reconciler = build_reconciler(config, store, dify_client(config)?, reporter)?;
    let cancel = cancel_on_ctrl_c();
    let report = reconciler
        .sync_record(record, &cancel)
        .await
        .with_context(|| format!("Sync of site {} failed", site_id))?;
    println!("{}", report);
    println!("ok");
    Ok(())
}

pub async fn run_force_sync_doc(
    config: &Config,
    site_id: &str,
    item_id: u64,
    remove_only: bool,
    reporter: Arc<dyn SyncReporter>,
) -> Result<()> {
    let store = open_store(config).await?;
    if remove_only {
        match store.remove_mapping_entry(site_id, item_id).await? {
            Some(doc) => println!(
                "removed mapping {} -> {} for site {}",
                item_id, doc, site_id
            ),
            None => println!("item {} was not mapped for site {}", item_id, site_id),
        }
        return Ok(());
    }

    let reconciler = build_reconciler(config, store, dify_client(config)?, reporter)?;
    let cancel = cancel_on_ctrl_c();
    let outcome = reconciler
        .resync_item(site_id, item_id, &cancel)
        .await
        .with_context(|| format!("Resync of item {} on site {} failed", item_id, site_id))?;

    println!("resync item {} on site {}", item_id, site_id);
    if let Some(previous) = &outcome.previous_document {
        println!("  previous document: {} (left in place)", previous);
    }
    match &outcome.document_id {
        Some(doc) => println!("  document: {}", doc),
        None => println!("  skipped: empty content"),
    }
    println!("ok");
    Ok(())
}

pub async fn run_set_post_types(config: &Config, site_id: &str, raw: &str) -> Result<()> {
    let types = parse_content_types(raw);
    if types.is_empty() {
        bail!("No content types given (expected a comma-separated list such as post,page)");
    }
    let store = open_store(config).await?;
    let record = store
        .set_content_types(site_id, types)
        .await
        .with_context(|| format!("Failed to update content types of site {}", site_id))?;
    println!(
        "site {} will sync: {}",
        record.site_id,
        record.content_types.join(", ")
    );
    Ok(())
}

pub fn run_open_oauth(config: &Config) -> Result<()> {
    let url = oauth::authorize_url(config.oauth()?)?;
    println!("Open this URL to connect a site:");
    println!("{}", url);
    Ok(())
}

/// Run the onboarding server and, if enabled, the periodic sync until
/// ctrl-c.
pub async fn run_serve(config: &Config, reporter: Arc<dyn SyncReporter>) -> Result<()> {
    let oauth_config = config.oauth()?;
    let secret = std::env::var(&oauth_config.client_secret_env).with_context(|| {
        format!(
            "OAuth client secret variable {} is not set",
            oauth_config.client_secret_env
        )
    })?;

    let store = open_store(config).await?;
    let dify = dify_client(config)?;
    let exchanger = WpcomOAuth::new(oauth_config, secret)?;
    let collections: Arc<dyn CollectionAdmin> = dify.clone();
    let onboarding = Onboarding::new(Arc::new(exchanger), collections, store.clone());

    let shutdown = cancel_on_ctrl_c();
    let reconciler = build_reconciler(config, store, dify, reporter)?;
    let periodic =
        scheduler::spawn_sync_all(reconciler, config.sync.interval_secs, shutdown.clone());

    let served = server::run_server(&config.server.bind, onboarding, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(handle) = periodic {
        match handle.await {
            Ok(passes) => tracing::info!(passes, "periodic sync stopped"),
            Err(err) => tracing::error!(error = %err, "periodic sync task failed"),
        }
    }
    served
}
