//! Reconciliation: bring a site's destination collection up to date.
//!
//! A pass fetches everything modified after the site's watermark, then
//! creates or updates one destination document per item, in arrival order.
//! Per-item destination failures are reported and skipped; only fetch,
//! store, and cancellation abort a pass.
//!
//! The watermark only moves past items that were written successfully. It
//! is held strictly below the oldest failed item, so every failure is
//! fetched again on the next pass.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{CommitPolicy, Config};
use crate::connector_wpcom::ItemSource;
use crate::destination::DocumentSink;
use crate::error::{StoreError, SyncError};
use crate::fetch::{fetch_modified_since, FetchOptions};
use crate::models::{Item, SiteRecord};
use crate::progress::{SkipReason, SyncEvent, SyncReporter, UpsertAction};
use crate::sites::SiteStore;
use crate::transform;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub fetch: FetchOptions,
    pub commit: CommitPolicy,
    /// Content type walked for sites that have not selected any.
    pub default_content_type: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            commit: CommitPolicy::default(),
            default_content_type: crate::models::DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch: FetchOptions::from_config(&config.source),
            commit: config.sync.commit,
            default_content_type: config.source.default_content_type.clone(),
        }
    }
}

/// Counts for one completed pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub site_id: String,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub previous_watermark: DateTime<Utc>,
    pub watermark: DateTime<Utc>,
}

impl SyncReport {
    fn new(site_id: &str, previous_watermark: DateTime<Utc>) -> Self {
        Self {
            site_id: site_id.to_string(),
            fetched: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            previous_watermark,
            watermark: previous_watermark,
        }
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sync site {}", self.site_id)?;
        writeln!(f, "  fetched: {}", self.fetched)?;
        writeln!(f, "  created: {}", self.created)?;
        writeln!(f, "  updated: {}", self.updated)?;
        writeln!(f, "  skipped: {}", self.skipped)?;
        writeln!(f, "  failed: {}", self.failed)?;
        write!(
            f,
            "  watermark: {} -> {}",
            self.previous_watermark.to_rfc3339(),
            self.watermark.to_rfc3339()
        )
    }
}

/// Result of one site within a sync-all run.
#[derive(Debug)]
pub struct SiteOutcome {
    pub site_id: String,
    pub result: Result<SyncReport, SyncError>,
}

/// Result of re-creating a single item's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncOutcome {
    pub item_id: u64,
    /// Document the item was mapped to before; left in place remotely.
    pub previous_document: Option<String>,
    /// New document, or `None` if the item rendered empty.
    pub document_id: Option<String>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: SiteStore,
    source: Arc<dyn ItemSource>,
    sink: Arc<dyn DocumentSink>,
    reporter: Arc<dyn SyncReporter>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        store: SiteStore,
        source: Arc<dyn ItemSource>,
        sink: Arc<dyn DocumentSink>,
        reporter: Arc<dyn SyncReporter>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            source,
            sink,
            reporter,
            options,
        }
    }

    pub fn store(&self) -> &SiteStore {
        &self.store
    }

    /// Run one pass for a registered site.
    pub async fn sync_site(
        &self,
        site_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let record = self.store.get(site_id).await?;
        self.sync_record(record, cancel).await
    }

    /// Run one pass starting from `record`, which must be the site's
    /// current stored state.
    pub async fn sync_record(
        &self,
        mut record: SiteRecord,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let previous = record.watermark;
        let content_types = record.effective_content_types(&self.options.default_content_type);

        let items = guard(
            cancel,
            fetch_modified_since(
                self.source.as_ref(),
                &record,
                previous,
                &content_types,
                self.options.fetch,
                self.reporter.as_ref(),
            ),
        )
        .await?
        .map_err(|source| SyncError::Source {
            site_id: record.site_id.clone(),
            source,
        })?;

        let mut report = SyncReport::new(&record.site_id, previous);
        report.fetched = items.len();
        let mut tracker = WatermarkTracker::new(previous);
        let mut pending: Vec<(u64, String)> = Vec::new();

        for item in items {
            let title = display_title(&item);
            let text = transform::render(&item.content);
            if text.trim().is_empty() {
                report.skipped += 1;
                self.reporter.report(SyncEvent::ItemSkipped {
                    site_id: record.site_id.clone(),
                    item_id: item.id,
                    title,
                    reason: SkipReason::EmptyContent,
                });
                continue;
            }

            let existing = record.item_to_document.get(&item.id).cloned();
            let (action, result) = match &existing {
                None => (
                    UpsertAction::Create,
                    guard(
                        cancel,
                        self.sink
                            .create_document(&record.destination_collection_id, &title, &text),
                    )
                    .await?,
                ),
                Some(document_id) => (
                    UpsertAction::Update,
                    guard(
                        cancel,
                        self.sink.update_document(
                            &record.destination_collection_id,
                            document_id,
                            &title,
                            &text,
                        ),
                    )
                    .await?,
                ),
            };

            let document_id = match result {
                Ok(id) => id,
                Err(err) => {
                    report.failed += 1;
                    tracker.failed(item.modified);
                    self.reporter.report(SyncEvent::ItemFailed {
                        site_id: record.site_id.clone(),
                        item_id: item.id,
                        title,
                        action,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            tracker.succeeded(item.modified);

            match action {
                UpsertAction::Update => {
                    report.updated += 1;
                    self.reporter.report(SyncEvent::ItemUpdated {
                        site_id: record.site_id.clone(),
                        item_id: item.id,
                        document_id,
                        title,
                    });
                }
                UpsertAction::Create => {
                    report.created += 1;
                    self.reporter.report(SyncEvent::ItemCreated {
                        site_id: record.site_id.clone(),
                        item_id: item.id,
                        document_id: document_id.clone(),
                        title,
                    });
                    match self.options.commit {
                        CommitPolicy::PerItem => {
                            record.item_to_document.insert(item.id, document_id);
                            self.store.update(&record).await?;
                            self.reporter.report(SyncEvent::MappingCommitted {
                                site_id: record.site_id.clone(),
                                item_id: item.id,
                            });
                        }
                        CommitPolicy::EndOfPass => pending.push((item.id, document_id)),
                    }
                }
            }
        }

        apply_outcomes(&mut record.item_to_document, pending);
        record.watermark = tracker.finish();
        self.store.update(&record).await?;

        report.watermark = record.watermark;
        self.reporter.report(SyncEvent::PassFinished {
            report: report.clone(),
        });
        Ok(report)
    }

    /// Sync every registered site, one after another. A failed site is
    /// reported and the run moves on; cancellation stops the run after the
    /// site in progress.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<Vec<SiteOutcome>, StoreError> {
        let records = self.store.list().await?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if cancel.is_cancelled() {
                break;
            }
            let site_id = record.site_id.clone();
            let result = self.sync_record(record, cancel).await;
            if let Err(err) = &result {
                self.reporter.report(SyncEvent::PassFailed {
                    site_id: site_id.clone(),
                    error: err.to_string(),
                });
            }
            let cancelled = matches!(result, Err(SyncError::Cancelled));
            outcomes.push(SiteOutcome { site_id, result });
            if cancelled {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Re-create one item's document regardless of the watermark.
    ///
    /// The mapping entry is dropped first, so a failure after that point
    /// leaves the item unmapped and the next full pass that sees it will
    /// create it. The old document is not deleted.
    pub async fn resync_item(
        &self,
        site_id: &str,
        item_id: u64,
        cancel: &CancellationToken,
    ) -> Result<ResyncOutcome, SyncError> {
        let previous_document = self.store.remove_mapping_entry(site_id, item_id).await?;
        let mut record = self.store.get(site_id).await?;

        let item = guard(cancel, self.source.get_item(&record, item_id))
            .await?
            .map_err(|source| SyncError::Source {
                site_id: site_id.to_string(),
                source,
            })?;

        let title = display_title(&item);
        let text = transform::render(&item.content);
        if text.trim().is_empty() {
            self.reporter.report(SyncEvent::ItemSkipped {
                site_id: site_id.to_string(),
                item_id,
                title,
                reason: SkipReason::EmptyContent,
            });
            return Ok(ResyncOutcome {
                item_id,
                previous_document,
                document_id: None,
            });
        }

        let document_id = guard(
            cancel,
            self.sink
                .create_document(&record.destination_collection_id, &title, &text),
        )
        .await?
        .map_err(|source| SyncError::Destination {
            site_id: site_id.to_string(),
            item_id,
            source,
        })?;

        record.item_to_document.insert(item_id, document_id.clone());
        self.store.update(&record).await?;
        self.reporter.report(SyncEvent::ItemCreated {
            site_id: site_id.to_string(),
            item_id,
            document_id: document_id.clone(),
            title,
        });

        Ok(ResyncOutcome {
            item_id,
            previous_document,
            document_id: Some(document_id),
        })
    }
}

/// Race `fut` against cancellation. Cancellation wins ties.
pub async fn guard<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Document title for an item: the decoded source title, or
/// `"<type> <id>"` when that is blank.
fn display_title(item: &Item) -> String {
    let title = transform::render_title(&item.title);
    if title.is_empty() {
        format!("{} {}", item.content_type, item.id)
    } else {
        title
    }
}

/// Insert the mapping entries collected during an end-of-pass commit.
fn apply_outcomes(mapping: &mut BTreeMap<u64, String>, created: Vec<(u64, String)>) {
    mapping.extend(created);
}

/// Tracks how far the watermark may advance during a pass.
struct WatermarkTracker {
    previous: DateTime<Utc>,
    newest_success: Option<DateTime<Utc>>,
    oldest_failure: Option<DateTime<Utc>>,
}

impl WatermarkTracker {
    fn new(previous: DateTime<Utc>) -> Self {
        Self {
            previous,
            newest_success: None,
            oldest_failure: None,
        }
    }

    fn succeeded(&mut self, modified: DateTime<Utc>) {
        self.newest_success = Some(self.newest_success.map_or(modified, |t| t.max(modified)));
    }

    fn failed(&mut self, modified: DateTime<Utc>) {
        self.oldest_failure = Some(self.oldest_failure.map_or(modified, |t| t.min(modified)));
    }

    /// The new watermark: never behind `previous`, never at or past a
    /// failed item.
    fn finish(self) -> DateTime<Utc> {
        let mut candidate = self.newest_success.unwrap_or(self.previous);
        if let Some(failure) = self.oldest_failure {
            let ceiling = failure - chrono::Duration::nanoseconds(1);
            candidate = candidate.min(ceiling);
        }
        candidate.max(self.previous)
    }
}
