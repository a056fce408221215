//! Sync event reporting.
//!
//! The fetcher and reconciler never log directly; they emit [`SyncEvent`]s
//! to a [`SyncReporter`] handed to them at construction. The CLI picks the
//! reporter with `--events`, tests use [`RecordingReporter`] to assert on
//! exactly what happened.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reconcile::SyncReport;

/// Which destination call an item needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Create,
    Update,
}

/// Why an item was passed over without touching the destination.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyContent,
}

/// A single observable step of a reconciliation pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    FetchStarted {
        site_id: String,
        content_type: String,
        watermark: DateTime<Utc>,
    },
    PageFetched {
        site_id: String,
        content_type: String,
        offset: usize,
        found: usize,
        returned: usize,
        matching: usize,
    },
    /// The walk of a content type stopped at a page entirely at or before
    /// the watermark.
    EarlyExit {
        site_id: String,
        content_type: String,
        offset: usize,
    },
    FetchFinished {
        site_id: String,
        items: usize,
    },
    ItemCreated {
        site_id: String,
        item_id: u64,
        document_id: String,
        title: String,
    },
    ItemUpdated {
        site_id: String,
        item_id: u64,
        document_id: String,
        title: String,
    },
    ItemSkipped {
        site_id: String,
        item_id: u64,
        title: String,
        reason: SkipReason,
    },
    ItemFailed {
        site_id: String,
        item_id: u64,
        title: String,
        action: UpsertAction,
        error: String,
    },
    /// A mapping entry was made durable mid-pass.
    MappingCommitted {
        site_id: String,
        item_id: u64,
    },
    PassFinished {
        report: SyncReport,
    },
    /// A site's pass aborted; other sites in a sync-all run continue.
    PassFailed {
        site_id: String,
        error: String,
    },
}

/// Receives sync events. Implementations must not block for long; they are
/// called inline from the pass.
pub trait SyncReporter: Send + Sync {
    fn report(&self, event: SyncEvent);
}

/// Forwards events to `tracing` with structured fields.
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn report(&self, event: SyncEvent) {
        match event {
            SyncEvent::FetchStarted {
                site_id,
                content_type,
                watermark,
            } => {
                tracing::info!(%site_id, %content_type, %watermark, "fetching items");
            }
            SyncEvent::PageFetched {
                site_id,
                content_type,
                offset,
                found,
                returned,
                matching,
            } => {
                tracing::info!(
                    %site_id,
                    %content_type,
                    offset,
                    found,
                    returned,
                    matching,
                    "page fetched"
                );
            }
            SyncEvent::EarlyExit {
                site_id,
                content_type,
                offset,
            } => {
                tracing::info!(%site_id, %content_type, offset, "page older than watermark, stopping walk");
            }
            SyncEvent::FetchFinished { site_id, items } => {
                tracing::info!(%site_id, items, "fetch finished");
            }
            SyncEvent::ItemCreated {
                site_id,
                item_id,
                document_id,
                title,
            } => {
                tracing::info!(%site_id, item_id, %document_id, %title, "created document");
            }
            SyncEvent::ItemUpdated {
                site_id,
                item_id,
                document_id,
                title,
            } => {
                tracing::info!(%site_id, item_id, %document_id, %title, "updated document");
            }
            SyncEvent::ItemSkipped {
                site_id,
                item_id,
                title,
                reason,
            } => {
                tracing::warn!(%site_id, item_id, %title, ?reason, "skipping item");
            }
            SyncEvent::ItemFailed {
                site_id,
                item_id,
                title,
                action,
                error,
            } => {
                tracing::error!(%site_id, item_id, %title, ?action, %error, "upsert failed");
            }
            SyncEvent::MappingCommitted { site_id, item_id } => {
                tracing::debug!(%site_id, item_id, "mapping entry committed");
            }
            SyncEvent::PassFinished { report } => {
                tracing::info!(
                    site_id = %report.site_id,
                    fetched = report.fetched,
                    created = report.created,
                    updated = report.updated,
                    skipped = report.skipped,
                    failed = report.failed,
                    watermark = %report.watermark,
                    "site synced"
                );
            }
            SyncEvent::PassFailed { site_id, error } => {
                tracing::error!(%site_id, %error, "site sync failed");
            }
        }
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonReporter;

impl SyncReporter for JsonReporter {
    fn report(&self, event: SyncEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Drops every event.
pub struct NoReporter;

impl SyncReporter for NoReporter {
    fn report(&self, _event: SyncEvent) {}
}

/// Keeps every event in memory, in order.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl SyncReporter for RecordingReporter {
    fn report(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Event output mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum EventMode {
    /// Through the tracing subscriber.
    Log,
    /// JSON lines on stderr.
    Json,
    Off,
}

impl EventMode {
    pub fn reporter(&self) -> Arc<dyn SyncReporter> {
        match self {
            EventMode::Log => Arc::new(TracingReporter),
            EventMode::Json => Arc::new(JsonReporter),
            EventMode::Off => Arc::new(NoReporter),
        }
    }
}
