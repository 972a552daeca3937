//! Synchronizer: run bookkeeping shared by both sync strategies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{SyncEvent, SyncEvents, SyncListener, SyncProgress};
use super::retry::{fetch_with_retry, RetryBudget, RetryPolicy};
use super::{SyncError, SyncMode, SyncReport};
use crate::catalog::{CatalogStore, SyncCursor, SyncPhase};
use crate::config::{SyncConfig, UpstreamConfig};
use crate::metrics;
use crate::upstream::{ItemPage, PageRequest, UpstreamClient, UpstreamError, UpstreamStatus};

/// Feed paths used by each strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoints {
    pub full: String,
    pub incremental: String,
}

impl From<&UpstreamConfig> for FeedEndpoints {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            full: config.full_endpoint.clone(),
            incremental: config.incremental_endpoint.clone(),
        }
    }
}

impl Default for FeedEndpoints {
    fn default() -> Self {
        Self {
            full: "/items".to_string(),
            incremental: "/items/latest".to_string(),
        }
    }
}

/// State of one run.
pub(super) struct RunContext {
    pub run_id: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub budget: RetryBudget,
}

/// Orchestrates full and incremental syncs against one store.
pub struct Synchronizer {
    pub(super) store: Arc<dyn CatalogStore>,
    pub(super) client: Arc<dyn UpstreamClient>,
    pub(super) config: SyncConfig,
    pub(super) endpoints: FeedEndpoints,
    pub(super) listener: Option<Arc<dyn SyncListener>>,
    pub(super) events: SyncEvents,
    cancelled: AtomicBool,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        client: Arc<dyn UpstreamClient>,
        config: SyncConfig,
        endpoints: FeedEndpoints,
    ) -> Self {
        Self {
            store,
            client,
            config,
            endpoints,
            listener: None,
            events: SyncEvents::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Register the component notified after each committed run.
    pub fn with_listener(mut self, listener: Arc<dyn SyncListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn events(&self) -> &SyncEvents {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub async fn upstream_status(&self) -> UpstreamStatus {
        self.client.status().await
    }

    /// Ask running and future runs to stop at the next batch boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run one sync pass with a fresh run id.
    pub async fn run(&self, mode: SyncMode) -> Result<SyncReport, SyncError> {
        self.run_with_id(mode, Uuid::new_v4().to_string()).await
    }

    /// Run one sync pass.
    ///
    /// On success the cursor has advanced to the run's start time and the
    /// listener has seen the committed changes. On error the cursor keeps its
    /// previous timestamp.
    pub async fn run_with_id(&self, mode: SyncMode, run_id: String) -> Result<SyncReport, SyncError> {
        let run = RunContext {
            run_id,
            mode,
            started_at: Utc::now(),
            started: Instant::now(),
            budget: RetryBudget::new(self.config.run_retry_budget),
        };

        info!(run_id = %run.run_id, mode = %mode, "Sync started");
        self.events.emit(SyncEvent::Started {
            run_id: run.run_id.clone(),
            mode,
        });

        let previous = match self.begin(&run) {
            Ok(cursor) => cursor,
            Err(e) => return Err(self.fail(&run, e.into())),
        };

        let result = match mode {
            SyncMode::Full => self.run_full(&run, &previous).await,
            SyncMode::Incremental => self.run_incremental(&run, &previous).await,
        };

        metrics::SYNC_DURATION
            .with_label_values(&[mode.as_str()])
            .observe(run.started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                info!(
                    run_id = %report.run_id,
                    mode = %mode,
                    fetched = report.stats.fetched,
                    new = report.stats.new,
                    updated = report.stats.updated,
                    failed = report.stats.failed,
                    removed = report.removed,
                    total = report.total_items,
                    stop = ?report.stop_reason,
                    duration_ms = report.duration_ms,
                    "Sync finished"
                );
                metrics::SYNC_RUNS
                    .with_label_values(&[mode.as_str(), "success"])
                    .inc();
                metrics::SYNC_ITEMS
                    .with_label_values(&[mode.as_str(), "new"])
                    .inc_by(report.stats.new);
                metrics::SYNC_ITEMS
                    .with_label_values(&[mode.as_str(), "updated"])
                    .inc_by(report.stats.updated);
                metrics::SYNC_ITEMS
                    .with_label_values(&[mode.as_str(), "removed"])
                    .inc_by(report.removed);
                self.events.emit(SyncEvent::Finished {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                self.restore_phase(&previous);
                Err(self.fail(&run, e))
            }
        }
    }

    /// Mark the run in the checkpoint and return the cursor it started from.
    fn begin(&self, run: &RunContext) -> Result<SyncCursor, crate::catalog::StoreError> {
        let previous = self.store.load_cursor()?;
        let mut marked = previous.clone();
        marked.mode = run.mode.in_progress_phase();
        self.store.save_cursor(&marked)?;
        Ok(previous)
    }

    /// Put back the idle phase after a failed run, leaving the timestamp alone.
    fn restore_phase(&self, previous: &SyncCursor) {
        let mut cursor = previous.clone();
        if matches!(
            cursor.mode,
            SyncPhase::FullInProgress | SyncPhase::IncrementalInProgress
        ) {
            // Left over from an interrupted process.
            cursor.mode = if cursor.never_synced() {
                SyncPhase::None
            } else {
                SyncPhase::Idle
            };
        }
        if let Err(e) = self.store.save_cursor(&cursor) {
            warn!("Failed to restore sync cursor phase: {}", e);
        }
    }

    fn fail(&self, run: &RunContext, e: SyncError) -> SyncError {
        let result = if matches!(e, SyncError::Cancelled) {
            warn!(run_id = %run.run_id, mode = %run.mode, "Sync cancelled");
            "cancelled"
        } else {
            error!(run_id = %run.run_id, mode = %run.mode, kind = e.kind(), "Sync failed: {}", e);
            "failed"
        };
        metrics::SYNC_RUNS
            .with_label_values(&[run.mode.as_str(), result])
            .inc();
        self.events.emit(SyncEvent::Failed {
            run_id: run.run_id.clone(),
            mode: run.mode,
            error: e.to_string(),
        });
        e
    }

    /// Write the advanced checkpoint after a committed run.
    pub(super) fn finish_cursor(
        &self,
        run: &RunContext,
        stats: crate::catalog::SyncStats,
    ) -> Result<(), SyncError> {
        let cursor = SyncCursor {
            last_successful_sync_at: run.started_at,
            mode: SyncPhase::Idle,
            stats,
        };
        self.store.save_cursor(&cursor)?;
        Ok(())
    }

    pub(super) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            page_retries: self.config.page_retries,
            backoff: self.config.retry_backoff(),
        }
    }

    /// Fetch pages concurrently; results come back in request order.
    pub(super) async fn fetch_batch(
        &self,
        run: &RunContext,
        endpoint: &str,
        pages: std::ops::RangeInclusive<u32>,
    ) -> Vec<(u32, Result<ItemPage, UpstreamError>)> {
        let policy = self.retry_policy();
        let requests: Vec<PageRequest> = pages.map(|p| PageRequest::new(endpoint, p)).collect();
        let results = join_all(
            requests
                .iter()
                .map(|r| fetch_with_retry(self.client.as_ref(), r, &policy, &run.budget)),
        )
        .await;
        requests.iter().map(|r| r.page).zip(results).collect()
    }

    /// Log, count and publish a page that could not be fetched.
    pub(super) fn record_page_failure(&self, run: &RunContext, endpoint: &str, page: u32, e: &UpstreamError) {
        warn!(
            run_id = %run.run_id,
            mode = %run.mode,
            endpoint = %endpoint,
            page = page,
            kind = e.kind(),
            "Page fetch failed, skipping: {}",
            e
        );
        metrics::SYNC_PAGES_FAILED
            .with_label_values(&[run.mode.as_str(), e.kind()])
            .inc();
        self.events.emit(SyncEvent::PageFailed {
            run_id: run.run_id.clone(),
            endpoint: endpoint.to_string(),
            page,
            kind: e.kind().to_string(),
            reason: e.to_string(),
        });
    }

    pub(super) fn publish_progress(
        &self,
        run: &RunContext,
        pages_fetched: u32,
        pages_expected: Option<u32>,
        items_fetched: u64,
    ) {
        self.events.emit(SyncEvent::Progress(SyncProgress {
            run_id: run.run_id.clone(),
            mode: run.mode,
            pages_fetched,
            pages_expected,
            items_fetched,
        }));
    }

    pub(super) fn duration_ms(run: &RunContext) -> u64 {
        run.started.elapsed().as_millis() as u64
    }
}
