//! Full sync: rebuild the whole catalog from the full feed.

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::DedupSet;
use super::synchronizer::{RunContext, Synchronizer};
use super::{StopReason, SyncError, SyncMode, SyncReport};
use crate::catalog::{SyncCursor, SyncStats};

impl Synchronizer {
    /// Page through the full feed in concurrent batches, deduplicate, then
    /// swap the result into the store in one transaction.
    ///
    /// The first batch is page 1 alone so a reported page count can bound
    /// the following batches.
    pub(super) async fn run_full(
        &self,
        run: &RunContext,
        _previous: &SyncCursor,
    ) -> Result<SyncReport, SyncError> {
        let endpoint = self.endpoints.full.clone();
        let deadline = run.started + self.config.run_deadline();
        let batch_size = self.config.batch_size.max(1) as u32;

        let mut working = DedupSet::new();
        let mut stats = SyncStats::default();
        let mut attempted: u32 = 0;
        let mut succeeded: u32 = 0;
        let mut skipped: u64 = 0;
        let mut total_pages: Option<u32> = None;
        let mut next_page: u32 = 1;

        let stop_reason = loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if Instant::now() >= deadline {
                warn!(run_id = %run.run_id, pages = attempted, "Full sync deadline reached, finalizing");
                break StopReason::Deadline;
            }

            let ceiling = total_pages.map_or(self.config.max_pages, |t| t.min(self.config.max_pages));
            if next_page > ceiling {
                break match total_pages {
                    Some(t) if t <= self.config.max_pages => StopReason::LastPage,
                    _ => StopReason::PageCeiling,
                };
            }

            let size = if next_page == 1 { 1 } else { batch_size };
            let last = (next_page + size - 1).min(ceiling);
            debug!(run_id = %run.run_id, from = next_page, to = last, "Fetching full sync batch");

            let mut stop = None;
            for (page_no, result) in self.fetch_batch(run, &endpoint, next_page..=last).await {
                attempted += 1;
                match result {
                    Ok(page) => {
                        succeeded += 1;
                        if total_pages.is_none() {
                            total_pages = page.total_pages;
                        }
                        if page.is_empty() {
                            stop = Some(StopReason::EmptyPage);
                            break;
                        }
                        stats.fetched += page.items.len() as u64;
                        skipped += page.skipped as u64;
                        for item in page.items {
                            working.insert(item);
                        }
                        if working.len() >= self.config.max_items {
                            stop = Some(StopReason::ItemCeiling);
                            break;
                        }
                    }
                    Err(e) => {
                        stats.failed += 1;
                        self.record_page_failure(run, &endpoint, page_no, &e);
                    }
                }
            }

            self.publish_progress(
                run,
                attempted,
                total_pages.map(|t| t.min(self.config.max_pages)),
                stats.fetched,
            );

            if let Some(reason) = stop {
                break reason;
            }
            next_page = last + 1;
        };

        if succeeded == 0 {
            return Err(SyncError::NoProgress {
                mode: SyncMode::Full,
                attempted,
                failed: stats.failed as u32,
            });
        }
        // Failures followed by an empty page must not wipe the catalog.
        if working.is_empty() && stats.failed > 0 {
            return Err(SyncError::NoProgress {
                mode: SyncMode::Full,
                attempted,
                failed: stats.failed as u32,
            });
        }
        let ratio = succeeded as f64 / attempted as f64;
        if ratio < self.config.min_success_ratio {
            return Err(SyncError::InsufficientPages {
                succeeded,
                attempted,
                required_ratio: self.config.min_success_ratio,
            });
        }
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut items = working.into_items();
        items.truncate(self.config.max_items);

        let before = self.store.count()?;
        let outcome = self.store.replace_all(&items, Utc::now())?;
        let removed = (before + outcome.new).saturating_sub(outcome.total);
        stats.new = outcome.new;
        stats.updated = outcome.updated;
        self.finish_cursor(run, stats)?;

        let stored = self.store.all()?;
        let total_items = stored.len() as u64;
        if let Some(listener) = &self.listener {
            listener.on_full_sync(stored).await;
        }

        if stats.failed > 0 {
            info!(
                run_id = %run.run_id,
                failed = stats.failed,
                attempted,
                "Full sync committed with skipped pages"
            );
        }

        Ok(SyncReport {
            run_id: run.run_id.clone(),
            mode: SyncMode::Full,
            started_at: run.started_at,
            finished_at: Utc::now(),
            duration_ms: Self::duration_ms(run),
            stats,
            pages_attempted: attempted,
            pages_succeeded: succeeded,
            removed,
            skipped,
            stop_reason,
            total_items,
        })
    }
}
