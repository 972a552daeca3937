//! Incremental sync: apply records changed since the last checkpoint.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::dedup::DedupSet;
use super::synchronizer::{RunContext, Synchronizer};
use super::{StopReason, SyncError, SyncMode, SyncReport};
use crate::catalog::{CatalogItem, SyncCursor, SyncStats};

impl Synchronizer {
    /// Scan the newest-first feed from page 1 and upsert records newer than
    /// the cursor, one batch at a time.
    ///
    /// Pages are consumed strictly in page order. The scan ends at the first
    /// successfully fetched page with nothing newer than the cursor; failed
    /// pages are counted and skipped. Each batch is committed before the next
    /// is requested, so cancellation never leaves a partial batch.
    pub(super) async fn run_incremental(
        &self,
        run: &RunContext,
        previous: &SyncCursor,
    ) -> Result<SyncReport, SyncError> {
        let endpoint = self.endpoints.incremental.clone();
        let since = previous.last_successful_sync_at;
        let lookahead = self.config.incremental_lookahead.max(1) as u32;
        let max_pages = self.config.incremental_max_pages;

        let mut stats = SyncStats::default();
        let mut attempted: u32 = 0;
        let mut succeeded: u32 = 0;
        let mut skipped: u64 = 0;
        let mut total_pages: Option<u32> = None;
        let mut next_page: u32 = 1;

        // Newest modification time accepted per key across the whole run, so
        // a record that shifts onto a later page cannot roll back a newer copy.
        let mut accepted: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut changed: Vec<CatalogItem> = Vec::new();
        let mut removed: Vec<String> = Vec::new();

        debug!(run_id = %run.run_id, since = %since, "Incremental scan starting");

        let stop_reason = loop {
            if self.is_cancelled() {
                self.notify_incremental(&changed, &removed).await;
                return Err(SyncError::Cancelled);
            }

            let ceiling = total_pages.map_or(max_pages, |t| t.min(max_pages));
            if next_page > ceiling {
                break match total_pages {
                    Some(t) if t <= max_pages => StopReason::LastPage,
                    _ => StopReason::PageCeiling,
                };
            }
            let last = (next_page + lookahead - 1).min(ceiling);

            let mut batch = DedupSet::new();
            let mut tombstones: Vec<String> = Vec::new();
            let mut stop = None;

            for (page_no, result) in self.fetch_batch(run, &endpoint, next_page..=last).await {
                attempted += 1;
                let page = match result {
                    Ok(page) => page,
                    Err(e) => {
                        stats.failed += 1;
                        self.record_page_failure(run, &endpoint, page_no, &e);
                        continue;
                    }
                };

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
                tombstones.extend(page.removed);

                let has_items = !page.items.is_empty();
                let mut any_fresh = false;
                for item in page.items {
                    if item.upstream_modified_at <= since {
                        continue;
                    }
                    any_fresh = true;
                    let key = item.dedup_key().to_string();
                    match accepted.get(&key) {
                        Some(seen) if *seen >= item.upstream_modified_at => {}
                        _ => {
                            accepted.insert(key, item.upstream_modified_at);
                            batch.insert(item);
                        }
                    }
                }

                // Tombstones and skipped records carry no usable timestamp, so
                // only a page with decoded records can show the feed caught up.
                if !any_fresh && has_items {
                    stop = Some(StopReason::CaughtUp);
                    break;
                }
            }

            // Commit this batch before looking further.
            if !batch.is_empty() {
                let outcome = self.store.upsert_many(&batch.into_items(), Utc::now())?;
                stats.new += outcome.new;
                stats.updated += outcome.updated;
                changed.extend(outcome.changed);
                removed.extend(outcome.displaced);
            }
            if !tombstones.is_empty() {
                let gone = self.store.remove_many(&tombstones)?;
                changed.retain(|item| !gone.contains(&item.id));
                removed.extend(gone);
            }

            self.publish_progress(run, attempted, total_pages, stats.fetched);

            if let Some(reason) = stop {
                break reason;
            }
            next_page = last + 1;
        };

        if succeeded == 0 {
            return Err(SyncError::NoProgress {
                mode: SyncMode::Incremental,
                attempted,
                failed: stats.failed as u32,
            });
        }
        if stop_reason == StopReason::PageCeiling {
            warn!(
                run_id = %run.run_id,
                pages = attempted,
                "Incremental scan hit the page ceiling before catching up, a full sync is advised"
            );
        }

        self.finish_cursor(run, stats)?;
        self.notify_incremental(&changed, &removed).await;

        Ok(SyncReport {
            run_id: run.run_id.clone(),
            mode: SyncMode::Incremental,
            started_at: run.started_at,
            finished_at: Utc::now(),
            duration_ms: Self::duration_ms(run),
            stats,
            pages_attempted: attempted,
            pages_succeeded: succeeded,
            removed: removed.len() as u64,
            skipped,
            stop_reason,
            total_items: self.store.count()?,
        })
    }

    /// Hand committed changes to the listener. Nothing is sent when the run
    /// changed nothing, so a repeated run leaves the snapshot untouched.
    async fn notify_incremental(&self, changed: &[CatalogItem], removed: &[String]) {
        if changed.is_empty() && removed.is_empty() {
            return;
        }
        if let Some(listener) = &self.listener {
            listener
                .on_incremental_sync(changed.to_vec(), removed.to_vec())
                .await;
        }
    }
}
