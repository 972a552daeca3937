//! Sync scheduler.
//!
//! Owns the single "a sync is running" flag. Runs a planned sync at start-up
//! and on every interval tick, accepts manual triggers, and drops any trigger
//! that arrives while a run is active.

mod runner;

pub use runner::{SyncHandle, SyncScheduler};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::SyncCursor;
use crate::sync::{SyncMode, SyncReport};
use crate::upstream::UpstreamStatus;

/// The run currently holding the sync flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub run_id: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
}

/// Result of asking for a sync.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A new run was spawned.
    Started(SyncHandle),
    /// Another run is active; the request was dropped.
    AlreadyRunning(ActiveRun),
}

/// Snapshot of scheduler state for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub enabled: bool,
    pub interval_secs: u64,
    pub active_run: Option<ActiveRun>,
    pub last_report: Option<SyncReport>,
    pub last_error: Option<String>,
    pub upstream: UpstreamStatus,
}

/// True when the catalog is due for a full rebuild: nothing stored, never
/// synced, or the last successful sync is older than `stale_after`.
pub fn is_stale(
    item_count: u64,
    cursor: &SyncCursor,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> bool {
    if item_count == 0 || cursor.never_synced() {
        return true;
    }
    match (now - cursor.last_successful_sync_at).to_std() {
        Ok(age) => age > stale_after,
        // Checkpoint in the future: clock skew, treat as fresh.
        Err(_) => false,
    }
}

/// Pick the mode for a scheduled run.
pub fn plan_mode(
    item_count: u64,
    cursor: &SyncCursor,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> SyncMode {
    if is_stale(item_count, cursor, stale_after, now) {
        SyncMode::Full
    } else {
        SyncMode::Incremental
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SyncPhase, SyncStats};
    use crate::testing::fixtures::minutes;

    const DAY: Duration = Duration::from_secs(86_400);

    fn synced_at(at: DateTime<Utc>) -> SyncCursor {
        SyncCursor {
            last_successful_sync_at: at,
            mode: SyncPhase::Idle,
            stats: SyncStats::default(),
        }
    }

    #[test]
    fn test_empty_store_plans_full() {
        let cursor = synced_at(minutes(0));
        assert_eq!(plan_mode(0, &cursor, DAY, minutes(1)), SyncMode::Full);
    }

    #[test]
    fn test_never_synced_plans_full() {
        assert_eq!(
            plan_mode(10, &SyncCursor::initial(), DAY, minutes(1)),
            SyncMode::Full
        );
    }

    #[test]
    fn test_fresh_cursor_plans_incremental() {
        let cursor = synced_at(minutes(0));
        assert_eq!(plan_mode(10, &cursor, DAY, minutes(60)), SyncMode::Incremental);
        assert!(!is_stale(10, &cursor, DAY, minutes(60)));
    }

    #[test]
    fn test_stale_cursor_plans_full() {
        let cursor = synced_at(minutes(0));
        assert_eq!(plan_mode(10, &cursor, DAY, minutes(24 * 60 + 1)), SyncMode::Full);
    }

    #[test]
    fn test_future_cursor_is_not_stale() {
        let cursor = synced_at(minutes(120));
        assert!(!is_stale(10, &cursor, DAY, minutes(0)));
    }
}
