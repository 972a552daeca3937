//! Types for the synchronizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{StoreError, SyncPhase, SyncStats};

/// Which sync strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Rebuild the whole catalog from the full feed.
    Full,
    /// Pull records changed since the last successful sync.
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }

    /// Checkpoint phase recorded while a run of this mode is active.
    pub fn in_progress_phase(&self) -> SyncPhase {
        match self {
            SyncMode::Full => SyncPhase::FullInProgress,
            SyncMode::Incremental => SyncPhase::IncrementalInProgress,
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped requesting pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A page came back with no records.
    EmptyPage,
    /// The provider's reported page count was reached.
    LastPage,
    /// The configured page ceiling was reached.
    PageCeiling,
    /// The configured item ceiling was reached.
    ItemCeiling,
    /// The soft run deadline passed.
    Deadline,
    /// Incremental only: a page held nothing newer than the cursor.
    CaughtUp,
}

/// Summary of a completed sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stats: SyncStats,
    pub pages_attempted: u32,
    pub pages_succeeded: u32,
    /// Records deleted from the store (tombstones and slug takeovers).
    pub removed: u64,
    /// Upstream records dropped for missing required fields.
    pub skipped: u64,
    pub stop_reason: StopReason,
    /// Catalog size after the run.
    pub total_items: u64,
}

/// Errors that end a sync run without advancing the cursor.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Every attempted page failed.
    #[error("{mode} sync made no progress: {failed} of {attempted} pages failed")]
    NoProgress {
        mode: SyncMode,
        attempted: u32,
        failed: u32,
    },

    /// Too few pages succeeded to trust the result.
    #[error(
        "only {succeeded} of {attempted} pages succeeded (required ratio {required_ratio})"
    )]
    InsufficientPages {
        succeeded: u32,
        attempted: u32,
        required_ratio: f64,
    },

    #[error("catalog store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync run cancelled")]
    Cancelled,
}

impl SyncError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NoProgress { .. } => "no_progress",
            SyncError::InsufficientPages { .. } => "insufficient_pages",
            SyncError::Store(_) => "store",
            SyncError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&SyncMode::Full).unwrap(), "\"full\"");
        let mode: SyncMode = serde_json::from_str("\"incremental\"").unwrap();
        assert_eq!(mode, SyncMode::Incremental);
        assert!(serde_json::from_str::<SyncMode>("\"partial\"").is_err());
    }

    #[test]
    fn test_in_progress_phase() {
        assert_eq!(SyncMode::Full.in_progress_phase(), SyncPhase::FullInProgress);
        assert_eq!(
            SyncMode::Incremental.in_progress_phase(),
            SyncPhase::IncrementalInProgress
        );
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::NoProgress {
            mode: SyncMode::Full,
            attempted: 3,
            failed: 3,
        };
        assert_eq!(err.to_string(), "full sync made no progress: 3 of 3 pages failed");
        assert_eq!(err.kind(), "no_progress");
    }
}
