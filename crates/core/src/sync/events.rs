//! Sync progress events and completion listeners.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::{SyncMode, SyncReport};
use crate::catalog::CatalogItem;

/// Progress of a running sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub run_id: String,
    pub mode: SyncMode,
    pub pages_fetched: u32,
    /// Known only when the provider reports a page count.
    pub pages_expected: Option<u32>,
    pub items_fetched: u64,
}

/// Events published while a sync runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        run_id: String,
        mode: SyncMode,
    },
    Progress(SyncProgress),
    PageFailed {
        run_id: String,
        endpoint: String,
        page: u32,
        kind: String,
        reason: String,
    },
    Finished {
        report: SyncReport,
    },
    Failed {
        run_id: String,
        mode: SyncMode,
        error: String,
    },
}

/// Handle for publishing sync events.
///
/// Cheaply cloneable. Publishing never blocks or fails: events sent while
/// nobody is subscribed are dropped, and slow subscribers lag.
#[derive(Clone)]
pub struct SyncEvents {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("Sync event dropped, no subscribers");
        }
    }
}

impl Default for SyncEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receives the committed results of sync runs.
///
/// Called only after the store commit, with records exactly as stored.
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// The whole catalog was replaced; `items` is the new content in store order.
    async fn on_full_sync(&self, items: Vec<CatalogItem>);

    /// Records were upserted or deleted (by id).
    async fn on_incremental_sync(&self, changed: Vec<CatalogItem>, removed: Vec<String>);
}
