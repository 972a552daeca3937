//! The public read/trigger surface of the engine.
//!
//! `CatalogService` wires the store, upstream client, synchronizer, query
//! cache and scheduler together. Read operations never wait on a sync and
//! never surface upstream failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{QueryCache, SearchPage, SearchQuery, SnapshotSource, WarmStart};
use crate::catalog::{CatalogItem, CatalogStore, SqliteCatalogStore, StoreError};
use crate::config::Config;
use crate::persistence::{PersistenceError, PersistenceTier, TieredPersistence};
use crate::scheduler::{is_stale, SchedulerStatus, SyncScheduler, TriggerOutcome};
use crate::sync::{FeedEndpoints, SyncMode, SyncReport, Synchronizer};
use crate::upstream::{HttpUpstreamClient, UpstreamClient, UpstreamError};

/// Errors while assembling the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("catalog store error: {0}")]
    Store(#[from] StoreError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("upstream client error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Catalog health as shown to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_items: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    /// The data may be stale: empty, never synced, past the staleness
    /// threshold, or served from a persisted snapshot.
    pub needs_update: bool,
    pub snapshot_generation: u64,
    pub snapshot_source: SnapshotSource,
    pub last_report: Option<SyncReport>,
}

pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    cache: Arc<QueryCache>,
    scheduler: Arc<SyncScheduler>,
    stale_after: Duration,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        cache: Arc<QueryCache>,
        scheduler: Arc<SyncScheduler>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            scheduler,
            stale_after,
        }
    }

    /// Open the SQLite store and persistence tiers from `config` and talk to
    /// the configured upstream over HTTP.
    pub fn open(config: &Config) -> Result<Self, ServiceError> {
        let client = Arc::new(HttpUpstreamClient::new(&config.upstream)?);
        Self::open_with_client(config, client)
    }

    /// Like `open`, with a caller-supplied upstream client.
    pub fn open_with_client(
        config: &Config,
        client: Arc<dyn UpstreamClient>,
    ) -> Result<Self, ServiceError> {
        let store: Arc<dyn CatalogStore> =
            Arc::new(SqliteCatalogStore::new(&config.database.path)?);
        let persistence: Arc<dyn PersistenceTier> =
            Arc::new(TieredPersistence::open(&config.persistence)?);

        let cache = Arc::new(QueryCache::new(
            config.cache.clone(),
            Arc::clone(&store),
            Some(persistence),
        ));
        let synchronizer = Arc::new(
            Synchronizer::new(
                Arc::clone(&store),
                client,
                config.sync.clone(),
                FeedEndpoints::from(&config.upstream),
            )
            .with_listener(cache.clone()),
        );
        let scheduler = Arc::new(SyncScheduler::new(synchronizer, config.scheduler.clone()));

        Ok(Self::new(store, cache, scheduler, config.scheduler.stale_after()))
    }

    /// Warm the query cache, then start scheduled syncs.
    pub async fn start(&self) -> WarmStart {
        let warm = self.cache.warm_start().await;
        info!(warm_start = ?warm, "Query cache warmed");
        self.scheduler.start().await;
        warm
    }

    /// Stop scheduled syncs and cancel any in-flight run.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
    }

    /// Search the current snapshot. Before any snapshot exists this builds
    /// one from the store; if the store is empty too the page is marked not
    /// ready.
    pub async fn search(&self, query: &SearchQuery) -> SearchPage {
        if !self.cache.is_ready() {
            self.cache.ensure_ready().await;
        }
        self.cache.search(query)
    }

    pub fn get_by_id(&self, id: &str) -> Result<CatalogItem, StoreError> {
        if let Some(item) = self.cache.get_by_id(id) {
            return Ok(item);
        }
        self.store
            .find_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<CatalogItem, StoreError> {
        if let Some(item) = self.cache.get_by_slug(slug) {
            return Ok(item);
        }
        self.store
            .find_by_slug(slug)?
            .ok_or_else(|| StoreError::NotFound(slug.to_string()))
    }

    pub async fn get_stats(&self) -> CatalogStats {
        let snapshot = self.cache.current();

        let total_items = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count catalog records: {}", e);
                snapshot.len() as u64
            }
        };
        let cursor = match self.store.load_cursor() {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!("Failed to load sync cursor: {}", e);
                None
            }
        };

        let stale = cursor
            .as_ref()
            .map_or(true, |c| is_stale(total_items, c, self.stale_after, Utc::now()));

        CatalogStats {
            total_items,
            last_synced_at: cursor
                .filter(|c| !c.never_synced())
                .map(|c| c.last_successful_sync_at),
            is_syncing: self.scheduler.is_syncing(),
            needs_update: stale || snapshot.source() != SnapshotSource::Live,
            snapshot_generation: snapshot.generation(),
            snapshot_source: snapshot.source(),
            last_report: self.scheduler.last_report().await,
        }
    }

    /// Start a sync in the background. A request made while a sync is
    /// running is dropped.
    pub fn trigger_sync(&self, mode: SyncMode) -> TriggerOutcome {
        self.scheduler.trigger(mode)
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }
}
