//! Catalog synchronization and caching engine.
//!
//! Pulls a paginated upstream feed under a rate limit, reconciles it into a
//! deduplicated SQLite catalog with full and incremental syncs, and serves
//! searches from an in-memory snapshot backed by a size-tiered persistence
//! layer.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod scheduler;
pub mod service;
pub mod sync;
pub mod testing;
pub mod upstream;

pub use cache::{
    QueryCache, QuerySnapshot, SearchFilters, SearchPage, SearchQuery, SnapshotSource, SortOrder,
    WarmStart,
};
pub use catalog::{
    CatalogItem, CatalogStore, SqliteCatalogStore, StoreError, SyncCursor, SyncPhase, SyncStats,
    Tag,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use persistence::{PersistenceError, PersistenceTier, TieredPersistence};
pub use scheduler::{ActiveRun, SchedulerStatus, SyncHandle, SyncScheduler, TriggerOutcome};
pub use service::{CatalogService, CatalogStats, ServiceError};
pub use sync::{
    SyncError, SyncEvent, SyncListener, SyncMode, SyncProgress, SyncReport, Synchronizer,
};
pub use upstream::{
    HttpUpstreamClient, ItemPage, PageRequest, UpstreamClient, UpstreamError, UpstreamStatus,
};
