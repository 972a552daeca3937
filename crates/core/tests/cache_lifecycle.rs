//! Query cache and persistence integration tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;

use reelsync_core::{
    cache::{QueryCache, SearchQuery, SnapshotSource, WarmStart, SNAPSHOT_KEY},
    catalog::{CatalogItem, CatalogStore, SqliteCatalogStore},
    config::{CacheConfig, PersistenceConfig, SchedulerConfig, SyncConfig},
    persistence::{PersistenceTier, TieredPersistence},
    scheduler::SyncScheduler,
    service::CatalogService,
    sync::{FeedEndpoints, SyncMode, Synchronizer},
    testing::{
        fixtures::{catalog_item, minutes},
        MockUpstream,
    },
    upstream::RollingWindowLimiter,
};

fn persistence_config(dir: &TempDir, threshold: usize) -> PersistenceConfig {
    PersistenceConfig {
        dir: dir.path().join("snapshots"),
        compact_threshold_bytes: threshold,
        block_size_bytes: 512,
    }
}

fn open_tier(config: &PersistenceConfig) -> Arc<dyn PersistenceTier> {
    Arc::new(TieredPersistence::open(config).expect("Failed to open persistence"))
}

fn prefixed(prefix: &str, count: i64, base_minutes: i64) -> Vec<CatalogItem> {
    (0..count)
        .map(|i| catalog_item(&format!("{prefix}-{i}"), base_minutes + i))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_search_during_full_sync_sees_one_snapshot() {
    let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
    let cache = Arc::new(QueryCache::new(CacheConfig::default(), store.clone(), None));
    let upstream = Arc::new(MockUpstream::new());

    store
        .replace_all(&prefixed("old", 6, 0), minutes(0))
        .unwrap();
    cache.rebuild(store.all().unwrap()).await;

    let pages: Vec<Vec<CatalogItem>> = (0..4)
        .map(|p| prefixed(&format!("new{p}"), 3, p * 10))
        .collect();
    upstream.set_pages("/items", pages).await;
    upstream.set_delay(Some(Duration::from_millis(200))).await;

    let synchronizer = Arc::new(
        Synchronizer::new(
            store.clone(),
            upstream.clone(),
            SyncConfig {
                batch_size: 1,
                ..SyncConfig::default()
            },
            FeedEndpoints::default(),
        )
        .with_listener(cache.clone()),
    );

    let sync = {
        let synchronizer = synchronizer.clone();
        tokio::spawn(async move { synchronizer.run(SyncMode::Full).await })
    };

    let mut generations = Vec::new();
    while !sync.is_finished() {
        let page = cache.search(&SearchQuery::new().limit(100));
        let old = page.items.iter().filter(|i| i.slug.starts_with("old-")).count();
        assert!(
            old == 0 || old == page.items.len(),
            "mixed snapshot in generation {}",
            page.generation
        );
        generations.push(page.generation);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    sync.await.unwrap().unwrap();

    assert!(generations.len() > 1);
    let page = cache.search(&SearchQuery::new().limit(100));
    assert_eq!(page.total_items, 12);
    assert!(page.items.iter().all(|i| i.slug.starts_with("new")));
}

#[tokio::test]
async fn test_cold_start_serves_persisted_results() {
    let dir = TempDir::new().unwrap();
    let config = persistence_config(&dir, 1024 * 1024);

    {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let cache = QueryCache::new(CacheConfig::default(), store, Some(open_tier(&config)));
        cache.rebuild(prefixed("show", 5, 0)).await;
    }

    // fresh process: empty store, same persistence directory
    let store: Arc<dyn CatalogStore> = Arc::new(SqliteCatalogStore::in_memory().unwrap());
    let cache = Arc::new(QueryCache::new(
        CacheConfig::default(),
        store.clone(),
        Some(open_tier(&config)),
    ));
    let synchronizer = Arc::new(Synchronizer::new(
        store.clone(),
        Arc::new(MockUpstream::new()),
        SyncConfig::default(),
        FeedEndpoints::default(),
    ));
    let scheduler = Arc::new(SyncScheduler::new(
        synchronizer,
        SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        },
    ));
    let service = CatalogService::new(
        store,
        cache,
        scheduler,
        Duration::from_secs(86_400),
    );

    assert!(matches!(
        service.start().await,
        WarmStart::Persisted { items: 5, .. }
    ));

    let page = service.search(&SearchQuery::new().keyword("show")).await;
    assert!(page.ready);
    assert!(page.stale);
    assert_eq!(page.total_items, 5);
    assert_eq!(service.get_by_slug("show-3").unwrap().id, "id-show-3");

    let stats = service.get_stats().await;
    assert!(stats.needs_update);
    assert_eq!(stats.total_items, 0);
    assert_eq!(stats.snapshot_source, SnapshotSource::Persisted);
}

#[tokio::test]
async fn test_large_snapshot_uses_block_tier() {
    let dir = TempDir::new().unwrap();
    let config = persistence_config(&dir, 256);

    let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
    let cache = QueryCache::new(CacheConfig::default(), store.clone(), Some(open_tier(&config)));
    cache.rebuild(prefixed("big", 20, 0)).await;

    let compact_file = config.dir.join(format!("{SNAPSHOT_KEY}.snapshot"));
    assert!(!compact_file.exists());
    assert!(config.dir.join("blocks.db").exists());

    let restarted = QueryCache::new(CacheConfig::default(), store, Some(open_tier(&config)));
    assert_eq!(
        restarted.warm_start().await,
        WarmStart::Persisted {
            items: 20,
            generation: 1
        }
    );
}

#[tokio::test]
async fn test_small_snapshot_uses_compact_tier() {
    let dir = TempDir::new().unwrap();
    let config = persistence_config(&dir, 1024 * 1024);

    let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
    let cache = QueryCache::new(CacheConfig::default(), store, Some(open_tier(&config)));
    cache.rebuild(prefixed("small", 2, 0)).await;

    assert!(config.dir.join(format!("{SNAPSHOT_KEY}.snapshot")).exists());
}

#[tokio::test]
async fn test_corrupt_snapshot_rebuilt_from_store() {
    let dir = TempDir::new().unwrap();
    let config = persistence_config(&dir, 1024 * 1024);
    let tier = open_tier(&config);
    tier.save(SNAPSHOT_KEY, b"\x00\x01not a snapshot").unwrap();

    let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
    store
        .upsert_many(&prefixed("kept", 3, 0), minutes(0))
        .unwrap();

    let cache = QueryCache::new(CacheConfig::default(), store, Some(tier));
    assert_eq!(cache.warm_start().await, WarmStart::Rebuilt { items: 3 });
    assert_eq!(cache.source(), SnapshotSource::Live);
    assert_eq!(cache.search(&SearchQuery::new()).total_items, 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_burst_delays_instead_of_rejecting() {
    let limiter = Arc::new(RollingWindowLimiter::new(5));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
            start.elapsed()
        }));
        tokio::task::yield_now().await;
    }

    let mut granted = Vec::new();
    for handle in handles {
        granted.push(handle.await.unwrap());
    }
    granted.sort();

    assert_eq!(granted.len(), 8);
    for at in &granted[..5] {
        assert!(*at < Duration::from_secs(1));
    }
    for at in &granted[5..] {
        assert!(*at >= Duration::from_secs(60));
    }
    assert!(limiter.status().await.waits >= 1);
}
