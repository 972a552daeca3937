//! The hot tier: an in-memory snapshot served to readers, swapped atomically
//! by a single writer.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::persisted::{PersistedSnapshot, SNAPSHOT_KEY};
use super::query::{page_count, SearchPage, SearchQuery};
use super::snapshot::{QuerySnapshot, SnapshotSource};
use crate::catalog::{CatalogItem, CatalogStore};
use crate::config::CacheConfig;
use crate::metrics;
use crate::persistence::{PersistenceError, PersistenceTier};
use crate::sync::SyncListener;

/// How the cache came up at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmStart {
    /// Loaded a persisted snapshot; it is served as stale until a sync lands.
    Persisted { items: usize, generation: u64 },
    /// Built from the catalog store.
    Rebuilt { items: usize },
    /// Nothing available; searches report not ready.
    Empty,
}

/// Memoized search results, least-recently-used eviction.
struct ResultCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (u64, SearchPage)>,
    recency: BTreeMap<u64, String>,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<SearchPage> {
        let (tick, page) = self.entries.get_mut(key)?;
        self.recency.remove(tick);
        self.tick += 1;
        *tick = self.tick;
        self.recency.insert(self.tick, key.to_string());
        Some(page.clone())
    }

    fn insert(&mut self, key: String, page: SearchPage) {
        if self.capacity == 0 {
            return;
        }
        self.tick += 1;
        if let Some((old_tick, _)) = self.entries.insert(key.clone(), (self.tick, page)) {
            self.recency.remove(&old_tick);
        }
        self.recency.insert(self.tick, key);

        while self.entries.len() > self.capacity {
            match self.recency.pop_first() {
                Some((_, evicted)) => {
                    self.entries.remove(&evicted);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Owns the current `QuerySnapshot`, its generation counter and the
/// persisted copy.
///
/// Readers clone the `Arc` of the current snapshot and never block on a
/// rebuild. Rebuilds and merges are serialized by `writer` and published
/// with a single pointer swap.
pub struct QueryCache {
    config: CacheConfig,
    store: Arc<dyn CatalogStore>,
    persistence: Option<Arc<dyn PersistenceTier>>,
    snapshot: RwLock<Arc<QuerySnapshot>>,
    generation: AtomicU64,
    results: Mutex<ResultCache>,
    writer: tokio::sync::Mutex<()>,
}

impl QueryCache {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CatalogStore>,
        persistence: Option<Arc<dyn PersistenceTier>>,
    ) -> Self {
        let capacity = config.result_cache_capacity;
        Self {
            config,
            store,
            persistence,
            snapshot: RwLock::new(Arc::new(QuerySnapshot::empty())),
            generation: AtomicU64::new(0),
            results: Mutex::new(ResultCache::new(capacity)),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// The snapshot readers currently see.
    pub fn current(&self) -> Arc<QuerySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_ready(&self) -> bool {
        self.current().source() != SnapshotSource::Empty
    }

    pub fn source(&self) -> SnapshotSource {
        self.current().source()
    }

    pub fn generation(&self) -> u64 {
        self.current().generation()
    }

    pub fn search(&self, query: &SearchQuery) -> SearchPage {
        let normalized = query.normalize(self.config.default_limit, self.config.max_limit);
        let snapshot = self.current();
        if snapshot.source() == SnapshotSource::Empty {
            return SearchPage::not_ready(&normalized);
        }

        let key = format!("{}:{}", snapshot.generation(), normalized.cache_key());
        if let Some(page) = self.results().get(&key) {
            metrics::QUERY_CACHE.with_label_values(&["hit"]).inc();
            return page;
        }
        metrics::QUERY_CACHE.with_label_values(&["miss"]).inc();

        let (items, total) = snapshot.search(&normalized);
        let page = SearchPage {
            items,
            total_items: total,
            total_pages: page_count(total, normalized.limit),
            page: normalized.page,
            limit: normalized.limit,
            ready: true,
            stale: snapshot.source() == SnapshotSource::Persisted,
            generation: snapshot.generation(),
        };
        self.results().insert(key, page.clone());
        page
    }

    pub fn get_by_id(&self, id: &str) -> Option<CatalogItem> {
        self.current().get_by_id(id).cloned()
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<CatalogItem> {
        self.current().get_by_slug(slug).cloned()
    }

    /// Number of memoized result pages.
    pub fn cached_results(&self) -> usize {
        self.results().len()
    }

    /// Replace the snapshot wholesale.
    pub async fn rebuild(&self, items: Vec<CatalogItem>) -> Arc<QuerySnapshot> {
        let _writer = self.writer.lock().await;
        self.rebuild_locked(items)
    }

    /// Apply a change set to the live snapshot.
    ///
    /// A snapshot that did not come from the store (empty or persisted) cannot
    /// be patched reliably, so it is rebuilt from the store instead.
    pub async fn merge(&self, changed: &[CatalogItem], removed: &[String]) -> Arc<QuerySnapshot> {
        let _writer = self.writer.lock().await;
        let current = self.current();

        if current.source() != SnapshotSource::Live {
            match self.store.all() {
                Ok(items) => return self.rebuild_locked(items),
                Err(e) => {
                    warn!(error = %e, "Failed to read catalog for rebuild, merging into current snapshot");
                }
            }
        }

        let generation = self.next_generation();
        let snapshot = self.install(current.merged(changed, removed, generation));
        info!(
            generation,
            changed = changed.len(),
            removed = removed.len(),
            items = snapshot.len(),
            "Query snapshot merged"
        );
        self.persist(&snapshot);
        snapshot
    }

    /// Build the first snapshot if none is loaded and the store has data.
    /// Returns whether the cache is ready afterwards.
    pub async fn ensure_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        let _writer = self.writer.lock().await;
        if self.is_ready() {
            return true;
        }
        matches!(self.rebuild_from_store(), WarmStart::Rebuilt { .. })
    }

    /// Bring the cache up at process start: a usable persisted snapshot
    /// first, then the catalog store, otherwise stay empty.
    pub async fn warm_start(&self) -> WarmStart {
        let _writer = self.writer.lock().await;

        if let Some(tier) = &self.persistence {
            match tier.load(SNAPSHOT_KEY) {
                Ok(Some(bytes)) => match PersistedSnapshot::decode(&bytes) {
                    Ok(persisted) => {
                        let age = persisted.age(Utc::now()).to_std().unwrap_or_default();
                        if age <= self.config.usable_snapshot_age() {
                            let items = persisted.items.len();
                            let generation = persisted.generation;
                            self.generation.fetch_max(generation, Ordering::SeqCst);
                            self.install(persisted.into_snapshot());
                            info!(
                                items,
                                generation,
                                age_secs = age.as_secs(),
                                "Serving persisted snapshot until the first sync completes"
                            );
                            return WarmStart::Persisted { items, generation };
                        }
                        info!(age_secs = age.as_secs(), "Persisted snapshot too old, ignoring");
                    }
                    Err(e) => self.discard(tier.as_ref(), &e),
                },
                Ok(None) => debug!("No persisted snapshot"),
                Err(e) if e.is_unreadable() => self.discard(tier.as_ref(), &e),
                Err(e) => warn!(error = %e, tier = tier.name(), "Failed to load persisted snapshot"),
            }
        }

        self.rebuild_from_store()
    }

    fn rebuild_from_store(&self) -> WarmStart {
        match self.store.count() {
            Ok(0) => WarmStart::Empty,
            Ok(_) => match self.store.all() {
                Ok(items) => {
                    let count = items.len();
                    self.rebuild_locked(items);
                    WarmStart::Rebuilt { items: count }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read catalog for snapshot build");
                    WarmStart::Empty
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to count catalog records");
                WarmStart::Empty
            }
        }
    }

    fn rebuild_locked(&self, items: Vec<CatalogItem>) -> Arc<QuerySnapshot> {
        let generation = self.next_generation();
        let snapshot = self.install(QuerySnapshot::build(items, generation, SnapshotSource::Live));
        info!(generation, items = snapshot.len(), "Query snapshot rebuilt");
        self.persist(&snapshot);
        snapshot
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn install(&self, snapshot: QuerySnapshot) -> Arc<QuerySnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        metrics::SNAPSHOT_ITEMS.set(snapshot.len() as i64);
        snapshot
    }

    /// Write the snapshot to the persistence tier, retrying once. Failures
    /// leave the in-memory snapshot authoritative.
    fn persist(&self, snapshot: &QuerySnapshot) {
        let Some(tier) = &self.persistence else {
            return;
        };
        let blob = match PersistedSnapshot::from_snapshot(snapshot).encode() {
            Ok(blob) => blob,
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                return;
            }
        };

        if let Err(first) = tier.save(SNAPSHOT_KEY, &blob) {
            warn!(error = %first, tier = tier.name(), "Snapshot write failed, retrying");
            if let Err(e) = tier.save(SNAPSHOT_KEY, &blob) {
                error!(
                    error = %e,
                    tier = tier.name(),
                    generation = snapshot.generation(),
                    "Snapshot write failed, continuing with in-memory copy"
                );
                return;
            }
        }
        debug!(bytes = blob.len(), generation = snapshot.generation(), "Snapshot persisted");
    }

    fn discard(&self, tier: &dyn PersistenceTier, err: &PersistenceError) {
        warn!(error = %err, tier = tier.name(), "Discarding unreadable persisted snapshot");
        if let Err(e) = tier.remove(SNAPSHOT_KEY) {
            warn!(error = %e, "Failed to remove unreadable snapshot");
        }
    }

    fn results(&self) -> MutexGuard<'_, ResultCache> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SyncListener for QueryCache {
    async fn on_full_sync(&self, items: Vec<CatalogItem>) {
        self.rebuild(items).await;
    }

    async fn on_incremental_sync(&self, changed: Vec<CatalogItem>, removed: Vec<String>) {
        self.merge(&changed, &removed).await;
    }
}
