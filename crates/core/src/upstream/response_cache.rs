//! Short-TTL cache of decoded upstream pages keyed by endpoint and params.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::{Duration, Instant};

use super::ItemPage;

/// Hit/miss counters for the response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Entry {
    page: ItemPage,
    stored_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion stamp to key, oldest first. Holds exactly one stamp per entry.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }
}

/// Bounded, TTL-based page cache.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a fresh entry. Expired entries count as misses and are dropped.
    pub fn get(&self, key: &str) -> Option<ItemPage> {
        let mut inner = self.lock();
        let fresh = match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.page.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        fresh
    }

    pub fn insert(&self, key: String, page: ItemPage) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }
        let mut inner = self.lock();

        inner.remove(&key);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                page,
                stored_at: Instant::now(),
                seq,
            },
        );

        while inner.entries.len() > self.capacity {
            match inner.order.pop_first() {
                Some((_, oldest)) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let inner = self.lock();
        ResponseCacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32) -> ItemPage {
        ItemPage {
            page: n,
            ..ItemPage::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_miss_after() {
        let cache = ResponseCache::new(Duration::from_secs(300), 8);
        assert!(cache.get("a").is_none());

        cache.insert("a".to_string(), page(1));
        assert_eq!(cache.get("a").unwrap().page, 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get("a").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), page(1));
        cache.insert("b".to_string(), page(2));
        cache.insert("c".to_string(), page(3));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), page(1));
        cache.insert("b".to_string(), page(2));
        cache.insert("a".to_string(), page(10));
        cache.insert("c".to_string(), page(3));

        assert_eq!(cache.get("a").unwrap().page, 10);
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.insert("a".to_string(), page(1));
        assert!(cache.get("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_refill_keeps_order_bounded() {
        let cache = ResponseCache::new(Duration::from_secs(300), 512);
        let keys: Vec<String> = (0..10).map(|i| format!("/items?page={}", i)).collect();

        for _ in 0..1000 {
            for (i, key) in keys.iter().enumerate() {
                if cache.get(key).is_none() {
                    cache.insert(key.clone(), page(i as u32));
                }
            }
            tokio::time::advance(Duration::from_secs(301)).await;
        }

        let inner = cache.lock();
        assert_eq!(inner.entries.len(), 10);
        assert_eq!(inner.order.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_does_not_evict_refreshed_entry() {
        let cache = ResponseCache::new(Duration::from_secs(300), 2);
        cache.insert("a".to_string(), page(1));
        tokio::time::advance(Duration::from_secs(301)).await;

        // "a" expires and is stored again, now the newest entry
        assert!(cache.get("a").is_none());
        cache.insert("a".to_string(), page(2));
        cache.insert("b".to_string(), page(3));
        cache.insert("c".to_string(), page(4));

        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").unwrap().page, 3);
        assert_eq!(cache.get("c").unwrap().page, 4);
    }
}
