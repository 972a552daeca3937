//! Deduplication of fetched catalog records.

use std::collections::HashMap;

use crate::catalog::CatalogItem;

/// Working set that coalesces records as they stream in.
///
/// A record collides with an existing entry when it shares the dedup key
/// (slug, falling back to id) or the id. On collision the record with the
/// strictly newer `upstream_modified_at` wins and takes the position of the
/// earliest entry it replaces; ties keep the existing entry. The result
/// therefore depends only on the set of records, not on arrival order,
/// except among equal timestamps.
#[derive(Debug, Default)]
pub struct DedupSet {
    slots: Vec<Option<CatalogItem>>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    live: usize,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a record. Returns true if it was kept.
    pub fn insert(&mut self, item: CatalogItem) -> bool {
        let mut colliding: Vec<usize> = [
            self.by_key.get(item.dedup_key()).copied(),
            self.by_id.get(&item.id).copied(),
        ]
        .into_iter()
        .flatten()
        .collect();
        colliding.sort_unstable();
        colliding.dedup();

        let beats_all = colliding.iter().all(|&idx| {
            self.slots[idx]
                .as_ref()
                .map(|existing| item.upstream_modified_at > existing.upstream_modified_at)
                .unwrap_or(true)
        });
        if !beats_all {
            return false;
        }

        let target = match colliding.first() {
            Some(&idx) => idx,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        for &idx in &colliding {
            if let Some(old) = self.slots[idx].take() {
                self.by_key.remove(old.dedup_key());
                self.by_id.remove(&old.id);
                self.live -= 1;
            }
        }

        self.by_key.insert(item.dedup_key().to_string(), target);
        self.by_id.insert(item.id.clone(), target);
        self.slots[target] = Some(item);
        self.live += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Kept records in first-seen order.
    pub fn into_items(self) -> Vec<CatalogItem> {
        self.slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn deduplicate_items(items: Vec<CatalogItem>) -> Vec<CatalogItem> {
        let mut set = DedupSet::new();
        for item in items {
            set.insert(item);
        }
        set.into_items()
    }

    #[test]
    fn test_deduplicate_keeps_newest_regardless_of_order() {
        let older = fixtures::catalog_item("dune", 1);
        let mut newer = fixtures::catalog_item("dune", 5);
        newer.title = "Dune (updated)".to_string();

        let forward = deduplicate_items(vec![older.clone(), newer.clone()]);
        let backward = deduplicate_items(vec![newer.clone(), older]);

        assert_eq!(forward, vec![newer.clone()]);
        assert_eq!(backward, vec![newer]);
    }

    #[test]
    fn test_equal_timestamps_keep_first() {
        let first = fixtures::catalog_item("tie", 3);
        let mut second = first.clone();
        second.title = "Second".to_string();

        let result = deduplicate_items(vec![first.clone(), second]);
        assert_eq!(result, vec![first]);
    }

    #[test]
    fn test_newer_record_takes_original_position() {
        let a = fixtures::catalog_item("a", 1);
        let b = fixtures::catalog_item("b", 1);
        let a2 = fixtures::catalog_item("a", 9);

        let slugs: Vec<String> = deduplicate_items(vec![a, b, a2])
            .into_iter()
            .map(|i| i.slug)
            .collect();
        assert_eq!(slugs, vec!["a", "b"]);
    }

    #[test]
    fn test_same_id_different_slug_collapses() {
        let old = fixtures::catalog_item("old-slug", 1);
        let mut renamed = fixtures::catalog_item("new-slug", 2);
        renamed.id = old.id.clone();

        let result = deduplicate_items(vec![old, renamed.clone()]);
        assert_eq!(result, vec![renamed]);
    }

    #[test]
    fn test_record_bridging_two_entries_replaces_both() {
        let a = fixtures::catalog_item("a", 1);
        let b = fixtures::catalog_item("b", 1);
        // Claims a's slug and b's id.
        let mut bridge = fixtures::catalog_item("a", 5);
        bridge.id = b.id.clone();

        let mut set = DedupSet::new();
        set.insert(a);
        set.insert(b);
        assert!(set.insert(bridge.clone()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.into_items(), vec![bridge]);
    }

    #[test]
    fn test_len_counts_distinct_records() {
        let mut set = DedupSet::new();
        assert!(set.is_empty());
        set.insert(fixtures::catalog_item("x", 1));
        set.insert(fixtures::catalog_item("y", 1));
        set.insert(fixtures::catalog_item("x", 0));
        assert_eq!(set.len(), 2);
    }
}
