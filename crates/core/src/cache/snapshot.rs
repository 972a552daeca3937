//! Point-in-time materialized view of the catalog with derived indexes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::{fold_text, NormalizedQuery, SortOrder};
use crate::catalog::CatalogItem;

/// Where the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Nothing loaded yet.
    #[default]
    Empty,
    /// Restored from the persistence tier; not yet refreshed by a sync.
    Persisted,
    /// Built from the catalog store or a completed sync.
    Live,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Empty => "empty",
            SnapshotSource::Persisted => "persisted",
            SnapshotSource::Live => "live",
        }
    }
}

/// Immutable once published. Updates produce a new snapshot.
///
/// Items are kept in insertion order via a monotonically increasing sequence
/// number; every index maps to sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct QuerySnapshot {
    generation: u64,
    built_at: Option<DateTime<Utc>>,
    source: SnapshotSource,
    next_seq: u64,
    items: BTreeMap<u64, CatalogItem>,
    by_id: HashMap<String, u64>,
    by_slug: HashMap<String, u64>,
    by_category: HashMap<String, BTreeSet<u64>>,
    by_country: HashMap<String, BTreeSet<u64>>,
    by_year: HashMap<i32, BTreeSet<u64>>,
    by_kind: HashMap<String, BTreeSet<u64>>,
    search_text: HashMap<u64, String>,
}

impl QuerySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from scratch. Later items replace earlier ones that
    /// share an id or slug.
    pub fn build(
        items: impl IntoIterator<Item = CatalogItem>,
        generation: u64,
        source: SnapshotSource,
    ) -> Self {
        let mut snapshot = Self {
            generation,
            built_at: Some(Utc::now()),
            source,
            ..Self::default()
        };
        for item in items {
            snapshot.insert(item);
        }
        snapshot
    }

    /// Copy this snapshot and apply an incremental change set. Removals are
    /// applied first, then changed items are inserted or replaced in place.
    pub fn merged(&self, changed: &[CatalogItem], removed: &[String], generation: u64) -> Self {
        let mut next = self.clone();
        for key in removed {
            next.remove(key);
        }
        for item in changed {
            next.insert(item.clone());
        }
        next.generation = generation;
        next.built_at = Some(Utc::now());
        next.source = SnapshotSource::Live;
        next
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&CatalogItem> {
        self.by_id.get(id).and_then(|seq| self.items.get(seq))
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&CatalogItem> {
        self.by_slug.get(slug).and_then(|seq| self.items.get(seq))
    }

    /// Items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    /// Filter, sort and paginate. Returns the requested page and the total
    /// number of matches.
    pub fn search(&self, query: &NormalizedQuery) -> (Vec<CatalogItem>, usize) {
        let mut sets: Vec<&BTreeSet<u64>> = Vec::new();
        let filters = &query.filters;

        if let Some(category) = &filters.category {
            match self.by_category.get(category) {
                Some(set) => sets.push(set),
                None => return (Vec::new(), 0),
            }
        }
        if let Some(country) = &filters.country {
            match self.by_country.get(country) {
                Some(set) => sets.push(set),
                None => return (Vec::new(), 0),
            }
        }
        if let Some(year) = filters.year {
            match self.by_year.get(&year) {
                Some(set) => sets.push(set),
                None => return (Vec::new(), 0),
            }
        }
        if let Some(kind) = &filters.kind {
            match self.by_kind.get(kind) {
                Some(set) => sets.push(set),
                None => return (Vec::new(), 0),
            }
        }

        let candidates: Vec<u64> = if sets.is_empty() {
            self.items.keys().copied().collect()
        } else {
            sets.sort_by_key(|s| s.len());
            let (smallest, rest) = sets.split_at(1);
            smallest[0]
                .iter()
                .filter(|seq| rest.iter().all(|s| s.contains(*seq)))
                .copied()
                .collect()
        };

        let mut matched: Vec<&CatalogItem> = candidates
            .into_iter()
            .filter(|seq| match &query.keyword {
                Some(keyword) => self
                    .search_text
                    .get(seq)
                    .is_some_and(|text| text.contains(keyword.as_str())),
                None => true,
            })
            .filter_map(|seq| self.items.get(&seq))
            .collect();

        matched.sort_by(|a, b| compare(query.sort, a, b));

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .cloned()
            .collect();
        (page, total)
    }

    fn insert(&mut self, item: CatalogItem) {
        // Another record holding this slug loses it.
        if let Some(&seq) = self.by_slug.get(&item.slug) {
            if self.items.get(&seq).is_some_and(|held| held.id != item.id) {
                self.remove_seq(seq);
            }
        }

        let seq = match self.by_id.get(&item.id).copied() {
            Some(seq) => {
                self.unindex(seq);
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        self.index(seq, &item);
        self.items.insert(seq, item);
    }

    /// Remove by id, falling back to slug.
    fn remove(&mut self, key: &str) -> bool {
        let seq = self
            .by_id
            .get(key)
            .or_else(|| self.by_slug.get(key))
            .copied();
        match seq {
            Some(seq) => {
                self.remove_seq(seq);
                true
            }
            None => false,
        }
    }

    fn remove_seq(&mut self, seq: u64) {
        self.unindex(seq);
        self.items.remove(&seq);
    }

    fn index(&mut self, seq: u64, item: &CatalogItem) {
        self.by_id.insert(item.id.clone(), seq);
        self.by_slug.insert(item.slug.clone(), seq);
        for tag in &item.categories {
            self.by_category.entry(tag.slug.clone()).or_default().insert(seq);
        }
        for tag in &item.countries {
            self.by_country.entry(tag.slug.clone()).or_default().insert(seq);
        }
        if let Some(year) = item.year {
            self.by_year.entry(year).or_default().insert(seq);
        }
        if let Some(kind) = &item.kind {
            self.by_kind.entry(kind.clone()).or_default().insert(seq);
        }
        self.search_text.insert(seq, search_text(item));
    }

    fn unindex(&mut self, seq: u64) {
        let Some(item) = self.items.get(&seq) else {
            return;
        };
        if self.by_id.get(&item.id) == Some(&seq) {
            self.by_id.remove(&item.id);
        }
        if self.by_slug.get(&item.slug) == Some(&seq) {
            self.by_slug.remove(&item.slug);
        }
        for tag in &item.categories {
            remove_from(&mut self.by_category, &tag.slug, seq);
        }
        for tag in &item.countries {
            remove_from(&mut self.by_country, &tag.slug, seq);
        }
        if let Some(year) = item.year {
            remove_from(&mut self.by_year, &year, seq);
        }
        if let Some(kind) = &item.kind {
            remove_from(&mut self.by_kind, kind, seq);
        }
        self.search_text.remove(&seq);
    }
}

fn remove_from<K, Q>(index: &mut HashMap<K, BTreeSet<u64>>, key: &Q, seq: u64)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(set) = index.get_mut(key) {
        set.remove(&seq);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

fn search_text(item: &CatalogItem) -> String {
    format!(
        "{}\n{}\n{}",
        fold_text(&item.title),
        fold_text(&item.original_title),
        fold_text(&item.slug)
    )
}

fn compare(sort: SortOrder, a: &CatalogItem, b: &CatalogItem) -> Ordering {
    let primary = match sort {
        SortOrder::ModifiedDesc => b.upstream_modified_at.cmp(&a.upstream_modified_at),
        SortOrder::ModifiedAsc => a.upstream_modified_at.cmp(&b.upstream_modified_at),
        SortOrder::TitleAsc => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        // Items without a year sort last.
        SortOrder::YearDesc => match (a.year, b.year) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };
    primary.then_with(|| a.id.cmp(&b.id))
}
