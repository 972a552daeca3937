//! Types for the catalog store (records, sync checkpoint, errors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A tagged string (category, country) as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Display name.
    pub name: String,
    /// Stable slug used for filtering.
    pub slug: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
        }
    }
}

/// Sort and deduplicate a tag collection by slug so it behaves as a set.
pub fn normalize_tags(mut tags: Vec<Tag>) -> Vec<Tag> {
    tags.retain(|t| !t.slug.is_empty());
    tags.sort_by(|a, b| a.slug.cmp(&b.slug).then_with(|| a.name.cmp(&b.name)));
    tags.dedup_by(|a, b| a.slug == b.slug);
    tags
}

/// One media record in the local catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Upstream-assigned identifier (primary key).
    pub id: String,
    /// Human-readable unique key.
    pub slug: String,
    pub title: String,
    pub original_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Upstream content type (e.g. "series", "single").
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub categories: Vec<Tag>,
    #[serde(default)]
    pub countries: Vec<Tag>,
    /// Last-modified time reported by upstream.
    pub upstream_modified_at: DateTime<Utc>,
    /// Local bookkeeping: when this record's content was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CatalogItem {
    /// Key used for deduplication: slug, falling back to id.
    pub fn dedup_key(&self) -> &str {
        if self.slug.is_empty() {
            &self.id
        } else {
            &self.slug
        }
    }

    /// Compare everything except local bookkeeping.
    pub fn same_content(&self, other: &CatalogItem) -> bool {
        self.id == other.id
            && self.slug == other.slug
            && self.title == other.title
            && self.original_title == other.original_title
            && self.year == other.year
            && self.kind == other.kind
            && self.categories == other.categories
            && self.countries == other.countries
            && self.upstream_modified_at == other.upstream_modified_at
    }

    pub fn has_category(&self, slug: &str) -> bool {
        self.categories.iter().any(|t| t.slug == slug)
    }

    pub fn has_country(&self, slug: &str) -> bool {
        self.countries.iter().any(|t| t.slug == slug)
    }
}

/// Phase recorded in the sync checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    #[default]
    None,
    FullInProgress,
    IncrementalInProgress,
    Idle,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::None => "none",
            SyncPhase::FullInProgress => "full-in-progress",
            SyncPhase::IncrementalInProgress => "incremental-in-progress",
            SyncPhase::Idle => "idle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(SyncPhase::None),
            "full-in-progress" => Some(SyncPhase::FullInProgress),
            "incremental-in-progress" => Some(SyncPhase::IncrementalInProgress),
            "idle" => Some(SyncPhase::Idle),
            _ => None,
        }
    }
}

/// Counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Items received from upstream (after decode).
    pub fetched: u64,
    /// Records inserted.
    pub new: u64,
    /// Records whose content changed.
    pub updated: u64,
    /// Pages that could not be fetched or parsed.
    pub failed: u64,
}

/// Durable checkpoint of sync progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub last_successful_sync_at: DateTime<Utc>,
    pub mode: SyncPhase,
    pub stats: SyncStats,
}

impl SyncCursor {
    /// Checkpoint for a store that has never been synced.
    pub fn initial() -> Self {
        Self {
            last_successful_sync_at: DateTime::<Utc>::UNIX_EPOCH,
            mode: SyncPhase::None,
            stats: SyncStats::default(),
        }
    }

    /// True if no sync has ever completed.
    pub fn never_synced(&self) -> bool {
        self.last_successful_sync_at == DateTime::<Utc>::UNIX_EPOCH
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::initial()
    }
}

/// Result of an upsert batch.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records as written (new or updated), with bookkeeping set.
    pub changed: Vec<CatalogItem>,
    /// Ids of rows evicted because another id claimed their slug.
    pub displaced: Vec<String>,
}

/// Result of a full replace.
#[derive(Debug, Clone, Default)]
pub struct ReplaceOutcome {
    pub total: u64,
    pub new: u64,
    pub updated: u64,
}

/// Errors for catalog store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("not found: {0}")]
    NotFound(String),
}
