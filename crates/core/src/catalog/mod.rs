//! Catalog store - the durable, deduplicated collection of media records.
//!
//! Only the synchronizer writes here. Readers go through the query cache and
//! fall back to the store when the hot tier is not ready.

mod sqlite;
mod types;

pub use sqlite::SqliteCatalogStore;
pub use types::*;

use chrono::{DateTime, Utc};

/// Trait for catalog storage backends.
pub trait CatalogStore: Send + Sync {
    /// Insert new records and overwrite changed ones, in one transaction.
    ///
    /// Records whose content is identical to the stored copy are left
    /// untouched, so re-applying the same batch is a no-op.
    fn upsert_many(
        &self,
        items: &[CatalogItem],
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Atomically replace the whole catalog with `items`.
    fn replace_all(
        &self,
        items: &[CatalogItem],
        synced_at: DateTime<Utc>,
    ) -> Result<ReplaceOutcome, StoreError>;

    /// Delete records by id or slug. Returns the ids actually removed.
    fn remove_many(&self, keys: &[String]) -> Result<Vec<String>, StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<CatalogItem>, StoreError>;

    fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogItem>, StoreError>;

    /// Every record, in insertion order.
    fn all(&self) -> Result<Vec<CatalogItem>, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;

    /// Load the sync checkpoint, creating the initial one if absent.
    fn load_cursor(&self) -> Result<SyncCursor, StoreError>;

    fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError>;
}
