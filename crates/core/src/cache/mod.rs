//! Query cache (hot tier).
//!
//! Serves keyword/filter/sort searches from an immutable in-memory snapshot
//! of the catalog. Full syncs rebuild the snapshot, incremental syncs merge
//! into it, and every new snapshot is written to the persistence tier so a
//! restarted process can serve stale-but-available results before its first
//! sync completes.

mod persisted;
mod query;
mod query_cache;
mod snapshot;

pub use persisted::{PersistedSnapshot, SNAPSHOT_KEY, SNAPSHOT_SCHEMA_VERSION};
pub use query::{page_count, NormalizedQuery, SearchFilters, SearchPage, SearchQuery, SortOrder};
pub use query_cache::{QueryCache, WarmStart};
pub use snapshot::{QuerySnapshot, SnapshotSource};
