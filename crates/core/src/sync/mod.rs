//! Catalog synchronization.
//!
//! The `Synchronizer` pulls pages from the upstream feed and reconciles them
//! into the catalog store, either rebuilding everything (full sync) or
//! applying records changed since the last checkpoint (incremental sync).
//! It is the only writer of the store and the sync cursor.

mod dedup;
mod events;
mod full;
mod incremental;
mod retry;
mod synchronizer;
mod types;

pub use dedup::DedupSet;
pub use events::{SyncEvent, SyncEvents, SyncListener, SyncProgress};
pub use retry::{fetch_with_retry, RetryBudget, RetryPolicy};
pub use synchronizer::{FeedEndpoints, Synchronizer};
pub use types::*;
