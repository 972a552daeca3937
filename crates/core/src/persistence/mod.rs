//! Durable storage for query-cache snapshots.
//!
//! Callers see a single `save`/`load` contract. `TieredPersistence` picks the
//! backing store by blob size: small blobs go to a compact file store, large
//! ones to a checksummed block store.

mod block;
mod compact;
mod tiered;

pub use block::BlockStore;
pub use compact::CompactFileStore;
pub use tiered::{Tier, TieredPersistence};

use thiserror::Error;

/// Errors for persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence database error: {0}")]
    Database(String),

    /// Stored data failed integrity or format checks.
    #[error("persisted data is corrupt: {0}")]
    Corrupt(String),

    #[error("persisted schema version {found} does not match expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

impl PersistenceError {
    /// True if the stored copy should be discarded rather than retried.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Corrupt(_) | PersistenceError::VersionMismatch { .. }
        )
    }
}

/// Trait for snapshot storage backends.
pub trait PersistenceTier: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Store `blob` under `key`, replacing any previous value.
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError>;

    /// Load the blob stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}
