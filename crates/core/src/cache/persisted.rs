//! On-disk envelope for query snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::{QuerySnapshot, SnapshotSource};
use crate::catalog::CatalogItem;
use crate::persistence::PersistenceError;

/// Persistence key for the catalog snapshot.
pub const SNAPSHOT_KEY: &str = "catalog-snapshot";

/// Bumped whenever the envelope or `CatalogItem` layout changes.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
    pub items: Vec<CatalogItem>,
}

/// Read only the version so a newer layout is reported as a mismatch, not
/// as corruption.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    schema_version: u32,
}

impl PersistedSnapshot {
    pub fn from_snapshot(snapshot: &QuerySnapshot) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            generation: snapshot.generation(),
            saved_at: Utc::now(),
            items: snapshot.items().cloned().collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(self).map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let header: Header = serde_json::from_slice(bytes)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(PersistenceError::VersionMismatch {
                found: header.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }

    /// Age relative to `now`, clamped at zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.saved_at).max(chrono::Duration::zero())
    }

    pub fn into_snapshot(self) -> QuerySnapshot {
        QuerySnapshot::build(self.items, self.generation, SnapshotSource::Persisted)
    }
}
