//! Size-based selection between the compact and block tiers.

use tracing::{debug, warn};

use super::{BlockStore, CompactFileStore, PersistenceError, PersistenceTier};
use crate::config::PersistenceConfig;
use crate::metrics;

/// Which backing store holds a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Compact,
    Block,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Compact => "compact",
            Tier::Block => "block",
        }
    }
}

/// Persistence that routes blobs below `threshold` bytes to the compact
/// store and everything else to the block store.
///
/// A key lives in exactly one tier: saving to one tier removes the key from
/// the other.
pub struct TieredPersistence {
    compact: CompactFileStore,
    block: BlockStore,
    threshold: usize,
}

impl TieredPersistence {
    pub fn new(compact: CompactFileStore, block: BlockStore, threshold: usize) -> Self {
        Self {
            compact,
            block,
            threshold,
        }
    }

    /// Open both tiers under `config.dir`.
    pub fn open(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        let compact = CompactFileStore::new(&config.dir)?;
        let block = BlockStore::new(&config.dir.join("blocks.db"), config.block_size_bytes)?;
        Ok(Self::new(compact, block, config.compact_threshold_bytes))
    }

    pub fn tier_for(&self, len: usize) -> Tier {
        if len < self.threshold {
            Tier::Compact
        } else {
            Tier::Block
        }
    }

    fn tier(&self, tier: Tier) -> &dyn PersistenceTier {
        match tier {
            Tier::Compact => &self.compact,
            Tier::Block => &self.block,
        }
    }
}

impl PersistenceTier for TieredPersistence {
    fn name(&self) -> &str {
        "tiered"
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let chosen = self.tier_for(blob.len());
        let other = match chosen {
            Tier::Compact => Tier::Block,
            Tier::Block => Tier::Compact,
        };

        let result = self.tier(chosen).save(key, blob);
        let outcome = if result.is_ok() { "success" } else { "failed" };
        metrics::PERSISTENCE_WRITES
            .with_label_values(&[chosen.as_str(), outcome])
            .inc();
        result?;

        debug!(key, bytes = blob.len(), tier = chosen.as_str(), "Blob persisted");

        if let Err(e) = self.tier(other).remove(key) {
            warn!(key, tier = other.as_str(), "Failed to remove stale copy: {}", e);
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        if let Some(blob) = self.compact.load(key)? {
            return Ok(Some(blob));
        }
        self.block.load(key)
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.compact.remove(key)?;
        self.block.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiered(dir: &TempDir, threshold: usize) -> TieredPersistence {
        TieredPersistence::new(
            CompactFileStore::new(dir.path()).unwrap(),
            BlockStore::in_memory(8).unwrap(),
            threshold,
        )
    }

    #[test]
    fn test_small_blob_goes_to_compact() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 64);
        store.save("k", b"small").unwrap();

        assert_eq!(store.compact.load("k").unwrap().unwrap(), b"small");
        assert!(store.block.load("k").unwrap().is_none());
        assert_eq!(store.load("k").unwrap().unwrap(), b"small");
    }

    #[test]
    fn test_large_blob_goes_to_block() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 16);
        let big = vec![7u8; 100];
        store.save("k", &big).unwrap();

        assert!(store.compact.load("k").unwrap().is_none());
        assert_eq!(store.block.load("k").unwrap().unwrap(), big);
        assert_eq!(store.load("k").unwrap().unwrap(), big);
    }

    #[test]
    fn test_tier_switch_removes_stale_copy() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 16);
        store.save("k", &vec![1u8; 100]).unwrap();
        store.save("k", b"tiny").unwrap();

        assert!(store.block.load("k").unwrap().is_none());
        assert_eq!(store.load("k").unwrap().unwrap(), b"tiny");

        store.save("k", &vec![2u8; 50]).unwrap();
        assert!(store.compact.load("k").unwrap().is_none());
        assert_eq!(store.load("k").unwrap().unwrap(), vec![2u8; 50]);
    }

    #[test]
    fn test_threshold_boundary() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 10);
        assert_eq!(store.tier_for(9), Tier::Compact);
        assert_eq!(store.tier_for(10), Tier::Block);
    }

    #[test]
    fn test_open_from_config() {
        let dir = TempDir::new().unwrap();
        let config = PersistenceConfig {
            dir: dir.path().join("snapshots"),
            compact_threshold_bytes: 4,
            block_size_bytes: 2,
        };
        let store = TieredPersistence::open(&config).unwrap();
        store.save("k", b"block me").unwrap();
        assert!(dir.path().join("snapshots/blocks.db").exists());
        assert_eq!(store.load("k").unwrap().unwrap(), b"block me");
    }

    #[test]
    fn test_remove_clears_both() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 16);
        store.save("k", b"x").unwrap();
        store.remove("k").unwrap();
        assert!(store.load("k").unwrap().is_none());
    }
}
