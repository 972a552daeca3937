//! Block tier: large blobs split into fixed-size chunks in SQLite.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{PersistenceError, PersistenceTier};

/// Chunked blob store with a SHA-256 checksum per blob.
pub struct BlockStore {
    conn: Mutex<Connection>,
    block_size: usize,
}

impl BlockStore {
    /// Open (or create) a block store database at `path`.
    pub fn new(path: &Path, block_size: usize) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|e| PersistenceError::Database(e.to_string()))?;
        Self::with_connection(conn, block_size)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory(block_size: usize) -> Result<Self, PersistenceError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PersistenceError::Database(e.to_string()))?;
        Self::with_connection(conn, block_size)
    }

    fn with_connection(conn: Connection, block_size: usize) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                total_len INTEGER NOT NULL,
                block_count INTEGER NOT NULL,
                sha256 TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blocks (
                key TEXT NOT NULL,
                idx INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (key, idx)
            );
            "#,
        )
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            block_size: block_size.max(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistenceTier for BlockStore {
    fn name(&self) -> &str {
        "block"
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| PersistenceError::Database(e.to_string()))?;

        tx.execute("DELETE FROM blocks WHERE key = ?", params![key])
            .map_err(|e| PersistenceError::Database(e.to_string()))?;

        let chunks: Vec<&[u8]> = blob.chunks(self.block_size).collect();
        for (idx, chunk) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO blocks (key, idx, data) VALUES (?, ?, ?)",
                params![key, idx as i64, chunk],
            )
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        }

        tx.execute(
            "INSERT INTO blobs (key, total_len, block_count, sha256) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                total_len = excluded.total_len,
                block_count = excluded.block_count,
                sha256 = excluded.sha256",
            params![key, blob.len() as i64, chunks.len() as i64, sha256_hex(blob)],
        )
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let conn = self.lock();
        let header: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT total_len, block_count, sha256 FROM blobs WHERE key = ?",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| PersistenceError::Database(e.to_string()))?;

        let Some((total_len, block_count, checksum)) = header else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT idx, data FROM blocks WHERE key = ? ORDER BY idx")
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| PersistenceError::Database(e.to_string()))?;

        let mut blob = Vec::with_capacity(total_len.max(0) as usize);
        let mut expected_idx = 0i64;
        for row in rows {
            let (idx, data) = row.map_err(|e| PersistenceError::Database(e.to_string()))?;
            if idx != expected_idx {
                return Err(PersistenceError::Corrupt(format!(
                    "block {} missing for key {}",
                    expected_idx, key
                )));
            }
            blob.extend_from_slice(&data);
            expected_idx += 1;
        }

        if expected_idx != block_count || blob.len() as i64 != total_len {
            return Err(PersistenceError::Corrupt(format!(
                "expected {} bytes in {} blocks, found {} bytes in {} blocks",
                total_len,
                block_count,
                blob.len(),
                expected_idx
            )));
        }
        if sha256_hex(&blob) != checksum {
            return Err(PersistenceError::Corrupt(format!(
                "checksum mismatch for key {}",
                key
            )));
        }

        Ok(Some(blob))
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        tx.execute("DELETE FROM blocks WHERE key = ?", params![key])
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        tx.execute("DELETE FROM blobs WHERE key = ?", params![key])
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        tx.commit()
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_multi_block_blob() {
        let store = BlockStore::in_memory(16).unwrap();
        let data = blob(100);
        store.save("big", &data).unwrap();
        assert_eq!(store.load("big").unwrap().unwrap(), data);

        let blocks: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM blocks WHERE key = 'big'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(blocks, 7);
    }

    #[test]
    fn test_overwrite_shrinks_blocks() {
        let store = BlockStore::in_memory(10).unwrap();
        store.save("k", &blob(95)).unwrap();
        store.save("k", &blob(12)).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap(), blob(12));
    }

    #[test]
    fn test_empty_blob() {
        let store = BlockStore::in_memory(10).unwrap();
        store.save("empty", &[]).unwrap();
        assert_eq!(store.load("empty").unwrap().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_missing_key() {
        let store = BlockStore::in_memory(10).unwrap();
        assert!(store.load("nope").unwrap().is_none());
        store.remove("nope").unwrap();
    }

    #[test]
    fn test_tampered_block_is_corrupt() {
        let store = BlockStore::in_memory(8).unwrap();
        store.save("k", &blob(30)).unwrap();
        store
            .lock()
            .execute(
                "UPDATE blocks SET data = x'00000000000000ff' WHERE key = 'k' AND idx = 1",
                [],
            )
            .unwrap();

        let err = store.load("k").unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
        assert!(err.is_unreadable());
    }

    #[test]
    fn test_missing_block_is_corrupt() {
        let store = BlockStore::in_memory(8).unwrap();
        store.save("k", &blob(30)).unwrap();
        store
            .lock()
            .execute("DELETE FROM blocks WHERE key = 'k' AND idx = 2", [])
            .unwrap();

        assert!(matches!(store.load("k"), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        {
            let store = BlockStore::new(&path, 4).unwrap();
            store.save("k", b"persisted data").unwrap();
        }
        let store = BlockStore::new(&path, 4).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap(), b"persisted data");
    }
}
