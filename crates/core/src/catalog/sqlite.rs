//! SQLite-backed catalog store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{info, warn};

use super::{
    CatalogItem, CatalogStore, ReplaceOutcome, StoreError, SyncCursor, SyncPhase, SyncStats, Tag,
    UpsertOutcome,
};

/// On-disk layout version. A database written with a different version is
/// discarded and rebuilt on open.
const SCHEMA_VERSION: i64 = 2;

const ITEM_COLUMNS: &str = "id, slug, title, original_title, year, kind, categories, countries, \
                            upstream_modified_at, last_synced_at";

/// SQLite-backed catalog store.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    /// Open (or create) the catalog database at `path`.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Write(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Write(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| StoreError::Read(e.to_string()))?;

        if version != 0 && version != SCHEMA_VERSION {
            warn!(
                found = version,
                expected = SCHEMA_VERSION,
                "Catalog schema version mismatch, discarding stored catalog"
            );
            conn.execute_batch(
                "DROP TABLE IF EXISTS catalog_items;
                 DROP TABLE IF EXISTS sync_cursor;",
            )
            .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                original_title TEXT NOT NULL,
                year INTEGER,
                kind TEXT,
                categories TEXT NOT NULL,
                countries TEXT NOT NULL,
                upstream_modified_at TEXT NOT NULL,
                last_synced_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_catalog_items_modified
                ON catalog_items(upstream_modified_at);

            -- Single-row sync checkpoint
            CREATE TABLE IF NOT EXISTS sync_cursor (
                singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
                last_successful_sync_at TEXT NOT NULL,
                mode TEXT NOT NULL,
                fetched INTEGER NOT NULL DEFAULT 0,
                new_count INTEGER NOT NULL DEFAULT 0,
                updated_count INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<CatalogItem> {
        let categories: String = row.get(6)?;
        let countries: String = row.get(7)?;
        let modified: String = row.get(8)?;
        let synced: Option<String> = row.get(9)?;

        Ok(CatalogItem {
            id: row.get(0)?,
            slug: row.get(1)?,
            title: row.get(2)?,
            original_title: row.get(3)?,
            year: row.get(4)?,
            kind: row.get(5)?,
            categories: decode_tags(6, &categories)?,
            countries: decode_tags(7, &countries)?,
            upstream_modified_at: decode_time(8, &modified)?,
            last_synced_at: synced.map(|s| decode_time(9, &s)).transpose()?,
        })
    }

    fn query_one(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> Result<Option<CatalogItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE {} = ?",
            ITEM_COLUMNS, column
        );
        conn.query_row(&sql, params![value], Self::row_to_item)
            .optional()
            .map_err(|e| StoreError::Read(e.to_string()))
    }

    fn load_all(conn: &Connection) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!("SELECT {} FROM catalog_items ORDER BY seq", ITEM_COLUMNS);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Read(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_item)
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| StoreError::Read(e.to_string()))?);
        }
        Ok(items)
    }

    fn insert_item(tx: &Transaction, item: &CatalogItem) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO catalog_items (id, slug, title, original_title, year, kind, categories,
                                        countries, upstream_modified_at, last_synced_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                &item.id,
                &item.slug,
                &item.title,
                &item.original_title,
                item.year,
                &item.kind,
                encode_tags(&item.categories)?,
                encode_tags(&item.countries)?,
                encode_time(&item.upstream_modified_at),
                item.last_synced_at.as_ref().map(encode_time),
            ],
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    fn update_item(tx: &Transaction, item: &CatalogItem) -> Result<(), StoreError> {
        tx.execute(
            "UPDATE catalog_items SET slug = ?, title = ?, original_title = ?, year = ?, kind = ?,
                    categories = ?, countries = ?, upstream_modified_at = ?, last_synced_at = ?
             WHERE id = ?",
            params![
                &item.slug,
                &item.title,
                &item.original_title,
                item.year,
                &item.kind,
                encode_tags(&item.categories)?,
                encode_tags(&item.countries)?,
                encode_time(&item.upstream_modified_at),
                item.last_synced_at.as_ref().map(encode_time),
                &item.id,
            ],
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn upsert_many(
        &self,
        items: &[CatalogItem],
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Write(e.to_string()))?;
        let mut outcome = UpsertOutcome::default();

        for item in items {
            // Another id already owns this slug: the newer record wins the key.
            let squatter: Option<String> = tx
                .query_row(
                    "SELECT id FROM catalog_items WHERE slug = ? AND id != ?",
                    params![&item.slug, &item.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Read(e.to_string()))?;
            if let Some(old_id) = squatter {
                tx.execute("DELETE FROM catalog_items WHERE id = ?", params![&old_id])
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                outcome.displaced.push(old_id);
            }

            let existing = Self::query_one(&tx, "id", &item.id)?;
            let mut stored = item.clone();
            stored.last_synced_at = Some(synced_at);

            match existing {
                None => {
                    Self::insert_item(&tx, &stored)?;
                    outcome.new += 1;
                    outcome.changed.push(stored);
                }
                Some(current) if current.same_content(item) => {
                    outcome.unchanged += 1;
                }
                Some(_) => {
                    Self::update_item(&tx, &stored)?;
                    outcome.updated += 1;
                    outcome.changed.push(stored);
                }
            }
        }

        tx.commit().map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(outcome)
    }

    fn replace_all(
        &self,
        items: &[CatalogItem],
        synced_at: DateTime<Utc>,
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut conn = self.lock();
        let previous: HashMap<String, CatalogItem> = Self::load_all(&conn)?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();

        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Write(e.to_string()))?;
        tx.execute("DELETE FROM catalog_items", [])
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let mut outcome = ReplaceOutcome::default();
        for item in items {
            let mut stored = item.clone();
            stored.last_synced_at = match previous.get(&item.id) {
                Some(old) if old.same_content(item) => old.last_synced_at,
                Some(_) => {
                    outcome.updated += 1;
                    Some(synced_at)
                }
                None => {
                    outcome.new += 1;
                    Some(synced_at)
                }
            };
            Self::insert_item(&tx, &stored)?;
            outcome.total += 1;
        }

        tx.commit().map_err(|e| StoreError::Write(e.to_string()))?;
        info!(
            total = outcome.total,
            new = outcome.new,
            updated = outcome.updated,
            "Catalog replaced"
        );
        Ok(outcome)
    }

    fn remove_many(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let mut removed = Vec::new();
        for key in keys {
            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM catalog_items WHERE id = ?1 OR slug = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Read(e.to_string()))?;
            if let Some(id) = id {
                tx.execute("DELETE FROM catalog_items WHERE id = ?", params![&id])
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                removed.push(id);
            }
        }

        tx.commit().map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(removed)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<CatalogItem>, StoreError> {
        let conn = self.lock();
        Self::query_one(&conn, "id", id)
    }

    fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogItem>, StoreError> {
        let conn = self.lock();
        Self::query_one(&conn, "slug", slug)
    }

    fn all(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let conn = self.lock();
        Self::load_all(&conn)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM catalog_items", [], |row| row.get(0))
            .map_err(|e| StoreError::Read(e.to_string()))?;
        Ok(count as u64)
    }

    fn load_cursor(&self) -> Result<SyncCursor, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT last_successful_sync_at, mode, fetched, new_count, updated_count, failed
                 FROM sync_cursor WHERE singleton = 1",
                [],
                |row| {
                    let at: String = row.get(0)?;
                    let mode: String = row.get(1)?;
                    Ok(SyncCursor {
                        last_successful_sync_at: decode_time(0, &at)?,
                        mode: SyncPhase::parse(&mode).unwrap_or_default(),
                        stats: SyncStats {
                            fetched: row.get::<_, i64>(2)? as u64,
                            new: row.get::<_, i64>(3)? as u64,
                            updated: row.get::<_, i64>(4)? as u64,
                            failed: row.get::<_, i64>(5)? as u64,
                        },
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::Read(e.to_string()))?;

        Ok(row.unwrap_or_else(SyncCursor::initial))
    }

    fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_cursor (singleton, last_successful_sync_at, mode, fetched, new_count,
                                      updated_count, failed)
             VALUES (1, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(singleton) DO UPDATE SET
                last_successful_sync_at = excluded.last_successful_sync_at,
                mode = excluded.mode,
                fetched = excluded.fetched,
                new_count = excluded.new_count,
                updated_count = excluded.updated_count,
                failed = excluded.failed",
            params![
                encode_time(&cursor.last_successful_sync_at),
                cursor.mode.as_str(),
                cursor.stats.fetched as i64,
                cursor.stats.new as i64,
                cursor.stats.updated as i64,
                cursor.stats.failed as i64,
            ],
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}

fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_time(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn encode_tags(tags: &[Tag]) -> Result<String, StoreError> {
    serde_json::to_string(tags).map_err(|e| StoreError::Write(e.to_string()))
}

fn decode_tags(column: usize, s: &str) -> rusqlite::Result<Vec<Tag>> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::TimeZone;

    fn create_test_store() -> SqliteCatalogStore {
        SqliteCatalogStore::in_memory().unwrap()
    }

    #[test]
    fn test_upsert_new_and_find() {
        let store = create_test_store();
        let item = fixtures::catalog_item("one-piece", 10);

        let outcome = store.upsert_many(&[item.clone()], Utc::now()).unwrap();
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.updated, 0);

        let by_id = store.find_by_id(&item.id).unwrap().unwrap();
        assert!(by_id.same_content(&item));
        assert!(by_id.last_synced_at.is_some());

        let by_slug = store.find_by_slug("one-piece").unwrap().unwrap();
        assert_eq!(by_slug.id, item.id);
    }

    #[test]
    fn test_upsert_identical_is_noop() {
        let store = create_test_store();
        let item = fixtures::catalog_item("naruto", 5);
        let first_sync = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store.upsert_many(&[item.clone()], first_sync).unwrap();
        let before = store.all().unwrap();

        let outcome = store.upsert_many(&[item], Utc::now()).unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.new + outcome.updated, 0);
        assert!(outcome.changed.is_empty());
        assert_eq!(store.all().unwrap(), before);
    }

    #[test]
    fn test_upsert_changed_content_updates() {
        let store = create_test_store();
        let item = fixtures::catalog_item("bleach", 5);
        store.upsert_many(&[item.clone()], Utc::now()).unwrap();

        let mut changed = item.clone();
        changed.title = "Bleach: TYBW".to_string();
        changed.upstream_modified_at = fixtures::minutes(6);

        let outcome = store.upsert_many(&[changed], Utc::now()).unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.changed[0].title, "Bleach: TYBW");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_slug_claimed_by_new_id_displaces_old_row() {
        let store = create_test_store();
        let old = fixtures::catalog_item("frieren", 1);
        store.upsert_many(&[old.clone()], Utc::now()).unwrap();

        let mut reissued = fixtures::catalog_item("frieren", 2);
        reissued.id = "new-id".to_string();
        let outcome = store.upsert_many(&[reissued], Utc::now()).unwrap();

        assert_eq!(outcome.displaced, vec![old.id.clone()]);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.find_by_id(&old.id).unwrap().is_none());
        assert_eq!(store.find_by_slug("frieren").unwrap().unwrap().id, "new-id");
    }

    #[test]
    fn test_replace_all_swaps_contents() {
        let store = create_test_store();
        store
            .upsert_many(
                &[
                    fixtures::catalog_item("a", 1),
                    fixtures::catalog_item("b", 2),
                ],
                Utc::now(),
            )
            .unwrap();

        let outcome = store
            .replace_all(
                &[
                    fixtures::catalog_item("b", 2),
                    fixtures::catalog_item("c", 3),
                ],
                Utc::now(),
            )
            .unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.updated, 0);
        let slugs: Vec<String> = store.all().unwrap().into_iter().map(|i| i.slug).collect();
        assert_eq!(slugs, vec!["b", "c"]);
    }

    #[test]
    fn test_replace_all_keeps_sync_time_of_unchanged_records() {
        let store = create_test_store();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let item = fixtures::catalog_item("kept", 1);
        store.replace_all(&[item.clone()], first).unwrap();
        store.replace_all(&[item.clone()], Utc::now()).unwrap();

        let stored = store.find_by_id(&item.id).unwrap().unwrap();
        assert_eq!(stored.last_synced_at, Some(first));
    }

    #[test]
    fn test_remove_many_by_id_or_slug() {
        let store = create_test_store();
        let a = fixtures::catalog_item("a", 1);
        let b = fixtures::catalog_item("b", 2);
        store.upsert_many(&[a.clone(), b.clone()], Utc::now()).unwrap();

        let removed = store
            .remove_many(&[a.id.clone(), "b".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, vec![a.id, b.id]);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_all_preserves_insertion_order() {
        let store = create_test_store();
        for slug in ["z", "a", "m"] {
            store
                .upsert_many(&[fixtures::catalog_item(slug, 1)], Utc::now())
                .unwrap();
        }
        let slugs: Vec<String> = store.all().unwrap().into_iter().map(|i| i.slug).collect();
        assert_eq!(slugs, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_cursor_defaults_then_persists() {
        let store = create_test_store();
        assert!(store.load_cursor().unwrap().never_synced());

        let cursor = SyncCursor {
            last_successful_sync_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            mode: SyncPhase::Idle,
            stats: SyncStats {
                fetched: 10,
                new: 4,
                updated: 3,
                failed: 1,
            },
        };
        store.save_cursor(&cursor).unwrap();
        assert_eq!(store.load_cursor().unwrap(), cursor);
    }

    #[test]
    fn test_schema_mismatch_discards_old_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let store = SqliteCatalogStore::new(&path).unwrap();
            store
                .upsert_many(&[fixtures::catalog_item("old", 1)], Utc::now())
                .unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let store = SqliteCatalogStore::new(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.load_cursor().unwrap().never_synced());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let store = SqliteCatalogStore::new(&path).unwrap();
            store
                .upsert_many(&[fixtures::catalog_item("kept", 1)], Utc::now())
                .unwrap();
        }
        let store = SqliteCatalogStore::new(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
