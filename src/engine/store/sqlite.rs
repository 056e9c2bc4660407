//! SQLite state store with connection pooling

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::{StateKey, StateStore, StoreError};

pub type StorePool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteStore {
    pool: StorePool,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(4).build(manager)?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bundle_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // PRAGMA journal_mode returns a row, so it has to be queried
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(())
    }
}

impl StateStore for SqliteStore {
    fn get(&self, key: StateKey) -> Result<String, StoreError> {
        let conn = self.pool.get()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM bundle_state WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    fn put(&self, key: StateKey, value: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO bundle_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key.as_str(), value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upsert_overwrites() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get(StateKey::Version).unwrap(), "");

        store.put(StateKey::Version, "1.0.0").unwrap();
        store.put(StateKey::Version, "1.0.1").unwrap();
        assert_eq!(store.get(StateKey::Version).unwrap(), "1.0.1");
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("state.db");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.put(StateKey::PreviousPath, "/tmp/output_a/app.bundle").unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(
            store.get(StateKey::PreviousPath).unwrap(),
            "/tmp/output_a/app.bundle"
        );
    }
}
