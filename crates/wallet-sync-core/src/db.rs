// SQLite-backed key-value store.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::{PersistenceAdapter, PersistenceError};

/// Durable [`PersistenceAdapter`] holding one row per key in `kv_state`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and ensure the table
    /// exists. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned, which only happens if another thread
    /// panicked while holding the lock.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// When `key` was last written, as an RFC 3339 timestamp.
    pub fn updated_at(&self, key: &str) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT updated_at FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query updated_at")
    }
}

fn backend(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

impl PersistenceAdapter for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.conn()
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.conn()
            .execute("DELETE FROM kv_state WHERE key = ?1", params![key])
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> SqliteStore {
        SqliteStore::open(":memory:").expect("in-memory db should open")
    }

    #[test]
    fn open_creates_table() {
        let db = test_db();
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv_state'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn get_missing_key_is_none() {
        let db = test_db();
        assert_eq!(db.get("nope").unwrap(), None);
    }

    #[test]
    fn set_overwrites_previous_value() {
        let db = test_db();
        db.set("selected", "Phantom:A1").unwrap();
        db.set("selected", "Phantom:A2").unwrap();
        assert_eq!(db.get("selected").unwrap().as_deref(), Some("Phantom:A2"));
    }

    #[test]
    fn remove_deletes_and_is_idempotent() {
        let db = test_db();
        db.set("selected", "Phantom:A1").unwrap();
        db.remove("selected").unwrap();
        db.remove("selected").unwrap();
        assert_eq!(db.get("selected").unwrap(), None);
    }

    #[test]
    fn set_records_timestamp() {
        let db = test_db();
        assert_eq!(db.updated_at("selected").unwrap(), None);
        db.set("selected", "Phantom:A1").unwrap();
        let ts = db.updated_at("selected").unwrap().expect("timestamp recorded");
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "bad timestamp: {ts}");
    }

    #[test]
    fn values_persist_across_reopen() {
        let path = std::env::temp_dir().join("wallet_sync_db_reopen.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        {
            let db = SqliteStore::open(path_str).unwrap();
            db.set("selected", "Solflare:B1").unwrap();
        }
        let db = SqliteStore::open(path_str).unwrap();
        assert_eq!(db.get("selected").unwrap().as_deref(), Some("Solflare:B1"));

        drop(db);
        let _ = std::fs::remove_file(&path);
    }
}
