//! Credential records in SQLite

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::ObjectBackend;
use crate::credential::error::{StoreError, StoreResult};

/// SQLite-based object backend, one row per key
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &str) -> StoreResult<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::ObjectStorage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(db_path)?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init_tables()?;
        Ok(backend)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init_tables()?;
        Ok(backend)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::ObjectStorage("sqlite connection poisoned".to_string()))
    }

    fn init_tables(&self) -> StoreResult<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                user_identity TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let record = String::from_utf8(bytes)
            .map_err(|_| StoreError::Corrupt("record is not UTF-8".to_string()))?;
        // Single statement, so the replace is atomic.
        self.conn()?.execute(
            "INSERT OR REPLACE INTO credentials (user_identity, record, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, record, Utc::now().to_rfc3339()],
        )?;
        debug!("sqlite: wrote {}", key);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM credentials WHERE user_identity = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.map(String::into_bytes))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.conn()?
            .execute("DELETE FROM credentials WHERE user_identity = ?1", params![key])?;
        Ok(())
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_identity FROM credentials ORDER BY user_identity")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.put_object("u1", b"{\"a\":1}".to_vec()).await.unwrap();

        let loaded = backend.get_object("u1").await.unwrap();
        assert_eq!(loaded, Some(b"{\"a\":1}".to_vec()));
        assert_eq!(backend.get_object("u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_keeps_single_row() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.put_object("u1", b"old".to_vec()).await.unwrap();
        backend.put_object("u1", b"new".to_vec()).await.unwrap();

        assert_eq!(backend.list_keys().await.unwrap(), vec!["u1".to_string()]);
        assert_eq!(backend.get_object("u1").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.put_object("u1", b"x".to_vec()).await.unwrap();
        backend.delete_object("u1").await.unwrap();
        backend.delete_object("u1").await.unwrap();

        assert!(backend.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/credentials.db");
        let path = path.to_str().unwrap();

        SqliteBackend::new(path)
            .unwrap()
            .put_object("u1", b"x".to_vec())
            .await
            .unwrap();

        let reopened = SqliteBackend::new(path).unwrap();
        assert_eq!(reopened.get_object("u1").await.unwrap(), Some(b"x".to_vec()));
    }
}
