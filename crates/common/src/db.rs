//! SQLite database for consolegate state persistence

use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default time a writer waits on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    lock_timeout: Duration,
}

impl Database {
    /// Expose the underlying connection for subsystems that manage their own
    /// tables within the shared state DB.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Same database, waiting at most `timeout` for the connection
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Time `lock` waits for the connection
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Lock the connection, giving up after the configured timeout
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.lock_for(self.lock_timeout)
    }

    /// Lock the connection, giving up after `timeout` with `Error::StoreTimeout`
    pub fn lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(timeout)
            .ok_or(Error::StoreTimeout {
                millis: timeout.as_millis() as u64,
            })
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create database at path with an explicit busy timeout
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_timeout: busy_timeout,
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Console access tickets
            CREATE TABLE IF NOT EXISTS console_tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket TEXT NOT NULL,
                vm_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                taken_at INTEGER,
                removed INTEGER,
                UNIQUE (vm_id, ticket)
            );
            CREATE INDEX IF NOT EXISTS idx_console_tickets_created ON console_tickets(created_at);

            -- VM inventory (owned by the orchestration layer, read-only here)
            CREATE TABLE IF NOT EXISTS vm_instances (
                id INTEGER PRIMARY KEY,
                uuid TEXT NOT NULL UNIQUE,
                instance_name TEXT NOT NULL,
                host_id INTEGER,
                vnc_password TEXT NOT NULL
            );

            -- Host inventory (owned by the orchestration layer, read-only here)
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unknown',
                agent_address TEXT
            );

            -- Key-value store for misc state
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Key-value store
    // ========================================================================

    /// Set a key-value pair
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;

        Ok(())
    }

    /// Get a value by key
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_store() {
        let db = Database::open_memory().unwrap();

        assert!(db.kv_get("missing").unwrap().is_none());

        db.kv_set("console.key", "one").unwrap();
        db.kv_set("console.key", "two").unwrap();
        assert_eq!(db.kv_get("console.key").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_lock_gives_up_after_timeout() {
        let db = Database::open_memory()
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        let conn = db.connection();
        let _held = conn.lock();

        let started = std::time::Instant::now();
        let err = db.kv_get("console.key").unwrap_err();
        assert!(matches!(err, Error::StoreTimeout { millis: 50 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_lock_succeeds_when_free() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.lock_timeout(), DEFAULT_BUSY_TIMEOUT);
        let conn = db.lock().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let db = Database::open(&path).unwrap();
            db.kv_set("k", "v").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_schema_tables_exist() {
        let db = Database::open_memory().unwrap();
        let conn = db.connection();
        let conn = conn.lock();
        for table in ["console_tickets", "vm_instances", "hosts", "kv_store"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
