//! Validation verdict cache
//!
//! Remembers, per archive identity (absolute path or URI string), the
//! last-modified timestamp the archive had when it last passed validation.
//! A later validation of the same archive with the same non-zero timestamp can
//! skip the full scan.
//!
//! The cache is advisory. Backend failures are logged and treated as misses,
//! so validation keeps working (with a full scan every time) when the store
//! is unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};

/// Storage backend for the verdict cache
pub trait VerdictStore: Send + Sync {
    /// Timestamp recorded for `key`, if any
    fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Insert or overwrite the timestamp for `key`
    fn put(&self, key: &str, modified: i64) -> Result<()>;
}

/// SQLite-backed store, survives process restarts
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the store at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        store.init_schema()?;

        info!("Opened validation cache at {}", db_path.display());
        Ok(store)
    }

    /// Non-persistent store, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checked_files (
                -- Absolute path or URI string of the archive
                key TEXT PRIMARY KEY,

                -- Last-modified time (ms) of the archive when it passed validation
                modified INTEGER NOT NULL,

                -- When the verdict was recorded (unix seconds)
                checked_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ArchiveError::Cache("connection mutex poisoned".to_string()))
    }
}

impl VerdictStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<i64>> {
        let modified = self
            .lock()?
            .query_row(
                "SELECT modified FROM checked_files WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(modified)
    }

    fn put(&self, key: &str, modified: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.lock()?.execute(
            r#"
            INSERT INTO checked_files (key, modified, checked_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                modified = ?2,
                checked_at = ?3
            "#,
            params![key, modified, now],
        )?;
        Ok(())
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VerdictStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<i64>> {
        let map = self
            .map
            .lock()
            .map_err(|_| ArchiveError::Cache("map mutex poisoned".to_string()))?;
        Ok(map.get(key).copied())
    }

    fn put(&self, key: &str, modified: i64) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| ArchiveError::Cache("map mutex poisoned".to_string()))?;
        map.insert(key.to_string(), modified);
        Ok(())
    }
}

/// Verdict cache over an injectable backend
#[derive(Clone)]
pub struct ValidationCache {
    store: Arc<dyn VerdictStore>,
}

impl ValidationCache {
    pub fn new(store: impl VerdictStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Persistent cache at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteStore::open(db_path)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// True if `key` last validated at exactly `modified`.
    ///
    /// An unknown (zero) timestamp never matches.
    pub fn is_known_valid(&self, key: &str, modified: i64) -> bool {
        if modified == 0 {
            return false;
        }
        match self.store.get(key) {
            Ok(Some(stored)) => stored == modified,
            Ok(None) => false,
            Err(e) => {
                warn!("Validation cache lookup failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Remember a positive verdict. Zero timestamps are not recorded.
    pub fn record_valid(&self, key: &str, modified: i64) {
        if modified == 0 {
            debug!("Not caching verdict for {}: timestamp unknown", key);
            return;
        }
        if let Err(e) = self.store.put(key, modified) {
            warn!("Failed to record validation verdict for {}: {}", key, e);
        }
    }
}
