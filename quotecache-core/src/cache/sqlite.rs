//! SQLite-backed L3 store.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::entry::{CacheEntry, Tier};
use super::store::{DurableStore, KeyPattern, StoreError};
use crate::key::CacheKey;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    scope TEXT,
    value BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
CREATE INDEX IF NOT EXISTS idx_cache_entries_scope ON cache_entries(scope);
"#;

/// Durable store in a single SQLite file. One connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DurableStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT scope, value, created_at, expires_at FROM cache_entries WHERE key = ?1",
                params![key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(scope, value, created_at, expires_at)| CacheEntry {
            key: key.clone(),
            value,
            scope,
            created_at,
            expires_at,
            tier_of_origin: Tier::Durable,
        }))
    }

    fn set(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO cache_entries (key, scope, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.key.as_str(),
                entry.scope,
                entry.value,
                entry.created_at,
                entry.expires_at
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key.as_str()])?;
        Ok(removed > 0)
    }

    fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let removed = match pattern {
            KeyPattern::Exact(key) => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key.as_str()])?
            }
            KeyPattern::All => conn.execute("DELETE FROM cache_entries", [])?,
            KeyPattern::Endpoint(_) => {
                let prefix = pattern.prefix();
                conn.execute(
                    "DELETE FROM cache_entries WHERE substr(key, 1, ?2) = ?1",
                    params![prefix, prefix.len() as i64],
                )?
            }
            KeyPattern::Scope(symbol) => {
                conn.execute("DELETE FROM cache_entries WHERE scope = ?1", params![symbol])?
            }
        };
        Ok(removed)
    }

    fn prune_expired(&self, now_ms: i64) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now_ms])?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
