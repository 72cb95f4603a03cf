//! Durable local key/value store backing the registry index
//!
//! Plain single-writer persistence: group key material, the metadata
//! index and application-local values all live here. SQLite carries the
//! durable form; the in-memory store backs tests.

use crate::sync_ext::MutexExt;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Local persistence errors, with the failing operation and key attached
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open local store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("local store {op} failed for key '{key}': {reason}")]
    Op {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("metadata codec: {0}")]
    Codec(String),
}

impl StoreError {
    fn op(op: &'static str, key: &str, source: rusqlite::Error) -> Self {
        StoreError::Op {
            op,
            key: key.to_string(),
            reason: source.to_string(),
        }
    }
}

/// Plain key/value persistence used by the registry.
///
/// Failure to open the backing storage is fatal to the registry; failures
/// of individual operations are propagated with context and handled (or
/// deliberately logged-and-ignored) by callers.
pub trait LocalStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// All keys starting with `prefix`, in key order
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::migrate(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: ":memory:".to_string(),
            source: e,
        })?;
        Self::migrate(conn)
    }

    fn migrate(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )
        .map_err(|e| StoreError::op("migrate", "kv", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn like_pattern(prefix: &str) -> String {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("{escaped}%")
    }
}

impl LocalStore for SqliteStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.conn
            .guard()
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| StoreError::op("put", key, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .guard()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
            .map_err(|e| StoreError::op("get", key, e))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .guard()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| StoreError::op("delete", key, e))?;
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.guard();
        let mut statement = conn
            .prepare("SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")
            .map_err(|e| StoreError::op("list", prefix, e))?;
        let rows = statement
            .query_map(params![Self::like_pattern(prefix)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| StoreError::op("list", prefix, e))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| StoreError::op("list", prefix, e))?);
        }
        Ok(keys)
    }
}

/// In-memory store for tests.
///
/// `fail_deletes` simulates a storage layer that refuses purges, which is
/// how the best-effort delete path gets exercised.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl LocalStore for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.map.guard().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.guard().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Op {
                op: "delete",
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.map.guard().remove(key);
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .map
            .guard()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
