//! SQLite-backed persistent value store

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::persist::{VALUE_TYPE_EPHEMERAL, VALUE_TYPE_MONTH, VALUE_TYPE_PERMANENT, VALUE_TYPE_YEAR};

const PERSIST_MIN_TTL_SECS: u64 = 7 * 86_400;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One persisted row: the full serialized DHT value plus bookkeeping
#[derive(Debug, Clone)]
pub struct PersistedValue {
    pub key_hash: String,
    pub value_data: Vec<u8>,
    pub value_type: u32,
    pub created_at: i64,
    /// None for permanent records
    pub expires_at: Option<i64>,
}

#[derive(Default)]
struct PersistStats {
    persisted: AtomicU64,
    skipped: AtomicU64,
    expired_cleaned: AtomicU64,
}

/// Counter snapshot exported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistStatsSnapshot {
    pub persisted: u64,
    pub skipped: u64,
    pub expired_cleaned: u64,
}

/// On-disk mirror of long-lived signed DHT records
pub struct PersistentStore {
    conn: Mutex<Connection>,
    stats: PersistStats,
}

impl PersistentStore {
    /// Open or create the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            stats: PersistStats::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            stats: PersistStats::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dht_values (
                key_hash   TEXT,
                value_data BLOB NOT NULL,
                value_type INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                PRIMARY KEY (key_hash, created_at)
            );
            CREATE INDEX IF NOT EXISTS idx_dht_values_expires ON dht_values(expires_at);
            CREATE INDEX IF NOT EXISTS idx_dht_values_key ON dht_values(key_hash);",
        )?;
        Ok(())
    }

    /// Whether an observed put qualifies for persistence
    pub fn should_persist(value_type: u32, ttl_secs: u32) -> bool {
        // TTL u32::MAX is permanent regardless of declared type
        if ttl_secs == u32::MAX {
            return true;
        }
        if value_type == VALUE_TYPE_EPHEMERAL {
            return false;
        }
        if matches!(
            value_type,
            VALUE_TYPE_PERMANENT | VALUE_TYPE_YEAR | VALUE_TYPE_MONTH
        ) {
            return true;
        }
        ttl_secs as u64 >= PERSIST_MIN_TTL_SECS
    }

    /// Record a put observed on the local node.
    ///
    /// Returns true when the value was persisted, false when filtered out.
    pub fn observe_put(
        &self,
        key_hash: &str,
        value_data: &[u8],
        value_type: u32,
        ttl_secs: u32,
    ) -> Result<bool> {
        if !Self::should_persist(value_type, ttl_secs) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(key_hash, value_type, ttl_secs, "put not persisted");
            return Ok(false);
        }

        let now = unix_now();
        let expires_at = if ttl_secs == u32::MAX {
            None
        } else {
            Some(now + ttl_secs as i64)
        };

        self.insert(&PersistedValue {
            key_hash: key_hash.to_string(),
            value_data: value_data.to_vec(),
            value_type,
            created_at: now,
            expires_at,
        })?;

        self.stats.persisted.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Insert one row, replacing an existing (key_hash, created_at) pair
    pub fn insert(&self, value: &PersistedValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO dht_values
                 (key_hash, value_data, value_type, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                value.key_hash,
                value.value_data,
                value.value_type,
                value.created_at,
                value.expires_at,
            ],
        )?;
        Ok(())
    }

    /// The newest persisted row per key
    pub fn latest_rows(&self) -> Result<Vec<PersistedValue>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT v.key_hash, v.value_data, v.value_type, v.created_at, v.expires_at
             FROM dht_values v
             JOIN (SELECT key_hash, MAX(created_at) AS newest
                   FROM dht_values GROUP BY key_hash) latest
               ON v.key_hash = latest.key_hash AND v.created_at = latest.newest
             ORDER BY v.key_hash",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PersistedValue {
                key_hash: row.get(0)?,
                value_data: row.get(1)?,
                value_type: row.get(2)?,
                created_at: row.get(3)?,
                expires_at: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete rows whose expiry has passed; returns how many were removed
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = unix_now();
        let removed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM dht_values WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now],
            )?
        };
        if removed > 0 {
            info!(removed, "cleaned up expired persisted values");
            self.stats
                .expired_cleaned
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Total row count
    pub fn row_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dht_values", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn stats(&self) -> PersistStatsSnapshot {
        PersistStatsSnapshot {
            persisted: self.stats.persisted.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            expired_cleaned: self.stats.expired_cleaned.load(Ordering::Relaxed),
        }
    }
}
