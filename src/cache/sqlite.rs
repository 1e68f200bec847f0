//! SQLite-backed cache store.
//!
//! # Design
//!
//! - Key/value table with JSON values and an optional expiry (epoch millis)
//! - Versioned: the cache table is cleared when the format version changes
//! - One connection behind a mutex; statements are short

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{CacheError, CacheResult, CacheStore};

/// Current cache schema version. Bump this when the cache format changes.
const CACHE_VERSION: i32 = 1;

/// Persistent cache store in a single SQLite file.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open or create the cache at the default location.
    pub fn open() -> CacheResult<Self> {
        Self::open_at(&Self::cache_path()?)
    }

    /// Open or create the cache at `path`, creating parent directories.
    pub fn open_at(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let cache = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        cache.init()?;
        let purged = cache.purge_expired()?;
        if purged > 0 {
            tracing::debug!(purged, path = %path.display(), "dropped expired cache entries");
        }
        Ok(cache)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        let cache = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        cache.init()?;
        Ok(cache)
    }

    /// Get the path to the cache database.
    pub fn cache_path() -> CacheResult<PathBuf> {
        let base = dirs::home_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(base.join(".vizquery").join("cache.db"))
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Lock)
    }

    fn init(&self) -> CacheResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(CACHE_VERSION) {
            if stored_version.is_some() {
                tracing::info!(
                    from = stored_version,
                    to = CACHE_VERSION,
                    "cache version changed, clearing entries"
                );
                conn.execute("DELETE FROM cache", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![CACHE_VERSION.to_string()],
            )?;
        }

        Ok(())
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Read a live value synchronously.
    pub fn get_value(&self, key: &str) -> CacheResult<Option<Value>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM cache WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
                params![key, Self::now_ms()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Store a value synchronously; `ttl_ms == 0` never expires.
    pub fn set_value(&self, key: &str, value: &Value, ttl_ms: u64) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        let expires_at = (ttl_ms > 0)
            .then(|| Self::now_ms().saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX)));
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache (key, value, expires_at) VALUES (?, ?, ?)",
            params![key, json, expires_at],
        )?;
        Ok(())
    }

    /// Delete a value from the cache.
    pub fn delete_value(&self, key: &str) -> CacheResult<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM cache WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }

    /// Remove expired entries; returns how many were removed.
    fn purge_expired(&self) -> CacheResult<usize> {
        let rows = self.conn()?.execute(
            "DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at <= ?",
            params![Self::now_ms()],
        )?;
        Ok(rows)
    }

    /// Number of stored entries, expired ones included until purged.
    #[cfg(test)]
    fn entry_count(&self) -> CacheResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.get_value(key)
    }

    async fn set(&self, key: &str, value: &Value, ttl_ms: u64) -> CacheResult<()> {
        self.set_value(key, value, ttl_ms)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.delete_value(key)
    }
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_in_memory() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_get_set() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .set_value("chart-1", &json!([{"total": 3}]), 60_000)
            .unwrap();

        assert_eq!(
            cache.get_value("chart-1").unwrap(),
            Some(json!([{"total": 3}]))
        );
        assert!(cache.get_value("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.set_value("chart-1", &json!("v"), 0).unwrap();

        assert!(cache.delete_value("chart-1").unwrap());
        assert!(cache.get_value("chart-1").unwrap().is_none());
        assert!(!cache.delete_value("chart-1").unwrap());
    }

    #[test]
    fn test_expired_entries() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.set_value("old", &json!(1), 1).unwrap();
        cache.set_value("forever", &json!(2), 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(cache.get_value("old").unwrap().is_none());
        assert_eq!(cache.get_value("forever").unwrap(), Some(json!(2)));
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("vizquery-cache-{}", std::process::id()));
        let path = dir.join("cache.db");
        {
            let cache = SqliteCache::open_at(&path).unwrap();
            cache.set_value("chart", &json!({"a": 1}), 0).unwrap();
        }
        let cache = SqliteCache::open_at(&path).unwrap();
        assert_eq!(cache.get_value("chart").unwrap(), Some(json!({"a": 1})));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reopen_drops_expired_entries() {
        let dir = std::env::temp_dir().join(format!("vizquery-cache-purge-{}", std::process::id()));
        let path = dir.join("cache.db");
        {
            let cache = SqliteCache::open_at(&path).unwrap();
            cache.set_value("stale", &json!(1), 1).unwrap();
            cache.set_value("kept", &json!(2), 0).unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));

        let cache = SqliteCache::open_at(&path).unwrap();
        assert_eq!(cache.entry_count().unwrap(), 1);
        assert_eq!(cache.get_value("kept").unwrap(), Some(json!(2)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cache_store_impl() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let store: &dyn CacheStore = &cache;
        store.set("k", &json!([1, 2]), 1000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!([1, 2])));
        assert!(store.delete("k").await.unwrap());
    }
}
