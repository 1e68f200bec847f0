//! Result cache for chart queries.
//!
//! The cache gate stores each response body under the chart's `uid`:
//!
//! ```text
//! {uid} -> [ {"month": "2024-01", "total": 120}, ... ]   (expires after ttl)
//! ```
//!
//! Two stores ship with the crate:
//!
//! - [`MemoryCache`]: process-local, backed by a `DashMap`
//! - [`SqliteCache`]: persistent, stored in `~/.vizquery/cache.db` by default
//!
//! A TTL of zero means the entry never expires. Expired entries read as a miss.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use serde_json::Value;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache lock poisoned")]
    Lock,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The live value under `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store `value` under `key` for `ttl_ms` milliseconds (0 = no expiry).
    async fn set(&self, key: &str, value: &Value, ttl_ms: u64) -> CacheResult<()>;

    /// Remove `key`; returns whether an entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}
