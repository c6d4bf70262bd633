//! Cache storage trait with SQLite, in-memory and no-op implementations.

use chrono::DateTime;
use color_eyre::{eyre::eyre, Result as EyreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheEntry, CacheError};

type Result<T> = std::result::Result<T, CacheError>;

/// Trait for durable cache backends.
///
/// Every operation is scoped by a namespace so one database can hold the
/// caches of several deployed sites without them seeing each other.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or overwrite an entry.
  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()>;

  /// Remove one entry. Returns whether something was removed.
  fn remove(&self, namespace: &str, key: &str) -> Result<bool>;

  /// Remove every entry carrying `group_tag`. Returns the number removed.
  fn remove_group(&self, namespace: &str, group_tag: &str) -> Result<usize>;

  /// Remove every entry in the namespace. Returns the number removed.
  fn clear(&self, namespace: &str) -> Result<usize>;

  /// Number of entries in the namespace.
  fn len(&self, namespace: &str) -> Result<usize>;

  /// Drop the oldest entries until at most `keep` remain. Returns the number removed.
  fn evict_oldest(&self, namespace: &str, keep: usize) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _namespace: &str, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _namespace: &str, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _namespace: &str, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn remove_group(&self, _namespace: &str, _group_tag: &str) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self, _namespace: &str) -> Result<usize> {
    Ok(0)
  }

  fn len(&self, _namespace: &str) -> Result<usize> {
    Ok(0)
  }

  fn evict_oldest(&self, _namespace: &str, _keep: usize) -> Result<usize> {
    Ok(0)
  }
}

/// Process-local storage. Contents are lost on exit; used by mock mode and tests.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), CacheEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let entries = self.lock()?;
    Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
  }

  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()> {
    let mut entries = self.lock()?;
    entries.insert((namespace.to_string(), entry.key.clone()), entry.clone());
    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
    let mut entries = self.lock()?;
    Ok(
      entries
        .remove(&(namespace.to_string(), key.to_string()))
        .is_some(),
    )
  }

  fn remove_group(&self, namespace: &str, group_tag: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|(ns, _), entry| {
      ns != namespace || entry.group_tag.as_deref() != Some(group_tag)
    });
    Ok(before - entries.len())
  }

  fn clear(&self, namespace: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|(ns, _), _| ns != namespace);
    Ok(before - entries.len())
  }

  fn len(&self, namespace: &str) -> Result<usize> {
    let entries = self.lock()?;
    Ok(entries.keys().filter(|(ns, _)| ns == namespace).count())
  }

  fn evict_oldest(&self, namespace: &str, keep: usize) -> Result<usize> {
    let mut entries = self.lock()?;
    let mut in_namespace: Vec<_> = entries
      .iter()
      .filter(|((ns, _), _)| ns == namespace)
      .map(|(k, entry)| (k.clone(), entry.timestamp))
      .collect();
    if in_namespace.len() <= keep {
      return Ok(0);
    }
    in_namespace.sort_by_key(|(_, timestamp)| *timestamp);
    let excess = in_namespace.len() - keep;
    for (k, _) in in_namespace.into_iter().take(excess) {
      entries.remove(&k);
    }
    Ok(excess)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> EyreResult<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Create a new SQLite storage at `path`, creating parent directories.
  pub fn open_at(path: &Path) -> EyreResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create a storage that lives only as long as this value.
  pub fn open_in_memory() -> EyreResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> EyreResult<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> EyreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storyhub").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> EyreResult<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per (namespace, key); data is serialized JSON
CREATE TABLE IF NOT EXISTS swr_cache (
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    data BLOB NOT NULL,
    group_tag TEXT,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_swr_cache_group
    ON swr_cache(namespace, group_tag);

CREATE INDEX IF NOT EXISTS idx_swr_cache_age
    ON swr_cache(namespace, cached_at);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, Option<String>, i64)> = conn
      .query_row(
        "SELECT data, group_tag, cached_at FROM swr_cache
         WHERE namespace = ? AND cache_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| CacheError::Storage(format!("Failed to read cache entry: {}", e)))?;

    let Some((data, group_tag, cached_at)) = row else {
      return Ok(None);
    };

    let timestamp = DateTime::from_timestamp_millis(cached_at)
      .ok_or_else(|| CacheError::Storage(format!("Invalid cache timestamp {}", cached_at)))?;

    Ok(Some(CacheEntry {
      key: key.to_string(),
      data: serde_json::from_slice(&data)?,
      timestamp,
      group_tag,
    }))
  }

  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(&entry.data)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO swr_cache (namespace, cache_key, data, group_tag, cached_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          namespace,
          entry.key,
          data,
          entry.group_tag,
          entry.timestamp.timestamp_millis()
        ],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to store cache entry: {}", e)))?;

    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM swr_cache WHERE namespace = ? AND cache_key = ?",
        params![namespace, key],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to delete cache entry: {}", e)))?;
    Ok(removed > 0)
  }

  fn remove_group(&self, namespace: &str, group_tag: &str) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM swr_cache WHERE namespace = ? AND group_tag = ?",
        params![namespace, group_tag],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to delete cache group: {}", e)))
  }

  fn clear(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM swr_cache WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to clear cache: {}", e)))
  }

  fn len(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM swr_cache WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| CacheError::Storage(format!("Failed to count cache entries: {}", e)))?;
    Ok(count as usize)
  }

  fn evict_oldest(&self, namespace: &str, keep: usize) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM swr_cache
         WHERE namespace = ?1 AND cache_key NOT IN (
           SELECT cache_key FROM swr_cache WHERE namespace = ?1
           ORDER BY cached_at DESC LIMIT ?2
         )",
        params![namespace, keep as i64],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to evict cache entries: {}", e)))
  }
}
