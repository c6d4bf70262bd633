//! Core types shared by the caching tiers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::list::ListError;

/// A persisted snapshot for one cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// Logical key (list name plus query fingerprint)
  pub key: String,
  /// Last known-good payload, stored as plain JSON
  pub data: Value,
  /// Time of the last successful write
  pub timestamp: DateTime<Utc>,
  /// Optional group label used for bulk invalidation
  pub group_tag: Option<String>,
}

impl CacheEntry {
  pub fn new(key: impl Into<String>, data: Value, group_tag: Option<String>) -> Self {
    Self {
      key: key.into(),
      data,
      timestamp: Utc::now(),
      group_tag,
    }
  }

  /// Set an explicit write time.
  pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  /// Age of this entry relative to `now`.
  pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
    now - self.timestamp
  }
}

/// Result from a cache read, including data and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Whether the data was served from the persistent cache.
  pub fn is_from_cache(&self) -> bool {
    matches!(self.source, CacheSource::CacheFresh | CacheSource::CacheStale)
  }

  /// Whether the data was older than the allowed age.
  pub fn is_stale(&self) -> bool {
    self.source == CacheSource::CacheStale
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the provider
  Network,
  /// Data from cache, still within max age
  CacheFresh,
  /// Data from cache past max age; a background refresh was started
  CacheStale,
}

/// Errors raised by the persistent cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The cache was used before a namespace was set.
  #[error("persistent cache used before initialization; call initialize(namespace) at startup")]
  Uninitialized,
  #[error("cache storage error: {0}")]
  Storage(String),
  #[error("cache serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  /// The foreground fetch failed and nothing was cached.
  #[error(transparent)]
  Fetch(#[from] ListError),
}

/// Something that identifies a cacheable query.
pub trait QueryKey {
  /// Stable, fixed-length key for storage
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;

  /// Group used to invalidate related entries together
  fn group_tag(&self) -> Option<String> {
    None
  }
}
