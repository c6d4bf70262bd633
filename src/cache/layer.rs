//! Stale-while-revalidate layer over a durable cache storage.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheError, CacheResult};
use crate::list::ListResult;

/// Callback receiving cached or fetched data.
pub type DataCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback receiving a background refresh failure.
pub type ErrorCallback = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Parameters for one [`PersistentCache::get_cached_or_fetch`] call.
pub struct FetchOptions<T> {
  pub cache_key: String,
  /// Entries older than this are served stale and refreshed in the background
  pub max_age: Duration,
  pub group_tag: Option<String>,
  /// Always fetch and never serve cached data (polling paths)
  pub skip_cache: bool,
  pub on_stale: Option<DataCallback<T>>,
  pub on_fresh: Option<DataCallback<T>>,
  pub on_background_error: Option<ErrorCallback>,
}

impl<T> FetchOptions<T> {
  pub fn new(cache_key: impl Into<String>, max_age: Duration) -> Self {
    Self {
      cache_key: cache_key.into(),
      max_age,
      group_tag: None,
      skip_cache: false,
      on_stale: None,
      on_fresh: None,
      on_background_error: None,
    }
  }

  pub fn group(mut self, group_tag: impl Into<String>) -> Self {
    self.group_tag = Some(group_tag.into());
    self
  }

  pub fn skip_cache(mut self, skip: bool) -> Self {
    self.skip_cache = skip;
    self
  }

  pub fn on_stale(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_stale = Some(Arc::new(f));
    self
  }

  pub fn on_fresh(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_fresh = Some(Arc::new(f));
    self
  }

  pub fn on_background_error(mut self, f: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
    self.on_background_error = Some(Arc::new(f));
    self
  }
}

/// Persistent cache with stale-while-revalidate reads.
///
/// Reads classify the stored entry at read time:
/// - fresh (age <= max_age): returned directly
/// - stale: returned directly while a refresh runs on a spawned task
/// - absent: fetched, stored and returned
///
/// Entries are never expired in the background. An optional `max_entries`
/// bound evicts the oldest entries of the namespace on write.
pub struct PersistentCache<S: CacheStorage> {
  storage: Arc<S>,
  namespace: Arc<RwLock<Option<String>>>,
  max_entries: Option<usize>,
}

impl<S: CacheStorage + 'static> PersistentCache<S> {
  /// Create an uninitialized cache over `storage`.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      namespace: Arc::new(RwLock::new(None)),
      max_entries: None,
    }
  }

  /// Bound the number of entries kept per namespace.
  pub fn with_max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = Some(max_entries);
    self
  }

  /// Set the namespace isolating this deployment's entries. Must run before any read or write.
  pub fn initialize(&self, namespace: impl Into<String>) {
    let namespace = namespace.into();
    debug!(%namespace, "Persistent cache initialized");
    *self
      .namespace
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Some(namespace);
  }

  pub fn is_initialized(&self) -> bool {
    self
      .namespace
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  fn namespace(&self) -> Result<String, CacheError> {
    let namespace = self
      .namespace
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    namespace.ok_or_else(|| {
      error!("Persistent cache used before initialize()");
      CacheError::Uninitialized
    })
  }

  /// Read through the cache, refreshing stale entries in the background.
  pub async fn get_cached_or_fetch<T, F, Fut>(
    &self,
    options: FetchOptions<T>,
    fetch_fn: F,
  ) -> Result<CacheResult<T>, CacheError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ListResult<T>> + Send + 'static,
  {
    let namespace = self.namespace()?;

    if options.skip_cache {
      debug!(key = %options.cache_key, "Cache bypassed");
      return self.fetch_and_store(&namespace, &options, fetch_fn).await;
    }

    let Some(entry) = self.storage.get(&namespace, &options.cache_key)? else {
      debug!(key = %options.cache_key, "Cache miss");
      return self.fetch_and_store(&namespace, &options, fetch_fn).await;
    };

    let data: T = match serde_json::from_value(entry.data.clone()) {
      Ok(data) => data,
      Err(e) => {
        warn!(key = %options.cache_key, error = %e, "Discarding undecodable cache entry");
        self.storage.remove(&namespace, &options.cache_key)?;
        return self.fetch_and_store(&namespace, &options, fetch_fn).await;
      }
    };

    let max_age = chrono::Duration::from_std(options.max_age).unwrap_or(chrono::Duration::MAX);
    if entry.age(Utc::now()) <= max_age {
      debug!(key = %options.cache_key, "Cache hit");
      if let Some(on_fresh) = &options.on_fresh {
        on_fresh(&data);
      }
      return Ok(CacheResult::from_cache(data, entry.timestamp, false));
    }

    debug!(key = %options.cache_key, "Cache stale, refreshing in background");
    if let Some(on_stale) = &options.on_stale {
      on_stale(&data);
    }
    self.spawn_refresh(namespace, options, fetch_fn);

    Ok(CacheResult::from_cache(data, entry.timestamp, true))
  }

  async fn fetch_and_store<T, F, Fut>(
    &self,
    namespace: &str,
    options: &FetchOptions<T>,
    fetch_fn: F,
  ) -> Result<CacheResult<T>, CacheError>
  where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ListResult<T>>,
  {
    let data = fetch_fn().await?;

    // The data is still good for the caller even if persisting it failed
    if let Err(e) = store(
      self.storage.as_ref(),
      namespace,
      &options.cache_key,
      options.group_tag.as_deref(),
      &data,
      self.max_entries,
    ) {
      warn!(key = %options.cache_key, error = %e, "Failed to persist cache entry");
    }

    if let Some(on_fresh) = &options.on_fresh {
      on_fresh(&data);
    }
    Ok(CacheResult::from_network(data))
  }

  fn spawn_refresh<T, F, Fut>(&self, namespace: String, options: FetchOptions<T>, fetch_fn: F)
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ListResult<T>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let max_entries = self.max_entries;

    tokio::spawn(async move {
      let outcome = match fetch_fn().await {
        Ok(data) => store(
          storage.as_ref(),
          &namespace,
          &options.cache_key,
          options.group_tag.as_deref(),
          &data,
          max_entries,
        )
        .map(|_| data),
        Err(e) => Err(CacheError::Fetch(e)),
      };

      match outcome {
        Ok(data) => {
          debug!(key = %options.cache_key, "Background refresh stored");
          if let Some(on_fresh) = &options.on_fresh {
            on_fresh(&data);
          }
        }
        Err(e) => {
          warn!(key = %options.cache_key, error = %e, "Background refresh failed, keeping stale entry");
          if let Some(on_error) = &options.on_background_error {
            on_error(&e);
          }
        }
      }
    });
  }

  /// Delete one entry.
  pub fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
    let namespace = self.namespace()?;
    self.storage.remove(&namespace, key)
  }

  /// Delete every entry tagged `group_tag`.
  pub fn invalidate_by_group(&self, group_tag: &str) -> Result<usize, CacheError> {
    let namespace = self.namespace()?;
    let removed = self.storage.remove_group(&namespace, group_tag)?;
    debug!(group_tag, removed, "Invalidated cache group");
    Ok(removed)
  }

  /// Delete every entry in this namespace.
  pub fn clear(&self) -> Result<usize, CacheError> {
    let namespace = self.namespace()?;
    self.storage.clear(&namespace)
  }

  pub fn len(&self) -> Result<usize, CacheError> {
    let namespace = self.namespace()?;
    self.storage.len(&namespace)
  }

  /// Direct access to the backing storage.
  pub fn storage(&self) -> &S {
    &self.storage
  }
}

/// Persist a plain JSON snapshot of `data`. Values serializing to `null` are not stored.
fn store<S: CacheStorage + ?Sized, T: Serialize>(
  storage: &S,
  namespace: &str,
  key: &str,
  group_tag: Option<&str>,
  data: &T,
  max_entries: Option<usize>,
) -> Result<bool, CacheError> {
  let value = serde_json::to_value(data)?;
  if value.is_null() {
    return Ok(false);
  }

  storage.put(
    namespace,
    &CacheEntry::new(key, value, group_tag.map(String::from)),
  )?;

  if let Some(max_entries) = max_entries {
    let evicted = storage.evict_oldest(namespace, max_entries)?;
    if evicted > 0 {
      debug!(evicted, "Evicted oldest cache entries");
    }
  }

  Ok(true)
}

impl<S: CacheStorage> Clone for PersistentCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      namespace: Arc::clone(&self.namespace),
      max_entries: self.max_entries,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::CacheSource;
  use crate::list::ListError;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::mpsc;

  fn cache() -> PersistentCache<MemoryStorage> {
    let cache = PersistentCache::new(MemoryStorage::new());
    cache.initialize("test-site");
    cache
  }

  fn counting_fetch(
    counter: &Arc<AtomicUsize>,
    value: Vec<String>,
  ) -> impl FnOnce() -> futures::future::Ready<ListResult<Vec<String>>> + Send + 'static {
    let counter = counter.clone();
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      futures::future::ready(Ok(value))
    }
  }

  fn stories(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn test_uninitialized_cache_fails_fast() {
    let cache = PersistentCache::new(MemoryStorage::new());
    let counter = Arc::new(AtomicUsize::new(0));

    let result = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", Duration::from_secs(1)),
        counting_fetch(&counter, stories(&["a"])),
      )
      .await;

    assert!(matches!(result, Err(CacheError::Uninitialized)));
    assert!(matches!(cache.invalidate("stories"), Err(CacheError::Uninitialized)));
    assert!(matches!(cache.invalidate_by_group("g"), Err(CacheError::Uninitialized)));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_second_read_within_max_age_is_served_from_cache() {
    let cache = cache();
    let counter = Arc::new(AtomicUsize::new(0));

    let first = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", Duration::from_millis(1000)),
        counting_fetch(&counter, stories(&["a", "b"])),
      )
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert!(!first.is_from_cache());

    let second = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", Duration::from_millis(1000)),
        counting_fetch(&counter, stories(&["c"])),
      )
      .await
      .unwrap();

    assert!(second.is_from_cache());
    assert!(!second.is_stale());
    assert_eq!(second.data, stories(&["a", "b"]));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_entry_is_served_and_refreshed_in_background() {
    let cache = cache();
    let max_age = Duration::from_millis(1000);
    let old = CacheEntry::new("stories", json!(["old"]), None)
      .at(Utc::now() - chrono::Duration::milliseconds(1001));
    cache.storage().put("test-site", &old).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stale_seen = Arc::new(AtomicUsize::new(0));
    let stale_counter = stale_seen.clone();
    let options = FetchOptions::new("stories", max_age)
      .on_stale(move |_: &Vec<String>| {
        stale_counter.fetch_add(1, Ordering::SeqCst);
      })
      .on_fresh(move |data: &Vec<String>| {
        let _ = tx.send(data.clone());
      });

    let result = cache
      .get_cached_or_fetch(options, || async { Ok(stories(&["new"])) })
      .await
      .unwrap();

    assert!(result.is_from_cache());
    assert!(result.is_stale());
    assert_eq!(result.data, stories(&["old"]));
    assert_eq!(stale_seen.load(Ordering::SeqCst), 1);

    // Background refresh delivers and persists the new data
    assert_eq!(rx.recv().await.unwrap(), stories(&["new"]));

    let counter = Arc::new(AtomicUsize::new(0));
    let fresh = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", max_age),
        counting_fetch(&counter, stories(&["unused"])),
      )
      .await
      .unwrap();
    assert!(!fresh.is_stale());
    assert_eq!(fresh.data, stories(&["new"]));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_background_failure_keeps_stale_entry() {
    let cache = cache();
    let old = CacheEntry::new("stories", json!(["old"]), None)
      .at(Utc::now() - chrono::Duration::seconds(10));
    cache.storage().put("test-site", &old).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = FetchOptions::new("stories", Duration::from_secs(1)).on_background_error(
      move |e: &CacheError| {
        let _ = tx.send(e.to_string());
      },
    );

    let result: CacheResult<Vec<String>> = cache
      .get_cached_or_fetch(options, || async { Err(ListError::network("offline")) })
      .await
      .unwrap();
    assert!(result.is_stale());

    let message = rx.recv().await.unwrap();
    assert!(message.contains("offline"));

    let entry = cache.storage().get("test-site", "stories").unwrap().unwrap();
    assert_eq!(entry.data, json!(["old"]));
  }

  #[tokio::test]
  async fn test_foreground_failure_is_returned() {
    let cache = cache();

    let result: Result<CacheResult<Vec<String>>, _> = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", Duration::from_secs(1)),
        || async { Err(ListError::remote("list not found")) },
      )
      .await;

    assert!(matches!(result, Err(CacheError::Fetch(_))));
    assert_eq!(cache.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_skip_cache_always_fetches_and_stores() {
    let cache = cache();
    let counter = Arc::new(AtomicUsize::new(0));
    let max_age = Duration::from_secs(60);

    cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", max_age),
        counting_fetch(&counter, stories(&["a"])),
      )
      .await
      .unwrap();

    let polled = cache
      .get_cached_or_fetch(
        FetchOptions::new("stories", max_age).skip_cache(true),
        counting_fetch(&counter, stories(&["a", "b"])),
      )
      .await
      .unwrap();

    assert_eq!(polled.source, CacheSource::Network);
    assert_eq!(polled.data, stories(&["a", "b"]));
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    let entry = cache.storage().get("test-site", "stories").unwrap().unwrap();
    assert_eq!(entry.data, json!(["a", "b"]));
  }

  #[tokio::test]
  async fn test_group_invalidation() {
    let cache = cache();
    let max_age = Duration::from_secs(60);

    for key in ["stories:all", "stories:featured"] {
      cache
        .get_cached_or_fetch(FetchOptions::new(key, max_age).group("X"), || async {
          Ok(1u32)
        })
        .await
        .unwrap();
    }
    cache
      .get_cached_or_fetch(FetchOptions::new("comments", max_age).group("Y"), || async {
        Ok(2u32)
      })
      .await
      .unwrap();

    assert_eq!(cache.invalidate_by_group("X").unwrap(), 2);
    assert!(cache.storage().get("test-site", "stories:all").unwrap().is_none());
    assert!(cache.storage().get("test-site", "stories:featured").unwrap().is_none());
    assert!(cache.storage().get("test-site", "comments").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_null_results_are_not_persisted() {
    let cache = cache();

    let result = cache
      .get_cached_or_fetch(
        FetchOptions::new("user", Duration::from_secs(60)),
        || async { Ok(None::<String>) },
      )
      .await
      .unwrap();

    assert_eq!(result.data, None);
    assert_eq!(cache.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_max_entries_evicts_oldest() {
    let cache = PersistentCache::new(MemoryStorage::new()).with_max_entries(2);
    cache.initialize("bounded");

    for key in ["a", "b", "c"] {
      cache
        .get_cached_or_fetch(FetchOptions::new(key, Duration::from_secs(60)), || async {
          Ok(key.len())
        })
        .await
        .unwrap();
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(cache.len().unwrap(), 2);
    assert!(cache.storage().get("bounded", "a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_undecodable_entry_is_refetched() {
    let cache = cache();
    cache
      .storage()
      .put("test-site", &CacheEntry::new("stories", json!({"shape": "old"}), None))
      .unwrap();

    let result = cache
      .get_cached_or_fetch(FetchOptions::new("stories", Duration::from_secs(60)), || async {
        Ok(stories(&["a"]))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, stories(&["a"]));
  }
}
