//! In-flight request coalescing.
//!
//! [`DedupCache::deduplicate`] hands every caller with the same key a clone of
//! one [`Shared`] future, so N concurrent identical reads run the executor once.
//! The slot is inserted before the executor's future is first polled, which
//! closes the check-then-insert race between callers.
//!
//! Slots are type-erased so one cache can hold requests of different result
//! types. A lookup whose result type differs from the stored slot is a miss and
//! replaces the slot.
//!
//! A shared request cannot be cancelled for one subscriber only: dropping one
//! clone does not stop the underlying future while the cache or another caller
//! still holds a clone. Callers that need their own cancellation should race
//! their wait against a token (see `StoryApi`), which ends only their wait.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cloneable handle to a deduplicated request.
pub type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Per-call options for [`DedupCache::deduplicate`].
#[derive(Debug, Clone, Copy)]
pub struct DedupOptions {
  /// How long a slot may be reused. `None` means until cleared.
  pub ttl: Option<Duration>,
  /// Drop the slot when the request fails so the next caller retries.
  pub clear_on_error: bool,
}

impl Default for DedupOptions {
  fn default() -> Self {
    Self {
      ttl: None,
      clear_on_error: true,
    }
  }
}

impl DedupOptions {
  pub fn with_ttl(ttl: Duration) -> Self {
    Self {
      ttl: Some(ttl),
      ..Self::default()
    }
  }

  /// Keep failed results cached until the TTL elapses.
  pub fn keep_errors(mut self) -> Self {
    self.clear_on_error = false;
    self
  }
}

struct Slot {
  generation: u64,
  created: Instant,
  future: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Slots {
  by_key: HashMap<String, Slot>,
  next_generation: u64,
}

/// Request deduplication cache. Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct DedupCache {
  slots: Arc<Mutex<Slots>>,
}

impl DedupCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Slots> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Return the live request for `key`, or start one with `executor`.
  ///
  /// `executor` is called synchronously while the cache is locked; it should
  /// only build its future and must not call back into this cache.
  pub fn deduplicate<T, E, F, Fut>(
    &self,
    key: &str,
    executor: F,
    options: DedupOptions,
  ) -> SharedResult<T, E>
  where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let mut slots = self.lock();
    let now = Instant::now();

    if let Some(slot) = slots.by_key.get(key) {
      let expired = options
        .ttl
        .is_some_and(|ttl| now.duration_since(slot.created) >= ttl);

      if !expired {
        if let Some(shared) = slot.future.downcast_ref::<SharedResult<T, E>>() {
          debug!(key, "Joining cached request");
          return shared.clone();
        }
        debug!(key, "Cached request has a different result type, replacing");
      } else {
        debug!(key, "Cached request expired");
      }
    }

    let generation = slots.next_generation;
    slots.next_generation += 1;

    let request = executor();
    let weak = Arc::downgrade(&self.slots);
    let owned_key = key.to_string();
    let clear_on_error = options.clear_on_error;

    let shared = async move {
      let result = request.await;
      if result.is_err() && clear_on_error {
        if let Some(slots) = weak.upgrade() {
          let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
          // A newer request may already occupy the key
          if slots
            .by_key
            .get(&owned_key)
            .is_some_and(|slot| slot.generation == generation)
          {
            slots.by_key.remove(&owned_key);
            debug!(key = %owned_key, "Cleared failed request");
          }
        }
      }
      result
    }
    .boxed()
    .shared();

    slots.by_key.insert(
      key.to_string(),
      Slot {
        generation,
        created: now,
        future: Box::new(shared.clone()),
      },
    );

    shared
  }

  /// Forget the request stored under `key`. Futures already handed out are unaffected.
  pub fn invalidate(&self, key: &str) -> bool {
    self.lock().by_key.remove(key).is_some()
  }

  /// Forget every request whose key starts with `prefix`. Returns how many were dropped.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let mut slots = self.lock();
    let before = slots.by_key.len();
    slots.by_key.retain(|key, _| !key.starts_with(prefix));
    before - slots.by_key.len()
  }

  /// Drop every stored request.
  pub fn clear(&self) {
    self.lock().by_key.clear();
  }

  /// Number of stored requests, expired ones included.
  pub fn len(&self) -> usize {
    self.lock().by_key.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl std::fmt::Debug for DedupCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DedupCache")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}
