//! Completion-based polling.
//!
//! The next invocation is scheduled `interval` after the previous one settles,
//! not on a fixed cadence. A slow fetch therefore delays the next one instead of
//! overlapping it; two invocations of one session never run at the same time.
//!
//! Stopping is cooperative: after [`PollHandle::stop`] returns no new invocation
//! starts, but one already running finishes and its callback still fires.

use futures::FutureExt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Callback<V> = Box<dyn FnMut(V) + Send>;

struct PollState {
  /// Held while an invocation starts, so `stop()` and a start can't interleave
  active: Mutex<bool>,
  wake: CancellationToken,
}

/// Handle to a running poll session. Dropping it stops the session.
pub struct PollHandle {
  state: Arc<PollState>,
}

impl PollHandle {
  /// Stop the session. No invocation starts after this returns.
  pub fn stop(&self) {
    let mut active = self
      .state
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if *active {
      debug!("Poll session stopped");
    }
    *active = false;
    self.state.wake.cancel();
  }

  pub fn is_active(&self) -> bool {
    *self
      .state
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

impl Drop for PollHandle {
  fn drop(&mut self) {
    self.stop();
  }
}

/// Poll session builder.
pub struct Poller<T, E> {
  interval: Duration,
  on_success: Option<Callback<T>>,
  on_error: Option<Callback<E>>,
}

impl<T: Send + 'static, E: Send + 'static> Poller<T, E> {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      on_success: None,
      on_error: None,
    }
  }

  pub fn on_success(mut self, f: impl FnMut(T) + Send + 'static) -> Self {
    self.on_success = Some(Box::new(f));
    self
  }

  pub fn on_error(mut self, f: impl FnMut(E) + Send + 'static) -> Self {
    self.on_error = Some(Box::new(f));
    self
  }

  /// Spawn the loop on the current tokio runtime. The first invocation starts immediately.
  pub fn start<F, Fut>(self, mut fetch_fn: F) -> PollHandle
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let state = Arc::new(PollState {
      active: Mutex::new(true),
      wake: CancellationToken::new(),
    });
    let Poller {
      interval,
      mut on_success,
      mut on_error,
    } = self;
    let loop_state = Arc::clone(&state);

    debug!(?interval, "Poll session started");
    tokio::spawn(async move {
      loop {
        let request = {
          let active = loop_state
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
          if !*active {
            break;
          }
          fetch_fn()
        };

        match AssertUnwindSafe(request).catch_unwind().await {
          Ok(Ok(data)) => deliver(&mut on_success, data, "success"),
          Ok(Err(e)) => deliver(&mut on_error, e, "error"),
          Err(_) => warn!("Poll fetch panicked"),
        }

        // Rescheduling doesn't depend on what the callbacks did
        tokio::select! {
          _ = loop_state.wake.cancelled() => break,
          _ = tokio::time::sleep(interval) => {}
        }
      }
      debug!("Poll loop exited");
    });

    PollHandle { state }
  }
}

fn deliver<V>(callback: &mut Option<Callback<V>>, value: V, kind: &str) {
  if let Some(callback) = callback.as_mut() {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
      warn!(kind, "Poll callback panicked");
    }
  }
}

/// Repeatedly run `fetch_fn`, `interval` after each completion.
pub fn poll<T, E, F, Fut>(
  fetch_fn: F,
  interval: Duration,
  on_success: impl FnMut(T) + Send + 'static,
  on_error: impl FnMut(E) + Send + 'static,
) -> PollHandle
where
  T: Send + 'static,
  E: Send + 'static,
  F: FnMut() -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  Poller::new(interval)
    .on_success(on_success)
    .on_error(on_error)
    .start(fetch_fn)
}
