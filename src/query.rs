//! Load and submit state for async operations.
//!
//! A [`Query`] owns an operation and tracks whether it is idle, in flight,
//! done or failed. Loads and submits use the same type. Failures go to an
//! injected [`ErrorReporter`], so state holders stay unaware of where errors
//! end up.
//!
//! ```ignore
//! let api = story_api.clone();
//! let mut feed = Query::new(move || {
//!     let api = api.clone();
//!     async move { api.get_stories().await.map(|r| r.data).map_err(|e| e.to_string()) }
//! })
//! .with_error_reporter(reporter);
//!
//! feed.fetch();
//! // on every tick of the event loop
//! if feed.poll() {
//!     redraw(feed.state());
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Receives the message of every failed load or submit.
pub type ErrorReporter = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  Idle,
  Loading,
  Success(T),
  Error(String),
}

impl<T> QueryState<T> {
  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct Pending<T> {
  result: oneshot::Receiver<Result<T, String>>,
  task: AbortHandle,
}

pub struct Query<T> {
  state: QueryState<T>,
  operation: Operation<T>,
  pending: Option<Pending<T>>,
  settled_at: Option<Instant>,
  stale_after: Duration,
  reporter: Option<ErrorReporter>,
}

impl<T: Send + 'static> Query<T> {
  pub fn new<F, Fut>(operation: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      operation: Arc::new(move || operation().boxed()),
      pending: None,
      settled_at: None,
      stale_after: Duration::from_secs(60),
      reporter: None,
    }
  }

  /// Successful data older than this counts as stale.
  pub fn stale_after(mut self, duration: Duration) -> Self {
    self.stale_after = duration;
    self
  }

  pub fn with_error_reporter(mut self, reporter: ErrorReporter) -> Self {
    self.reporter = Some(reporter);
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn is_loading(&self) -> bool {
    self.pending.is_some()
  }

  pub fn is_stale(&self) -> bool {
    match (&self.state, self.settled_at) {
      (QueryState::Success(_), Some(at)) => at.elapsed() > self.stale_after,
      (QueryState::Success(_), None) => true,
      _ => false,
    }
  }

  /// Start the operation unless it is already running.
  pub fn fetch(&mut self) {
    if self.pending.is_none() {
      self.start();
    }
  }

  /// Abort any running operation and start over.
  pub fn refetch(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.task.abort();
    }
    self.start();
  }

  /// Apply a finished result without waiting. Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };
    match pending.result.try_recv() {
      Ok(result) => self.settle_with(result),
      Err(oneshot::error::TryRecvError::Empty) => return false,
      Err(oneshot::error::TryRecvError::Closed) => self.settle_with(Err(cancelled())),
    }
    true
  }

  /// Wait for the running operation. Returns `false` if nothing was running.
  pub async fn settle(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };
    let result = (&mut pending.result).await.unwrap_or_else(|_| Err(cancelled()));
    self.settle_with(result);
    true
  }

  fn start(&mut self) {
    let (tx, rx) = oneshot::channel();
    let operation = (self.operation)();
    let task = tokio::spawn(async move {
      let _ = tx.send(operation.await);
    });
    self.pending = Some(Pending {
      result: rx,
      task: task.abort_handle(),
    });
    self.state = QueryState::Loading;
  }

  fn settle_with(&mut self, result: Result<T, String>) {
    self.pending = None;
    self.state = match result {
      Ok(data) => {
        self.settled_at = Some(Instant::now());
        QueryState::Success(data)
      }
      Err(message) => {
        if let Some(report) = &self.reporter {
          report(&message);
        }
        QueryState::Error(message)
      }
    };
  }
}

fn cancelled() -> String {
  "Operation was cancelled".to_string()
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("loading", &self.pending.is_some())
      .field("settled_at", &self.settled_at)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  fn recording_reporter() -> (ErrorReporter, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter: ErrorReporter = Arc::new(move |message: &str| {
      sink.lock().unwrap().push(message.to_string());
    });
    (reporter, seen)
  }

  #[tokio::test]
  async fn test_load_moves_through_states() {
    let mut feed = Query::new(|| async { Ok::<_, String>(vec!["Welcome", "Town hall"]) });
    assert_eq!(feed.state(), &QueryState::Idle);
    assert!(!feed.poll());

    feed.fetch();
    assert_eq!(feed.state(), &QueryState::Loading);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(feed.poll());
    assert_eq!(feed.data().map(Vec::len), Some(2));
    assert!(!feed.is_loading());
  }

  #[tokio::test]
  async fn test_failed_load_is_reported_once() {
    let (reporter, seen) = recording_reporter();
    let mut feed: Query<Vec<String>> =
      Query::new(|| async { Err("404: List does not exist".to_string()) })
        .with_error_reporter(reporter);

    feed.fetch();
    assert!(feed.settle().await);
    assert!(!feed.poll());

    assert_eq!(feed.error(), Some("404: List does not exist"));
    assert_eq!(*seen.lock().unwrap(), vec!["404: List does not exist".to_string()]);
  }

  #[tokio::test]
  async fn test_successful_submit_is_not_reported() {
    let (reporter, seen) = recording_reporter();
    let mut submit = Query::new(|| async { Ok::<_, String>(1001) }).with_error_reporter(reporter);

    assert!(!submit.settle().await);
    submit.fetch();
    assert!(submit.settle().await);

    assert_eq!(submit.data(), Some(&1001));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_staleness() {
    let mut feed = Query::new(|| async { Ok::<_, String>(3) }).stale_after(Duration::ZERO);
    assert!(!feed.is_stale());

    feed.fetch();
    feed.settle().await;
    std::thread::sleep(Duration::from_millis(1));
    assert!(feed.is_stale());
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_while_loading_does_not_restart() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    let mut feed = Query::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, String>(())
      }
    });

    feed.fetch();
    feed.fetch();
    feed.settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_aborts_running_operation() {
    let runs = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(AtomicU32::new(0));
    let (counter, done) = (runs.clone(), finished.clone());

    let mut feed = Query::new(move || {
      let run = counter.fetch_add(1, Ordering::SeqCst);
      let done = done.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        done.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(run)
      }
    });

    feed.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    feed.refetch();
    feed.settle().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(feed.data(), Some(&1));
    assert_eq!(finished.load(Ordering::SeqCst), 1);
  }
}
