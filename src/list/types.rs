use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::odata::ListQuery;

/// A list item as plain JSON fields (`Id`, `Title`, `Created`, ...).
pub type ListItem = Map<String, Value>;

/// Outcome of every list store operation.
pub type ListResult<T> = Result<T, ListError>;

/// What kind of expected failure a [`ListError`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListErrorKind {
  /// The request never produced a response
  Network,
  /// The backend answered with an error
  Remote,
  /// The caller's cancellation token fired
  Cancelled,
  /// The response didn't have the expected shape
  Decode,
}

/// Uniform failure of a list store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ListError {
  pub kind: ListErrorKind,
  pub message: String,
}

impl ListError {
  pub fn network(message: impl Into<String>) -> Self {
    Self {
      kind: ListErrorKind::Network,
      message: message.into(),
    }
  }

  pub fn remote(message: impl Into<String>) -> Self {
    Self {
      kind: ListErrorKind::Remote,
      message: message.into(),
    }
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self {
      kind: ListErrorKind::Decode,
      message: message.into(),
    }
  }

  pub fn cancelled(operation: &str) -> Self {
    Self {
      kind: ListErrorKind::Cancelled,
      message: format!("{} was cancelled", operation),
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.kind == ListErrorKind::Cancelled
  }
}

/// Parameters of a list read.
#[derive(Debug, Clone)]
pub struct ListRequest {
  pub list: String,
  pub query: ListQuery,
  pub cancel: Option<CancellationToken>,
}

impl ListRequest {
  pub fn new(list: impl Into<String>) -> Self {
    Self {
      list: list.into(),
      query: ListQuery::new(),
      cancel: None,
    }
  }

  pub fn with_query(mut self, query: ListQuery) -> Self {
    self.query = query;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  /// Deterministic key covering the list and every query parameter.
  pub fn fingerprint(&self) -> String {
    format!("{}?{}", self.list, self.query.fingerprint())
  }
}

/// Site user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub title: String,
  pub email: Option<String>,
  pub login_name: String,
  #[serde(default)]
  pub is_site_admin: bool,
}

/// User profile properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProperties {
  pub account_name: String,
  pub display_name: String,
  pub email: Option<String>,
  pub picture_url: Option<String>,
  pub title: Option<String>,
  /// Remaining profile properties by key
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
}

/// File content to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
  pub name: String,
  pub bytes: Vec<u8>,
}

/// Location of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
  pub url: String,
}

/// Run `op`, settling with a cancelled error as soon as `cancel` fires.
pub async fn cancellable<T>(
  cancel: Option<&CancellationToken>,
  operation: &str,
  op: impl Future<Output = ListResult<T>>,
) -> ListResult<T> {
  match cancel {
    None => op.await,
    Some(token) => {
      tokio::select! {
        biased;
        _ = token.cancelled() => Err(ListError::cancelled(operation)),
        result = op => result,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_cancellable_settles_with_error() {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(5)).await;
      child.cancel();
    });

    let result: ListResult<u32> = cancellable(Some(&token), "getListItems", async {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok(1)
    })
    .await;

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.message.contains("cancelled"));
  }

  #[tokio::test]
  async fn test_cancellable_without_token_runs_to_completion() {
    let result = cancellable(None, "getUser", async { Ok(7) }).await;
    assert_eq!(result, Ok(7));
  }

  #[test]
  fn test_fingerprint_includes_query() {
    let a = ListRequest::new("Stories").with_query(ListQuery::new().top(5));
    let b = ListRequest::new("Stories").with_query(ListQuery::new().top(10));
    assert_ne!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint(), "Stories?%24top=5");

    let smuggled = ListRequest::new("Stories").with_query(ListQuery::new().filter("Id eq 1&$top=5"));
    let separate = ListRequest::new("Stories").with_query(ListQuery::new().filter("Id eq 1").top(5));
    assert_ne!(smuggled.fingerprint(), separate.fingerprint());
  }
}
