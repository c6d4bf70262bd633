use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::encode;
use crate::list::{DataProvider, ListResult};
use crate::query::ErrorReporter;

/// Longest title the error list accepts
const TITLE_MAX_CHARS: usize = 255;

/// Writes user-visible failures into the error-log list.
pub struct ListErrorReporter {
  provider: Arc<dyn DataProvider>,
  list: String,
  source: String,
}

impl ListErrorReporter {
  /// `source` names the reporting component in each entry.
  pub fn new(provider: Arc<dyn DataProvider>, list: impl Into<String>, source: impl Into<String>) -> Self {
    Self {
      provider,
      list: list.into(),
      source: source.into(),
    }
  }

  pub async fn report(&self, message: &str) -> ListResult<()> {
    let title: String = message.chars().take(TITLE_MAX_CHARS).collect();
    let body = encode(&json!({
      "Title": title,
      "Message": message,
      "Source": self.source,
    }))?;
    self.provider.post_list_item(&self.list, body, None).await?;
    debug!(list = %self.list, "Error reported");
    Ok(())
  }

  /// Fire-and-forget reporter for query states.
  ///
  /// Each report runs on its own task. A failing report is logged and dropped,
  /// never reported again.
  pub fn reporter(self: Arc<Self>) -> ErrorReporter {
    Arc::new(move |message: &str| {
      let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(message, "No runtime to report error on");
        return;
      };
      let this = Arc::clone(&self);
      let message = message.to_string();
      runtime.spawn(async move {
        if let Err(e) = this.report(&message).await {
          warn!(error = %e, "Failed to report error");
        }
      });
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ListsConfig;
  use crate::list::{ListRequest, MockLatency, MockProvider};
  use std::time::Duration;

  fn provider() -> Arc<MockProvider> {
    Arc::new(MockProvider::new(&ListsConfig::default()).with_latency(MockLatency::none()))
  }

  #[tokio::test]
  async fn test_report_writes_entry() {
    let provider = provider();
    let reporter = ListErrorReporter::new(provider.clone(), "ErrorLog", "story-feed");

    reporter.report("403: Access denied").await.unwrap();

    let items = provider
      .get_list_items(&ListRequest::new("ErrorLog"))
      .await
      .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["Title"], "403: Access denied");
    assert_eq!(items[0]["Source"], "story-feed");
  }

  #[tokio::test]
  async fn test_long_messages_get_truncated_titles() {
    let provider = provider();
    let reporter = ListErrorReporter::new(provider.clone(), "ErrorLog", "test");
    let message = "x".repeat(1000);

    reporter.report(&message).await.unwrap();

    let items = provider
      .get_list_items(&ListRequest::new("ErrorLog"))
      .await
      .unwrap();
    assert_eq!(items[0]["Title"].as_str().map(str::len), Some(TITLE_MAX_CHARS));
    assert_eq!(items[0]["Message"].as_str().map(str::len), Some(1000));
  }

  #[tokio::test]
  async fn test_reporter_closure_posts_in_background() {
    let provider = provider();
    let report = Arc::new(ListErrorReporter::new(provider.clone(), "ErrorLog", "test")).reporter();

    report("background failure");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let items = provider
      .get_list_items(&ListRequest::new("ErrorLog"))
      .await
      .unwrap();
    assert_eq!(items.len(), 1);
  }

  #[tokio::test]
  async fn test_failed_report_is_swallowed() {
    let provider = Arc::new(MockProvider::empty(MockLatency::none()));
    let reporter = ListErrorReporter::new(provider, "ErrorLog", "test");
    assert!(reporter.report("nowhere to go").await.is_err());

    let report = Arc::new(reporter).reporter();
    report("still nowhere");
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}
