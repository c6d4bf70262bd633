//! The data provider contract shared by the real and the mock backends.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{
  ListItem, ListRequest, ListResult, UploadFile, UploadedFile, User, UserProperties,
};

/// Everything calling code may ask of the list store.
///
/// Expected failures (backend faults, network errors, cancellation) come back
/// as [`ListError`](super::ListError) values; implementations never panic on them.
#[async_trait]
pub trait DataProvider: Send + Sync {
  /// Short name for logging ("rest", "mock")
  fn name(&self) -> &'static str;

  async fn get_list_items(&self, request: &ListRequest) -> ListResult<Vec<ListItem>>;

  async fn get_current_user(&self, cancel: Option<&CancellationToken>) -> ListResult<User>;

  async fn get_current_user_properties(
    &self,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties>;

  async fn get_user_properties(
    &self,
    account: &str,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties>;

  async fn get_user(&self, id: i64, cancel: Option<&CancellationToken>) -> ListResult<User>;

  /// Create an item. Returns `body` merged with the server-assigned fields.
  async fn post_list_item(
    &self,
    list: &str,
    body: ListItem,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<ListItem>;

  /// Partial update of an existing item.
  async fn update_list_item(
    &self,
    list: &str,
    id: i64,
    body: ListItem,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<()>;

  async fn delete_list_item(
    &self,
    list: &str,
    id: i64,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<()>;

  /// Upload a file for an item into `folder`.
  async fn read_and_upload_file(
    &self,
    list: &str,
    item_id: i64,
    file: UploadFile,
    folder: &str,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UploadedFile>;
}

/// Name under which an item's file is stored.
pub fn upload_file_name(list: &str, item_id: i64, file_name: &str) -> String {
  let list: String = list
    .chars()
    .map(|c| if c.is_alphanumeric() { c } else { '_' })
    .collect();
  format!("{}-{}-{}", list, item_id, file_name)
}
