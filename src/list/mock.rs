//! Fixture-backed provider for local development and tests.
//!
//! Behaves like the REST backend: writes are visible to later reads, reads
//! honor `$filter`, `$orderby`, `$skip`, `$top` and `$select`, and every call
//! waits a simulated network delay that the caller's token can cancel.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fixtures;
use super::odata::{ListQuery, QueryOp};
use super::provider::{upload_file_name, DataProvider};
use super::types::{
  cancellable, ListError, ListItem, ListRequest, ListResult, UploadFile, UploadedFile, User,
  UserProperties,
};
use crate::config::ListsConfig;

/// Simulated network delay: `base` plus a random amount up to `jitter`.
#[derive(Debug, Clone, Copy)]
pub struct MockLatency {
  pub base: Duration,
  pub jitter: Duration,
}

impl Default for MockLatency {
  fn default() -> Self {
    Self {
      base: Duration::from_millis(150),
      jitter: Duration::from_millis(250),
    }
  }
}

impl MockLatency {
  pub fn none() -> Self {
    Self::fixed(Duration::ZERO)
  }

  pub fn fixed(base: Duration) -> Self {
    Self {
      base,
      jitter: Duration::ZERO,
    }
  }

  fn sample(&self) -> Duration {
    let jitter_ms = self.jitter.as_millis() as u64;
    if jitter_ms == 0 {
      return self.base;
    }
    self.base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
  }
}

pub struct MockProvider {
  lists: Mutex<HashMap<String, Vec<ListItem>>>,
  users: Vec<User>,
  next_id: AtomicI64,
  latency: MockLatency,
}

impl MockProvider {
  /// Provider seeded with the fixture lists under the configured names.
  pub fn new(names: &ListsConfig) -> Self {
    let mut provider = Self::empty(MockLatency::default());
    let lists = provider
      .lists
      .get_mut()
      .unwrap_or_else(PoisonError::into_inner);
    for (name, items) in fixtures::lists(names) {
      lists.insert(name, items);
    }
    provider.users = fixtures::users();
    provider
  }

  /// Provider without lists or users.
  pub fn empty(latency: MockLatency) -> Self {
    Self {
      lists: Mutex::new(HashMap::new()),
      users: Vec::new(),
      next_id: AtomicI64::new(1000),
      latency,
    }
  }

  pub fn with_latency(mut self, latency: MockLatency) -> Self {
    self.latency = latency;
    self
  }

  /// Add or replace a list.
  pub fn with_list(self, name: impl Into<String>, items: Vec<ListItem>) -> Self {
    self.lock().insert(name.into(), items);
    self
  }

  pub fn with_users(mut self, users: Vec<User>) -> Self {
    self.users = users;
    self
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ListItem>>> {
    self.lists.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Wait the simulated delay, then run `op`, unless `cancel` fires first.
  async fn simulate<T>(
    &self,
    operation: &str,
    cancel: Option<&CancellationToken>,
    op: impl Future<Output = ListResult<T>>,
  ) -> ListResult<T> {
    let delay = self.latency.sample();
    cancellable(cancel, operation, async move {
      tokio::time::sleep(delay).await;
      op.await
    })
    .await
  }

  fn find_user(&self, id: i64) -> ListResult<User> {
    self
      .users
      .iter()
      .find(|u| u.id == id)
      .cloned()
      .ok_or_else(|| ListError::remote(format!("404: User with id {} not found", id)))
  }
}

fn missing_list(list: &str) -> ListError {
  ListError::remote(format!("404: List '{}' does not exist.", list))
}

fn missing_item(list: &str, id: i64) -> ListError {
  ListError::remote(format!("404: Item {} does not exist in list '{}'.", id, list))
}

fn now_string() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn item_id(item: &ListItem) -> Option<i64> {
  item.get("Id").and_then(Value::as_i64)
}

#[async_trait]
impl DataProvider for MockProvider {
  fn name(&self) -> &'static str {
    "mock"
  }

  async fn get_list_items(&self, request: &ListRequest) -> ListResult<Vec<ListItem>> {
    self
      .simulate("getListItems", request.cancel.as_ref(), async {
        let items = self
          .lock()
          .get(&request.list)
          .cloned()
          .ok_or_else(|| missing_list(&request.list))?;
        let items = apply_query(items, &request.query)?;
        debug!(list = %request.list, count = items.len(), "Mock list read");
        Ok(items)
      })
      .await
  }

  async fn get_current_user(&self, cancel: Option<&CancellationToken>) -> ListResult<User> {
    self
      .simulate("getCurrentUser", cancel, async {
        self.find_user(fixtures::CURRENT_USER_ID)
      })
      .await
  }

  async fn get_current_user_properties(
    &self,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties> {
    self
      .simulate("getCurrentUserProperties", cancel, async {
        self
          .find_user(fixtures::CURRENT_USER_ID)
          .map(|u| fixtures::user_properties(&u))
      })
      .await
  }

  async fn get_user_properties(
    &self,
    account: &str,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties> {
    self
      .simulate("getUserProperties", cancel, async {
        self
          .users
          .iter()
          .find(|u| u.login_name == account || u.email.as_deref() == Some(account))
          .map(fixtures::user_properties)
          .ok_or_else(|| ListError::remote(format!("404: No profile for {}", account)))
      })
      .await
  }

  async fn get_user(&self, id: i64, cancel: Option<&CancellationToken>) -> ListResult<User> {
    self
      .simulate("getUser", cancel, async { self.find_user(id) })
      .await
  }

  async fn post_list_item(
    &self,
    list: &str,
    body: ListItem,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<ListItem> {
    self
      .simulate("postListItem", cancel, async {
        let mut lists = self.lock();
        let items = lists.get_mut(list).ok_or_else(|| missing_list(list))?;

        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let now = now_string();
        let mut created = body;
        created.insert("Id".to_string(), Value::from(id));
        created.insert("Created".to_string(), Value::from(now.clone()));
        created.insert("Modified".to_string(), Value::from(now));
        items.push(created.clone());

        debug!(list, id, "Mock item created");
        Ok(created)
      })
      .await
  }

  async fn update_list_item(
    &self,
    list: &str,
    id: i64,
    body: ListItem,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<()> {
    self
      .simulate("updateListItem", cancel, async {
        let mut lists = self.lock();
        let items = lists.get_mut(list).ok_or_else(|| missing_list(list))?;
        let item = items
          .iter_mut()
          .find(|item| item_id(item) == Some(id))
          .ok_or_else(|| missing_item(list, id))?;

        item.extend(body);
        item.insert("Id".to_string(), Value::from(id));
        item.insert("Modified".to_string(), Value::from(now_string()));
        Ok(())
      })
      .await
  }

  async fn delete_list_item(
    &self,
    list: &str,
    id: i64,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<()> {
    self
      .simulate("deleteListItem", cancel, async {
        let mut lists = self.lock();
        let items = lists.get_mut(list).ok_or_else(|| missing_list(list))?;
        let before = items.len();
        items.retain(|item| item_id(item) != Some(id));
        if items.len() == before {
          return Err(missing_item(list, id));
        }
        Ok(())
      })
      .await
  }

  async fn read_and_upload_file(
    &self,
    list: &str,
    item_id: i64,
    file: UploadFile,
    folder: &str,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UploadedFile> {
    self
      .simulate("readAndUploadFile", cancel, async {
        if file.bytes.is_empty() {
          return Err(ListError::remote(format!("400: File {} is empty", file.name)));
        }
        let name = upload_file_name(list, item_id, &file.name);
        Ok(UploadedFile {
          url: format!("https://mock.local/{}/{}", folder.trim_matches('/'), name),
        })
      })
      .await
  }
}

// ============================================================================
// Query emulation
// ============================================================================

/// Apply filter, order, skip, top and select, in that order.
pub fn apply_query(items: Vec<ListItem>, query: &ListQuery) -> ListResult<Vec<ListItem>> {
  let clauses = query
    .values(QueryOp::Filter)
    .map(parse_filter)
    .collect::<ListResult<Vec<_>>>()?
    .concat();

  let mut items: Vec<ListItem> = items
    .into_iter()
    .filter(|item| clauses.iter().all(|c| c.matches(item)))
    .collect();

  if let Some(order) = query.last(QueryOp::OrderBy) {
    let keys = parse_order(order);
    items.sort_by(|a, b| {
      keys
        .iter()
        .map(|(field, descending)| {
          let ord = compare_values(lookup(a, field), lookup(b, field));
          if *descending {
            ord.reverse()
          } else {
            ord
          }
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
    });
  }

  let skip = parse_count(query.last(QueryOp::Skip), QueryOp::Skip)?.unwrap_or(0);
  let top = parse_count(query.last(QueryOp::Top), QueryOp::Top)?.unwrap_or(usize::MAX);
  let mut items: Vec<ListItem> = items.into_iter().skip(skip).take(top).collect();

  if let Some(select) = query.last(QueryOp::Select) {
    let fields: Vec<&str> = select
      .split(',')
      .map(|f| f.trim().split('/').next().unwrap_or_default())
      .filter(|f| !f.is_empty())
      .collect();
    for item in &mut items {
      item.retain(|key, _| fields.contains(&key.as_str()));
    }
  }

  Ok(items)
}

fn parse_count(value: Option<&str>, op: QueryOp) -> ListResult<Option<usize>> {
  value
    .map(|v| {
      v.trim()
        .parse()
        .map_err(|_| ListError::remote(format!("400: Invalid {} value '{}'", op, v)))
    })
    .transpose()
}

fn parse_order(order: &str) -> Vec<(String, bool)> {
  order
    .split(',')
    .filter_map(|part| {
      let mut words = part.split_whitespace();
      let field = words.next()?;
      let descending = words
        .next()
        .is_some_and(|dir| dir.eq_ignore_ascii_case("desc"));
      Some((field.to_string(), descending))
    })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
  Eq,
  Ne,
  Gt,
  Ge,
  Lt,
  Le,
}

impl Comparison {
  fn parse(op: &str) -> Option<Self> {
    match op.to_ascii_lowercase().as_str() {
      "eq" => Some(Self::Eq),
      "ne" => Some(Self::Ne),
      "gt" => Some(Self::Gt),
      "ge" => Some(Self::Ge),
      "lt" => Some(Self::Lt),
      "le" => Some(Self::Le),
      _ => None,
    }
  }

  fn accepts(self, ord: Ordering) -> bool {
    match self {
      Self::Eq => ord == Ordering::Equal,
      Self::Ne => ord != Ordering::Equal,
      Self::Gt => ord == Ordering::Greater,
      Self::Ge => ord != Ordering::Less,
      Self::Lt => ord == Ordering::Less,
      Self::Le => ord != Ordering::Greater,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
  DateTime(DateTime<Utc>),
  Text(String),
  Number(f64),
  Bool(bool),
  Null,
}

#[derive(Debug, Clone)]
struct Clause {
  field: String,
  comparison: Comparison,
  literal: Literal,
}

impl Clause {
  fn matches(&self, item: &ListItem) -> bool {
    let value = lookup(item, &self.field);
    let ord = match (&self.literal, value) {
      (Literal::Null, None | Some(Value::Null)) => Some(Ordering::Equal),
      (Literal::Null, Some(_)) => Some(Ordering::Greater),
      (_, None | Some(Value::Null)) => None,
      (Literal::DateTime(at), Some(Value::String(s))) => DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc).cmp(at)),
      (Literal::Text(t), Some(Value::String(s))) => Some(s.as_str().cmp(t.as_str())),
      (Literal::Number(n), Some(Value::Number(v))) => v.as_f64().and_then(|v| v.partial_cmp(n)),
      // Boolean columns filter as 0/1
      (Literal::Number(n), Some(Value::Bool(b))) => {
        let v = if *b { 1.0 } else { 0.0 };
        v.partial_cmp(n)
      }
      (Literal::Bool(expected), Some(Value::Bool(b))) => Some(b.cmp(expected)),
      (Literal::Text(t), Some(Value::Number(v))) => Some(v.to_string().as_str().cmp(t.as_str())),
      _ => None,
    };

    ord.is_some_and(|ord| self.comparison.accepts(ord))
  }
}

/// Parse `Field op value [and Field op value ...]`.
fn parse_filter(filter: &str) -> ListResult<Vec<Clause>> {
  split_and(filter)
    .into_iter()
    .map(|part| parse_clause(part).ok_or_else(|| unsupported(filter)))
    .collect()
}

fn unsupported(filter: &str) -> ListError {
  ListError::remote(format!("400: Unsupported filter expression '{}'", filter))
}

/// Split on ` and ` outside of quoted literals.
fn split_and(filter: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let lower = filter.to_ascii_lowercase().into_bytes();
  let bytes = filter.as_bytes();
  let mut in_quotes = false;
  let mut start = 0;
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] == b'\'' {
      in_quotes = !in_quotes;
    } else if !in_quotes && lower[i..].starts_with(b" and ") {
      parts.push(filter[start..i].trim());
      i += " and ".len();
      start = i;
      continue;
    }
    i += 1;
  }
  parts.push(filter[start..].trim());
  parts
}

fn parse_clause(clause: &str) -> Option<Clause> {
  let clause = clause.trim();
  let clause = clause
    .strip_prefix('(')
    .and_then(|c| c.strip_suffix(')'))
    .unwrap_or(clause)
    .trim();

  let (field, rest) = clause.split_once(char::is_whitespace)?;
  let (op, value) = rest.trim_start().split_once(char::is_whitespace)?;

  Some(Clause {
    field: field.to_string(),
    comparison: Comparison::parse(op)?,
    literal: parse_literal(value.trim())?,
  })
}

fn parse_literal(value: &str) -> Option<Literal> {
  if let Some(inner) = value
    .strip_prefix("datetime'")
    .and_then(|v| v.strip_suffix('\''))
  {
    return DateTime::parse_from_rfc3339(inner)
      .ok()
      .map(|d| Literal::DateTime(d.with_timezone(&Utc)));
  }
  if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
    return Some(Literal::Text(inner.replace("''", "'")));
  }
  match value {
    "true" => return Some(Literal::Bool(true)),
    "false" => return Some(Literal::Bool(false)),
    "null" => return Some(Literal::Null),
    _ => {}
  }
  value.parse().ok().map(Literal::Number)
}

/// Resolve `Field` or `Lookup/Field` against an item.
fn lookup<'a>(item: &'a ListItem, path: &str) -> Option<&'a Value> {
  let mut parts = path.split('/');
  let mut value = item.get(parts.next()?)?;
  for part in parts {
    value = value.get(part)?;
  }
  Some(value)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::Number(x)), Some(Value::Number(y))) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
    (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
    (None | Some(Value::Null), _) => Ordering::Less,
    (_, None | Some(Value::Null)) => Ordering::Greater,
    _ => Ordering::Equal,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::list::odata::datetime_literal;
  use crate::list::ListErrorKind;
  use chrono::TimeZone;
  use serde_json::json;

  fn provider() -> MockProvider {
    MockProvider::new(&ListsConfig::default()).with_latency(MockLatency::none())
  }

  fn ids(items: &[ListItem]) -> Vec<i64> {
    items.iter().filter_map(item_id).collect()
  }

  fn body(value: Value) -> ListItem {
    value.as_object().cloned().unwrap()
  }

  #[tokio::test]
  async fn test_created_after_filter() {
    let provider = provider();
    let since = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let request = ListRequest::new("Stories").with_query(
      ListQuery::new().filter(format!("Created gt {}", datetime_literal(since))),
    );

    let items = provider.get_list_items(&request).await.unwrap();
    assert_eq!(ids(&items), vec![2, 3, 4]);
  }

  #[tokio::test]
  async fn test_combined_filters_order_and_paging() {
    let provider = provider();
    let query = ListQuery::new()
      .filter("Published eq 1 and AuthorId eq 1")
      .order_by("Created", true);

    let items = provider
      .get_list_items(&ListRequest::new("Stories").with_query(query.clone()))
      .await
      .unwrap();
    assert_eq!(ids(&items), vec![3, 1]);

    let page = provider
      .get_list_items(&ListRequest::new("Stories").with_query(query.skip(1).top(1)))
      .await
      .unwrap();
    assert_eq!(ids(&page), vec![1]);
  }

  #[tokio::test]
  async fn test_text_filter_with_escaped_quote_and_select() {
    let provider = provider().with_list(
      "Tags",
      vec![
        body(json!({"Id": 1, "Title": "Editor's pick", "Color": "red"})),
        body(json!({"Id": 2, "Title": "News and updates", "Color": "blue"})),
      ],
    );

    let request = ListRequest::new("Tags").with_query(
      ListQuery::new()
        .select(&["Id", "Title"])
        .filter("Title eq 'Editor''s pick'"),
    );
    let items = provider.get_list_items(&request).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("Color"), None);
    assert_eq!(items[0].get("Title"), Some(&json!("Editor's pick")));

    // " and " inside a literal is not a clause separator
    let request = ListRequest::new("Tags")
      .with_query(ListQuery::new().filter("Title eq 'News and updates'"));
    let items = provider.get_list_items(&request).await.unwrap();
    assert_eq!(ids(&items), vec![2]);
  }

  #[tokio::test]
  async fn test_unsupported_filter_is_an_error() {
    let provider = provider();
    let request =
      ListRequest::new("Stories").with_query(ListQuery::new().filter("substringof('x', Title)"));

    let err = provider.get_list_items(&request).await.unwrap_err();
    assert_eq!(err.kind, ListErrorKind::Remote);
    assert!(err.message.contains("Unsupported filter"));
  }

  #[tokio::test]
  async fn test_unknown_list_is_an_error() {
    let err = provider()
      .get_list_items(&ListRequest::new("Nope"))
      .await
      .unwrap_err();
    assert!(err.message.contains("does not exist"));
  }

  #[tokio::test]
  async fn test_writes_are_visible_to_reads() {
    let provider = provider();

    let created = provider
      .post_list_item("StoryComments", body(json!({"StoryId": 3, "AuthorId": 2, "Body": "Noted"})), None)
      .await
      .unwrap();
    let id = item_id(&created).unwrap();
    assert!(id >= 1000);
    assert!(created.contains_key("Created"));
    assert_eq!(created.get("Body"), Some(&json!("Noted")));

    provider
      .update_list_item("StoryComments", id, body(json!({"Body": "Edited"})), None)
      .await
      .unwrap();

    let request = ListRequest::new("StoryComments")
      .with_query(ListQuery::new().filter("StoryId eq 3"));
    let items = provider.get_list_items(&request).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("Body"), Some(&json!("Edited")));

    provider.delete_list_item("StoryComments", id, None).await.unwrap();
    assert!(provider.get_list_items(&request).await.unwrap().is_empty());

    let err = provider
      .delete_list_item("StoryComments", id, None)
      .await
      .unwrap_err();
    assert_eq!(err.kind, ListErrorKind::Remote);
  }

  #[tokio::test]
  async fn test_identity_lookups() {
    let provider = provider();

    let me = provider.get_current_user(None).await.unwrap();
    assert_eq!(me.id, fixtures::CURRENT_USER_ID);

    let props = provider.get_current_user_properties(None).await.unwrap();
    assert_eq!(props.account_name, me.login_name);

    let ben = provider
      .get_user_properties("ben@contoso.com", None)
      .await
      .unwrap();
    assert_eq!(ben.display_name, "Ben Okafor");

    assert!(provider.get_user(99, None).await.is_err());
  }

  #[tokio::test]
  async fn test_upload_returns_url() {
    let file = UploadFile {
      name: "cover.png".to_string(),
      bytes: vec![1, 2, 3],
    };
    let uploaded = provider()
      .read_and_upload_file("Stories", 7, file, "/StoryFiles/", None)
      .await
      .unwrap();
    assert_eq!(uploaded.url, "https://mock.local/StoryFiles/Stories-7-cover.png");
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_during_simulated_delay() {
    let provider = provider().with_latency(MockLatency::fixed(Duration::from_secs(5)));
    let token = CancellationToken::new();
    let request = ListRequest::new("Stories").with_cancel(token.clone());

    let canceller = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      token.cancel();
    });

    let err = provider.get_list_items(&request).await.unwrap_err();
    assert!(err.is_cancelled());
    canceller.await.unwrap();
  }

  #[test]
  fn test_latency_sample_within_bounds() {
    let latency = MockLatency {
      base: Duration::from_millis(10),
      jitter: Duration::from_millis(5),
    };
    for _ in 0..50 {
      let d = latency.sample();
      assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(15));
    }
  }
}
