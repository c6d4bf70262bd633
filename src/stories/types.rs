use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::list::api_types::reserialize;
use crate::list::{ListError, ListItem, ListResult};

/// A published or draft story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Story {
  pub id: i64,
  pub title: String,
  #[serde(default)]
  pub summary: Option<String>,
  /// Rich-text body as stored (HTML)
  #[serde(default)]
  pub body: Option<String>,
  #[serde(default)]
  pub cover_image_url: Option<String>,
  #[serde(default)]
  pub author_id: Option<i64>,
  #[serde(default)]
  pub published: bool,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
}

/// Fields of a story about to be created
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewStory {
  pub title: String,
  pub summary: Option<String>,
  pub body: Option<String>,
  pub cover_image_url: Option<String>,
  pub author_id: Option<i64>,
  pub published: bool,
}

/// One user's reaction to a story. At most one per user and story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reaction {
  pub id: i64,
  pub story_id: i64,
  pub user_id: i64,
  pub reaction: String,
  #[serde(default)]
  pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Comment {
  pub id: i64,
  pub story_id: i64,
  pub author_id: i64,
  pub body: String,
  #[serde(default)]
  pub created: Option<DateTime<Utc>>,
}

/// Convert a list item into a typed record.
pub fn decode<T: serde::de::DeserializeOwned>(item: ListItem) -> ListResult<T> {
  reserialize(item).map_err(|e| ListError::decode(format!("Unexpected item shape: {}", e)))
}

pub fn decode_all<T: serde::de::DeserializeOwned>(items: Vec<ListItem>) -> ListResult<Vec<T>> {
  items.into_iter().map(decode).collect()
}

/// Convert a typed record into list item fields.
pub fn encode(value: &impl Serialize) -> ListResult<ListItem> {
  reserialize(value).map_err(|e| ListError::decode(format!("Cannot encode item: {}", e)))
}
