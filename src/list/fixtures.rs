//! Static fixture data served by the mock provider.

use serde_json::{json, Value};

use super::types::{ListItem, User, UserProperties};
use crate::config::ListsConfig;

fn item(value: Value) -> ListItem {
  match value {
    Value::Object(map) => map,
    _ => ListItem::new(),
  }
}

pub fn stories() -> Vec<ListItem> {
  vec![
    item(json!({
      "Id": 1,
      "Title": "Welcome to the new intranet",
      "Summary": "A quick tour of what changed and where things live now.",
      "Body": "<p>We moved everything to one place.</p>",
      "CoverImageUrl": "https://mock.local/StoryFiles/Stories-1-cover.jpg",
      "AuthorId": 1,
      "Published": true,
      "Created": "2024-01-08T09:00:00Z",
      "Modified": "2024-01-08T09:00:00Z"
    })),
    item(json!({
      "Id": 2,
      "Title": "Quarterly town hall recap",
      "Summary": "Highlights, numbers, and the questions you asked.",
      "Body": "<p>Thanks to everyone who joined.</p>",
      "CoverImageUrl": null,
      "AuthorId": 2,
      "Published": true,
      "Created": "2024-02-14T15:30:00Z",
      "Modified": "2024-02-15T08:12:00Z"
    })),
    item(json!({
      "Id": 3,
      "Title": "Office move: what to pack",
      "Summary": "Checklist for the move on the 22nd.",
      "Body": "<ul><li>Label your boxes</li></ul>",
      "CoverImageUrl": "https://mock.local/StoryFiles/Stories-3-boxes.jpg",
      "AuthorId": 1,
      "Published": true,
      "Created": "2024-03-01T10:00:00Z",
      "Modified": "2024-03-01T10:00:00Z"
    })),
    item(json!({
      "Id": 4,
      "Title": "Draft: benefits update",
      "Summary": "Not ready yet.",
      "Body": "<p>TBD</p>",
      "CoverImageUrl": null,
      "AuthorId": 3,
      "Published": false,
      "Created": "2024-03-05T12:00:00Z",
      "Modified": "2024-03-06T07:45:00Z"
    })),
  ]
}

pub fn reactions() -> Vec<ListItem> {
  vec![
    item(json!({"Id": 1, "StoryId": 1, "UserId": 2, "Reaction": "like", "Created": "2024-01-08T10:00:00Z"})),
    item(json!({"Id": 2, "StoryId": 1, "UserId": 3, "Reaction": "celebrate", "Created": "2024-01-08T11:20:00Z"})),
    item(json!({"Id": 3, "StoryId": 2, "UserId": 1, "Reaction": "like", "Created": "2024-02-14T16:00:00Z"})),
  ]
}

pub fn comments() -> Vec<ListItem> {
  vec![
    item(json!({"Id": 1, "StoryId": 1, "AuthorId": 2, "Body": "Looks great!", "Created": "2024-01-08T10:05:00Z"})),
    item(json!({"Id": 2, "StoryId": 2, "AuthorId": 3, "Body": "Will the slides be shared?", "Created": "2024-02-14T17:45:00Z"})),
  ]
}

pub fn users() -> Vec<User> {
  vec![
    User {
      id: 1,
      title: "Ana Ruiz".to_string(),
      email: Some("ana@contoso.com".to_string()),
      login_name: "i:0#.f|membership|ana@contoso.com".to_string(),
      is_site_admin: true,
    },
    User {
      id: 2,
      title: "Ben Okafor".to_string(),
      email: Some("ben@contoso.com".to_string()),
      login_name: "i:0#.f|membership|ben@contoso.com".to_string(),
      is_site_admin: false,
    },
    User {
      id: 3,
      title: "Chen Wei".to_string(),
      email: Some("chen@contoso.com".to_string()),
      login_name: "i:0#.f|membership|chen@contoso.com".to_string(),
      is_site_admin: false,
    },
  ]
}

/// The user the mock treats as signed in.
pub const CURRENT_USER_ID: i64 = 1;

pub fn user_properties(user: &User) -> UserProperties {
  UserProperties {
    account_name: user.login_name.clone(),
    display_name: user.title.clone(),
    email: user.email.clone(),
    picture_url: None,
    title: Some(if user.is_site_admin { "Editor" } else { "Staff" }.to_string()),
    properties: [("Department".to_string(), "Communications".to_string())].into(),
  }
}

/// Fixture lists keyed by the configured list names.
pub fn lists(names: &ListsConfig) -> Vec<(String, Vec<ListItem>)> {
  vec![
    (names.stories.clone(), stories()),
    (names.reactions.clone(), reactions()),
    (names.comments.clone(), comments()),
    (names.errors.clone(), Vec::new()),
  ]
}
