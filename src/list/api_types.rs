//! Serde-deserializable types matching list REST API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::types::{ListError, ListItem, User, UserProperties};

/// Re-serialize a value through JSON to convert between compatible types.
/// Used to turn untyped list items into typed records and back.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiItemsResponse {
  #[serde(default)]
  pub value: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
pub struct ApiContextInfo {
  #[serde(rename = "FormDigestValue")]
  pub form_digest_value: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiFile {
  #[serde(rename = "ServerRelativeUrl")]
  pub server_relative_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(rename = "Id")]
  pub id: i64,
  #[serde(rename = "Title", default)]
  pub title: String,
  #[serde(rename = "Email")]
  pub email: Option<String>,
  #[serde(rename = "LoginName", default)]
  pub login_name: String,
  #[serde(rename = "IsSiteAdmin", default)]
  pub is_site_admin: bool,
}

impl From<ApiUser> for User {
  fn from(api: ApiUser) -> Self {
    User {
      id: api.id,
      title: api.title,
      email: api.email.filter(|e| !e.is_empty()),
      login_name: api.login_name,
      is_site_admin: api.is_site_admin,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiProfileProperty {
  #[serde(rename = "Key")]
  pub key: String,
  #[serde(rename = "Value", default)]
  pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPersonProperties {
  #[serde(rename = "AccountName", default)]
  pub account_name: String,
  #[serde(rename = "DisplayName", default)]
  pub display_name: String,
  #[serde(rename = "Email")]
  pub email: Option<String>,
  #[serde(rename = "PictureUrl")]
  pub picture_url: Option<String>,
  #[serde(rename = "Title")]
  pub title: Option<String>,
  #[serde(rename = "UserProfileProperties", default)]
  pub user_profile_properties: Vec<ApiProfileProperty>,
}

impl From<ApiPersonProperties> for UserProperties {
  fn from(api: ApiPersonProperties) -> Self {
    UserProperties {
      account_name: api.account_name,
      display_name: api.display_name,
      email: api.email,
      picture_url: api.picture_url,
      title: api.title,
      properties: api
        .user_profile_properties
        .into_iter()
        .filter_map(|p| p.value.filter(|v| !v.is_empty()).map(|v| (p.key, v)))
        .collect(),
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiErrorMessage {
  Text(String),
  Localized { value: String },
}

impl ApiErrorMessage {
  fn text(&self) -> &str {
    match self {
      Self::Text(s) => s,
      Self::Localized { value } => value,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
  #[serde(default)]
  pub code: String,
  pub message: ApiErrorMessage,
}

/// Error body in either the plain or the `odata.error` form.
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
  pub error: Option<ApiErrorDetail>,
  #[serde(rename = "odata.error")]
  pub odata_error: Option<ApiErrorDetail>,
}

/// Normalize a failed response into a [`ListError`].
pub fn normalize_error(status: StatusCode, body: &[u8]) -> ListError {
  let detail = serde_json::from_slice::<ApiErrorEnvelope>(body)
    .ok()
    .and_then(|envelope| envelope.error.or(envelope.odata_error));

  match detail {
    Some(detail) if detail.code.is_empty() => {
      ListError::remote(format!("{}: {}", status.as_u16(), detail.message.text()))
    }
    Some(detail) => ListError::remote(format!(
      "{} {}: {}",
      status.as_u16(),
      detail.code,
      detail.message.text()
    )),
    None => {
      let text = String::from_utf8_lossy(body);
      let text = text.trim();
      if text.is_empty() {
        ListError::remote(format!("HTTP {}", status))
      } else {
        let snippet: String = text.chars().take(200).collect();
        ListError::remote(format!("HTTP {}: {}", status, snippet))
      }
    }
  }
}
