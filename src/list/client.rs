use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::list::api_types::{
  normalize_error, ApiContextInfo, ApiFile, ApiItemsResponse, ApiPersonProperties, ApiUser,
};
use crate::list::provider::{upload_file_name, DataProvider};
use crate::list::types::{
  cancellable, ListError, ListItem, ListRequest, ListResult, UploadFile, UploadedFile, User,
  UserProperties,
};

const ACCEPT_JSON: &str = "application/json;odata=nometadata";

/// List REST API client; the production [`DataProvider`].
#[derive(Clone)]
pub struct RestListClient {
  http: reqwest::Client,
  site_url: String,
  token: Option<String>,
}

impl RestListClient {
  pub fn new(config: &Config) -> Result<Self> {
    let site = url::Url::parse(&config.site.url)
      .map_err(|e| eyre!("Invalid site URL {}: {}", config.site.url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("storyhub/", env!("CARGO_PKG_VERSION")))
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(http, site.as_str(), Config::get_api_token()))
  }

  pub fn with_client(http: reqwest::Client, site_url: &str, token: Option<String>) -> Self {
    Self {
      http,
      site_url: site_url.trim_end_matches('/').to_string(),
      token,
    }
  }

  fn api_url(&self, path: &str) -> String {
    format!("{}/_api/{}", self.site_url, path)
  }

  fn items_url(&self, list: &str, id: Option<i64>) -> String {
    let list = quote(list);
    match id {
      Some(id) => self.api_url(&format!("web/lists/getbytitle('{}')/items({})", list, id)),
      None => self.api_url(&format!("web/lists/getbytitle('{}')/items", list)),
    }
  }

  /// scheme://host[:port] of the site, for server-relative URLs.
  fn origin(&self) -> String {
    url::Url::parse(&self.site_url)
      .map(|u| u.origin().ascii_serialization())
      .unwrap_or_else(|_| self.site_url.clone())
  }

  fn request(&self, method: Method, url: &str) -> RequestBuilder {
    let builder = self
      .http
      .request(method, url)
      .header(header::ACCEPT, ACCEPT_JSON);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  /// Request carrying the form digest required for writes.
  fn write_request(&self, url: &str, digest: &str, http_method: Option<&str>) -> RequestBuilder {
    let builder = self
      .request(Method::POST, url)
      .header("X-RequestDigest", digest);
    match http_method {
      Some(m) => builder
        .header("X-HTTP-Method", m)
        .header(header::IF_MATCH, "*"),
      None => builder,
    }
  }

  async fn execute(&self, builder: RequestBuilder, operation: &str) -> ListResult<Vec<u8>> {
    let response = builder
      .send()
      .await
      .map_err(|e| ListError::network(format!("{} failed: {}", operation, e)))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| ListError::network(format!("{} failed reading response: {}", operation, e)))?;

    if !status.is_success() {
      let err = normalize_error(status, &body);
      debug!(operation, %status, error = %err, "List request failed");
      return Err(err);
    }

    Ok(body.to_vec())
  }

  async fn send_json<T: DeserializeOwned>(
    &self,
    builder: RequestBuilder,
    operation: &str,
  ) -> ListResult<T> {
    let body = self.execute(builder, operation).await?;
    serde_json::from_slice(&body)
      .map_err(|e| ListError::decode(format!("{}: unexpected response: {}", operation, e)))
  }

  async fn form_digest(&self) -> ListResult<String> {
    let info: ApiContextInfo = self
      .send_json(
        self.request(Method::POST, &self.api_url("contextinfo")),
        "contextinfo",
      )
      .await?;
    Ok(info.form_digest_value)
  }
}

impl std::fmt::Debug for RestListClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RestListClient")
      .field("site_url", &self.site_url)
      .field("token", &self.token.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

/// Escape a value embedded in a single-quoted URL literal.
fn quote(value: &str) -> String {
  value.replace('\'', "''")
}

#[async_trait]
impl DataProvider for RestListClient {
  fn name(&self) -> &'static str {
    "rest"
  }

  async fn get_list_items(&self, request: &ListRequest) -> ListResult<Vec<ListItem>> {
    let mut url = self.items_url(&request.list, None);
    if !request.query.is_empty() {
      url = format!("{}?{}", url, request.query.to_query_string());
    }

    cancellable(request.cancel.as_ref(), "getListItems", async {
      let response: ApiItemsResponse = self
        .send_json(self.request(Method::GET, &url), "getListItems")
        .await?;
      Ok(response.value)
    })
    .await
  }

  async fn get_current_user(&self, cancel: Option<&CancellationToken>) -> ListResult<User> {
    cancellable(cancel, "getCurrentUser", async {
      let user: ApiUser = self
        .send_json(
          self.request(Method::GET, &self.api_url("web/currentuser")),
          "getCurrentUser",
        )
        .await?;
      Ok(user.into())
    })
    .await
  }

  async fn get_current_user_properties(
    &self,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties> {
    let url = self.api_url("SP.UserProfiles.PeopleManager/GetMyProperties");
    cancellable(cancel, "getCurrentUserProperties", async {
      let props: ApiPersonProperties = self
        .send_json(self.request(Method::GET, &url), "getCurrentUserProperties")
        .await?;
      Ok(props.into())
    })
    .await
  }

  async fn get_user_properties(
    &self,
    account: &str,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<UserProperties> {
    let account: String = url::form_urlencoded::byte_serialize(quote(account).as_bytes()).collect();
    let url = self.api_url(&format!(
      "SP.UserProfiles.PeopleManager/GetPropertiesFor(accountName=@v)?@v='{}'",
      account
    ));
    cancellable(cancel, "getUserProperties", async {
      let props: ApiPersonProperties = self
        .send_json(self.request(Method::GET, &url), "getUserProperties")
        .await?;
      Ok(props.into())
    })
    .await
  }

  async fn get_user(&self, id: i64, cancel: Option<&CancellationToken>) -> ListResult<User> {
    let url = self.api_url(&format!("web/getuserbyid({})", id));
    cancellable(cancel, "getUser", async {
      let user: ApiUser = self
        .send_json(self.request(Method::GET, &url), "getUser")
        .await?;
      Ok(user.into())
    })
    .await
  }

  async fn post_list_item(
    &self,
    list: &str,
    body: ListItem,
    cancel: Option<&CancellationToken>,
  ) -> ListResult<ListItem> {
    let url = self.items_url(list, None);
    cancellable(cancel, "postListItem", async {
      let digest = self.form_digest().await?;
      let created: ListItem = self
        .send_json(
          self.write_request(&url, &digest, None).json(&body),
          "postListItem",
        )
        .await?;

      let mut merged = body;
      merged.extend(created);
      Ok(merged)
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
    let url = self.items_url(list, Some(id));
    cancellable(cancel, "updateListItem", async {
      let digest = self.form_digest().await?;
      self
        .execute(
          self.write_request(&url, &digest, Some("MERGE")).json(&body),
          "updateListItem",
        )
        .await?;
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
    let url = self.items_url(list, Some(id));
    cancellable(cancel, "deleteListItem", async {
      let digest = self.form_digest().await?;
      self
        .execute(
          self.write_request(&url, &digest, Some("DELETE")),
          "deleteListItem",
        )
        .await?;
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
    let name = upload_file_name(list, item_id, &file.name);
    let url = self.api_url(&format!(
      "web/getfolderbyserverrelativeurl('{}')/files/add(url='{}',overwrite=true)",
      quote(folder),
      quote(&name)
    ));

    cancellable(cancel, "readAndUploadFile", async {
      let digest = self.form_digest().await?;
      let uploaded: ApiFile = self
        .send_json(
          self
            .write_request(&url, &digest, None)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(file.bytes),
          "readAndUploadFile",
        )
        .await?;

      Ok(UploadedFile {
        url: format!("{}{}", self.origin(), uploaded.server_relative_url),
      })
    })
    .await
  }
}
