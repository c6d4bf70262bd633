use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub site: SiteConfig,
  #[serde(default)]
  pub lists: ListsConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub poll: PollConfig,
  /// Force mock (true) or real (false) data. Detected from the site host when unset.
  pub mock: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Absolute site URL, e.g. https://contoso.sharepoint.com/sites/news
  #[serde(default = "default_site_url")]
  pub url: String,
  /// Persistent cache namespace (defaults to the site URL)
  pub namespace: Option<String>,
}

impl Default for SiteConfig {
  fn default() -> Self {
    Self {
      url: default_site_url(),
      namespace: None,
    }
  }
}

fn default_site_url() -> String {
  "http://localhost".to_string()
}

impl SiteConfig {
  /// Namespace isolating this site's persistent cache.
  pub fn cache_namespace(&self) -> String {
    self
      .namespace
      .clone()
      .unwrap_or_else(|| self.url.trim_end_matches('/').to_lowercase())
  }

  /// Host part of the site URL, empty if it doesn't parse.
  pub fn host(&self) -> String {
    url::Url::parse(&self.url)
      .ok()
      .and_then(|u| u.host_str().map(String::from))
      .unwrap_or_default()
  }
}

/// Names of the lists backing each collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListsConfig {
  pub stories: String,
  pub reactions: String,
  pub comments: String,
  pub errors: String,
  /// Document library folder for story attachments
  pub files_folder: String,
}

impl Default for ListsConfig {
  fn default() -> Self {
    Self {
      stories: "Stories".to_string(),
      reactions: "StoryReactions".to_string(),
      comments: "StoryComments".to_string(),
      errors: "ErrorLog".to_string(),
      files_folder: "StoryFiles".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to skip the persistent cache entirely
  pub enabled: bool,
  pub max_age_secs: u64,
  pub max_entries: Option<usize>,
  /// How long deduplicated reads are reused
  pub dedup_ttl_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_age_secs: 300,
      max_entries: Some(500),
      dedup_ttl_ms: 5_000,
    }
  }
}

impl CacheConfig {
  pub fn max_age(&self) -> Duration {
    Duration::from_secs(self.max_age_secs)
  }

  pub fn dedup_ttl(&self) -> Duration {
    Duration::from_millis(self.dedup_ttl_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  /// Interval against a real site
  pub interval_ms: u64,
  /// Interval used in mock mode
  pub dev_interval_ms: u64,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval_ms: 60_000,
      dev_interval_ms: 5_000,
    }
  }
}

impl PollConfig {
  pub fn interval(&self, use_mock: bool) -> Duration {
    Duration::from_millis(if use_mock {
      self.dev_interval_ms
    } else {
      self.interval_ms
    })
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storyhub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storyhub/config.yaml
  ///
  /// With `allow_default`, a missing file yields the default (mock-friendly) configuration.
  pub fn load(explicit_path: Option<&Path>, allow_default: bool) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None if allow_default => Ok(Self::default()),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/storyhub/config.yaml\n\
                 or run with --mock to use fixture data."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storyhub.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storyhub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API bearer token from the environment, if any.
  ///
  /// Checks STORYHUB_TOKEN. Sites relying on cookie or integrated auth run without one.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STORYHUB_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Mock override from the environment (STORYHUB_MOCK=1/true/0/false).
  pub fn mock_from_env() -> Option<bool> {
    match std::env::var("STORYHUB_MOCK").ok()?.to_lowercase().as_str() {
      "1" | "true" | "yes" => Some(true),
      "0" | "false" | "no" => Some(false),
      _ => None,
    }
  }
}
