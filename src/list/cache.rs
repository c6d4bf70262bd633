//! Cache keys for list reads.

use sha2::{Digest, Sha256};

use crate::cache::QueryKey;

use super::types::ListRequest;

impl QueryKey for ListRequest {
  fn cache_hash(&self) -> String {
    let input = format!("list:{}?{}", normalize_list(&self.list), self.query.fingerprint());

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
  }

  fn description(&self) -> String {
    if self.query.is_empty() {
      format!("all items of {}", self.list)
    } else {
      format!("{} items: {}", self.list, self.query.describe())
    }
  }

  fn group_tag(&self) -> Option<String> {
    Some(list_group(&self.list))
  }
}

/// Group tag shared by every cached read of `list`.
pub fn list_group(list: &str) -> String {
  format!("list:{}", normalize_list(list))
}

/// List titles are case-insensitive on the backend.
fn normalize_list(list: &str) -> String {
  list.trim().to_lowercase()
}
