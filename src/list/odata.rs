//! OData-style query parameters for list reads.
//!
//! A query is an ordered list of `(operation, value)` pairs. Values are passed
//! to the backend verbatim; filter syntax is the backend's.

use std::fmt;

/// Query operation, serialized as `$select`, `$filter`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOp {
  Select,
  Filter,
  Expand,
  Top,
  Skip,
  OrderBy,
}

impl QueryOp {
  pub fn param(self) -> &'static str {
    match self {
      Self::Select => "$select",
      Self::Filter => "$filter",
      Self::Expand => "$expand",
      Self::Top => "$top",
      Self::Skip => "$skip",
      Self::OrderBy => "$orderby",
    }
  }
}

impl fmt::Display for QueryOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.param())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
  ops: Vec<(QueryOp, String)>,
}

impl ListQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(mut self, op: QueryOp, value: impl Into<String>) -> Self {
    self.ops.push((op, value.into()));
    self
  }

  pub fn select(self, fields: &[&str]) -> Self {
    self.push(QueryOp::Select, fields.join(","))
  }

  pub fn filter(self, expr: impl Into<String>) -> Self {
    self.push(QueryOp::Filter, expr)
  }

  pub fn expand(self, fields: &[&str]) -> Self {
    self.push(QueryOp::Expand, fields.join(","))
  }

  pub fn top(self, n: usize) -> Self {
    self.push(QueryOp::Top, n.to_string())
  }

  pub fn skip(self, n: usize) -> Self {
    self.push(QueryOp::Skip, n.to_string())
  }

  pub fn order_by(self, field: &str, descending: bool) -> Self {
    let dir = if descending { "desc" } else { "asc" };
    self.push(QueryOp::OrderBy, format!("{} {}", field, dir))
  }

  pub fn ops(&self) -> &[(QueryOp, String)] {
    &self.ops
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  /// Values of every occurrence of `op`, in order.
  pub fn values(&self, op: QueryOp) -> impl Iterator<Item = &str> {
    self
      .ops
      .iter()
      .filter(move |(o, _)| *o == op)
      .map(|(_, v)| v.as_str())
  }

  /// Last value given for `op`.
  pub fn last(&self, op: QueryOp) -> Option<&str> {
    self.values(op).last()
  }

  /// Cache key part. Values are percent-encoded, so a `&` or `=` inside a
  /// value can't make two different queries look alike.
  pub fn fingerprint(&self) -> String {
    self.to_query_string()
  }

  /// Unencoded `$op=value&...` for logs. Not unique; use `fingerprint` for keys.
  pub fn describe(&self) -> String {
    self
      .ops
      .iter()
      .map(|(op, value)| format!("{}={}", op, value))
      .collect::<Vec<_>>()
      .join("&")
  }

  /// Percent-encoded query string for the wire.
  pub fn to_query_string(&self) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (op, value) in &self.ops {
      serializer.append_pair(op.param(), value);
    }
    serializer.finish()
  }
}

/// Format a timestamp as an OData datetime literal, keeping milliseconds.
pub fn datetime_literal(at: chrono::DateTime<chrono::Utc>) -> String {
  format!("datetime'{}'", at.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_query_preserves_order() {
    let query = ListQuery::new()
      .select(&["Id", "Title"])
      .filter("Published eq 1")
      .order_by("Created", true)
      .top(20);

    assert_eq!(
      query.describe(),
      "$select=Id,Title&$filter=Published eq 1&$orderby=Created desc&$top=20"
    );
    assert_eq!(query.fingerprint(), query.to_query_string());
    assert_eq!(query.last(QueryOp::Top), Some("20"));
    assert_eq!(query.last(QueryOp::Skip), None);
  }

  #[test]
  fn test_query_string_is_encoded() {
    let query = ListQuery::new().filter("Title eq 'a&b'");
    let encoded = query.to_query_string();
    assert!(encoded.starts_with("%24filter="));
    assert!(!encoded.contains("'a&b'"));
  }

  #[test]
  fn test_datetime_literal() {
    let at = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    assert_eq!(datetime_literal(at), "datetime'2024-03-01T09:30:00.000Z'");

    let later = at + chrono::Duration::milliseconds(250);
    assert_eq!(datetime_literal(later), "datetime'2024-03-01T09:30:00.250Z'");
  }

  #[test]
  fn test_fingerprint_separates_values_containing_separators() {
    let smuggled = ListQuery::new().filter("Id eq 1&$top=5");
    let separate = ListQuery::new().filter("Id eq 1").top(5);

    assert_eq!(smuggled.describe(), separate.describe());
    assert_ne!(smuggled.fingerprint(), separate.fingerprint());
  }
}
