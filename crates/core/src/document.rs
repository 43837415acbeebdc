//! Raw document access helpers.
//!
//! The replicated store hands back free-form JSON records. Ids arrive either
//! as plain strings or wrapped in `{"$oid": "..."}`, and timestamps arrive as
//! ISO-8601 strings, epoch milliseconds, or `{"$date": {"$numberLong": "..."}}`.
//! [`Document`] normalizes those conventions so the typed decoders in
//! [`crate::model`] stay short.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single record as delivered by the store.
///
/// Wraps the raw JSON value; accessors never fail and fall back to
/// empty/zero values on missing or malformed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

impl Document {
  pub fn new(value: Value) -> Self {
    Self(value)
  }

  pub fn value(&self) -> &Value {
    &self.0
  }

  pub fn into_value(self) -> Value {
    self.0
  }

  /// The record id, unwrapping the `$oid` form when present.
  pub fn id(&self) -> String {
    self.0.get("_id").map(id_string).unwrap_or_default()
  }

  /// An id-shaped field other than `_id` (e.g. `movie_id`).
  pub fn id_field(&self, name: &str) -> String {
    self.0.get(name).map(id_string).unwrap_or_default()
  }

  pub fn str_field(&self, name: &str) -> String {
    match self.0.get(name) {
      Some(Value::String(s)) => s.clone(),
      // Years in particular show up as both strings and numbers.
      Some(Value::Number(n)) => n.to_string(),
      _ => String::new(),
    }
  }

  pub fn i64_field(&self, name: &str) -> i64 {
    self.0.get(name).and_then(Value::as_i64).unwrap_or(0)
  }

  pub fn opt_i64_field(&self, name: &str) -> Option<i64> {
    self.0.get(name).and_then(Value::as_i64)
  }

  pub fn f64_field(&self, name: &str) -> Option<f64> {
    self.0.get(name).and_then(Value::as_f64)
  }

  pub fn bool_field(&self, name: &str) -> bool {
    self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
  }

  pub fn str_array(&self, name: &str) -> Vec<String> {
    match self.0.get(name) {
      Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
      _ => Vec::new(),
    }
  }

  /// A free-form object field, kept as raw JSON (`awards`, `imdb`, `tomatoes`).
  pub fn object_field(&self, name: &str) -> Value {
    match self.0.get(name) {
      Some(v @ Value::Object(_)) => v.clone(),
      _ => Value::Object(serde_json::Map::new()),
    }
  }

  /// A nested field by JSON pointer (e.g. `/imdb/rating`).
  pub fn pointer_f64(&self, pointer: &str) -> Option<f64> {
    self.0.pointer(pointer).and_then(Value::as_f64)
  }

  /// A timestamp field in any of the store's date shapes.
  ///
  /// Defaults to the Unix epoch when missing or malformed.
  pub fn timestamp_field(&self, name: &str) -> DateTime<Utc> {
    self.0.get(name).map(parse_timestamp).unwrap_or(DateTime::UNIX_EPOCH)
  }
}

impl From<Value> for Document {
  fn from(value: Value) -> Self {
    Self(value)
  }
}

fn id_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Object(map) => match map.get("$oid") {
      Some(Value::String(s)) => s.clone(),
      _ => String::new(),
    },
    Value::Number(n) => n.to_string(),
    _ => String::new(),
  }
}

/// Parse any of the store's date shapes; Unix epoch on failure.
pub fn parse_timestamp(value: &Value) -> DateTime<Utc> {
  match value {
    Value::String(s) => s
      .parse::<DateTime<Utc>>()
      .unwrap_or(DateTime::UNIX_EPOCH),
    Value::Number(n) => n
      .as_i64()
      .and_then(DateTime::from_timestamp_millis)
      .unwrap_or(DateTime::UNIX_EPOCH),
    Value::Object(map) => {
      // {"$date": {"$numberLong": "1234"}} or {"$date": 1234}
      match map.get("$date") {
        Some(Value::Object(inner)) => inner
          .get("$numberLong")
          .and_then(Value::as_str)
          .and_then(|s| s.parse::<i64>().ok())
          .and_then(DateTime::from_timestamp_millis)
          .unwrap_or(DateTime::UNIX_EPOCH),
        Some(Value::Number(n)) => n
          .as_i64()
          .and_then(DateTime::from_timestamp_millis)
          .unwrap_or(DateTime::UNIX_EPOCH),
        _ => DateTime::UNIX_EPOCH,
      }
    }
    _ => DateTime::UNIX_EPOCH,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_plain_string_id() {
    let doc = Document::new(json!({"_id": "abc123"}));
    assert_eq!(doc.id(), "abc123");
  }

  #[test]
  fn test_oid_wrapped_id() {
    let doc = Document::new(json!({"_id": {"$oid": "573a1390f29313caabcd42e8"}}));
    assert_eq!(doc.id(), "573a1390f29313caabcd42e8");
    let doc = Document::new(json!({"movie_id": {"$oid": "m1"}}));
    assert_eq!(doc.id_field("movie_id"), "m1");
  }

  #[test]
  fn test_missing_id_defaults_empty() {
    let doc = Document::new(json!({"title": "x"}));
    assert_eq!(doc.id(), "");
  }

  #[test]
  fn test_numeric_year_reads_as_string() {
    let doc = Document::new(json!({"year": 1972}));
    assert_eq!(doc.str_field("year"), "1972");
    let doc = Document::new(json!({"year": "1972"}));
    assert_eq!(doc.str_field("year"), "1972");
  }

  #[test]
  fn test_timestamp_shapes() {
    let iso = Document::new(json!({"date": "2024-05-01T12:00:00Z"}));
    assert_eq!(iso.timestamp_field("date").timestamp(), 1714564800);

    let millis = Document::new(json!({"date": 1714564800000i64}));
    assert_eq!(millis.timestamp_field("date").timestamp(), 1714564800);

    let wrapped = Document::new(json!({"date": {"$date": {"$numberLong": "1714564800000"}}}));
    assert_eq!(wrapped.timestamp_field("date").timestamp(), 1714564800);

    let garbage = Document::new(json!({"date": ["not", "a", "date"]}));
    assert_eq!(garbage.timestamp_field("date"), DateTime::UNIX_EPOCH);
  }

  #[test]
  fn test_str_array_skips_non_strings() {
    let doc = Document::new(json!({"genres": ["Drama", 7, "Crime"]}));
    assert_eq!(doc.str_array("genres"), vec!["Drama", "Crime"]);
  }

  #[test]
  fn test_pointer_f64() {
    let doc = Document::new(json!({"imdb": {"rating": 8.7}}));
    assert_eq!(doc.pointer_f64("/imdb/rating"), Some(8.7));
    assert_eq!(doc.pointer_f64("/tomatoes/viewer/rating"), None);
  }
}
