//! Query values and their canonical identities.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A store query: DQL text plus named parameter bindings.
///
/// Parameters live in a `BTreeMap` so two queries that bind the same values
/// in a different order still produce the same [`QuerySignature`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  pub text: String,
  pub params: BTreeMap<String, Value>,
}

impl Query {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      params: BTreeMap::new(),
    }
  }

  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  pub fn param(&self, name: &str) -> Option<&Value> {
    self.params.get(name)
  }

  /// The canonical identity used to deduplicate observers.
  pub fn signature(&self) -> QuerySignature {
    let mut key = self.text.clone();
    for (name, value) in &self.params {
      key.push('\u{1}');
      key.push_str(name);
      key.push('=');
      key.push_str(&value.to_string());
    }
    QuerySignature(key)
  }

  /// The collection named in the `FROM`/`INTO`/`UPDATE`/`DELETE FROM`
  /// clause, if the text has one.
  pub fn collection(&self) -> Option<&str> {
    let mut words = self.text.split_whitespace();
    while let Some(word) = words.next() {
      match word.to_ascii_uppercase().as_str() {
        "FROM" | "INTO" | "UPDATE" => return words.next(),
        _ => {}
      }
    }
    None
  }
}

/// Canonical (query text + bound parameters) identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySignature(String);

impl fmt::Display for QuerySignature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Only the text portion; parameter separators are control characters.
    match self.0.split('\u{1}').next() {
      Some(text) => write!(f, "{}", text),
      None => Ok(()),
    }
  }
}
