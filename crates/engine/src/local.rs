//! In-process store backend.
//!
//! `LocalEngine` keeps collections in memory and speaks exactly the query
//! dialect the catalog in [`crate::queries`] uses: collection scans, id
//! equality, the `LIKE`-with-rating-guard search, `ORDER BY <field> DESC`,
//! `INSERT … DOCUMENTS`, `UPDATE … SET`, and `DELETE`. After every mutation
//! it re-runs the affected observer queries and pushes complete snapshots
//! down the delivery channels, which is the same contract the networked
//! store honors. Anything outside that dialect fails with
//! [`EngineError::QueryExecutionFailed`]; this is not a general query
//! engine.

use crate::error::EngineError;
use crate::query::Query;
use crate::{CancelHandle, QueryOutcome, ResultBatch, SyncEngine};
use async_trait::async_trait;
use cinesync_core::document::parse_timestamp;
use cinesync_core::{Document, StoreConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// In-memory [`SyncEngine`] for development and tests.
#[derive(Default)]
pub struct LocalEngine {
  state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
  started: bool,
  collections: HashMap<String, Vec<Value>>,
  observers: Vec<LocalObserver>,
  subscriptions: Vec<CancellationToken>,
  next_handle: u64,
  commit_id: i64,
}

struct LocalObserver {
  query: Query,
  statement: Select,
  delivery: mpsc::UnboundedSender<ResultBatch>,
  cancel: CancellationToken,
  /// Last delivered result set; unchanged results are not redelivered.
  last_sent: Option<Vec<Value>>,
}

impl LocalEngine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Preload a collection, bypassing the query path. Observers are not
  /// notified; seed before registering them.
  pub fn seed(&self, collection: &str, docs: Vec<Value>) {
    let mut state = self.lock_state();
    state.collections.entry(collection.to_string()).or_default().extend(docs);
  }

  /// Raw contents of a collection, for assertions.
  pub fn documents(&self, collection: &str) -> Vec<Value> {
    self.lock_state().collections.get(collection).cloned().unwrap_or_default()
  }

  /// Live (non-cancelled) observer count.
  pub fn observer_count(&self) -> usize {
    self.lock_state().observers.iter().filter(|o| !o.cancel.is_cancelled()).count()
  }

  /// Live (non-cancelled) replication subscription count.
  pub fn subscription_count(&self) -> usize {
    self.lock_state().subscriptions.iter().filter(|t| !t.is_cancelled()).count()
  }

  fn lock_state(&self) -> MutexGuard<'_, LocalState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[async_trait]
impl SyncEngine for LocalEngine {
  async fn start(&self, config: &StoreConfig) -> Result<(), EngineError> {
    let mut state = self.lock_state();
    if !state.started {
      state.started = true;
      info!(database_id = %config.database_id, "Local engine started");
    }
    Ok(())
  }

  async fn execute(&self, query: &Query) -> Result<QueryOutcome, EngineError> {
    let statement = Statement::parse(&query.text)?;
    let mut state = self.lock_state();
    if !state.started {
      return Err(EngineError::QueryExecutionFailed("engine not started".to_string()));
    }

    let (outcome, mutated_collection) = match statement {
      Statement::Select(select) => {
        let items = select.run(&state, &query.params)?;
        (
          QueryOutcome {
            items: items.into_iter().map(Document::new).collect(),
            mutated_count: 0,
            commit_id: None,
          },
          None,
        )
      }
      Statement::Insert { collection, doc_param } => {
        let doc = resolve_param(&query.params, &doc_param)?;
        let mut doc = match doc {
          Value::Object(_) => doc.clone(),
          other => {
            return Err(EngineError::QueryExecutionFailed(format!(
              "INSERT expects a document, got {other}"
            )));
          }
        };
        if doc.get("_id").is_none() {
          doc["_id"] = Value::String(Uuid::new_v4().to_string());
        }
        state.collections.entry(collection.clone()).or_default().push(doc);
        state.commit_id += 1;
        let commit = state.commit_id;
        (
          QueryOutcome {
            items: Vec::new(),
            mutated_count: 1,
            commit_id: Some(commit),
          },
          Some(collection),
        )
      }
      Statement::Update {
        collection,
        sets,
        id_param,
      } => {
        let id = resolve_param(&query.params, &id_param)?.clone();
        let mut mutated = 0;
        if let Some(docs) = state.collections.get_mut(&collection) {
          for doc in docs.iter_mut() {
            if doc.get("_id").is_some_and(|v| id_matches(v, &id)) {
              let Some(fields) = doc.as_object_mut() else { continue };
              for (field, param) in &sets {
                let value = query
                  .params
                  .get(param)
                  .ok_or_else(|| EngineError::QueryExecutionFailed(format!("unbound parameter :{param}")))?;
                fields.insert(field.clone(), value.clone());
              }
              mutated += 1;
            }
          }
        }
        let commit = if mutated > 0 {
          state.commit_id += 1;
          Some(state.commit_id)
        } else {
          None
        };
        (
          QueryOutcome {
            items: Vec::new(),
            mutated_count: mutated,
            commit_id: commit,
          },
          (mutated > 0).then_some(collection),
        )
      }
      Statement::Delete { collection, id_param } => {
        let id = resolve_param(&query.params, &id_param)?.clone();
        let mut mutated = 0;
        if let Some(docs) = state.collections.get_mut(&collection) {
          let before = docs.len();
          docs.retain(|doc| !doc.get("_id").is_some_and(|v| id_matches(v, &id)));
          mutated = before - docs.len();
        }
        let commit = if mutated > 0 {
          state.commit_id += 1;
          Some(state.commit_id)
        } else {
          None
        };
        (
          QueryOutcome {
            items: Vec::new(),
            mutated_count: mutated,
            commit_id: commit,
          },
          (mutated > 0).then_some(collection),
        )
      }
    };

    let notifications = match mutated_collection {
      Some(collection) => collect_notifications(&mut state, &collection),
      None => Vec::new(),
    };
    drop(state);

    for (delivery, batch) in notifications {
      let _ = delivery.send(batch);
    }
    Ok(outcome)
  }

  async fn register_observer(
    &self,
    query: &Query,
    delivery: mpsc::UnboundedSender<ResultBatch>,
  ) -> Result<CancelHandle, EngineError> {
    let statement = match Statement::parse(&query.text) {
      Ok(Statement::Select(select)) => select,
      Ok(_) => {
        return Err(EngineError::ObserverRegistrationFailed(
          "observers require a SELECT query".to_string(),
        ));
      }
      Err(EngineError::QueryExecutionFailed(msg)) => return Err(EngineError::ObserverRegistrationFailed(msg)),
      Err(other) => return Err(other),
    };

    let mut state = self.lock_state();
    if !state.started {
      return Err(EngineError::ObserverRegistrationFailed("engine not started".to_string()));
    }
    let initial = statement
      .run(&state, &query.params)
      .map_err(|e| EngineError::ObserverRegistrationFailed(e.to_string()))?;
    let cancel = CancellationToken::new();
    state.next_handle += 1;
    let handle = CancelHandle::new(state.next_handle, cancel.clone());
    state.observers.push(LocalObserver {
      query: query.clone(),
      statement,
      delivery: delivery.clone(),
      cancel,
      last_sent: Some(initial.clone()),
    });
    debug!(query = %query.signature(), "Registered local observer");
    drop(state);

    let _ = delivery.send(initial.into_iter().map(Document::new).collect());
    Ok(handle)
  }

  async fn register_subscription(&self, query: &Query) -> Result<CancelHandle, EngineError> {
    // Replication interests have no local effect; track them for
    // introspection only.
    if !matches!(Statement::parse(&query.text), Ok(Statement::Select(_))) {
      return Err(EngineError::ObserverRegistrationFailed(
        "subscriptions require a SELECT query".to_string(),
      ));
    }
    let mut state = self.lock_state();
    let cancel = CancellationToken::new();
    state.next_handle += 1;
    let handle = CancelHandle::new(state.next_handle, cancel.clone());
    state.subscriptions.push(cancel);
    debug!(query = %query.signature(), "Registered local subscription");
    Ok(handle)
  }
}

/// Re-run every live observer over a mutated collection; returns the batches
/// to deliver once the state lock is released. Observers whose result set
/// did not change are skipped.
fn collect_notifications(
  state: &mut LocalState,
  collection: &str,
) -> Vec<(mpsc::UnboundedSender<ResultBatch>, ResultBatch)> {
  state
    .observers
    .retain(|o| !o.cancel.is_cancelled() && !o.delivery.is_closed());
  let results: Vec<Option<Vec<Value>>> = state
    .observers
    .iter()
    .map(|observer| {
      if observer.query.collection() != Some(collection) {
        return None;
      }
      observer.statement.run(state, &observer.query.params).ok()
    })
    .collect();

  let mut notifications = Vec::new();
  for (observer, items) in state.observers.iter_mut().zip(results) {
    let Some(items) = items else { continue };
    if observer.last_sent.as_ref() == Some(&items) {
      continue;
    }
    observer.last_sent = Some(items.clone());
    notifications.push((
      observer.delivery.clone(),
      items.into_iter().map(Document::new).collect(),
    ));
  }
  notifications
}

// ---------------------------------------------------------------------------
// Statement parsing
// ---------------------------------------------------------------------------

enum Statement {
  Select(Select),
  Insert { collection: String, doc_param: String },
  Update {
    collection: String,
    sets: Vec<(String, String)>,
    id_param: String,
  },
  Delete { collection: String, id_param: String },
}

struct Select {
  collection: String,
  predicate: Predicate,
  order_by: Option<String>,
}

enum Predicate {
  All,
  /// `<field> = :param` over an id-shaped field.
  FieldEquals { field: String, param: String },
  /// `rated = 'G' OR rated = 'PG'`, with or without parentheses.
  KidRated,
  /// `title LIKE :param AND (rated = 'G' OR rated = 'PG')`.
  TitleLikeKidRated { param: String },
}

impl Statement {
  fn parse(text: &str) -> Result<Self, EngineError> {
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = trimmed.to_ascii_uppercase();

    if upper.starts_with("SELECT ") {
      return Ok(Statement::Select(Select::parse(&trimmed, &upper)?));
    }
    if upper.starts_with("INSERT INTO ") {
      // INSERT INTO <coll> DOCUMENTS (:param)
      let rest = &trimmed["INSERT INTO ".len()..];
      let mut words = rest.split_whitespace();
      let collection = words
        .next()
        .ok_or_else(|| unsupported(&trimmed))?
        .to_string();
      let param = rest
        .find("(:")
        .and_then(|start| {
          let tail = &rest[start + 2..];
          tail.find(')').map(|end| tail[..end].to_string())
        })
        .ok_or_else(|| unsupported(&trimmed))?;
      return Ok(Statement::Insert {
        collection,
        doc_param: param,
      });
    }
    if upper.starts_with("UPDATE ") {
      // UPDATE <coll> SET a = :pa, b = :pb WHERE _id = :id
      let rest = &trimmed["UPDATE ".len()..];
      let set_pos = find_keyword(rest, " SET ").ok_or_else(|| unsupported(&trimmed))?;
      let collection = rest[..set_pos].trim().to_string();
      let after_set = &rest[set_pos + " SET ".len()..];
      let where_pos = find_keyword(after_set, " WHERE ").ok_or_else(|| unsupported(&trimmed))?;
      let sets = after_set[..where_pos]
        .split(',')
        .map(|clause| {
          let (field, param) = clause.split_once('=').ok_or_else(|| unsupported(&trimmed))?;
          let param = param.trim().strip_prefix(':').ok_or_else(|| unsupported(&trimmed))?;
          Ok((field.trim().to_string(), param.to_string()))
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
      let id_param = parse_id_clause(&after_set[where_pos + " WHERE ".len()..]).ok_or_else(|| unsupported(&trimmed))?;
      return Ok(Statement::Update {
        collection,
        sets,
        id_param,
      });
    }
    if upper.starts_with("DELETE FROM ") {
      let rest = &trimmed["DELETE FROM ".len()..];
      let where_pos = find_keyword(rest, " WHERE ").ok_or_else(|| unsupported(&trimmed))?;
      let collection = rest[..where_pos].trim().to_string();
      let id_param = parse_id_clause(&rest[where_pos + " WHERE ".len()..]).ok_or_else(|| unsupported(&trimmed))?;
      return Ok(Statement::Delete { collection, id_param });
    }
    Err(unsupported(&trimmed))
  }
}

impl Select {
  fn parse(text: &str, upper: &str) -> Result<Self, EngineError> {
    let from_pos = upper.find(" FROM ").ok_or_else(|| unsupported(text))?;
    let after_from = &text[from_pos + " FROM ".len()..];
    let after_from_upper = &upper[from_pos + " FROM ".len()..];

    let (source, where_clause, order_clause) = match after_from_upper.find(" WHERE ") {
      Some(where_pos) => {
        let tail = &after_from[where_pos + " WHERE ".len()..];
        let tail_upper = &after_from_upper[where_pos + " WHERE ".len()..];
        match tail_upper.find(" ORDER BY ") {
          Some(order_pos) => (
            &after_from[..where_pos],
            Some(tail[..order_pos].trim()),
            Some(tail[order_pos + " ORDER BY ".len()..].trim()),
          ),
          None => (&after_from[..where_pos], Some(tail.trim()), None),
        }
      }
      None => match after_from_upper.find(" ORDER BY ") {
        Some(order_pos) => (
          &after_from[..order_pos],
          None,
          Some(after_from[order_pos + " ORDER BY ".len()..].trim()),
        ),
        None => (after_from, None, None),
      },
    };

    let collection = source
      .split_whitespace()
      .next()
      .ok_or_else(|| unsupported(text))?
      .to_string();

    let predicate = match where_clause {
      None => Predicate::All,
      Some(clause) => Predicate::parse(clause).ok_or_else(|| unsupported(text))?,
    };

    // Only `<field> DESC` orderings exist in the catalog.
    let order_by = match order_clause {
      None => None,
      Some(clause) => {
        let field = clause
          .strip_suffix(" DESC")
          .or_else(|| clause.strip_suffix(" desc"))
          .ok_or_else(|| unsupported(text))?;
        Some(field.trim().to_string())
      }
    };

    Ok(Select {
      collection,
      predicate,
      order_by,
    })
  }

  fn run(&self, state: &LocalState, params: &std::collections::BTreeMap<String, Value>) -> Result<Vec<Value>, EngineError> {
    let docs = state.collections.get(&self.collection).cloned().unwrap_or_default();
    let mut matched = Vec::new();
    for doc in docs {
      let keep = match &self.predicate {
        Predicate::All => true,
        Predicate::KidRated => kid_rated(&doc),
        Predicate::FieldEquals { field, param } => {
          let wanted = resolve_param(params, param)?;
          doc.get(field).is_some_and(|v| id_matches(v, wanted))
        }
        Predicate::TitleLikeKidRated { param } => {
          let pattern = resolve_param(params, param)?;
          let pattern = pattern.as_str().unwrap_or_default();
          kid_rated(&doc) && like_match(doc.get("title").and_then(Value::as_str).unwrap_or_default(), pattern)
        }
      };
      if keep {
        matched.push(doc);
      }
    }
    if let Some(field) = &self.order_by {
      let mut keyed: Vec<(f64, Value)> = matched.into_iter().map(|doc| (sort_key(&doc, field), doc)).collect();
      keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
      matched = keyed.into_iter().map(|(_, doc)| doc).collect();
    }
    Ok(matched)
  }
}

impl Predicate {
  fn parse(clause: &str) -> Option<Self> {
    let normalized = clause.trim();
    let upper = normalized.to_ascii_uppercase();

    if is_kid_rated_clause(&upper) {
      return Some(Predicate::KidRated);
    }
    if let Some(like_pos) = upper.find(" LIKE :") {
      // title LIKE :param AND (rated = 'G' OR rated = 'PG')
      let field = normalized[..like_pos].trim();
      if field != "title" {
        return None;
      }
      let tail = &normalized[like_pos + " LIKE :".len()..];
      let (param, rest) = match tail.find(' ') {
        Some(end) => (&tail[..end], tail[end..].trim()),
        None => (tail, ""),
      };
      let rest_upper = rest.to_ascii_uppercase();
      let rest_upper = rest_upper.strip_prefix("AND ").unwrap_or(&rest_upper);
      if !rest.is_empty() && !is_kid_rated_clause(rest_upper.trim()) {
        return None;
      }
      return Some(Predicate::TitleLikeKidRated {
        param: param.to_string(),
      });
    }
    // <field> = :param
    let (field, param) = normalized.split_once('=')?;
    let param = param.trim().strip_prefix(':')?;
    Some(Predicate::FieldEquals {
      field: field.trim().to_string(),
      param: param.to_string(),
    })
  }
}

fn is_kid_rated_clause(upper: &str) -> bool {
  let stripped = upper
    .trim()
    .trim_start_matches('(')
    .trim_end_matches(')')
    .trim();
  stripped == "RATED = 'G' OR RATED = 'PG'"
}

fn parse_id_clause(clause: &str) -> Option<String> {
  let (field, param) = clause.trim().split_once('=')?;
  if field.trim() != "_id" {
    return None;
  }
  Some(param.trim().strip_prefix(':')?.to_string())
}

fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
  text.to_ascii_uppercase().find(&keyword.to_ascii_uppercase())
}

fn unsupported(text: &str) -> EngineError {
  EngineError::QueryExecutionFailed(format!("unsupported query: {text}"))
}

fn resolve_param<'a>(
  params: &'a std::collections::BTreeMap<String, Value>,
  name: &str,
) -> Result<&'a Value, EngineError> {
  params
    .get(name)
    .ok_or_else(|| EngineError::QueryExecutionFailed(format!("unbound parameter :{name}")))
}

fn kid_rated(doc: &Value) -> bool {
  matches!(doc.get("rated").and_then(Value::as_str), Some("G") | Some("PG"))
}

fn id_matches(doc_value: &Value, wanted: &Value) -> bool {
  id_text(doc_value) == id_text(wanted)
}

fn id_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Object(map) => map.get("$oid").and_then(Value::as_str).unwrap_or_default().to_string(),
    _ => String::new(),
  }
}

/// `%term%` → contains; `term%` → prefix; `%term` → suffix; bare → equality.
fn like_match(text: &str, pattern: &str) -> bool {
  let leading = pattern.starts_with('%');
  let trailing = pattern.ends_with('%') && pattern.len() > 1;
  let term = pattern.trim_matches('%');
  match (leading, trailing) {
    (true, true) => text.contains(term),
    (false, true) => text.starts_with(term),
    (true, false) => text.ends_with(term),
    (false, false) => text == term,
  }
}

/// Descending sort key: numbers directly, numeric strings parsed, date
/// shapes as epoch millis.
fn sort_key(doc: &Value, field: &str) -> f64 {
  match doc.get(field) {
    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
    Some(Value::String(s)) => s
      .parse::<f64>()
      .unwrap_or_else(|_| parse_timestamp(&Value::String(s.clone())).timestamp_millis() as f64),
    Some(v @ Value::Object(_)) => parse_timestamp(v).timestamp_millis() as f64,
    _ => 0.0,
  }
}
