//! Movie catalog operations.
//!
//! One-shot reads and writes against the `movies` collection. Updates are
//! changed-fields-only: the query carries exactly the fields whose values
//! differ from the current record, and an empty change set never touches
//! the store.

use crate::error::DataError;
use cinesync_core::Movie;
use engine::{queries, EngineError, EngineHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Input for a new movie. New movies are always rated `G` and get an empty
/// ratings block; the store fills in the id.
#[derive(Debug, Clone, Default)]
pub struct MovieDraft {
  pub title: String,
  pub year: String,
  pub plot: String,
  pub poster: String,
  pub fullplot: String,
  pub genres: Vec<String>,
  pub directors: Vec<String>,
  pub languages: Vec<String>,
  pub countries: Vec<String>,
}

impl MovieDraft {
  fn to_document(&self) -> Value {
    json!({
      "title": self.title,
      "year": self.year,
      "plot": self.plot,
      "poster": self.poster,
      "fullplot": self.fullplot,
      "genres": self.genres,
      "directors": self.directors,
      "languages": self.languages,
      "countries": self.countries,
      "rated": "G",
      "imdb": {"rating": 0, "votes": 0},
    })
  }
}

/// Edits to apply to an existing movie. `None` fields are untouched;
/// `Some` fields are compared against the current record and written only
/// when they actually differ.
#[derive(Debug, Clone, Default)]
pub struct MovieChanges {
  pub title: Option<String>,
  pub year: Option<String>,
  pub plot: Option<String>,
  pub poster: Option<String>,
  pub fullplot: Option<String>,
}

impl MovieChanges {
  fn changed_fields(&self, current: &Movie) -> Vec<(&'static str, Value)> {
    let mut fields = Vec::new();
    push_if_changed(&mut fields, "title", &self.title, &current.title);
    push_if_changed(&mut fields, "year", &self.year, &current.year);
    push_if_changed(&mut fields, "plot", &self.plot, &current.plot);
    push_if_changed(&mut fields, "poster", &self.poster, &current.poster);
    push_if_changed(&mut fields, "fullplot", &self.fullplot, &current.fullplot);
    fields
  }
}

fn push_if_changed(fields: &mut Vec<(&'static str, Value)>, name: &'static str, new: &Option<String>, current: &str) {
  if let Some(value) = new {
    if value != current {
      fields.push((name, Value::String(value.clone())));
    }
  }
}

/// One-shot catalog reads and writes.
pub struct MovieCatalog {
  engine: Arc<EngineHandle>,
}

impl MovieCatalog {
  pub fn new(engine: Arc<EngineHandle>) -> Self {
    Self { engine }
  }

  /// Fetch a single movie; `None` when the id matches nothing.
  pub async fn movie(&self, movie_id: &str) -> Result<Option<Movie>, EngineError> {
    let outcome = self.engine.execute(&queries::movie_by_id(movie_id)).await?;
    Ok(outcome.items.first().map(Movie::from_document))
  }

  pub async fn add_movie(&self, draft: &MovieDraft) -> Result<(), DataError> {
    let outcome = self.engine.execute(&queries::insert_movie(draft.to_document())).await?;
    if outcome.mutated_count == 0 {
      return Err(DataError::InsertFailed);
    }
    Ok(())
  }

  /// Write the fields in `changes` that differ from `current`. An empty
  /// change set is a no-op that issues no store call.
  pub async fn update_movie(&self, current: &Movie, changes: &MovieChanges) -> Result<(), DataError> {
    let fields = changes.changed_fields(current);
    if fields.is_empty() {
      debug!(movie_id = %current.id, "No changed fields; skipping update");
      return Ok(());
    }
    let outcome = self.engine.execute(&queries::update_movie(&current.id, &fields)).await?;
    if outcome.mutated_count == 0 {
      return Err(DataError::NoDocumentsMutated);
    }
    Ok(())
  }

  pub async fn delete_movie(&self, movie_id: &str) -> Result<(), DataError> {
    let outcome = self.engine.execute(&queries::delete_movie(movie_id)).await?;
    if outcome.mutated_count == 0 {
      return Err(DataError::NoDocumentsMutated);
    }
    Ok(())
  }
}
