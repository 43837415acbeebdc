//! Typed records decoded from store documents.
//!
//! Every decoder here is total: malformed or missing fields collapse to
//! empty/zero defaults, never to an error. The store replicates free-form
//! documents and a single bad record must not take down a whole result set.

use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The reduced movie shape used by listings and search results.
///
/// Rating fields are optional because the search projection aliases them
/// (`imdbRating`, `rottenRating`) while the listing query returns the full
/// nested document; both shapes decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieListing {
  pub id: String,
  pub title: String,
  pub plot: String,
  pub poster: String,
  pub year: String,
  pub imdb_rating: Option<f64>,
  pub rotten_rating: Option<f64>,
}

impl MovieListing {
  pub fn from_document(doc: &Document) -> Self {
    Self {
      id: doc.id(),
      title: doc.str_field("title"),
      plot: doc.str_field("plot"),
      poster: doc.str_field("poster"),
      year: doc.str_field("year"),
      imdb_rating: doc.f64_field("imdbRating").or_else(|| doc.pointer_f64("/imdb/rating")),
      rotten_rating: doc
        .f64_field("rottenRating")
        .or_else(|| doc.pointer_f64("/tomatoes/viewer/rating")),
    }
  }
}

/// The full movie record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
  pub id: String,
  pub title: String,
  pub plot: String,
  pub fullplot: String,
  pub genres: Vec<String>,
  pub runtime: i64,
  pub cast: Vec<String>,
  pub poster: String,
  pub languages: Vec<String>,
  pub released: DateTime<Utc>,
  pub directors: Vec<String>,
  pub rated: String,
  pub awards: Value,
  pub year: String,
  pub imdb: Value,
  pub tomatoes: Value,
  pub countries: Vec<String>,
}

impl Movie {
  pub fn from_document(doc: &Document) -> Self {
    Self {
      id: doc.id(),
      title: doc.str_field("title"),
      plot: doc.str_field("plot"),
      fullplot: doc.str_field("fullplot"),
      genres: doc.str_array("genres"),
      runtime: doc.i64_field("runtime"),
      cast: doc.str_array("cast"),
      poster: doc.str_field("poster"),
      languages: doc.str_array("languages"),
      released: doc.timestamp_field("released"),
      directors: doc.str_array("directors"),
      rated: doc.str_field("rated"),
      awards: doc.object_field("awards"),
      year: doc.str_field("year"),
      imdb: doc.object_field("imdb"),
      tomatoes: doc.object_field("tomatoes"),
      countries: doc.str_array("countries"),
    }
  }
}

/// A comment on a movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: String,
  pub movie_id: String,
  pub author: String,
  pub text: String,
  pub timestamp: DateTime<Utc>,
}

impl Comment {
  pub fn from_document(doc: &Document) -> Self {
    let author = doc.str_field("name");
    Self {
      id: doc.id(),
      movie_id: doc.id_field("movie_id"),
      author: if author.is_empty() { "Anonymous".to_string() } else { author },
      text: doc.str_field("text"),
      timestamp: doc.timestamp_field("date"),
    }
  }
}

/// Replication state for one remote peer, flattened from the store's
/// `system:data_sync_info` shape (`documents.*` holds the session fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPeerStatus {
  pub id: String,
  pub is_server: bool,
  pub status: String,
  pub last_commit_id: Option<i64>,
  pub last_update_time: Option<i64>,
}

impl SyncPeerStatus {
  pub fn from_document(doc: &Document) -> Self {
    let session = Document::new(doc.object_field("documents"));
    let status = session.str_field("sync_session_status");
    Self {
      id: doc.id(),
      is_server: doc.bool_field("is_server"),
      status: if status.is_empty() { "Unknown".to_string() } else { status },
      last_commit_id: session.opt_i64_field("synced_up_to_local_commit_id"),
      last_update_time: session.opt_i64_field("last_update_received_time"),
    }
  }

  pub fn is_connected(&self) -> bool {
    self.status == "Connected"
  }
}

/// One index over a store collection, from `system:indexes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
  pub id: String,
  pub collection: String,
  pub fields: Vec<String>,
}

impl IndexDescriptor {
  pub fn from_document(doc: &Document) -> Self {
    let mut id = doc.id();
    if id.is_empty() {
      id = doc.str_field("name");
    }
    // The store has shipped several spellings of the field list.
    let mut fields = doc.str_array("fields");
    if fields.is_empty() {
      fields = doc.str_array("indexFields");
    }
    if fields.is_empty() {
      let single = doc.str_field("field");
      if !single.is_empty() {
        fields = vec![single];
      }
    }
    Self {
      id,
      collection: doc.str_field("collection"),
      fields,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  #[test]
  fn test_listing_decodes_nested_and_aliased_ratings() {
    let nested = Document::new(json!({
      "_id": "m1", "title": "Heat", "year": 1995,
      "imdb": {"rating": 8.3}, "tomatoes": {"viewer": {"rating": 3.9}}
    }));
    let listing = MovieListing::from_document(&nested);
    assert_eq!(listing.year, "1995");
    assert_eq!(listing.imdb_rating, Some(8.3));
    assert_eq!(listing.rotten_rating, Some(3.9));

    let aliased = Document::new(json!({
      "_id": "m1", "title": "Heat", "imdbRating": 8.3, "rottenRating": 3.9
    }));
    let listing = MovieListing::from_document(&aliased);
    assert_eq!(listing.imdb_rating, Some(8.3));
    assert_eq!(listing.rotten_rating, Some(3.9));
  }

  #[test]
  fn test_empty_document_decodes_to_defaults() {
    let doc = Document::new(json!({}));
    let movie = Movie::from_document(&doc);
    assert_eq!(movie.id, "");
    assert_eq!(movie.runtime, 0);
    assert!(movie.genres.is_empty());
    assert_eq!(movie.released, DateTime::UNIX_EPOCH);
    assert_eq!(movie.awards, json!({}));

    let listing = MovieListing::from_document(&doc);
    assert_eq!(listing.imdb_rating, None);
  }

  #[test]
  fn test_comment_author_defaults_to_anonymous() {
    let doc = Document::new(json!({
      "_id": "c1", "movie_id": {"$oid": "m1"}, "name": "",
      "text": "great", "date": "2024-05-01T12:00:00Z"
    }));
    let comment = Comment::from_document(&doc);
    assert_eq!(comment.author, "Anonymous");
    assert_eq!(comment.movie_id, "m1");
    assert_eq!(comment.text, "great");
  }

  #[test]
  fn test_sync_status_flattens_session_fields() {
    let doc = Document::new(json!({
      "_id": "peer-1",
      "is_server": true,
      "documents": {
        "sync_session_status": "Connected",
        "synced_up_to_local_commit_id": 42,
        "last_update_received_time": 1714564800000i64
      }
    }));
    let peer = SyncPeerStatus::from_document(&doc);
    assert!(peer.is_server);
    assert!(peer.is_connected());
    assert_eq!(peer.last_commit_id, Some(42));
    assert_eq!(peer.last_update_time, Some(1714564800000));
  }

  #[test]
  fn test_sync_status_without_session_block() {
    let peer = SyncPeerStatus::from_document(&Document::new(json!({"_id": "peer-2"})));
    assert_eq!(peer.status, "Unknown");
    assert_eq!(peer.last_commit_id, None);
    assert_eq!(peer.last_update_time, None);
  }

  #[test]
  fn test_index_descriptor_field_spellings() {
    let plural = IndexDescriptor::from_document(&Document::new(json!({
      "_id": "idx1", "collection": "movies", "fields": ["year", "rated"]
    })));
    assert_eq!(plural.fields, vec!["year", "rated"]);

    let singular = IndexDescriptor::from_document(&Document::new(json!({
      "name": "idx2", "collection": "comments", "field": "movie_id"
    })));
    assert_eq!(singular.id, "idx2");
    assert_eq!(singular.fields, vec!["movie_id"]);

    let alt = IndexDescriptor::from_document(&Document::new(json!({
      "_id": "idx3", "indexFields": ["title"]
    })));
    assert_eq!(alt.fields, vec!["title"]);
    assert_eq!(alt.collection, "");
  }
}
