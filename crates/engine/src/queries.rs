//! The catalog of queries the client issues.
//!
//! Collections: `movies`, `comments`, and the store metadata collections
//! `system:indexes` and `system:data_sync_info`. The listing and replication
//! queries are restricted to G/PG-rated movies; that is the dataset this
//! client declares interest in.

use crate::query::Query;
use serde_json::Value;

pub const MOVIES: &str = "movies";
pub const COMMENTS: &str = "comments";
pub const SYSTEM_INDEXES: &str = "system:indexes";
pub const SYSTEM_SYNC_INFO: &str = "system:data_sync_info";

/// The persistent movie listing, newest first.
pub fn movie_listing() -> Query {
  Query::new("SELECT * FROM movies WHERE rated = 'G' OR rated = 'PG' ORDER BY year DESC")
}

/// Replication interest in the kid-movie dataset.
pub fn movie_subscription() -> Query {
  Query::new("SELECT * FROM movies WHERE rated = 'G' OR rated = 'PG'")
}

/// Replication interest in every comment thread.
pub fn comment_subscription() -> Query {
  Query::new("SELECT * FROM comments")
}

/// Title search within the listing's rating bounds. Fires on raw input; the
/// `%` wildcards are added here.
pub fn title_search(term: &str) -> Query {
  Query::new(
    "SELECT _id, plot, poster, title, year, imdb.rating AS imdbRating, \
     tomatoes.viewer.rating AS rottenRating \
     FROM movies \
     WHERE title LIKE :searchTerm AND (rated = 'G' OR rated = 'PG') \
     ORDER BY year DESC",
  )
  .with_param("searchTerm", format!("%{}%", term))
}

pub fn movie_by_id(movie_id: &str) -> Query {
  Query::new("SELECT * FROM movies WHERE _id = :movieId").with_param("movieId", movie_id)
}

/// The live comment thread for one movie, newest first.
pub fn comments_for_movie(movie_id: &str) -> Query {
  Query::new("SELECT * FROM comments WHERE movie_id = :movieId ORDER BY date DESC").with_param("movieId", movie_id)
}

pub fn insert_comment(comment: Value) -> Query {
  Query::new("INSERT INTO comments DOCUMENTS (:newComment)").with_param("newComment", comment)
}

pub fn insert_movie(movie: Value) -> Query {
  Query::new("INSERT INTO movies DOCUMENTS (:newMovie)").with_param("newMovie", movie)
}

/// A changed-fields-only update. `fields` holds (column, new value) pairs;
/// each becomes a `SET` clause bound to a parameter of the same name.
pub fn update_movie(movie_id: &str, fields: &[(&str, Value)]) -> Query {
  let set_list = fields
    .iter()
    .map(|(name, _)| format!("{} = :{}", name, name))
    .collect::<Vec<_>>()
    .join(", ");
  let mut query = Query::new(format!("UPDATE movies SET {} WHERE _id = :movieId", set_list))
    .with_param("movieId", movie_id);
  for (name, value) in fields {
    query = query.with_param(*name, value.clone());
  }
  query
}

pub fn delete_movie(movie_id: &str) -> Query {
  Query::new("DELETE FROM movies WHERE _id = :movieId").with_param("movieId", movie_id)
}

pub fn sync_status() -> Query {
  Query::new("SELECT * FROM system:data_sync_info")
}

pub fn indexes() -> Query {
  Query::new("SELECT * FROM system:indexes")
}
