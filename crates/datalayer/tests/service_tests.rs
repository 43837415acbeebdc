//! End-to-end tests over the in-process engine: initialization, cache
//! slots, monitors, and the comment round trip through the full layer.

mod common;

use cinesync_core::StoreConfig;
use common::wait_until;
use datalayer::comments::ThreadUpdate;
use datalayer::{CacheSlot, DataLayer};
use engine::{queries, EngineError, EngineState, InitOptions, LocalEngine};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn local_opts() -> InitOptions {
  InitOptions::new(StoreConfig::for_local())
}

fn seeded_engine() -> Arc<LocalEngine> {
  let engine = Arc::new(LocalEngine::new());
  engine.seed(
    queries::MOVIES,
    vec![
      json!({"_id": "m1", "title": "Up", "rated": "G", "year": 2009}),
      json!({"_id": "m2", "title": "Heat", "rated": "R", "year": 1995}),
      json!({"_id": "m3", "title": "Cars", "rated": "PG", "year": 2006}),
    ],
  );
  engine.seed(
    queries::SYSTEM_SYNC_INFO,
    vec![
      json!({"_id": "peer-a", "documents": {"sync_session_status": "Connecting"}}),
      json!({"_id": "peer-b", "documents": {"sync_session_status": "Connected", "last_update_received_time": 5}}),
      json!({"_id": "peer-c", "documents": {"sync_session_status": "Connected", "last_update_received_time": 10}}),
    ],
  );
  engine.seed(
    queries::SYSTEM_INDEXES,
    vec![
      json!({"_id": "idx-year", "collection": "movies", "fields": ["year"]}),
      json!({"_id": "idx-movie", "collection": "comments", "fields": ["movie_id"]}),
    ],
  );
  engine
}

#[tokio::test]
async fn test_initialize_registers_interests_once() {
  common::init_tracing();
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());

  let a = tokio::spawn({
    let layer = layer.clone();
    async move { layer.initialize(local_opts()).await }
  });
  let b = tokio::spawn({
    let layer = layer.clone();
    async move { layer.initialize(local_opts()).await }
  });
  a.await.unwrap().unwrap();
  b.await.unwrap().unwrap();

  assert_eq!(layer.engine_state(), EngineState::Ready);
  // Kid movies + all comments, declared exactly once between both callers.
  assert_eq!(layer.replication_interests(), 2);
  assert_eq!(engine.subscription_count(), 2);
}

#[tokio::test]
async fn test_listing_slot_populates_and_survives_consumers() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());
  layer.initialize(local_opts()).await.unwrap();

  let populated = wait_until(Duration::from_secs(2), || {
    !layer.cache().peek(CacheSlot::MovieListing).loading
  })
  .await;
  assert!(populated);

  let snapshot = layer.cache().peek(CacheSlot::MovieListing);
  let ids: Vec<String> = snapshot.items.iter().map(|d| d.id()).collect();
  // Kid movies only, year descending; the R-rated movie never appears.
  assert_eq!(ids, vec!["m1", "m3"]);

  // A consumer subscribing and leaving does not tear the slot down.
  let (tx, _rx) = mpsc::unbounded_channel();
  let handle = layer.cache().subscribe(CacheSlot::MovieListing, tx).await;
  layer.cache().unsubscribe(handle);
  assert!(!layer.cache().peek(CacheSlot::MovieListing).loading);
  assert_eq!(engine.observer_count(), 3);
}

#[tokio::test]
async fn test_monitors_project_metadata() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());
  layer.initialize(local_opts()).await.unwrap();

  let ready = wait_until(Duration::from_secs(2), || {
    !layer.cache().peek(CacheSlot::SyncStatus).loading && !layer.cache().peek(CacheSlot::Indexes).loading
  })
  .await;
  assert!(ready);

  let peers = layer.sync_status().snapshot().await;
  let ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
  assert_eq!(ids, vec!["peer-c", "peer-b", "peer-a"]);

  // Indexes keep store delivery order.
  let indexes = layer.indexes().snapshot().await;
  let ids: Vec<&str> = indexes.iter().map(|i| i.id.as_str()).collect();
  assert_eq!(ids, vec!["idx-year", "idx-movie"]);
}

#[tokio::test]
async fn test_comment_round_trip_through_layer() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());
  layer.initialize(local_opts()).await.unwrap();

  let (tx1, mut rx1) = mpsc::unbounded_channel();
  let (tx2, mut rx2) = mpsc::unbounded_channel();
  let t1 = layer.comments().open("m1", tx1).await;
  let t2 = layer.comments().open("m3", tx2).await;

  // Initial snapshots are empty threads.
  match common::recv(&mut rx1).await {
    ThreadUpdate::Comments(comments) => assert!(comments.is_empty()),
    other => panic!("expected comments, got {:?}", other),
  }
  match common::recv(&mut rx2).await {
    ThreadUpdate::Comments(comments) => assert!(comments.is_empty()),
    other => panic!("expected comments, got {:?}", other),
  }

  // Insert goes through the store; visibility comes from the round trip.
  let acknowledged = layer.comments().add_comment("m1", "great with kids").await.unwrap();
  assert_eq!(acknowledged, 1);

  match common::recv(&mut rx1).await {
    ThreadUpdate::Comments(comments) => {
      assert_eq!(comments.len(), 1);
      assert_eq!(comments[0].text, "great with kids");
      assert_eq!(comments[0].author, "Anonymous");
      assert_eq!(comments[0].movie_id, "m1");
      assert!(!comments[0].id.is_empty());
    }
    other => panic!("expected comments, got {:?}", other),
  }
  // The other movie's thread hears nothing.
  common::assert_silent(&mut rx2).await;

  layer.comments().close(&t1);
  layer.comments().close(&t2);
}

#[tokio::test]
async fn test_search_over_local_engine() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());
  layer.initialize(local_opts()).await.unwrap();

  let search = layer.search_controller();
  search.set_query_text("Car");
  let found = wait_until(Duration::from_secs(2), || {
    let snapshot = search.snapshot();
    snapshot.status == datalayer::SearchStatus::Ready && snapshot.results.len() == 1
  })
  .await;
  assert!(found);
  assert_eq!(search.snapshot().results[0].id, "m3");
}

#[tokio::test]
async fn test_failed_initialize_then_recovery() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());

  let denied = InitOptions::new(StoreConfig::for_local()).with_permissions(false);
  let outcome = layer.initialize(denied).await;
  assert!(matches!(outcome, Err(EngineError::PermissionDenied(_))));
  assert_eq!(layer.engine_state(), EngineState::Error);
  assert_eq!(layer.replication_interests(), 0);

  // Manual retry is the only recovery path, and it completes the setup.
  layer.initialize(local_opts()).await.unwrap();
  assert_eq!(layer.engine_state(), EngineState::Ready);
  assert_eq!(layer.replication_interests(), 2);
}

#[tokio::test]
async fn test_catalog_flows_update_listing_slot() {
  let engine = seeded_engine();
  let layer = DataLayer::new(engine.clone());
  layer.initialize(local_opts()).await.unwrap();

  let movie = layer.catalog().movie("m1").await.unwrap().expect("m1 exists");
  assert_eq!(movie.title, "Up");

  let changes = datalayer::MovieChanges {
    title: Some("Up!".to_string()),
    ..Default::default()
  };
  layer.catalog().update_movie(&movie, &changes).await.unwrap();

  // The pinned listing observer sees the rename.
  let renamed = wait_until(Duration::from_secs(2), || {
    layer
      .cache()
      .peek(CacheSlot::MovieListing)
      .items
      .iter()
      .any(|d| d.str_field("title") == "Up!")
  })
  .await;
  assert!(renamed);

  // An unchanged edit never reaches the store.
  let movie = layer.catalog().movie("m1").await.unwrap().expect("m1 exists");
  let noop = datalayer::MovieChanges {
    title: Some("Up!".to_string()),
    ..Default::default()
  };
  layer.catalog().update_movie(&movie, &noop).await.unwrap();

  assert_eq!(
    layer.catalog().delete_movie("missing").await,
    Err(datalayer::DataError::NoDocumentsMutated)
  );
}
