//! The transient search overlay.
//!
//! Search is screen-scoped and deliberately un-throttled: every input change
//! fires a store query immediately, and the store absorbs the volume. What
//! keeps the UI coherent is the request id: each text change allocates the
//! next id, and a result or error is applied only if its id still matches
//! when it arrives. A slow early response can never overwrite a newer one.
//!
//! Error policy (documented choice): a failed search enters `Errored` and
//! preserves the last-known-good results; nothing is blanked mid-typing.
//! Clearing is an explicit consumer action (empty text).

use cinesync_core::MovieListing;
use engine::{queries, EngineError, EngineHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// Search session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
  /// No session; the query text is empty.
  Idle,
  /// A request for the current text is in flight.
  Searching,
  /// Results for the current text arrived.
  Ready,
  /// The current text's request failed; previous results are preserved.
  Errored,
}

/// Point-in-time view of the search session.
#[derive(Debug, Clone)]
pub struct SearchSnapshot {
  pub query_text: String,
  pub request_id: u64,
  pub status: SearchStatus,
  pub results: Arc<[MovieListing]>,
  pub error: Option<String>,
}

impl SearchSnapshot {
  fn idle() -> Self {
    Self {
      query_text: String::new(),
      request_id: 0,
      status: SearchStatus::Idle,
      results: Arc::from(Vec::new()),
      error: None,
    }
  }

  /// What the screen should render: the overlay's own results once it has
  /// any, otherwise the persistent listing snapshot. This is the
  /// anti-flicker contract — while a fresh session is still `Searching`
  /// (or just failed) with nothing to show, the listing stays up.
  pub fn display_results<'a>(&'a self, listing_fallback: &'a [MovieListing]) -> &'a [MovieListing] {
    match self.status {
      SearchStatus::Idle => listing_fallback,
      SearchStatus::Ready => &self.results,
      SearchStatus::Searching | SearchStatus::Errored => {
        if self.results.is_empty() {
          listing_fallback
        } else {
          &self.results
        }
      }
    }
  }
}

struct SearchState {
  query_text: String,
  request_id: u64,
  status: SearchStatus,
  results: Arc<[MovieListing]>,
  error: Option<String>,
}

/// Screen-scoped controller for on-demand title search.
pub struct SearchController {
  engine: Arc<EngineHandle>,
  state: Mutex<SearchState>,
  updates: watch::Sender<SearchSnapshot>,
}

impl SearchController {
  pub fn new(engine: Arc<EngineHandle>) -> Arc<Self> {
    let (updates, _) = watch::channel(SearchSnapshot::idle());
    Arc::new(Self {
      engine,
      state: Mutex::new(SearchState {
        query_text: String::new(),
        request_id: 0,
        status: SearchStatus::Idle,
        results: Arc::from(Vec::new()),
        error: None,
      }),
      updates,
    })
  }

  /// Feed the current input text. Empty (after trimming) ends the session;
  /// anything else starts request `n+1` immediately — no debouncing.
  pub fn set_query_text(self: &Arc<Self>, text: &str) {
    let trimmed = text.trim().to_string();
    let request_id = {
      let mut state = self.lock_state();
      state.request_id += 1;
      state.query_text = trimmed.clone();
      if trimmed.is_empty() {
        state.status = SearchStatus::Idle;
        state.results = Arc::from(Vec::new());
        state.error = None;
        self.publish(&state);
        None
      } else {
        state.status = SearchStatus::Searching;
        state.error = None;
        self.publish(&state);
        Some(state.request_id)
      }
    };

    if let Some(request_id) = request_id {
      let controller = Arc::clone(self);
      tokio::spawn(async move {
        let query = queries::title_search(&trimmed);
        match controller.engine.execute(&query).await {
          Ok(outcome) => {
            let listings = outcome.items.iter().map(MovieListing::from_document).collect::<Vec<_>>();
            controller.apply_result(request_id, listings);
          }
          Err(err) => controller.apply_error(request_id, err),
        }
      });
    }
  }

  /// End the session and clear results.
  pub fn clear(self: &Arc<Self>) {
    self.set_query_text("");
  }

  pub fn snapshot(&self) -> SearchSnapshot {
    self.updates.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
    self.updates.subscribe()
  }

  fn apply_result(&self, request_id: u64, listings: Vec<MovieListing>) {
    let mut state = self.lock_state();
    if state.request_id != request_id {
      debug!(request_id, current = state.request_id, "Discarding stale search result");
      return;
    }
    state.status = SearchStatus::Ready;
    state.results = listings.into();
    state.error = None;
    self.publish(&state);
  }

  fn apply_error(&self, request_id: u64, err: EngineError) {
    let mut state = self.lock_state();
    if state.request_id != request_id {
      debug!(request_id, current = state.request_id, "Discarding stale search error");
      return;
    }
    // Last-known-good results stay visible; only the status changes.
    state.status = SearchStatus::Errored;
    state.error = Some(err.to_string());
    self.publish(&state);
  }

  fn publish(&self, state: &SearchState) {
    self.updates.send_replace(SearchSnapshot {
      query_text: state.query_text.clone(),
      request_id: state.request_id,
      status: state.status,
      results: state.results.clone(),
      error: state.error.clone(),
    });
  }

  fn lock_state(&self) -> MutexGuard<'_, SearchState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}
