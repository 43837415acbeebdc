//! Per-movie comment threads.
//!
//! A thread is open exactly while its screen is: `open` attaches a dedicated
//! per-movie observed query (signatures embed the movie id, so threads for
//! different movies never share an observer), and `close` tears it down.
//! Close is idempotent and epoch-guarded — the epoch captured at `open` is
//! invalidated under the same lock the delivery path checks, so an update
//! already in flight when the screen closes is dropped on arrival instead
//! of mutating dead state.
//!
//! Writes take the long way around on purpose: `add_comment` only inserts
//! and reports the write acknowledgment. There is no optimistic local
//! update; the new comment becomes visible through the observer round trip,
//! which the store delivers near-immediately for local commits.

use crate::error::DataError;
use crate::registry::{AttachHandle, ObserverRegistry, QueryUpdate, Scope};
use chrono::Utc;
use cinesync_core::Comment;
use engine::{queries, EngineHandle};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// One delivery to a thread consumer.
#[derive(Debug, Clone)]
pub enum ThreadUpdate {
  /// The complete thread, newest first.
  Comments(Arc<[Comment]>),
  /// Observer registration for the thread failed.
  Failed { message: String },
}

/// Proof of an open thread; pass back to [`CommentThreadController::close`].
#[derive(Debug)]
pub struct ThreadHandle {
  thread_id: u64,
  epoch: u64,
  movie_id: String,
}

impl ThreadHandle {
  pub fn movie_id(&self) -> &str {
    &self.movie_id
  }
}

struct ThreadState {
  epoch: u64,
  registry_handle: Option<AttachHandle>,
}

/// Screen-scoped lifecycle for comment-thread observers.
pub struct CommentThreadController {
  engine: Arc<EngineHandle>,
  registry: Arc<ObserverRegistry>,
  threads: Mutex<HashMap<u64, ThreadState>>,
  next_id: AtomicU64,
}

impl CommentThreadController {
  pub fn new(engine: Arc<EngineHandle>, registry: Arc<ObserverRegistry>) -> Arc<Self> {
    Arc::new(Self {
      engine,
      registry,
      threads: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(0),
    })
  }

  /// Open the thread for a movie. Decoded thread snapshots flow into
  /// `consumer` until the handle is closed.
  pub async fn open(self: &Arc<Self>, movie_id: &str, consumer: mpsc::UnboundedSender<ThreadUpdate>) -> ThreadHandle {
    let thread_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let epoch = thread_id;
    self.lock_threads().insert(
      thread_id,
      ThreadState {
        epoch,
        registry_handle: None,
      },
    );

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<QueryUpdate>();
    let query = queries::comments_for_movie(movie_id);
    let registry_handle = self.registry.attach(&query, Scope::Scoped, raw_tx).await;

    // The screen may have closed while attach was in flight.
    let leftover = {
      let mut threads = self.lock_threads();
      match threads.get_mut(&thread_id) {
        Some(thread) => {
          thread.registry_handle = Some(registry_handle);
          None
        }
        None => Some(registry_handle),
      }
    };
    if let Some(registry_handle) = leftover {
      debug!(movie_id, "Thread closed during open; detaching");
      self.registry.detach(registry_handle);
    }

    let controller = Arc::clone(self);
    tokio::spawn(async move {
      while let Some(update) = raw_rx.recv().await {
        let mapped = match update {
          QueryUpdate::Snapshot { items, .. } => {
            ThreadUpdate::Comments(items.iter().map(Comment::from_document).collect())
          }
          QueryUpdate::Failed { message } => ThreadUpdate::Failed { message },
        };
        // Liveness check and forward happen under the same lock `close`
        // takes: once close returns, nothing more reaches the consumer.
        let threads = controller.lock_threads();
        if !threads.get(&thread_id).is_some_and(|t| t.epoch == epoch) {
          debug!(thread_id, "Dropping delivery for closed comment thread");
          continue;
        }
        if consumer.send(mapped).is_err() {
          break;
        }
      }
    });

    ThreadHandle {
      thread_id,
      epoch,
      movie_id: movie_id.to_string(),
    }
  }

  /// Insert a comment and return the write acknowledgment (mutated count).
  /// Visibility comes solely from the observer round trip.
  pub async fn add_comment(&self, movie_id: &str, text: &str) -> Result<usize, DataError> {
    let comment = json!({
      "name": "Anonymous",
      "email": "",
      "movie_id": movie_id,
      "text": text,
      "date": Utc::now().to_rfc3339(),
    });
    let outcome = self.engine.execute(&queries::insert_comment(comment)).await?;
    if outcome.mutated_count == 0 {
      return Err(DataError::InsertFailed);
    }
    Ok(outcome.mutated_count)
  }

  /// Close a thread. Idempotent: the epoch is invalidated and the observer
  /// detached exactly once; later calls (and in-flight deliveries) no-op.
  pub fn close(&self, handle: &ThreadHandle) {
    let registry_handle = {
      let mut threads = self.lock_threads();
      match threads.get(&handle.thread_id) {
        Some(thread) if thread.epoch == handle.epoch => {
          threads.remove(&handle.thread_id).and_then(|t| t.registry_handle)
        }
        _ => None,
      }
    };
    if let Some(registry_handle) = registry_handle {
      debug!(movie_id = %handle.movie_id, "Closing comment thread");
      self.registry.detach(registry_handle);
    }
  }

  /// Number of currently open threads.
  pub fn open_count(&self) -> usize {
    self.lock_threads().len()
  }

  fn lock_threads(&self) -> MutexGuard<'_, HashMap<u64, ThreadState>> {
    self.threads.lock().unwrap_or_else(|e| e.into_inner())
  }
}
