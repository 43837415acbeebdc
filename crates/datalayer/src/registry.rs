//! Live-query deduplication and fan-out.
//!
//! The registry is the single owner of engine observer handles. Consumers
//! attach to a query and receive complete result snapshots over a channel;
//! attaching to a query that is already observed reuses the existing engine
//! observer and replays the last snapshot immediately. Scoped entries are
//! torn down when their last consumer detaches; pinned entries stay alive
//! for the life of the process so a screen revisit never re-registers (and
//! never flickers through an empty state).
//!
//! All registry state lives under one mutex, which is never held across an
//! await: engine deliveries may land concurrently with attach/detach calls
//! from UI logic, and neither side can observe a torn update.

use cinesync_core::Document;
use engine::{CancelHandle, EngineError, EngineHandle, Query, QuerySignature, ResultBatch};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Teardown policy for an observed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  /// Evicted (and the engine observer cancelled) when the subscriber count
  /// returns to zero.
  Scoped,
  /// Never evicted; detach only removes the subscriber.
  Pinned,
}

/// One delivery to an attached consumer.
#[derive(Debug, Clone)]
pub enum QueryUpdate {
  /// A complete result snapshot; `version` increases by one per delivery.
  Snapshot { items: Arc<[Document]>, version: u64 },
  /// Observer registration failed; replayed to late attachers until a
  /// `refresh` succeeds.
  Failed { message: String },
}

/// Proof of attachment; pass back to [`ObserverRegistry::detach`].
#[derive(Debug)]
pub struct AttachHandle {
  signature: QuerySignature,
  subscriber_id: u64,
}

impl AttachHandle {
  pub fn signature(&self) -> &QuerySignature {
    &self.signature
  }
}

struct Subscriber {
  id: u64,
  tx: mpsc::UnboundedSender<QueryUpdate>,
}

struct ObservedQuery {
  query: Query,
  subscribers: Vec<Subscriber>,
  last_results: Option<Arc<[Document]>>,
  result_version: u64,
  last_error: Option<String>,
  token: Option<CancelHandle>,
  pinned: bool,
  /// An engine registration is in flight; suppresses duplicates.
  registering: bool,
  next_subscriber: u64,
}

impl ObservedQuery {
  fn new(query: Query, pinned: bool) -> Self {
    Self {
      query,
      subscribers: Vec::new(),
      last_results: None,
      result_version: 0,
      last_error: None,
      token: None,
      pinned,
      registering: false,
      next_subscriber: 0,
    }
  }
}

/// Read-only projection of an observed query's state.
#[derive(Debug, Clone)]
pub struct EntryView {
  pub items: Option<Arc<[Document]>>,
  pub version: u64,
  pub error: Option<String>,
}

pub struct ObserverRegistry {
  engine: Arc<EngineHandle>,
  queries: Mutex<HashMap<QuerySignature, ObservedQuery>>,
  /// Replication interests. Independent of read observers; one per logical
  /// dataset, never duplicated.
  interests: Mutex<Vec<(QuerySignature, CancelHandle)>>,
}

impl ObserverRegistry {
  pub fn new(engine: Arc<EngineHandle>) -> Arc<Self> {
    Arc::new(Self {
      engine,
      queries: Mutex::new(HashMap::new()),
      interests: Mutex::new(Vec::new()),
    })
  }

  /// Declare replication interest in a dataset. Deduplicated by signature;
  /// declaring the same interest twice keeps the original subscription.
  pub async fn declare_interest(&self, query: &Query) -> Result<(), EngineError> {
    let signature = query.signature();
    if self.lock_interests().iter().any(|(sig, _)| *sig == signature) {
      return Ok(());
    }
    let handle = self.engine.register_subscription(query).await?;
    let mut interests = self.lock_interests();
    if interests.iter().any(|(sig, _)| *sig == signature) {
      // Lost a race with an identical declaration; the first one stands.
      handle.cancel();
    } else {
      debug!(query = %signature, "Declared replication interest");
      interests.push((signature, handle));
    }
    Ok(())
  }

  /// Number of live replication interests.
  pub fn interest_count(&self) -> usize {
    self.lock_interests().len()
  }

  fn lock_interests(&self) -> MutexGuard<'_, Vec<(QuerySignature, CancelHandle)>> {
    self.interests.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Attach a consumer to a query, reusing an existing observer when one
  /// is active for the same signature.
  ///
  /// The current snapshot (or stored registration error) is replayed to
  /// `tx` synchronously, before this call returns. Attaching with
  /// [`Scope::Pinned`] marks the entry non-evictable for good.
  pub async fn attach(
    self: &Arc<Self>,
    query: &Query,
    scope: Scope,
    tx: mpsc::UnboundedSender<QueryUpdate>,
  ) -> AttachHandle {
    let signature = query.signature();
    let (subscriber_id, needs_register) = {
      let mut queries = self.lock_queries();
      let entry = queries
        .entry(signature.clone())
        .or_insert_with(|| ObservedQuery::new(query.clone(), scope == Scope::Pinned));
      if scope == Scope::Pinned {
        entry.pinned = true;
      }
      if let Some(items) = &entry.last_results {
        let _ = tx.send(QueryUpdate::Snapshot {
          items: items.clone(),
          version: entry.result_version,
        });
      } else if let Some(message) = &entry.last_error {
        let _ = tx.send(QueryUpdate::Failed {
          message: message.clone(),
        });
      }
      entry.next_subscriber += 1;
      let id = entry.next_subscriber;
      entry.subscribers.push(Subscriber { id, tx });
      let needs = entry.token.is_none() && !entry.registering && entry.last_error.is_none();
      if needs {
        entry.registering = true;
      }
      (id, needs)
    };

    if needs_register {
      self.register(signature.clone()).await;
    }
    AttachHandle {
      signature,
      subscriber_id,
    }
  }

  /// Ensure a pinned entry exists for `query` without attaching a consumer.
  /// Used by the cache slots, which read snapshots on demand.
  pub async fn ensure_pinned(self: &Arc<Self>, query: &Query) {
    let signature = query.signature();
    let needs_register = {
      let mut queries = self.lock_queries();
      let entry = queries
        .entry(signature.clone())
        .or_insert_with(|| ObservedQuery::new(query.clone(), true));
      entry.pinned = true;
      let needs = entry.token.is_none() && !entry.registering && entry.last_error.is_none();
      if needs {
        entry.registering = true;
      }
      needs
    };
    if needs_register {
      self.register(signature).await;
    }
  }

  /// Detach a consumer. The last detach from a scoped entry cancels the
  /// engine observer and evicts the entry; pinned entries only shed the
  /// subscriber.
  pub fn detach(&self, handle: AttachHandle) {
    let token = {
      let mut queries = self.lock_queries();
      let Some(entry) = queries.get_mut(&handle.signature) else {
        return;
      };
      entry.subscribers.retain(|s| s.id != handle.subscriber_id);
      if entry.pinned || !entry.subscribers.is_empty() {
        None
      } else {
        debug!(query = %handle.signature, "Evicting observed query");
        queries.remove(&handle.signature).and_then(|e| e.token)
      }
    };
    if let Some(token) = token {
      token.cancel();
    }
  }

  /// Retry a failed observer registration with the same signature. The only
  /// recovery path; nothing retries automatically.
  pub async fn refresh(self: &Arc<Self>, signature: &QuerySignature) {
    let needs_register = {
      let mut queries = self.lock_queries();
      let Some(entry) = queries.get_mut(signature) else {
        return;
      };
      if entry.token.is_some() || entry.registering {
        return;
      }
      entry.registering = true;
      entry.last_error = None;
      true
    };
    if needs_register {
      self.register(signature.clone()).await;
    }
  }

  /// Register the engine observer for an entry and wire its delivery loop.
  async fn register(self: &Arc<Self>, signature: QuerySignature) {
    let Some(query) = self.lock_queries().get(&signature).map(|e| e.query.clone()) else {
      return;
    };
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<ResultBatch>();
    match self.engine.register_observer(&query, delivery_tx).await {
      Ok(token) => {
        let leftover = {
          let mut queries = self.lock_queries();
          match queries.get_mut(&signature) {
            Some(entry) => {
              entry.registering = false;
              entry.token = Some(token);
              None
            }
            // Every subscriber detached while registration was in flight.
            None => Some(token),
          }
        };
        match leftover {
          Some(token) => token.cancel(),
          None => {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
              while let Some(batch) = delivery_rx.recv().await {
                registry.apply_update(&signature, batch);
              }
            });
          }
        }
      }
      Err(err) => {
        warn!(query = %signature, error = %err, "Observer registration failed");
        let message = err.to_string();
        let mut queries = self.lock_queries();
        if let Some(entry) = queries.get_mut(&signature) {
          entry.registering = false;
          entry.last_error = Some(message.clone());
          for subscriber in &entry.subscribers {
            let _ = subscriber.tx.send(QueryUpdate::Failed {
              message: message.clone(),
            });
          }
        }
      }
    }
  }

  /// Apply an engine delivery: replace the snapshot atomically and fan out
  /// to subscribers in registration order. Deliveries for evicted entries
  /// are dropped.
  fn apply_update(&self, signature: &QuerySignature, batch: ResultBatch) {
    let mut queries = self.lock_queries();
    let Some(entry) = queries.get_mut(signature) else {
      debug!(query = %signature, "Dropping delivery for evicted query");
      return;
    };
    let items: Arc<[Document]> = batch.into();
    entry.last_results = Some(items.clone());
    entry.result_version += 1;
    entry.last_error = None;
    let version = entry.result_version;
    for subscriber in &entry.subscribers {
      let _ = subscriber.tx.send(QueryUpdate::Snapshot {
        items: items.clone(),
        version,
      });
    }
  }

  /// Current state of an observed query, if one exists.
  pub fn entry_view(&self, signature: &QuerySignature) -> Option<EntryView> {
    let queries = self.lock_queries();
    queries.get(signature).map(|entry| EntryView {
      items: entry.last_results.clone(),
      version: entry.result_version,
      error: entry.last_error.clone(),
    })
  }

  /// Subscriber count for a signature; zero when not observed.
  pub fn subscriber_count(&self, signature: &QuerySignature) -> usize {
    self
      .lock_queries()
      .get(signature)
      .map(|e| e.subscribers.len())
      .unwrap_or(0)
  }

  /// Whether an engine observer is currently held for this signature.
  pub fn is_active(&self, signature: &QuerySignature) -> bool {
    self.lock_queries().get(signature).is_some_and(|e| e.token.is_some())
  }

  fn lock_queries(&self) -> MutexGuard<'_, HashMap<QuerySignature, ObservedQuery>> {
    self.queries.lock().unwrap_or_else(|e| e.into_inner())
  }
}
