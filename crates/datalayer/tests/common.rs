//! Common test utilities for data layer integration tests.
//!
//! `ScriptedEngine` is a store double that hands the test full control over
//! timing: every `execute` parks until the test responds to it, observer
//! deliveries happen only when the test pushes them, and registration
//! failures are injected on demand. That makes out-of-order responses and
//! close-vs-delivery races deterministic instead of sleep-based.

#![allow(dead_code)]

use async_trait::async_trait;
use cinesync_core::{Document, StoreConfig};
use engine::{CancelHandle, EngineError, EngineHandle, InitOptions, Query, QueryOutcome, ResultBatch, SyncEngine};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// An `execute` call waiting for the test to answer it.
pub struct PendingExecute {
  pub query: Query,
  reply: oneshot::Sender<Result<QueryOutcome, EngineError>>,
}

#[allow(dead_code)]
impl PendingExecute {
  pub fn respond(self, result: Result<QueryOutcome, EngineError>) {
    let _ = self.reply.send(result);
  }

  pub fn respond_items(self, items: Vec<Value>) {
    self.respond(Ok(QueryOutcome {
      items: items.into_iter().map(Document::new).collect(),
      mutated_count: 0,
      commit_id: None,
    }));
  }

  pub fn respond_mutated(self, count: usize) {
    self.respond(Ok(QueryOutcome {
      items: Vec::new(),
      mutated_count: count,
      commit_id: (count > 0).then_some(1),
    }));
  }

  pub fn respond_error(self, message: &str) {
    self.respond(Err(EngineError::QueryExecutionFailed(message.to_string())));
  }
}

struct ScriptedObserver {
  signature: engine::QuerySignature,
  delivery: mpsc::UnboundedSender<ResultBatch>,
  cancel: CancellationToken,
}

/// Store double with scripted responses. No delivery happens unless the
/// test pushes one; `register_observer` does not send an initial snapshot.
#[derive(Default)]
pub struct ScriptedEngine {
  pending: Mutex<VecDeque<PendingExecute>>,
  observers: Mutex<Vec<ScriptedObserver>>,
  fail_next_register: AtomicBool,
  register_calls: AtomicUsize,
  next_handle: AtomicU64,
}

#[allow(dead_code)]
impl ScriptedEngine {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Wait for the next parked `execute` call.
  pub async fn next_execute(&self) -> PendingExecute {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
      if let Some(pending) = self.pending.lock().unwrap().pop_front() {
        return pending;
      }
      assert!(tokio::time::Instant::now() < deadline, "no execute call arrived");
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  pub fn pending_executes(&self) -> usize {
    self.pending.lock().unwrap().len()
  }

  /// Fail the next `register_observer` call.
  pub fn fail_next_register(&self) {
    self.fail_next_register.store(true, Ordering::SeqCst);
  }

  pub fn register_calls(&self) -> usize {
    self.register_calls.load(Ordering::SeqCst)
  }

  pub fn active_observers(&self) -> usize {
    self
      .observers
      .lock()
      .unwrap()
      .iter()
      .filter(|o| !o.cancel.is_cancelled())
      .count()
  }

  pub fn cancelled_observers(&self) -> usize {
    self
      .observers
      .lock()
      .unwrap()
      .iter()
      .filter(|o| o.cancel.is_cancelled())
      .count()
  }

  /// Deliver a batch to live observers of `query`.
  pub fn push(&self, query: &Query, docs: Vec<Value>) {
    let signature = query.signature();
    for observer in self.observers.lock().unwrap().iter() {
      if observer.signature == signature && !observer.cancel.is_cancelled() {
        let _ = observer.delivery.send(docs.iter().cloned().map(Document::new).collect());
      }
    }
  }

  /// Deliver a batch even to cancelled observers — models an update that
  /// was already in flight when the observer was torn down.
  pub fn push_ignoring_cancel(&self, query: &Query, docs: Vec<Value>) {
    let signature = query.signature();
    for observer in self.observers.lock().unwrap().iter() {
      if observer.signature == signature {
        let _ = observer.delivery.send(docs.iter().cloned().map(Document::new).collect());
      }
    }
  }
}

#[async_trait]
impl SyncEngine for ScriptedEngine {
  async fn start(&self, _config: &StoreConfig) -> Result<(), EngineError> {
    Ok(())
  }

  async fn execute(&self, query: &Query) -> Result<QueryOutcome, EngineError> {
    let (reply, rx) = oneshot::channel();
    self.pending.lock().unwrap().push_back(PendingExecute {
      query: query.clone(),
      reply,
    });
    rx.await
      .unwrap_or(Err(EngineError::QueryExecutionFailed("scripted engine dropped".to_string())))
  }

  async fn register_observer(
    &self,
    query: &Query,
    delivery: mpsc::UnboundedSender<ResultBatch>,
  ) -> Result<CancelHandle, EngineError> {
    self.register_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_next_register.swap(false, Ordering::SeqCst) {
      return Err(EngineError::ObserverRegistrationFailed("scripted failure".to_string()));
    }
    let cancel = CancellationToken::new();
    let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
    self.observers.lock().unwrap().push(ScriptedObserver {
      signature: query.signature(),
      delivery,
      cancel: cancel.clone(),
    });
    Ok(CancelHandle::new(id, cancel))
  }

  async fn register_subscription(&self, _query: &Query) -> Result<CancelHandle, EngineError> {
    let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(CancelHandle::new(id, CancellationToken::new()))
  }
}

/// An [`EngineHandle`] already driven to `Ready` over the given backend.
#[allow(dead_code)]
pub async fn ready_handle(backend: Arc<dyn SyncEngine>) -> Arc<EngineHandle> {
  let handle = Arc::new(EngineHandle::new(backend));
  handle
    .initialize(InitOptions::new(StoreConfig::for_local()))
    .await
    .expect("engine init");
  handle
}

/// Receive the next value with a timeout.
#[allow(dead_code)]
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
  tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("timed out waiting for update")
    .expect("channel closed")
}

/// Assert nothing arrives within a grace window.
#[allow(dead_code)]
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
  let outcome = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
  assert!(outcome.is_err(), "unexpected update: {:?}", outcome);
}

/// Poll a condition until it holds or the timeout lapses.
#[allow(dead_code)]
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  false
}

/// Opt into log output for a test run (`RUST_LOG=debug cargo test ...`).
#[allow(dead_code)]
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .try_init();
}
