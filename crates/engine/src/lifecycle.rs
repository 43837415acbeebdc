//! The engine lifecycle gate.
//!
//! `Uninitialized → Initializing → Ready`, or `Initializing → Error`. Every
//! store call issued before `Ready` is queued and flushed FIFO exactly once
//! when initialization completes; if it fails instead, queued calls complete
//! with [`EngineError::NotInitialized`]. Concurrent `initialize()` calls
//! share a single in-flight startup: exactly one identity/transport/
//! replication sequence runs, and every caller observes the same outcome.

use crate::error::EngineError;
use crate::query::Query;
use crate::{CancelHandle, QueryOutcome, ResultBatch, SyncEngine};
use cinesync_core::StoreConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Lifecycle states of the gated engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
  Uninitialized,
  Initializing,
  Ready,
  Error,
}

/// Everything `initialize()` needs: credentials plus the platform
/// permission outcome (the platform prompt itself is outside this layer;
/// its boolean result is not).
#[derive(Debug, Clone)]
pub struct InitOptions {
  pub config: StoreConfig,
  pub permissions_granted: bool,
}

impl InitOptions {
  pub fn new(config: StoreConfig) -> Self {
    Self {
      config,
      permissions_granted: true,
    }
  }

  pub fn with_permissions(mut self, granted: bool) -> Self {
    self.permissions_granted = granted;
    self
  }
}

enum QueuedOp {
  Execute {
    query: Query,
    reply: oneshot::Sender<Result<QueryOutcome, EngineError>>,
  },
  Observe {
    query: Query,
    delivery: mpsc::UnboundedSender<ResultBatch>,
    reply: oneshot::Sender<Result<CancelHandle, EngineError>>,
  },
  Subscribe {
    query: Query,
    reply: oneshot::Sender<Result<CancelHandle, EngineError>>,
  },
}

struct Gate {
  state: EngineState,
  queue: VecDeque<QueuedOp>,
  init_waiters: Vec<oneshot::Sender<Result<(), EngineError>>>,
  last_error: Option<EngineError>,
}

enum InitRole {
  Leader,
  Waiter(oneshot::Receiver<Result<(), EngineError>>),
  AlreadyReady,
}

/// The process-wide gated handle to the store engine.
///
/// All components reach the engine through this handle; it owns the state
/// machine and the pre-`Ready` call queue. The gate mutex is never held
/// across an await.
pub struct EngineHandle {
  inner: Arc<dyn SyncEngine>,
  gate: Mutex<Gate>,
}

impl EngineHandle {
  pub fn new(inner: Arc<dyn SyncEngine>) -> Self {
    Self {
      inner,
      gate: Mutex::new(Gate {
        state: EngineState::Uninitialized,
        queue: VecDeque::new(),
        init_waiters: Vec::new(),
        last_error: None,
      }),
    }
  }

  pub fn state(&self) -> EngineState {
    self.lock_gate().state
  }

  /// The last initialization failure, if the gate is in `Error`.
  pub fn last_error(&self) -> Option<EngineError> {
    self.lock_gate().last_error.clone()
  }

  /// Run (or await) the startup sequence.
  ///
  /// The first caller becomes the leader and runs startup; callers arriving
  /// while `Initializing` await the leader's outcome. A caller arriving
  /// after a failed startup retries (manual recovery; nothing retries
  /// automatically).
  pub async fn initialize(&self, opts: InitOptions) -> Result<(), EngineError> {
    let role = {
      let mut gate = self.lock_gate();
      match gate.state {
        EngineState::Ready => InitRole::AlreadyReady,
        EngineState::Initializing => {
          let (tx, rx) = oneshot::channel();
          gate.init_waiters.push(tx);
          InitRole::Waiter(rx)
        }
        EngineState::Uninitialized | EngineState::Error => {
          gate.state = EngineState::Initializing;
          gate.last_error = None;
          InitRole::Leader
        }
      }
    };

    match role {
      InitRole::AlreadyReady => Ok(()),
      InitRole::Waiter(rx) => rx.await.unwrap_or(Err(EngineError::NotInitialized)),
      InitRole::Leader => {
        info!("Initializing store engine");
        let outcome = self.run_startup(&opts).await;
        match outcome {
          Ok(()) => {
            self.finish_ready().await;
            Ok(())
          }
          Err(err) => {
            self.finish_error(err.clone());
            Err(err)
          }
        }
      }
    }
  }

  async fn run_startup(&self, opts: &InitOptions) -> Result<(), EngineError> {
    opts.config.validate()?;
    if !opts.permissions_granted {
      return Err(EngineError::PermissionDenied(
        "transport permissions were not granted".to_string(),
      ));
    }
    self.inner.start(&opts.config).await
  }

  /// Transition to `Ready`, wake waiters, flush the queue FIFO.
  async fn finish_ready(&self) {
    let (queued, waiters) = {
      let mut gate = self.lock_gate();
      gate.state = EngineState::Ready;
      (
        std::mem::take(&mut gate.queue),
        std::mem::take(&mut gate.init_waiters),
      )
    };
    for waiter in waiters {
      let _ = waiter.send(Ok(()));
    }
    info!(queued = queued.len(), "Store engine ready, flushing queued calls");
    for op in queued {
      self.run_queued(op).await;
    }
  }

  fn finish_error(&self, err: EngineError) {
    let (queued, waiters) = {
      let mut gate = self.lock_gate();
      gate.state = EngineState::Error;
      gate.last_error = Some(err.clone());
      (
        std::mem::take(&mut gate.queue),
        std::mem::take(&mut gate.init_waiters),
      )
    };
    warn!(error = %err, queued = queued.len(), "Store engine initialization failed");
    for waiter in waiters {
      let _ = waiter.send(Err(err.clone()));
    }
    for op in queued {
      match op {
        QueuedOp::Execute { reply, .. } => {
          let _ = reply.send(Err(EngineError::NotInitialized));
        }
        QueuedOp::Observe { reply, .. } => {
          let _ = reply.send(Err(EngineError::NotInitialized));
        }
        QueuedOp::Subscribe { reply, .. } => {
          let _ = reply.send(Err(EngineError::NotInitialized));
        }
      }
    }
  }

  async fn run_queued(&self, op: QueuedOp) {
    match op {
      QueuedOp::Execute { query, reply } => {
        let _ = reply.send(self.inner.execute(&query).await);
      }
      QueuedOp::Observe { query, delivery, reply } => {
        let _ = reply.send(self.inner.register_observer(&query, delivery).await);
      }
      QueuedOp::Subscribe { query, reply } => {
        let _ = reply.send(self.inner.register_subscription(&query).await);
      }
    }
  }

  /// Execute a query, queueing if the engine is not `Ready` yet.
  pub async fn execute(&self, query: &Query) -> Result<QueryOutcome, EngineError> {
    let queued = {
      let mut gate = self.lock_gate();
      match gate.state {
        EngineState::Ready => None,
        EngineState::Error => return Err(EngineError::NotInitialized),
        EngineState::Uninitialized | EngineState::Initializing => {
          let (tx, rx) = oneshot::channel();
          gate.queue.push_back(QueuedOp::Execute {
            query: query.clone(),
            reply: tx,
          });
          debug!(query = %query.signature(), "Queued execute until engine is ready");
          Some(rx)
        }
      }
    };
    match queued {
      None => self.inner.execute(query).await,
      Some(rx) => rx.await.unwrap_or(Err(EngineError::NotInitialized)),
    }
  }

  /// Register a live observer, queueing if the engine is not `Ready` yet.
  pub async fn register_observer(
    &self,
    query: &Query,
    delivery: mpsc::UnboundedSender<ResultBatch>,
  ) -> Result<CancelHandle, EngineError> {
    let queued = {
      let mut gate = self.lock_gate();
      match gate.state {
        EngineState::Ready => None,
        EngineState::Error => return Err(EngineError::NotInitialized),
        EngineState::Uninitialized | EngineState::Initializing => {
          let (tx, rx) = oneshot::channel();
          gate.queue.push_back(QueuedOp::Observe {
            query: query.clone(),
            delivery: delivery.clone(),
            reply: tx,
          });
          debug!(query = %query.signature(), "Queued observer registration until engine is ready");
          Some(rx)
        }
      }
    };
    match queued {
      None => self.inner.register_observer(query, delivery).await,
      Some(rx) => rx.await.unwrap_or(Err(EngineError::NotInitialized)),
    }
  }

  /// Register a replication subscription, queueing if not `Ready` yet.
  pub async fn register_subscription(&self, query: &Query) -> Result<CancelHandle, EngineError> {
    let queued = {
      let mut gate = self.lock_gate();
      match gate.state {
        EngineState::Ready => None,
        EngineState::Error => return Err(EngineError::NotInitialized),
        EngineState::Uninitialized | EngineState::Initializing => {
          let (tx, rx) = oneshot::channel();
          gate.queue.push_back(QueuedOp::Subscribe {
            query: query.clone(),
            reply: tx,
          });
          Some(rx)
        }
      }
    };
    match queued {
      None => self.inner.register_subscription(query).await,
      Some(rx) => rx.await.unwrap_or(Err(EngineError::NotInitialized)),
    }
  }

  fn lock_gate(&self) -> MutexGuard<'_, Gate> {
    self.gate.lock().unwrap_or_else(|e| e.into_inner())
  }
}
