//! The store boundary: query types, the [`SyncEngine`] capability trait,
//! and the lifecycle gate that every call goes through.
//!
//! The replicated store itself is an external collaborator. This crate pins
//! down the surface the data layer consumes: one-shot query execution, live
//! observers that push complete result snapshots through channels, and
//! replication subscriptions. [`lifecycle::EngineHandle`] wraps a concrete
//! engine and enforces the initialization state machine; [`local::LocalEngine`]
//! is an in-process backend for development and tests.

pub mod error;
pub mod lifecycle;
pub mod local;
pub mod queries;
pub mod query;

pub use error::EngineError;
pub use lifecycle::{EngineHandle, EngineState, InitOptions};
pub use local::LocalEngine;
pub use query::{Query, QuerySignature};

use async_trait::async_trait;
use cinesync_core::{Document, StoreConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One complete observer delivery: a full snapshot, never a partial merge.
pub type ResultBatch = Vec<Document>;

/// The result of a one-shot [`SyncEngine::execute`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
  pub items: Vec<Document>,
  /// Number of documents a write touched; zero for reads.
  pub mutated_count: usize,
  /// Local commit marker after a write, when the engine reports one.
  pub commit_id: Option<i64>,
}

/// Cancellation handle for an observer or replication subscription.
///
/// Cancelling is idempotent. The engine stops delivering to the associated
/// channel once the token trips; a delivery already in flight may still land
/// and is the consumer's to discard.
#[derive(Debug)]
pub struct CancelHandle {
  id: u64,
  token: CancellationToken,
}

impl CancelHandle {
  pub fn new(id: u64, token: CancellationToken) -> Self {
    Self { id, token }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

/// The capability surface the data layer consumes from the replicated store.
///
/// Implementations must deliver observer batches for a given query in the
/// order they were produced; no ordering is required across distinct queries.
#[async_trait]
pub trait SyncEngine: Send + Sync + 'static {
  /// Run the startup sequence: identity, transport, replication.
  async fn start(&self, config: &StoreConfig) -> Result<(), EngineError>;

  /// Execute a one-shot query or mutation.
  async fn execute(&self, query: &Query) -> Result<QueryOutcome, EngineError>;

  /// Register a live observer. The engine pushes complete result snapshots
  /// into `delivery`, starting with the current result set.
  async fn register_observer(
    &self,
    query: &Query,
    delivery: mpsc::UnboundedSender<ResultBatch>,
  ) -> Result<CancelHandle, EngineError>;

  /// Declare replication interest in a dataset. Independent of observers.
  async fn register_subscription(&self, query: &Query) -> Result<CancelHandle, EngineError>;
}
