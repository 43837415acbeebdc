//! The process-wide data layer service.
//!
//! One `DataLayer` is constructed explicitly at startup and passed to the
//! screens that need it — never reached through ambient global state. It
//! owns the engine handle, the observer registry, the cache slots, and the
//! replication interests; screen-scoped controllers (search, comment
//! threads) are created from it on demand.

use crate::cache::{CacheSlot, QueryResultCache};
use crate::catalog::MovieCatalog;
use crate::comments::CommentThreadController;
use crate::monitors::{IndexMonitor, SyncStatusMonitor};
use crate::registry::ObserverRegistry;
use crate::search::SearchController;
use engine::{queries, EngineError, EngineHandle, EngineState, InitOptions, SyncEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct DataLayer {
  engine: Arc<EngineHandle>,
  registry: Arc<ObserverRegistry>,
  cache: Arc<QueryResultCache>,
  catalog: MovieCatalog,
  comments: Arc<CommentThreadController>,
  sync_status: SyncStatusMonitor,
  indexes: IndexMonitor,
  /// Guards the one-time replication interest declaration.
  interests_claimed: AtomicBool,
}

impl DataLayer {
  pub fn new(backend: Arc<dyn SyncEngine>) -> Arc<Self> {
    let engine = Arc::new(EngineHandle::new(backend));
    let registry = ObserverRegistry::new(engine.clone());
    let cache = QueryResultCache::new(registry.clone());
    Arc::new(Self {
      catalog: MovieCatalog::new(engine.clone()),
      comments: CommentThreadController::new(engine.clone(), registry.clone()),
      sync_status: SyncStatusMonitor::new(cache.clone()),
      indexes: IndexMonitor::new(cache.clone()),
      engine,
      registry,
      cache,
      interests_claimed: AtomicBool::new(false),
    })
  }

  /// Initialize the engine, declare the replication interests, and warm the
  /// cache slots. Safe to call concurrently; the interests are registered
  /// exactly once.
  pub async fn initialize(&self, opts: InitOptions) -> Result<(), EngineError> {
    self.engine.initialize(opts).await?;

    if self
      .interests_claimed
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      match self.register_interests().await {
        Ok(()) => {
          info!(count = self.registry.interest_count(), "Declared replication interests");
        }
        Err(err) => {
          // Leave the claim open so a retry can declare them.
          self.interests_claimed.store(false, Ordering::SeqCst);
          return Err(err);
        }
      }
    }

    for slot in CacheSlot::ALL {
      let _ = self.cache.get(slot).await;
    }
    Ok(())
  }

  async fn register_interests(&self) -> Result<(), EngineError> {
    let movie_sub = queries::movie_subscription();
    let comment_sub = queries::comment_subscription();
    futures::try_join!(
      self.registry.declare_interest(&movie_sub),
      self.registry.declare_interest(&comment_sub),
    )?;
    Ok(())
  }

  /// A fresh search controller for a screen.
  pub fn search_controller(&self) -> Arc<SearchController> {
    SearchController::new(self.engine.clone())
  }

  pub fn engine(&self) -> &Arc<EngineHandle> {
    &self.engine
  }

  pub fn engine_state(&self) -> EngineState {
    self.engine.state()
  }

  pub fn registry(&self) -> &Arc<ObserverRegistry> {
    &self.registry
  }

  pub fn cache(&self) -> &Arc<QueryResultCache> {
    &self.cache
  }

  pub fn catalog(&self) -> &MovieCatalog {
    &self.catalog
  }

  pub fn comments(&self) -> &Arc<CommentThreadController> {
    &self.comments
  }

  pub fn sync_status(&self) -> &SyncStatusMonitor {
    &self.sync_status
  }

  pub fn indexes(&self) -> &IndexMonitor {
    &self.indexes
  }

  /// Number of declared replication interests.
  pub fn replication_interests(&self) -> usize {
    self.registry.interest_count()
  }
}
