//! Named, process-lifetime query result slots.
//!
//! Each slot wraps one pinned observed query: the movie listing, the peer
//! sync status table, and the index list. Slots are created lazily on first
//! access and never destroyed; a UI surface can unmount and remount freely
//! and always finds the last-known snapshot waiting. Every caller sees the
//! identical snapshot until the next engine delivery.

use crate::registry::{AttachHandle, ObserverRegistry, QueryUpdate, Scope};
use cinesync_core::Document;
use engine::{queries, Query};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The fixed cache slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
  MovieListing,
  SyncStatus,
  Indexes,
}

impl CacheSlot {
  pub const ALL: [CacheSlot; 3] = [CacheSlot::MovieListing, CacheSlot::SyncStatus, CacheSlot::Indexes];

  pub fn name(self) -> &'static str {
    match self {
      CacheSlot::MovieListing => "movies:listing",
      CacheSlot::SyncStatus => "sync:status",
      CacheSlot::Indexes => "indexes",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|slot| slot.name() == name)
  }

  /// The fixed query behind this slot.
  pub fn query(self) -> Query {
    match self {
      CacheSlot::MovieListing => queries::movie_listing(),
      CacheSlot::SyncStatus => queries::sync_status(),
      CacheSlot::Indexes => queries::indexes(),
    }
  }
}

/// Point-in-time view of a slot.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
  pub items: Arc<[Document]>,
  pub version: u64,
  /// No delivery has arrived yet (and no error either).
  pub loading: bool,
  pub error: Option<String>,
}

pub struct QueryResultCache {
  registry: Arc<ObserverRegistry>,
}

impl QueryResultCache {
  pub fn new(registry: Arc<ObserverRegistry>) -> Arc<Self> {
    Arc::new(Self { registry })
  }

  /// Current snapshot for a slot, creating the slot on first access.
  pub async fn get(&self, slot: CacheSlot) -> CacheSnapshot {
    self.registry.ensure_pinned(&slot.query()).await;
    self.peek(slot)
  }

  /// Current snapshot without creating the slot. Reads are non-blocking.
  pub fn peek(&self, slot: CacheSlot) -> CacheSnapshot {
    let signature = slot.query().signature();
    match self.registry.entry_view(&signature) {
      Some(view) => {
        let loading = view.items.is_none() && view.error.is_none();
        CacheSnapshot {
          items: view.items.unwrap_or_else(|| Arc::from(Vec::new())),
          version: view.version,
          loading,
          error: view.error,
        }
      }
      None => CacheSnapshot {
        items: Arc::from(Vec::new()),
        version: 0,
        loading: true,
        error: None,
      },
    }
  }

  /// Attach a consumer for push updates. The subscription never tears the
  /// slot down; drop it with [`QueryResultCache::unsubscribe`].
  pub async fn subscribe(&self, slot: CacheSlot, tx: mpsc::UnboundedSender<QueryUpdate>) -> AttachHandle {
    self.registry.attach(&slot.query(), Scope::Pinned, tx).await
  }

  pub fn unsubscribe(&self, handle: AttachHandle) {
    self.registry.detach(handle);
  }

  /// Retry a slot whose observer registration failed.
  pub async fn refresh(&self, slot: CacheSlot) {
    self.registry.refresh(&slot.query().signature()).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_slot_names_round_trip() {
    for slot in CacheSlot::ALL {
      assert_eq!(CacheSlot::from_name(slot.name()), Some(slot));
    }
    assert_eq!(CacheSlot::from_name("movies:search"), None);
  }
}

