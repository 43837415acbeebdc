//! Long-lived read-only monitors over store metadata.
//!
//! Both monitors project a pinned cache slot into typed records. The peer
//! monitor's ordering is deterministic on purpose (snapshot tests depend on
//! it): connected peers first, then most recently updated, ties broken by
//! peer id. The index monitor applies no ordering at all — presentation
//! follows store delivery order.

use crate::cache::{CacheSlot, QueryResultCache};
use crate::registry::{AttachHandle, QueryUpdate};
use cinesync_core::{IndexDescriptor, SyncPeerStatus};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Singleton monitor over `system:data_sync_info`.
pub struct SyncStatusMonitor {
  cache: Arc<QueryResultCache>,
}

impl SyncStatusMonitor {
  pub fn new(cache: Arc<QueryResultCache>) -> Self {
    Self { cache }
  }

  /// Current peer table, deterministically sorted.
  pub async fn snapshot(&self) -> Vec<SyncPeerStatus> {
    let snapshot = self.cache.get(CacheSlot::SyncStatus).await;
    let mut peers: Vec<SyncPeerStatus> = snapshot.items.iter().map(SyncPeerStatus::from_document).collect();
    sort_peers(&mut peers);
    peers
  }

  /// Push sorted peer tables into `tx` on every delivery.
  pub async fn subscribe(&self, tx: mpsc::UnboundedSender<Vec<SyncPeerStatus>>) -> AttachHandle {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<QueryUpdate>();
    let handle = self.cache.subscribe(CacheSlot::SyncStatus, raw_tx).await;
    tokio::spawn(async move {
      while let Some(update) = raw_rx.recv().await {
        if let QueryUpdate::Snapshot { items, .. } = update {
          let mut peers: Vec<SyncPeerStatus> = items.iter().map(SyncPeerStatus::from_document).collect();
          sort_peers(&mut peers);
          if tx.send(peers).is_err() {
            break;
          }
        }
      }
    });
    handle
  }

  pub fn unsubscribe(&self, handle: AttachHandle) {
    self.cache.unsubscribe(handle);
  }
}

/// Connected first, then descending last-update time, then peer id.
fn sort_peers(peers: &mut [SyncPeerStatus]) {
  peers.sort_by(|a, b| {
    b.is_connected()
      .cmp(&a.is_connected())
      .then_with(|| b.last_update_time.unwrap_or(0).cmp(&a.last_update_time.unwrap_or(0)))
      .then_with(|| a.id.cmp(&b.id))
  });
}

/// Singleton monitor over `system:indexes`.
pub struct IndexMonitor {
  cache: Arc<QueryResultCache>,
}

impl IndexMonitor {
  pub fn new(cache: Arc<QueryResultCache>) -> Self {
    Self { cache }
  }

  /// Current index list, in store delivery order.
  pub async fn snapshot(&self) -> Vec<IndexDescriptor> {
    let snapshot = self.cache.get(CacheSlot::Indexes).await;
    snapshot.items.iter().map(IndexDescriptor::from_document).collect()
  }

  /// Push index lists into `tx` on every delivery.
  pub async fn subscribe(&self, tx: mpsc::UnboundedSender<Vec<IndexDescriptor>>) -> AttachHandle {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<QueryUpdate>();
    let handle = self.cache.subscribe(CacheSlot::Indexes, raw_tx).await;
    tokio::spawn(async move {
      while let Some(update) = raw_rx.recv().await {
        if let QueryUpdate::Snapshot { items, .. } = update {
          let indexes = items.iter().map(IndexDescriptor::from_document).collect();
          if tx.send(indexes).is_err() {
            break;
          }
        }
      }
    });
    handle
  }

  pub fn unsubscribe(&self, handle: AttachHandle) {
    self.cache.unsubscribe(handle);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn peer(id: &str, status: &str, last_update: Option<i64>) -> SyncPeerStatus {
    SyncPeerStatus {
      id: id.to_string(),
      is_server: false,
      status: status.to_string(),
      last_commit_id: None,
      last_update_time: last_update,
    }
  }

  #[test]
  fn test_connected_peers_sort_first_by_recency() {
    let mut peers = vec![
      peer("a", "Connecting", None),
      peer("b", "Connected", Some(5)),
      peer("c", "Connected", Some(10)),
    ];
    sort_peers(&mut peers);
    let ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
  }

  #[test]
  fn test_peer_sort_ties_break_on_id() {
    let mut peers = vec![
      peer("z", "Connected", Some(5)),
      peer("a", "Connected", Some(5)),
      peer("m", "Disconnected", None),
      peer("b", "Disconnected", None),
    ];
    sort_peers(&mut peers);
    let ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "z", "b", "m"]);
  }
}
