//! The reactive data layer between the UI and the replicated store.
//!
//! Screens never talk to the store directly. They read snapshots and
//! subscribe to updates through the components here:
//!
//! - [`registry::ObserverRegistry`] deduplicates live queries by signature,
//!   owns the engine observer handles, and fans complete result snapshots
//!   out to attached consumers.
//! - [`cache::QueryResultCache`] names the process-lifetime slots (movie
//!   listing, sync status, indexes) that survive screen unmounts.
//! - [`search::SearchController`] runs the transient search workflow with
//!   stale-response protection.
//! - [`comments::CommentThreadController`] scopes per-movie thread
//!   observers to the screen that opened them.
//! - [`monitors`] project store metadata into typed, deterministically
//!   ordered views.
//! - [`service::DataLayer`] wires it all together as one explicitly
//!   constructed service object.

pub mod cache;
pub mod catalog;
pub mod comments;
pub mod error;
pub mod monitors;
pub mod registry;
pub mod search;
pub mod service;

pub use cache::{CacheSlot, CacheSnapshot, QueryResultCache};
pub use catalog::{MovieCatalog, MovieChanges, MovieDraft};
pub use comments::{CommentThreadController, ThreadHandle, ThreadUpdate};
pub use error::DataError;
pub use monitors::{IndexMonitor, SyncStatusMonitor};
pub use registry::{AttachHandle, EntryView, ObserverRegistry, QueryUpdate, Scope};
pub use search::{SearchController, SearchSnapshot, SearchStatus};
pub use service::DataLayer;
