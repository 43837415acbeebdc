//! Shared domain types for the CineSync data layer.
//!
//! This crate holds everything the other crates agree on: the [`Document`]
//! wrapper around raw store records, the typed record decoders, the store
//! configuration, and the config error type. It has no knowledge of the
//! engine or of any controller logic.

pub mod config;
pub mod document;
pub mod error;
pub mod model;

pub use config::StoreConfig;
pub use document::Document;
pub use error::ConfigError;
pub use model::{Comment, IndexDescriptor, Movie, MovieListing, SyncPeerStatus};
