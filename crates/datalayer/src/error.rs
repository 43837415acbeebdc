use engine::EngineError;
use thiserror::Error;

/// Failures surfaced by the data layer's controllers.
///
/// Engine-level failures pass through unchanged; the write-shaped variants
/// distinguish "the store executed the write but nothing changed" from a
/// hard failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("Insert executed but no document was written")]
  InsertFailed,

  #[error("Write executed but no documents matched")]
  NoDocumentsMutated,
}
