use cinesync_core::ConfigError;
use thiserror::Error;

/// Failures at the store boundary.
///
/// `Clone` on purpose: initialization outcomes fan out to every caller that
/// awaited the same in-flight startup, so variants carry rendered strings
/// instead of source errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
  #[error("Engine is not initialized")]
  NotInitialized,

  #[error("Platform permissions refused: {0}")]
  PermissionDenied(String),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Query execution failed: {0}")]
  QueryExecutionFailed(String),

  #[error("Observer registration failed: {0}")]
  ObserverRegistrationFailed(String),
}
