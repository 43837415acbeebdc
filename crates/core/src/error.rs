use thiserror::Error;

/// Configuration problems caught before the store is ever opened.
///
/// Variants carry rendered strings rather than source errors so the type
/// stays `Clone`; initialization outcomes are broadcast to every concurrent
/// caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
  #[error("Missing config value: {0}")]
  Missing(&'static str),

  #[error("Config value {0} still holds the sample placeholder, replace it with your credentials")]
  Placeholder(&'static str),

  #[error("Failed to read config file: {0}")]
  Read(String),

  #[error("Failed to parse config file: {0}")]
  Parse(String),
}
