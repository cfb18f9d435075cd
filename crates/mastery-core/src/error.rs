//! Error types for `mastery-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The referenced item has no catalog entry.
  #[error("item not found: {0}")]
  ItemNotFound(String),

  #[error("recall quality must be between 0 and 5, got {0}")]
  InvalidQuality(i64),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Concurrent writers kept winning the compare-and-swap on this key.
  #[error("write conflict on {key} after {attempts} attempts")]
  WriteConflict { key: String, attempts: u32 },

  /// A submission with the same idempotency key is still being applied.
  #[error("submission {0} is already in flight")]
  SubmissionInFlight(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
