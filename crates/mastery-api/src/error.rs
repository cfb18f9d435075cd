//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The same submission token is still being applied.
  #[error("conflict: {0}")]
  Conflict(String),

  /// Contention outlasted the retry budget; the client may retry.
  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<mastery_core::Error> for ApiError {
  fn from(e: mastery_core::Error) -> Self {
    use mastery_core::Error as E;
    match e {
      E::ItemNotFound(id) => ApiError::NotFound(format!("item {id} not found")),
      e @ (E::InvalidQuality(_) | E::InvalidInput(_)) => ApiError::BadRequest(e.to_string()),
      e @ E::SubmissionInFlight(_) => ApiError::Conflict(e.to_string()),
      e @ E::WriteConflict { .. } => ApiError::Unavailable(e.to_string()),
      e => {
        tracing::error!(error = %e, "engine failure");
        ApiError::Store(Box::new(e))
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
