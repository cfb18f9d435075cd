//! Handlers for spaced-repetition reviews.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/reviews` | Body: [`ReviewBody`]; returns the rescheduled card |
//! | `GET`    | `/users/{user_id}/reviews/due` | Optional `?limit=` (default 20) and `?as_of=` |
//! | `DELETE` | `/users/{user_id}/reviews/{item_id}` | 204, or 404 if there was no card |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use chrono::{DateTime, Utc};
use mastery_core::{
  MasteryEngine,
  outcome::ReviewOutcome,
  review::{Quality, ReviewResult},
  store::{ContentCatalog, DueCard, RatingStore},
};
use serde::Deserialize;

use crate::error::ApiError;

const DEFAULT_DUE_LIMIT: usize = 20;

// ─── Record ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /reviews`.
#[derive(Debug, Deserialize)]
pub struct ReviewBody {
  pub user_id:         String,
  pub item_id:         String,
  /// Recall grade on the 0-5 scale. Read wide so that every out-of-range
  /// value is rejected by [`Quality`] with the same error.
  pub quality:         i64,
  pub idempotency_key: Option<String>,
}

/// `POST /reviews`
pub async fn record<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Json(body): Json<ReviewBody>,
) -> Result<Json<ReviewResult>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  let quality = Quality::try_from(body.quality)?;
  let outcome = ReviewOutcome {
    user_id: body.user_id,
    item_id: body.item_id,
    quality,
    idempotency_key: body.idempotency_key,
  };
  Ok(Json(engine.record_review(outcome).await?))
}

// ─── Due ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DueParams {
  pub limit: Option<usize>,
  /// Evaluate dueness at this instant instead of now.
  pub as_of: Option<DateTime<Utc>>,
}

/// `GET /users/{user_id}/reviews/due[?limit=n][&as_of=t]`
pub async fn due<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(user_id): Path<String>,
  Query(params): Query<DueParams>,
) -> Result<Json<Vec<DueCard>>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  let limit = params.limit.unwrap_or(DEFAULT_DUE_LIMIT);
  let as_of = params.as_of.unwrap_or_else(Utc::now);
  Ok(Json(engine.due_cards_as_of(&user_id, as_of, limit).await?))
}

// ─── Remove ───────────────────────────────────────────────────────────────────

/// `DELETE /users/{user_id}/reviews/{item_id}`
pub async fn remove<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path((user_id, item_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  if engine.remove_review(&user_id, &item_id).await? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!(
      "no review card for {user_id} on item {item_id}"
    )))
  }
}
