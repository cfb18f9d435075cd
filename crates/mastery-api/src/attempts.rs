//! Handlers for `/attempts`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/attempts` | Body: [`AttemptBody`]; returns the rating changes |

use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use mastery_core::{
  MasteryEngine,
  outcome::{AttemptOutcome, AttemptResult},
  store::{ContentCatalog, RatingStore},
};
use serde::Deserialize;

use crate::error::ApiError;

/// JSON body accepted by `POST /attempts`.
#[derive(Debug, Deserialize)]
pub struct AttemptBody {
  pub user_id:         String,
  pub item_id:         String,
  pub skill_id:        String,
  pub correct:         bool,
  /// When the answer was given. Defaults to now.
  pub timestamp:       Option<DateTime<Utc>>,
  pub idempotency_key: Option<String>,
}

impl From<AttemptBody> for AttemptOutcome {
  fn from(b: AttemptBody) -> Self {
    AttemptOutcome {
      user_id:         b.user_id,
      item_id:         b.item_id,
      skill_id:        b.skill_id,
      correct:         b.correct,
      timestamp:       b.timestamp.unwrap_or_else(Utc::now),
      idempotency_key: b.idempotency_key,
    }
  }
}

/// `POST /attempts`
pub async fn submit<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Json(body): Json<AttemptBody>,
) -> Result<Json<AttemptResult>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  let result = engine.submit_attempt(AttemptOutcome::from(body)).await?;
  Ok(Json(result))
}
