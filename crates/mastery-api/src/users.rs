//! Per-learner read endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users/{user_id}/next-item` | Optional `?exclude=a,b` and `?skill=` |
//! | `GET`  | `/users/{user_id}/skills` | Skill summary, sorted by skill id |
//! | `GET`  | `/users/{user_id}/skills/weakest` | `null` if the learner has no skills |
//! | `GET`  | `/users/{user_id}/diagnostics` | Convergence report |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use mastery_core::{
  MasteryEngine,
  diagnostics::{ConvergenceReport, SkillSummary},
  selector::ItemRef,
  store::{ContentCatalog, RatingStore},
};
use serde::Deserialize;

use crate::error::ApiError;

// ─── Next item ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NextItemParams {
  /// Comma-separated item ids to skip.
  pub exclude: Option<String>,
  /// Target this skill instead of the weakest one.
  pub skill:   Option<String>,
}

impl NextItemParams {
  fn exclude_ids(&self) -> Vec<String> {
    self
      .exclude
      .as_deref()
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|id| !id.is_empty())
      .map(str::to_owned)
      .collect()
  }
}

/// `GET /users/{user_id}/next-item[?exclude=a,b][&skill=s]`
///
/// Returns `null` when nothing is eligible.
pub async fn next_item<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(user_id): Path<String>,
  Query(params): Query<NextItemParams>,
) -> Result<Json<Option<ItemRef>>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  let exclude = params.exclude_ids();
  let skill = params.skill.as_deref().filter(|s| !s.is_empty());
  Ok(Json(engine.pick_next_item(&user_id, &exclude, skill).await?))
}

// ─── Skills ───────────────────────────────────────────────────────────────────

/// `GET /users/{user_id}/skills`
pub async fn skills<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(user_id): Path<String>,
) -> Result<Json<Vec<SkillSummary>>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Ok(Json(engine.skill_summary(&user_id).await?))
}

/// `GET /users/{user_id}/skills/weakest`
pub async fn weakest<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(user_id): Path<String>,
) -> Result<Json<Option<SkillSummary>>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Ok(Json(engine.weakest_skill(&user_id).await?))
}

/// `GET /users/{user_id}/diagnostics`
pub async fn diagnostics<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(user_id): Path<String>,
) -> Result<Json<ConvergenceReport>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Ok(Json(engine.convergence_report(&user_id).await?))
}
