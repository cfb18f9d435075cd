//! Handlers for `/items` endpoints: the catalog sync hook and item reports.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `PUT`  | `/items/{item_id}` | Body: [`ItemBody`]; registers or updates the item |
//! | `GET`  | `/items/{item_id}` | Current rating and band; 404 if unknown |
//! | `GET`  | `/items/calibration` | Calibration report over live items |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use mastery_core::{
  MasteryEngine,
  diagnostics::CalibrationReport,
  rating::{ItemRating, LifecycleStatus},
  store::{CatalogItem, ContentCatalog, RatingStore},
};
use serde::Deserialize;

use crate::error::ApiError;

/// JSON body accepted by `PUT /items/{item_id}`.
#[derive(Debug, Deserialize)]
pub struct ItemBody {
  pub skill_tags:     Vec<String>,
  #[serde(default)]
  pub status:         LifecycleStatus,
  pub initial_rating: Option<f64>,
}

/// `PUT /items/{item_id}`
pub async fn upsert<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(item_id): Path<String>,
  Json(body): Json<ItemBody>,
) -> Result<Json<ItemRating>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  let item = CatalogItem {
    item_id,
    skill_tags: body.skill_tags,
    status: body.status,
    initial_rating: body.initial_rating,
  };
  Ok(Json(engine.register_item(item).await?))
}

/// `GET /items/{item_id}`
pub async fn get_one<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
  Path(item_id): Path<String>,
) -> Result<Json<ItemRating>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Ok(Json(engine.item_rating(&item_id).await?))
}

/// `GET /items/calibration`
pub async fn calibration<S>(
  State(engine): State<Arc<MasteryEngine<S>>>,
) -> Result<Json<CalibrationReport>, ApiError>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Ok(Json(engine.item_calibration().await?))
}
