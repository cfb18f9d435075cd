//! HTTP server wiring for the mastery engine.
//!
//! The binary in `main.rs` loads a [`ServerConfig`], opens the SQLite store
//! and serves [`app`]. Everything here is kept in the library so it can be
//! exercised without binding a socket.

use std::{path::PathBuf, sync::Arc};

use axum::{Json, Router, routing::get};
use mastery_core::{
  EngineConfig, MasteryEngine,
  store::{CatalogItem, ContentCatalog, RatingStore},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `MASTERY_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub engine:     EngineConfig,
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("mastery.db") }

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full application: the JSON API under `/api`, plus a liveness probe.
pub fn app<S>(engine: Arc<MasteryEngine<S>>) -> Router
where
  S: RatingStore + ContentCatalog + 'static,
{
  Router::new()
    .route("/health", get(health))
    .nest("/api", mastery_api::api_router(engine))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

// ─── Catalog import ──────────────────────────────────────────────────────────

/// Register every item in `items`, stopping at the first rejection.
/// Returns the number of items registered.
pub async fn import_catalog<S>(
  engine: &MasteryEngine<S>,
  items:  Vec<CatalogItem>,
) -> mastery_core::Result<usize>
where
  S: RatingStore + ContentCatalog,
{
  let mut count = 0;
  for item in items {
    engine.register_item(item).await?;
    count += 1;
  }
  tracing::info!(count, "catalog imported");
  Ok(count)
}
