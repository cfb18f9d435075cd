//! JSON REST API for the mastery engine.
//!
//! Exposes an axum [`Router`] backed by a [`MasteryEngine`] over any store
//! implementing both [`RatingStore`] and [`ContentCatalog`]. Identity, auth
//! and TLS are the caller's responsibility: `user_id` values are taken as
//! given.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", mastery_api::api_router(engine.clone()))
//! ```

pub mod attempts;
pub mod error;
pub mod items;
pub mod reviews;
pub mod users;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post, put},
};
use mastery_core::{
  MasteryEngine,
  store::{ContentCatalog, RatingStore},
};

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(engine: Arc<MasteryEngine<S>>) -> Router<()>
where
  S: RatingStore + ContentCatalog + 'static,
{
  Router::new()
    // Practice
    .route("/attempts", post(attempts::submit::<S>))
    .route("/reviews", post(reviews::record::<S>))
    // Learners
    .route("/users/{user_id}/next-item", get(users::next_item::<S>))
    .route("/users/{user_id}/skills", get(users::skills::<S>))
    .route("/users/{user_id}/skills/weakest", get(users::weakest::<S>))
    .route("/users/{user_id}/diagnostics", get(users::diagnostics::<S>))
    .route("/users/{user_id}/reviews/due", get(reviews::due::<S>))
    .route("/users/{user_id}/reviews/{item_id}", delete(reviews::remove::<S>))
    // Catalog
    .route("/items/calibration", get(items::calibration::<S>))
    .route("/items/{item_id}", put(items::upsert::<S>).get(items::get_one::<S>))
    .with_state(engine)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use mastery_core::{EngineConfig, MasteryEngine};
  use mastery_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::api_router;

  async fn make_engine() -> Arc<MasteryEngine<SqliteStore>> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Arc::new(MasteryEngine::new(Arc::new(store), EngineConfig::default()))
  }

  async fn oneshot_json(
    engine: &Arc<MasteryEngine<SqliteStore>>,
    method: &str,
    uri:    &str,
    body:   Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = api_router(engine.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  async fn put_item(
    engine: &Arc<MasteryEngine<SqliteStore>>,
    id: &str,
    tags: &[&str],
    rating: Option<f64>,
  ) {
    let body = json!({ "skill_tags": tags, "initial_rating": rating });
    let (status, _) = oneshot_json(engine, "PUT", &format!("/items/{id}"), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
  }

  // ── Items ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn put_then_get_item() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], Some(1350.0)).await;

    let (status, body) = oneshot_json(&engine, "GET", "/items/q1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rating"], 1350.0);
    assert_eq!(body["band"], "foundation");
    assert_eq!(body["status"], "live");
  }

  #[tokio::test]
  async fn unknown_item_is_404() {
    let engine = make_engine().await;
    let (status, body) = oneshot_json(&engine, "GET", "/items/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
  }

  #[tokio::test]
  async fn item_without_tags_is_400() {
    let engine = make_engine().await;
    let (status, _) =
      oneshot_json(&engine, "PUT", "/items/q1", Some(json!({ "skill_tags": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn calibration_is_not_an_item_id() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], None).await;

    let (status, body) = oneshot_json(&engine, "GET", "/items/calibration", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_items"], 1);
    assert_eq!(body["by_band"]["core"], 1);
  }

  // ── Attempts ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn attempt_updates_ratings() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], None).await;

    let body = json!({ "user_id": "u1", "item_id": "q1", "skill_id": "algebra", "correct": true });
    let (status, body) = oneshot_json(&engine, "POST", "/attempts", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skill_rating_delta"], 16.0);
    assert_eq!(body["item_rating_delta"], -8.0);
    assert_eq!(body["new_difficulty_band"], "core");
    assert_eq!(body["replayed"], false);
  }

  #[tokio::test]
  async fn attempt_on_unknown_item_is_404() {
    let engine = make_engine().await;
    let body = json!({ "user_id": "u1", "item_id": "ghost", "skill_id": "algebra", "correct": true });
    let (status, _) = oneshot_json(&engine, "POST", "/attempts", Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn repeated_attempt_token_replays() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], None).await;

    let body = json!({
      "user_id": "u1", "item_id": "q1", "skill_id": "algebra",
      "correct": false, "idempotency_key": "abc",
    });
    let (_, first) = oneshot_json(&engine, "POST", "/attempts", Some(body.clone())).await;
    let (status, second) = oneshot_json(&engine, "POST", "/attempts", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["skill"], first["skill"]);

    let (_, skills) = oneshot_json(&engine, "GET", "/users/u1/skills", None).await;
    assert_eq!(skills[0]["rating"], 1484.0);
  }

  // ── Reviews ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn review_quality_out_of_range_is_400() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], None).await;

    for quality in [-1, 6, 7, 300] {
      let body = json!({ "user_id": "u1", "item_id": "q1", "quality": quality });
      let (status, body) = oneshot_json(&engine, "POST", "/reviews", Some(body)).await;
      assert_eq!(status, StatusCode::BAD_REQUEST, "quality {quality}");
      let message = body["error"].as_str().unwrap();
      assert!(message.contains(&format!("got {quality}")), "{message}");
    }

    let (_, due) = oneshot_json(
      &engine,
      "GET",
      "/users/u1/reviews/due?as_of=2100-01-01T00:00:00Z",
      None,
    )
    .await;
    assert_eq!(due, json!([]));
  }

  #[tokio::test]
  async fn review_then_due_then_delete() {
    let engine = make_engine().await;
    put_item(&engine, "q1", &["algebra"], None).await;

    let body = json!({ "user_id": "u1", "item_id": "q1", "quality": 5 });
    let (status, result) = oneshot_json(&engine, "POST", "/reviews", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["is_new_card"], true);
    assert_eq!(result["card"]["stability"], 4.0);

    let (_, now_due) = oneshot_json(&engine, "GET", "/users/u1/reviews/due", None).await;
    assert_eq!(now_due, json!([]));

    let (status, later) = oneshot_json(
      &engine,
      "GET",
      "/users/u1/reviews/due?limit=5&as_of=2100-01-01T00:00:00Z",
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(later[0]["item_id"], "q1");
    assert_eq!(later[0]["skill_tags"], json!(["algebra"]));

    let (status, _) = oneshot_json(&engine, "DELETE", "/users/u1/reviews/q1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = oneshot_json(&engine, "DELETE", "/users/u1/reviews/q1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn zero_due_limit_is_400() {
    let engine = make_engine().await;
    let (status, _) = oneshot_json(&engine, "GET", "/users/u1/reviews/due?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── Learners ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn next_item_cold_start_and_exclusions() {
    let engine = make_engine().await;
    put_item(&engine, "easy", &["algebra"], Some(1300.0)).await;
    put_item(&engine, "hard", &["algebra"], Some(1700.0)).await;

    let (status, picked) = oneshot_json(&engine, "GET", "/users/new/next-item", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(picked["item_id"], "easy");
    assert_eq!(picked["reason"]["kind"], "cold_start");

    let (status, none) =
      oneshot_json(&engine, "GET", "/users/new/next-item?exclude=easy,hard", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(none, Value::Null);
  }

  #[tokio::test]
  async fn weakest_and_diagnostics() {
    let engine = make_engine().await;
    let (status, none) = oneshot_json(&engine, "GET", "/users/u1/skills/weakest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(none, Value::Null);

    put_item(&engine, "q1", &["algebra", "logic"], None).await;
    for (skill, correct) in [("algebra", false), ("logic", true)] {
      let body = json!({ "user_id": "u1", "item_id": "q1", "skill_id": skill, "correct": correct });
      let (status, _) = oneshot_json(&engine, "POST", "/attempts", Some(body)).await;
      assert_eq!(status, StatusCode::OK);
    }

    let (_, weakest) = oneshot_json(&engine, "GET", "/users/u1/skills/weakest", None).await;
    assert_eq!(weakest["skill_id"], "algebra");

    let (status, report) = oneshot_json(&engine, "GET", "/users/u1/diagnostics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_observations"], 2);
    assert_eq!(report["weakest_skill"], "algebra");
  }
}
