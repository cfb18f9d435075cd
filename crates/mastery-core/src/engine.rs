//! [`MasteryEngine`]: the operations exposed to the presentation layer.
//!
//! Every write is a read-modify-write committed with a compare-and-swap on
//! row versions: one review card, one rating, or the skill and item pair of
//! a practice attempt, which land together. A lost swap re-reads and tries
//! again after a short jittered backoff; after `max_write_attempts` lost
//! swaps the call fails with [`Error::WriteConflict`].
//!
//! Submissions carrying an idempotency key are claimed under a lease before
//! they are applied, and their response is stored in the same commit as the
//! write. A failed submission has written nothing, so its claim is released
//! and the client may retry with the same key.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  diagnostics::{self, CalibrationReport, ConvergenceReport, SkillSummary},
  outcome::{
    AttemptOutcome, AttemptResult, Claim, Completion, ReviewOutcome, SubmissionKey,
    SubmissionKind, SubmissionLease,
  },
  rating::{DEFAULT_RATING, DifficultyBand, ItemRating, ItemRatingChange, RatingChange, SkillRating},
  review::{ReviewCard, ReviewResult},
  selector::{self, ItemRef},
  store::{AttemptWrite, CatalogItem, ContentCatalog, DueCard, ItemQuery, RatingStore},
};

/// Upper bound on a single `due_cards` page.
pub const MAX_DUE_LIMIT: usize = 500;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tuning for write-conflict retries and submission claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Compare-and-swap attempts per key before giving up.
  pub max_write_attempts:  u32,
  /// Delay before the first retry; doubles on each further retry.
  pub retry_base_delay_ms: u64,
  pub retry_max_delay_ms:  u64,
  /// How long a claimed idempotency key stays in flight before a retry with
  /// the same key may take it over.
  pub claim_lease_ms:      u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_write_attempts:  8,
      retry_base_delay_ms: 2,
      retry_max_delay_ms:  50,
      claim_lease_ms:      30_000,
    }
  }
}

// ─── Backoff ─────────────────────────────────────────────────────────────────

/// Retry budget for one key.
#[derive(Debug)]
pub struct Backoff<'a> {
  config:   &'a EngineConfig,
  attempts: u32,
}

impl<'a> Backoff<'a> {
  pub fn new(config: &'a EngineConfig) -> Self { Self { config, attempts: 0 } }

  /// Record a lost swap on `key`, then sleep before the next attempt.
  /// Fails once the budget is spent.
  pub async fn wait(&mut self, key: &str) -> Result<()> {
    self.attempts += 1;
    if self.attempts >= self.config.max_write_attempts {
      warn!(key, attempts = self.attempts, "write conflict retries exhausted");
      return Err(Error::WriteConflict { key: key.to_owned(), attempts: self.attempts });
    }

    let delay = self.delay_ms();
    debug!(key, attempt = self.attempts, delay_ms = delay, "write conflict, retrying");
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Ok(())
  }

  /// Exponential delay with jitter in `[delay / 2, delay]`.
  fn delay_ms(&self) -> u64 {
    let exp = self.attempts.saturating_sub(1).min(16);
    let delay = self
      .config
      .retry_base_delay_ms
      .saturating_mul(1 << exp)
      .min(self.config.retry_max_delay_ms);
    let half = delay / 2;
    half + rand::thread_rng().gen_range(0..=delay - half)
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The adaptive mastery engine over a store that also fronts the catalog.
pub struct MasteryEngine<S> {
  store:  Arc<S>,
  config: EngineConfig,
}

impl<S> Clone for MasteryEngine<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: self.config.clone() }
  }
}

/// End of a claim lease taken at `now`. Saturates instead of overflowing.
fn lease_until(config: &EngineConfig, now: DateTime<Utc>) -> DateTime<Utc> {
  i64::try_from(config.claim_lease_ms)
    .ok()
    .and_then(TimeDelta::try_milliseconds)
    .and_then(|lease| now.checked_add_signed(lease))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn require_id(field: &str, value: &str) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::InvalidInput(format!("{field} must not be empty")));
  }
  Ok(())
}

impl<S> MasteryEngine<S>
where
  S: RatingStore + ContentCatalog,
{
  pub fn new(store: Arc<S>, config: EngineConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  // ── Catalog sync ──────────────────────────────────────────────────────

  /// Register or update an item pushed by the content catalog.
  pub async fn register_item(&self, item: CatalogItem) -> Result<ItemRating> {
    require_id("item_id", &item.item_id)?;
    if item.skill_tags.iter().all(|t| t.trim().is_empty()) {
      return Err(Error::InvalidInput(format!(
        "item {} must carry at least one skill tag",
        item.item_id
      )));
    }
    if let Some(r) = item.initial_rating
      && !r.is_finite()
    {
      return Err(Error::InvalidInput("initial_rating must be finite".into()));
    }

    let rating = self.store.upsert_item(item).await.map_err(Error::store)?;
    info!(
      item_id = %rating.item_id,
      status = rating.status.as_str(),
      band = %rating.band,
      "catalog item registered"
    );
    Ok(rating)
  }

  /// An item's current rating; not-found if the catalog has no such item.
  pub async fn item_rating(&self, item_id: &str) -> Result<ItemRating> {
    self
      .store
      .get_item_rating(item_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::ItemNotFound(item_id.to_owned()))
  }

  // ── Rating updates ────────────────────────────────────────────────────

  /// Apply one practice attempt to both the learner's skill and the item.
  ///
  /// The skill update plays against the item's current rating and the item
  /// update against the skill rating from before this attempt. Both ratings
  /// are committed together.
  pub async fn submit_attempt(&self, outcome: AttemptOutcome) -> Result<AttemptResult> {
    require_id("user_id", &outcome.user_id)?;
    require_id("skill_id", &outcome.skill_id)?;
    let item = self.item_rating(&outcome.item_id).await?;
    if !item.has_skill(&outcome.skill_id) {
      return Err(Error::InvalidInput(format!(
        "item {} is not tagged with skill {}",
        outcome.item_id, outcome.skill_id
      )));
    }

    let lease = outcome.idempotency_key.as_ref().map(|token| {
      self.lease(SubmissionKey {
        user_id: outcome.user_id.clone(),
        item_id: outcome.item_id.clone(),
        kind:    SubmissionKind::Attempt,
        token:   token.clone(),
      })
    });
    if let Some(lease) = &lease
      && let Some(stored) = self.claim(lease).await?
    {
      let mut replay: AttemptResult = serde_json::from_str(&stored)?;
      replay.replayed = true;
      return Ok(replay);
    }

    let applied = self.apply_attempt(&outcome, lease.as_ref()).await;
    if applied.is_err()
      && let Some(lease) = &lease
    {
      self.release(lease).await;
    }
    applied
  }

  async fn apply_attempt(
    &self,
    outcome: &AttemptOutcome,
    lease: Option<&SubmissionLease>,
  ) -> Result<AttemptResult> {
    let now = outcome.timestamp;
    let key = format!(
      "attempt {}/{} on {}",
      outcome.user_id, outcome.skill_id, outcome.item_id
    );
    let mut backoff = Backoff::new(&self.config);
    loop {
      let skill = self
        .store
        .get_skill_rating(&outcome.user_id, &outcome.skill_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| SkillRating::seed(&outcome.user_id, &outcome.skill_id, now));
      let item = self.item_rating(&outcome.item_id).await?;

      let write = AttemptWrite {
        skill:          skill.apply(item.rating, outcome.correct, now),
        skill_expected: skill.version,
        item:           item.apply(skill.rating, outcome.correct, now),
        item_expected:  item.version,
      };
      let result = AttemptResult::new(
        RatingChange { old_rating: skill.rating, new_rating: write.skill.rating },
        ItemRatingChange {
          old_rating: item.rating,
          new_rating: write.item.rating,
          new_band:   write.item.band,
        },
      );
      let completion = lease.map(|l| Completion::new(l, &result)).transpose()?;

      if self
        .store
        .swap_attempt(&write, completion.as_ref())
        .await
        .map_err(Error::store)?
      {
        debug!(
          user_id = %outcome.user_id,
          skill_id = %outcome.skill_id,
          item_id = %outcome.item_id,
          correct = outcome.correct,
          skill = write.skill.rating,
          item = write.item.rating,
          band = %write.item.band,
          "attempt applied"
        );
        return Ok(result);
      }
      backoff.wait(&key).await?;
    }
  }

  /// Apply one outcome against an opponent rated `opponent_rating` to a
  /// learner's skill. A skill never attempted before starts at the default.
  pub async fn update_skill_rating(
    &self,
    user_id: &str,
    skill_id: &str,
    opponent_rating: f64,
    correct: bool,
  ) -> Result<RatingChange> {
    require_id("user_id", user_id)?;
    require_id("skill_id", skill_id)?;
    self
      .apply_skill_outcome(user_id, skill_id, opponent_rating, correct, Utc::now())
      .await
  }

  /// Apply one outcome by a learner rated `opponent_rating` to an item.
  pub async fn update_item_rating(
    &self,
    item_id: &str,
    opponent_rating: f64,
    correct: bool,
  ) -> Result<ItemRatingChange> {
    self
      .apply_item_outcome(item_id, opponent_rating, correct, Utc::now())
      .await
  }

  async fn apply_skill_outcome(
    &self,
    user_id: &str,
    skill_id: &str,
    opponent_rating: f64,
    correct: bool,
    now: DateTime<Utc>,
  ) -> Result<RatingChange> {
    let key = format!("skill {user_id}/{skill_id}");
    let mut backoff = Backoff::new(&self.config);
    loop {
      let current = self
        .store
        .get_skill_rating(user_id, skill_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| SkillRating::seed(user_id, skill_id, now));
      let next = current.apply(opponent_rating, correct, now);

      if self
        .store
        .swap_skill_rating(&next, current.version)
        .await
        .map_err(Error::store)?
      {
        debug!(
          user_id,
          skill_id,
          old = current.rating,
          new = next.rating,
          deviation = next.deviation,
          "skill rating updated"
        );
        return Ok(RatingChange { old_rating: current.rating, new_rating: next.rating });
      }
      backoff.wait(&key).await?;
    }
  }

  async fn apply_item_outcome(
    &self,
    item_id: &str,
    opponent_rating: f64,
    correct: bool,
    now: DateTime<Utc>,
  ) -> Result<ItemRatingChange> {
    let key = format!("item {item_id}");
    let mut backoff = Backoff::new(&self.config);
    loop {
      let current = self.item_rating(item_id).await?;
      let next = current.apply(opponent_rating, correct, now);

      if self
        .store
        .swap_item_rating(&next, current.version)
        .await
        .map_err(Error::store)?
      {
        debug!(
          item_id,
          old = current.rating,
          new = next.rating,
          band = %next.band,
          "item rating updated"
        );
        return Ok(ItemRatingChange {
          old_rating: current.rating,
          new_rating: next.rating,
          new_band:   next.band,
        });
      }
      backoff.wait(&key).await?;
    }
  }

  // ── Selection ─────────────────────────────────────────────────────────

  /// Choose the next item for a learner. Read-only.
  ///
  /// Returns `None` when no candidate survives filtering; that is a normal
  /// outcome, not an error.
  pub async fn pick_next_item(
    &self,
    user_id: &str,
    exclude_item_ids: &[String],
    skill_filter: Option<&str>,
  ) -> Result<Option<ItemRef>> {
    let ratings = self
      .store
      .list_skill_ratings(user_id)
      .await
      .map_err(Error::store)?;

    if ratings.is_empty() {
      let mut query = ItemQuery::live().band(DifficultyBand::lowest());
      if let Some(skill) = skill_filter {
        query = query.skill(skill);
      }
      let candidates = self.store.list_items(&query).await.map_err(Error::store)?;
      let picked = selector::cold_start_pick(&candidates, exclude_item_ids, &mut rand::thread_rng())
        .map(|item| ItemRef::cold_start(item, skill_filter.map(str::to_owned)));
      debug!(user_id, candidates = candidates.len(), picked = ?picked.as_ref().map(|p| &p.item_id), "cold start selection");
      return Ok(picked);
    }

    let (skill_id, user_rating) = match skill_filter {
      Some(skill) => {
        let rating = ratings
          .iter()
          .find(|r| r.skill_id == skill)
          .map_or(DEFAULT_RATING, |r| r.rating);
        (skill.to_owned(), rating)
      }
      None => match selector::weakest_skill(&ratings) {
        Some(weakest) => (weakest.skill_id.clone(), weakest.rating),
        None => return Ok(None),
      },
    };

    let query = ItemQuery::live().skill(skill_id.as_str());
    let candidates = self.store.list_items(&query).await.map_err(Error::store)?;
    let target = selector::target_rating(user_rating);
    let picked = selector::closest_to_target(&candidates, target, exclude_item_ids)
      .map(|item| ItemRef::targeted(item, &skill_id, user_rating));
    debug!(
      user_id,
      skill_id = %skill_id,
      target,
      candidates = candidates.len(),
      picked = ?picked.as_ref().map(|p| &p.item_id),
      "targeted selection"
    );
    Ok(picked)
  }

  // ── Reviews ───────────────────────────────────────────────────────────

  /// Grade a recall and reschedule the card, creating it on first review.
  pub async fn record_review(&self, outcome: ReviewOutcome) -> Result<ReviewResult> {
    require_id("user_id", &outcome.user_id)?;
    if self
      .store
      .get_item(&outcome.item_id)
      .await
      .map_err(Error::store)?
      .is_none()
    {
      return Err(Error::ItemNotFound(outcome.item_id));
    }

    let lease = outcome.idempotency_key.as_ref().map(|token| {
      self.lease(SubmissionKey {
        user_id: outcome.user_id.clone(),
        item_id: outcome.item_id.clone(),
        kind:    SubmissionKind::Review,
        token:   token.clone(),
      })
    });
    if let Some(lease) = &lease
      && let Some(stored) = self.claim(lease).await?
    {
      let mut replay: ReviewResult = serde_json::from_str(&stored)?;
      replay.replayed = true;
      return Ok(replay);
    }

    let applied = self.apply_review(&outcome, lease.as_ref(), Utc::now()).await;
    if applied.is_err()
      && let Some(lease) = &lease
    {
      self.release(lease).await;
    }
    applied
  }

  async fn apply_review(
    &self,
    outcome: &ReviewOutcome,
    lease: Option<&SubmissionLease>,
    now: DateTime<Utc>,
  ) -> Result<ReviewResult> {
    let key = format!("card {}/{}", outcome.user_id, outcome.item_id);
    let mut backoff = Backoff::new(&self.config);
    loop {
      let current = self
        .store
        .get_review_card(&outcome.user_id, &outcome.item_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| ReviewCard::new(&outcome.user_id, &outcome.item_id, now));
      let next = current.schedule(outcome.quality, now);
      let result = ReviewResult {
        due_at:      next.due_at,
        is_new_card: current.is_new(),
        card:        next,
        replayed:    false,
      };
      let completion = lease.map(|l| Completion::new(l, &result)).transpose()?;

      if self
        .store
        .swap_review_card(&result.card, current.version, completion.as_ref())
        .await
        .map_err(Error::store)?
      {
        debug!(
          user_id = %outcome.user_id,
          item_id = %outcome.item_id,
          quality = outcome.quality.value(),
          stability = result.card.stability,
          due_at = %result.due_at,
          "review recorded"
        );
        return Ok(result);
      }
      backoff.wait(&key).await?;
    }
  }

  /// Cards due now, oldest first.
  pub async fn due_cards(&self, user_id: &str, limit: usize) -> Result<Vec<DueCard>> {
    self.due_cards_as_of(user_id, Utc::now(), limit).await
  }

  /// Cards due at `as_of`, oldest first. `limit` is capped at [`MAX_DUE_LIMIT`].
  pub async fn due_cards_as_of(
    &self,
    user_id: &str,
    as_of: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<DueCard>> {
    if limit == 0 {
      return Err(Error::InvalidInput("limit must be positive".into()));
    }
    self
      .store
      .due_cards(user_id, as_of, limit.min(MAX_DUE_LIMIT))
      .await
      .map_err(Error::store)
  }

  /// Hard-delete a review card. Returns `false` if the card did not exist.
  pub async fn remove_review(&self, user_id: &str, item_id: &str) -> Result<bool> {
    let removed = self
      .store
      .delete_review_card(user_id, item_id)
      .await
      .map_err(Error::store)?;
    if removed {
      info!(user_id, item_id, "review card removed");
    }
    Ok(removed)
  }

  // ── Reporting ─────────────────────────────────────────────────────────

  pub async fn skill_summary(&self, user_id: &str) -> Result<Vec<SkillSummary>> {
    let ratings = self.store.list_skill_ratings(user_id).await.map_err(Error::store)?;
    Ok(diagnostics::skill_summary(&ratings))
  }

  pub async fn weakest_skill(&self, user_id: &str) -> Result<Option<SkillSummary>> {
    let ratings = self.store.list_skill_ratings(user_id).await.map_err(Error::store)?;
    Ok(selector::weakest_skill(&ratings).map(SkillSummary::from))
  }

  pub async fn convergence_report(&self, user_id: &str) -> Result<ConvergenceReport> {
    let ratings = self.store.list_skill_ratings(user_id).await.map_err(Error::store)?;
    Ok(diagnostics::convergence_report(user_id, &ratings))
  }

  /// Calibration of the live catalog.
  pub async fn item_calibration(&self) -> Result<CalibrationReport> {
    let items = self
      .store
      .list_items(&ItemQuery::live())
      .await
      .map_err(Error::store)?;
    Ok(diagnostics::calibration_report(&items))
  }

  // ── Submission tokens ─────────────────────────────────────────────────

  /// A lease on `key` running `claim_lease_ms` from now.
  fn lease(&self, key: SubmissionKey) -> SubmissionLease {
    SubmissionLease { key, until: lease_until(&self.config, Utc::now()) }
  }

  /// Claim a token. Returns the stored response when it was already applied.
  async fn claim(&self, lease: &SubmissionLease) -> Result<Option<String>> {
    let key = &lease.key;
    match self
      .store
      .claim_submission(lease, Utc::now())
      .await
      .map_err(Error::store)?
    {
      Claim::Fresh => Ok(None),
      Claim::Completed(stored) => {
        info!(
          user_id = %key.user_id,
          item_id = %key.item_id,
          kind = key.kind.as_str(),
          "duplicate submission replayed"
        );
        Ok(Some(stored))
      }
      Claim::InFlight => Err(Error::SubmissionInFlight(key.token.clone())),
    }
  }

  /// Give back the claim of a submission that wrote nothing.
  async fn release(&self, lease: &SubmissionLease) {
    if let Err(e) = self.store.release_submission(lease).await {
      warn!(token = %lease.key.token, error = %e, "failed to release submission token");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn instant(max_write_attempts: u32) -> EngineConfig {
    EngineConfig {
      max_write_attempts,
      retry_base_delay_ms: 0,
      retry_max_delay_ms: 0,
      ..EngineConfig::default()
    }
  }

  #[tokio::test]
  async fn backoff_gives_up_after_budget() {
    let config = instant(3);
    let mut backoff = Backoff::new(&config);
    assert!(backoff.wait("skill u/s").await.is_ok());
    assert!(backoff.wait("skill u/s").await.is_ok());
    match backoff.wait("skill u/s").await {
      Err(Error::WriteConflict { key, attempts }) => {
        assert_eq!(key, "skill u/s");
        assert_eq!(attempts, 3);
      }
      other => panic!("expected write conflict, got {other:?}"),
    }
  }

  #[test]
  fn backoff_delay_is_capped() {
    let config = EngineConfig {
      max_write_attempts: 100,
      retry_base_delay_ms: 4,
      retry_max_delay_ms: 20,
      ..EngineConfig::default()
    };
    let mut backoff = Backoff::new(&config);
    for attempt in 1..40 {
      backoff.attempts = attempt;
      let delay = backoff.delay_ms();
      assert!(delay <= 20, "attempt {attempt} slept {delay}ms");
    }
    backoff.attempts = 1;
    assert!((2..=4).contains(&backoff.delay_ms()));
  }

  #[test]
  fn config_fills_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{"max_write_attempts": 3}"#).unwrap();
    assert_eq!(config.max_write_attempts, 3);
    assert_eq!(config.retry_base_delay_ms, EngineConfig::default().retry_base_delay_ms);
    assert_eq!(config.claim_lease_ms, 30_000);
  }

  #[test]
  fn lease_runs_from_now() {
    let config = EngineConfig { claim_lease_ms: 1_500, ..EngineConfig::default() };
    let before = Utc::now();
    let until = lease_until(&config, before);
    assert_eq!(until, before + TimeDelta::milliseconds(1_500));

    let forever = EngineConfig { claim_lease_ms: u64::MAX, ..EngineConfig::default() };
    assert_eq!(lease_until(&forever, before), DateTime::<Utc>::MAX_UTC);
  }
}
