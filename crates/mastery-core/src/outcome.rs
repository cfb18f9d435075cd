//! Inputs consumed by the engine and the results it reports.
//!
//! Practice attempts (right/wrong) and recall reviews (0-5 grade) are kept as
//! separate types so the two scales can never be mixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  rating::{DifficultyBand, ItemRatingChange, RatingChange},
  review::Quality,
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// One answered practice item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
  pub user_id:         String,
  pub item_id:         String,
  pub skill_id:        String,
  pub correct:         bool,
  pub timestamp:       DateTime<Utc>,
  /// Client-chosen token; resubmitting with the same token is a no-op.
  pub idempotency_key: Option<String>,
}

impl AttemptOutcome {
  pub fn new(user_id: &str, item_id: &str, skill_id: &str, correct: bool) -> Self {
    Self {
      user_id: user_id.to_owned(),
      item_id: item_id.to_owned(),
      skill_id: skill_id.to_owned(),
      correct,
      timestamp: Utc::now(),
      idempotency_key: None,
    }
  }

  pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.idempotency_key = Some(key.into());
    self
  }
}

/// One graded recall of a previously seen item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
  pub user_id:         String,
  pub item_id:         String,
  pub quality:         Quality,
  pub idempotency_key: Option<String>,
}

impl ReviewOutcome {
  pub fn new(user_id: &str, item_id: &str, quality: Quality) -> Self {
    Self {
      user_id: user_id.to_owned(),
      item_id: item_id.to_owned(),
      quality,
      idempotency_key: None,
    }
  }

  pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.idempotency_key = Some(key.into());
    self
  }
}

// ─── Deduplication ───────────────────────────────────────────────────────────

/// Which kind of submission a deduplication token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
  Attempt,
  Review,
}

impl SubmissionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Attempt => "attempt",
      Self::Review => "review",
    }
  }
}

/// The last-applied token slot for one (user, item, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
  pub user_id: String,
  pub item_id: String,
  pub kind:    SubmissionKind,
  pub token:   String,
}

/// Outcome of claiming a [`SubmissionKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
  /// The token is new; the caller must apply the submission.
  Fresh,
  /// The token was already claimed but its result is not yet recorded.
  InFlight,
  /// The token was already applied; carries the serialised response.
  Completed(String),
}

/// A claim on a [`SubmissionKey`], held until `until`.
///
/// An unsettled claim whose lease has run out may be taken over by a retry
/// carrying the same token. `until` also identifies the holder: completing or
/// releasing the claim only succeeds while it is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLease {
  pub key:   SubmissionKey,
  pub until: DateTime<Utc>,
}

/// A serialised response to record under a lease, committed together with
/// the write that produced it.
#[derive(Debug, Clone)]
pub struct Completion {
  pub lease:    SubmissionLease,
  pub response: String,
}

impl Completion {
  pub fn new<T: Serialize>(lease: &SubmissionLease, result: &T) -> serde_json::Result<Self> {
    Ok(Self { lease: lease.clone(), response: serde_json::to_string(result)? })
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// What `submit_attempt` reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
  pub skill:               RatingChange,
  pub item:                ItemRatingChange,
  pub skill_rating_delta:  f64,
  pub item_rating_delta:   f64,
  pub new_difficulty_band: DifficultyBand,
  /// `true` when the response was served from a deduplicated submission.
  #[serde(default)]
  pub replayed:            bool,
}

impl AttemptResult {
  pub fn new(skill: RatingChange, item: ItemRatingChange) -> Self {
    Self {
      skill,
      item,
      skill_rating_delta: skill.delta(),
      item_rating_delta: item.delta(),
      new_difficulty_band: item.new_band,
      replayed: false,
    }
  }
}
