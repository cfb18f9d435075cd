//! Elo-style ratings for learner skills and content items.
//!
//! Skills and items share one numeric scale. A practice attempt is modelled as
//! a game between the learner's skill rating and the item's difficulty rating:
//! the learner "wins" by answering correctly, the item "wins" when the learner
//! answers incorrectly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Scale ───────────────────────────────────────────────────────────────────

/// Rating assigned to a key on first contact.
pub const DEFAULT_RATING: f64 = 1500.0;
/// Lower bound of the rating band; every stored rating is clamped into it.
pub const MIN_RATING: f64 = 1200.0;
/// Upper bound of the rating band.
pub const MAX_RATING: f64 = 1800.0;

/// Deviation assigned on first contact; also the largest deviation possible.
pub const DEVIATION_CEILING: f64 = 350.0;
/// Deviation never decays below this.
pub const DEVIATION_FLOOR: f64 = 50.0;

/// Items below this rating are [`DifficultyBand::Foundation`].
pub const FOUNDATION_BELOW: f64 = 1400.0;
/// Items below this rating (and not foundation) are [`DifficultyBand::Core`].
pub const CORE_BELOW: f64 = 1600.0;

/// Per-side constants of an Elo update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParams {
  /// Maximum rating movement from a single outcome.
  pub k:               f64,
  /// Multiplicative deviation shrink applied per observation.
  pub deviation_decay: f64,
}

/// Learner skills move quickly.
pub const SKILL_UPDATE: UpdateParams = UpdateParams { k: 32.0, deviation_decay: 0.95 };

/// Items drift at half the skill speed; their ratings pool many learners.
pub const ITEM_UPDATE: UpdateParams = UpdateParams { k: 16.0, deviation_decay: 0.98 };

// ─── Math ────────────────────────────────────────────────────────────────────

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
  1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// One Elo step for the side rated `rating`, clamped to the rating band.
/// `actual` is 1.0 for a win and 0.0 for a loss.
pub fn elo_step(rating: f64, opponent: f64, actual: f64, params: UpdateParams) -> f64 {
  let expected = expected_score(rating, opponent);
  clamp_rating(rating + params.k * (actual - expected))
}

/// Shrink a deviation by one observation. Never grows, never passes the floor.
pub fn decay_deviation(deviation: f64, params: UpdateParams) -> f64 {
  (deviation.min(DEVIATION_CEILING) * params.deviation_decay).max(DEVIATION_FLOOR)
}

pub fn clamp_rating(rating: f64) -> f64 { rating.clamp(MIN_RATING, MAX_RATING) }

// ─── Difficulty band ─────────────────────────────────────────────────────────

/// Coarse difficulty label derived from a rating.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyBand {
  Foundation,
  Core,
  Challenge,
}

impl DifficultyBand {
  /// Classify a rating. Pure and monotone: no memory of the previous band.
  pub fn classify(rating: f64) -> Self {
    if rating < FOUNDATION_BELOW {
      Self::Foundation
    } else if rating < CORE_BELOW {
      Self::Core
    } else {
      Self::Challenge
    }
  }

  /// The easiest band; cold-start selections draw from it.
  pub fn lowest() -> Self { Self::Foundation }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Foundation => "foundation",
      Self::Core => "core",
      Self::Challenge => "challenge",
    }
  }
}

impl std::fmt::Display for DifficultyBand {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Skill rating ────────────────────────────────────────────────────────────

/// One learner's proficiency estimate on one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRating {
  pub user_id:      String,
  pub skill_id:     String,
  pub rating:       f64,
  pub deviation:    f64,
  /// Number of outcomes applied to this row.
  pub observations: u32,
  /// Optimistic-concurrency counter; `0` means the row is not yet stored.
  pub version:      u64,
  pub last_updated: DateTime<Utc>,
}

impl SkillRating {
  /// The implicit row for a skill the learner has never attempted.
  pub fn seed(user_id: &str, skill_id: &str, now: DateTime<Utc>) -> Self {
    Self {
      user_id:      user_id.to_owned(),
      skill_id:     skill_id.to_owned(),
      rating:       DEFAULT_RATING,
      deviation:    DEVIATION_CEILING,
      observations: 0,
      version:      0,
      last_updated: now,
    }
  }

  /// The row that results from one attempt against an item rated `opponent`.
  pub fn apply(&self, opponent: f64, correct: bool, now: DateTime<Utc>) -> Self {
    let actual = if correct { 1.0 } else { 0.0 };
    Self {
      rating: elo_step(self.rating, opponent, actual, SKILL_UPDATE),
      deviation: decay_deviation(self.deviation, SKILL_UPDATE),
      observations: self.observations.saturating_add(1),
      version: self.version + 1,
      last_updated: now,
      ..self.clone()
    }
  }

  pub fn band(&self) -> DifficultyBand { DifficultyBand::classify(self.rating) }
}

// ─── Item rating ─────────────────────────────────────────────────────────────

/// Catalog lifecycle of an item. Owned by the catalog; read-only to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
  #[default]
  Live,
  Retired,
}

impl LifecycleStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Live => "live",
      Self::Retired => "retired",
    }
  }
}

/// An item's empirically observed difficulty, joined with its catalog tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRating {
  pub item_id:      String,
  pub rating:       f64,
  pub deviation:    f64,
  /// Always `DifficultyBand::classify(rating)`; stored for filtering.
  pub band:         DifficultyBand,
  pub skill_tags:   Vec<String>,
  pub status:       LifecycleStatus,
  pub observations: u32,
  pub version:      u64,
  pub last_updated: DateTime<Utc>,
}

impl ItemRating {
  /// The implicit rating row for a catalog item, at `rating` or the default.
  pub fn seed(
    item_id: &str,
    rating: Option<f64>,
    skill_tags: Vec<String>,
    status: LifecycleStatus,
    now: DateTime<Utc>,
  ) -> Self {
    let rating = clamp_rating(rating.unwrap_or(DEFAULT_RATING));
    Self {
      item_id: item_id.to_owned(),
      rating,
      deviation: DEVIATION_CEILING,
      band: DifficultyBand::classify(rating),
      skill_tags,
      status,
      observations: 0,
      version: 0,
      last_updated: now,
    }
  }

  /// The row that results from one attempt by a learner rated `opponent`.
  ///
  /// Scoring is inverted: the item wins when the learner answers incorrectly.
  pub fn apply(&self, opponent: f64, correct: bool, now: DateTime<Utc>) -> Self {
    let actual = if correct { 0.0 } else { 1.0 };
    let rating = elo_step(self.rating, opponent, actual, ITEM_UPDATE);
    Self {
      rating,
      deviation: decay_deviation(self.deviation, ITEM_UPDATE),
      band: DifficultyBand::classify(rating),
      observations: self.observations.saturating_add(1),
      version: self.version + 1,
      last_updated: now,
      ..self.clone()
    }
  }

  pub fn is_live(&self) -> bool { self.status == LifecycleStatus::Live }

  pub fn has_skill(&self, skill_id: &str) -> bool {
    self.skill_tags.iter().any(|t| t == skill_id)
  }
}

// ─── Update results ──────────────────────────────────────────────────────────

/// Result of `update_skill_rating`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
  pub old_rating: f64,
  pub new_rating: f64,
}

impl RatingChange {
  pub fn delta(&self) -> f64 { self.new_rating - self.old_rating }
}

/// Result of `update_item_rating`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemRatingChange {
  pub old_rating: f64,
  pub new_rating: f64,
  pub new_band:   DifficultyBand,
}

impl ItemRatingChange {
  pub fn delta(&self) -> f64 { self.new_rating - self.old_rating }
}
