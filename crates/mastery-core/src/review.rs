//! SM-2-derived review scheduling.
//!
//! A [`ReviewCard`] tracks one (user, item) pair in the learner's review deck.
//! Each recall-quality grade moves the card's stability (days of retention)
//! and difficulty, and from those its next due date.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Difficulty of a card before its first review.
pub const INITIAL_DIFFICULTY: f64 = 0.3;
/// Added to difficulty on a lapse.
pub const LAPSE_DIFFICULTY_STEP: f64 = 0.2;
/// Removed from difficulty on a successful recall.
pub const RECALL_DIFFICULTY_STEP: f64 = 0.1;
/// Stability after a lapse.
pub const LAPSE_STABILITY_DAYS: f64 = 1.0;
/// Upper bound on stability so due dates stay representable.
pub const MAX_STABILITY_DAYS: f64 = 36_500.0;
/// Ease factors never drop below this.
pub const MIN_EASE_FACTOR: f64 = 1.3;

// ─── Quality ─────────────────────────────────────────────────────────────────

/// A recall-quality grade on the 0-5 SM-2 scale.
///
/// Grades below 3 are lapses. Values outside the scale cannot be constructed.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Quality(u8);

impl Quality {
  pub const MAX: u8 = 5;
  /// Lowest passing grade.
  pub const PASS: u8 = 3;

  pub fn new(value: u8) -> Result<Self> {
    if value > Self::MAX {
      return Err(Error::InvalidQuality(value.into()));
    }
    Ok(Self(value))
  }

  pub fn value(self) -> u8 { self.0 }

  pub fn is_lapse(self) -> bool { self.0 < Self::PASS }
}

impl TryFrom<i64> for Quality {
  type Error = Error;

  fn try_from(value: i64) -> Result<Self> {
    u8::try_from(value)
      .map_err(|_| Error::InvalidQuality(value))
      .and_then(Self::new)
  }
}

impl From<Quality> for u8 {
  fn from(q: Quality) -> u8 { q.0 }
}

/// `max(1.3, 2.5 + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)))`
pub fn ease_factor(quality: Quality) -> f64 {
  let miss = f64::from(Quality::MAX - quality.value());
  (2.5 + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR)
}

/// Stability of a brand-new card after its first passing grade.
fn first_recall_stability(quality: Quality) -> f64 {
  match quality.value() {
    5 => 4.0,
    4 => 3.0,
    _ => 1.0,
  }
}

// ─── Card ────────────────────────────────────────────────────────────────────

/// Review state of one (user, item) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCard {
  pub user_id:      String,
  pub item_id:      String,
  pub due_at:       DateTime<Utc>,
  /// Days of retention; `0` until the first review has been applied.
  pub stability:    f64,
  /// Item-specific forgetting factor for this user, in `[0, 1]`.
  pub difficulty:   f64,
  pub lapse_count:  u32,
  pub review_count: u32,
  /// Optimistic-concurrency counter; `0` means the card is not yet stored.
  pub version:      u64,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

impl ReviewCard {
  /// An unreviewed card, due immediately.
  pub fn new(user_id: &str, item_id: &str, now: DateTime<Utc>) -> Self {
    Self {
      user_id:      user_id.to_owned(),
      item_id:      item_id.to_owned(),
      due_at:       now,
      stability:    0.0,
      difficulty:   INITIAL_DIFFICULTY,
      lapse_count:  0,
      review_count: 0,
      version:      0,
      created_at:   now,
      updated_at:   now,
    }
  }

  pub fn is_new(&self) -> bool { self.version == 0 }

  /// The card after grading a review at `now`.
  pub fn schedule(&self, quality: Quality, now: DateTime<Utc>) -> Self {
    let (stability, difficulty, lapse_count) = if quality.is_lapse() {
      (
        LAPSE_STABILITY_DAYS,
        (self.difficulty + LAPSE_DIFFICULTY_STEP).min(1.0),
        self.lapse_count.saturating_add(1),
      )
    } else {
      let stability = if self.stability <= 0.0 {
        first_recall_stability(quality)
      } else {
        self.stability * ease_factor(quality)
      };
      (
        stability.min(MAX_STABILITY_DAYS),
        (self.difficulty - RECALL_DIFFICULTY_STEP).max(0.0),
        self.lapse_count,
      )
    };

    Self {
      due_at: now + Duration::days(stability.ceil() as i64),
      stability,
      difficulty,
      lapse_count,
      review_count: self.review_count.saturating_add(1),
      version: self.version + 1,
      updated_at: now,
      ..self.clone()
    }
  }
}

/// What `record_review` reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
  pub due_at:      DateTime<Utc>,
  pub is_new_card: bool,
  pub card:        ReviewCard,
  /// `true` when the response was served from a deduplicated submission.
  #[serde(default)]
  pub replayed:    bool,
}
