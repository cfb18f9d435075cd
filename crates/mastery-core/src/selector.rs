//! Adaptive item selection.
//!
//! The best next item sits slightly above the learner's current ability on
//! their weakest skill. These functions are pure; the engine feeds them rows
//! read from the store.

use std::cmp::Ordering;

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::rating::{DifficultyBand, ItemRating, SkillRating};

/// How far above the learner's rating the ideal item sits.
pub const TARGET_OFFSET: f64 = 100.0;

/// Why an item was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionReason {
  /// The learner has no rating history; a random easy item was drawn.
  ColdStart,
  /// Closest item to `target_rating` on the targeted skill.
  Targeted { user_rating: f64, target_rating: f64 },
}

/// A selected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
  pub item_id:  String,
  pub rating:   f64,
  pub band:     DifficultyBand,
  /// The skill the selection targeted, if any.
  pub skill_id: Option<String>,
  pub reason:   SelectionReason,
}

/// The learner's lowest-rated skill.
///
/// Ties go to the lexicographically smallest `skill_id`, so the answer does
/// not depend on the order rows were read in.
pub fn weakest_skill(ratings: &[SkillRating]) -> Option<&SkillRating> {
  ratings.iter().min_by(|a, b| {
    a.rating
      .total_cmp(&b.rating)
      .then_with(|| a.skill_id.cmp(&b.skill_id))
  })
}

pub fn target_rating(user_rating: f64) -> f64 { user_rating + TARGET_OFFSET }

fn is_excluded(item: &ItemRating, exclude: &[String]) -> bool {
  exclude.iter().any(|id| *id == item.item_id)
}

/// The candidate closest to `target`, skipping excluded and non-live items.
/// Equal distances go to the smallest `item_id`.
pub fn closest_to_target<'a>(
  candidates: &'a [ItemRating],
  target: f64,
  exclude: &[String],
) -> Option<&'a ItemRating> {
  candidates
    .iter()
    .filter(|item| item.is_live() && !is_excluded(item, exclude))
    .min_by(|a, b| {
      let da = (a.rating - target).abs();
      let db = (b.rating - target).abs();
      da.partial_cmp(&db)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_id.cmp(&b.item_id))
    })
}

/// A uniformly random lowest-band item for a learner with no history.
pub fn cold_start_pick<'a, R: Rng + ?Sized>(
  candidates: &'a [ItemRating],
  exclude: &[String],
  rng: &mut R,
) -> Option<&'a ItemRating> {
  let lowest = DifficultyBand::lowest();
  let eligible: Vec<&ItemRating> = candidates
    .iter()
    .filter(|item| item.is_live() && item.band == lowest && !is_excluded(item, exclude))
    .collect();
  eligible.choose(rng).copied()
}

impl ItemRef {
  pub fn cold_start(item: &ItemRating, skill_id: Option<String>) -> Self {
    Self {
      item_id: item.item_id.clone(),
      rating: item.rating,
      band: item.band,
      skill_id,
      reason: SelectionReason::ColdStart,
    }
  }

  pub fn targeted(item: &ItemRating, skill_id: &str, user_rating: f64) -> Self {
    Self {
      item_id:  item.item_id.clone(),
      rating:   item.rating,
      band:     item.band,
      skill_id: Some(skill_id.to_owned()),
      reason:   SelectionReason::Targeted {
        user_rating,
        target_rating: target_rating(user_rating),
      },
    }
  }
}
