//! The `RatingStore` and `ContentCatalog` traits and supporting query types.
//!
//! Both traits are implemented by storage backends (e.g.
//! `mastery-store-sqlite`). The engine depends on these abstractions, not on
//! any concrete backend.
//!
//! Writes are compare-and-swap: every row carries a `version`, and a swap only
//! lands if the stored version still equals the caller's expected version.
//! Version `0` means "the row must not exist yet". Swaps report `false` on a
//! lost race instead of erroring; retrying is the engine's job.
//!
//! A write may carry a [`Completion`]. The submission response is then
//! recorded in the same transaction, so a submission is either fully applied
//! and answerable, or not applied at all.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  outcome::{Claim, Completion, SubmissionLease},
  rating::{DifficultyBand, ItemRating, LifecycleStatus, SkillRating},
  review::ReviewCard,
};

// ─── Catalog types ───────────────────────────────────────────────────────────

/// A content item as the external catalog describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
  pub item_id:        String,
  pub skill_tags:     Vec<String>,
  #[serde(default)]
  pub status:         LifecycleStatus,
  /// Authored starting difficulty; only used when the item has no rating yet.
  #[serde(default)]
  pub initial_rating: Option<f64>,
}

/// Parameters for [`ContentCatalog::list_items`].
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
  /// Restrict to items tagged with this skill.
  pub skill:     Option<String>,
  /// Restrict to items currently in this band.
  pub band:      Option<DifficultyBand>,
  /// If `true`, only `Live` items are returned.
  pub live_only: bool,
}

impl ItemQuery {
  pub fn live() -> Self { Self { live_only: true, ..Self::default() } }

  pub fn skill(mut self, skill: impl Into<String>) -> Self {
    self.skill = Some(skill.into());
    self
  }

  pub fn band(mut self, band: DifficultyBand) -> Self {
    self.band = Some(band);
    self
  }
}

/// A review card joined with the item it schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueCard {
  #[serde(flatten)]
  pub card:       ReviewCard,
  pub skill_tags: Vec<String>,
  pub band:       DifficultyBand,
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// Both halves of one practice attempt. Either both rows move or neither does.
#[derive(Debug, Clone)]
pub struct AttemptWrite {
  pub skill:          SkillRating,
  pub skill_expected: u64,
  pub item:           ItemRating,
  pub item_expected:  u64,
}

// ─── Rating store ────────────────────────────────────────────────────────────

/// Persistence for skill ratings, item ratings, review cards and submission
/// tokens.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait RatingStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Skill ratings ─────────────────────────────────────────────────────

  /// Retrieve one skill rating. Returns `None` if never stored.
  fn get_skill_rating<'a>(
    &'a self,
    user_id: &'a str,
    skill_id: &'a str,
  ) -> impl Future<Output = Result<Option<SkillRating>, Self::Error>> + Send + 'a;

  /// All skill ratings of a user, ordered by `skill_id`.
  fn list_skill_ratings<'a>(
    &'a self,
    user_id: &'a str,
  ) -> impl Future<Output = Result<Vec<SkillRating>, Self::Error>> + Send + 'a;

  /// Store `next` if the row is still at `expected_version`.
  fn swap_skill_rating<'a>(
    &'a self,
    next: &'a SkillRating,
    expected_version: u64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Item ratings ──────────────────────────────────────────────────────

  /// Retrieve an item's rating joined with its catalog entry.
  ///
  /// Returns `None` only when the catalog has no such item; a catalog item
  /// without a rating row comes back seeded at version `0`.
  fn get_item_rating<'a>(
    &'a self,
    item_id: &'a str,
  ) -> impl Future<Output = Result<Option<ItemRating>, Self::Error>> + Send + 'a;

  /// Store the rating fields of `next` if still at `expected_version`.
  /// Catalog fields (`skill_tags`, `status`) are never written here.
  fn swap_item_rating<'a>(
    &'a self,
    next: &'a ItemRating,
    expected_version: u64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Attempts ──────────────────────────────────────────────────────────

  /// Store both ratings of `write` in one transaction, plus `completion` if
  /// given. Returns `false`, with nothing written, if either row moved past
  /// its expected version or the completion's lease is no longer held.
  fn swap_attempt<'a>(
    &'a self,
    write: &'a AttemptWrite,
    completion: Option<&'a Completion>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Review cards ──────────────────────────────────────────────────────

  fn get_review_card<'a>(
    &'a self,
    user_id: &'a str,
    item_id: &'a str,
  ) -> impl Future<Output = Result<Option<ReviewCard>, Self::Error>> + Send + 'a;

  /// Store `next` if the card is still at `expected_version`, plus
  /// `completion` if given, under the same all-or-nothing rule as
  /// [`swap_attempt`](Self::swap_attempt).
  fn swap_review_card<'a>(
    &'a self,
    next: &'a ReviewCard,
    expected_version: u64,
    completion: Option<&'a Completion>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Cards with `due_at <= as_of` whose item is live, oldest due first.
  fn due_cards<'a>(
    &'a self,
    user_id: &'a str,
    as_of: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<DueCard>, Self::Error>> + Send + 'a;

  /// Hard-delete a card. Returns `false` if there was nothing to delete.
  fn delete_review_card<'a>(
    &'a self,
    user_id: &'a str,
    item_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Submission tokens ─────────────────────────────────────────────────

  /// Atomically claim `lease.key.token` as the last token for its slot.
  ///
  /// A token that is claimed but unsettled reads back as
  /// [`Claim::InFlight`] until its lease expires at `now`; after that the
  /// claim passes to `lease`.
  fn claim_submission<'a>(
    &'a self,
    lease: &'a SubmissionLease,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Claim, Self::Error>> + Send + 'a;

  /// Drop a claim whose submission failed, so the client can retry it.
  /// Does nothing once the claim is completed or held under another lease.
  fn release_submission<'a>(
    &'a self,
    lease: &'a SubmissionLease,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── Content catalog ─────────────────────────────────────────────────────────

/// The engine's view of the external content catalog.
pub trait ContentCatalog: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert or update a catalog entry. Existing ratings are kept; a new item
  /// is seeded at `initial_rating` (or the default).
  fn upsert_item(
    &self,
    item: CatalogItem,
  ) -> impl Future<Output = Result<ItemRating, Self::Error>> + Send + '_;

  /// Retrieve a catalog entry. Returns `None` if not found.
  fn get_item<'a>(
    &'a self,
    item_id: &'a str,
  ) -> impl Future<Output = Result<Option<CatalogItem>, Self::Error>> + Send + 'a;

  /// Items with their current ratings, ordered by `item_id`.
  fn list_items<'a>(
    &'a self,
    query: &'a ItemQuery,
  ) -> impl Future<Output = Result<Vec<ItemRating>, Self::Error>> + Send + 'a;
}
