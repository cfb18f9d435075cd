//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that lexical order equals time order. Skill tag
//! lists come back from `json_group_array` as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use mastery_core::{
  rating::{DifficultyBand, ItemRating, LifecycleStatus, SkillRating},
  review::ReviewCard,
  store::DueCard,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_band(s: &str) -> Result<DifficultyBand> {
  match s {
    "foundation" => Ok(DifficultyBand::Foundation),
    "core" => Ok(DifficultyBand::Core),
    "challenge" => Ok(DifficultyBand::Challenge),
    other => Err(Error::UnknownValue { column: "band", value: other.to_owned() }),
  }
}

pub fn decode_status(s: &str) -> Result<LifecycleStatus> {
  match s {
    "live" => Ok(LifecycleStatus::Live),
    "retired" => Ok(LifecycleStatus::Retired),
    other => Err(Error::UnknownValue { column: "status", value: other.to_owned() }),
  }
}

// ─── Tags ────────────────────────────────────────────────────────────────────

/// Decode a `json_group_array` result into a sorted tag list.
pub fn decode_tags(s: &str) -> Result<Vec<String>> {
  let mut tags: Vec<String> = serde_json::from_str(s)?;
  tags.sort();
  Ok(tags)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `skill_ratings` row.
pub struct RawSkillRating {
  pub user_id:      String,
  pub skill_id:     String,
  pub rating:       f64,
  pub deviation:    f64,
  pub observations: i64,
  pub version:      i64,
  pub last_updated: String,
}

impl RawSkillRating {
  pub const COLUMNS: &'static str =
    "user_id, skill_id, rating, deviation, observations, version, last_updated";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:      row.get(0)?,
      skill_id:     row.get(1)?,
      rating:       row.get(2)?,
      deviation:    row.get(3)?,
      observations: row.get(4)?,
      version:      row.get(5)?,
      last_updated: row.get(6)?,
    })
  }

  pub fn into_rating(self) -> Result<SkillRating> {
    Ok(SkillRating {
      user_id:      self.user_id,
      skill_id:     self.skill_id,
      rating:       self.rating,
      deviation:    self.deviation,
      observations: self.observations as u32,
      version:      self.version as u64,
      last_updated: decode_dt(&self.last_updated)?,
    })
  }
}

/// Raw values from an `items` row left-joined with `item_ratings`.
pub struct RawItemRating {
  // items columns
  pub item_id:      String,
  pub status:       String,
  pub skill_tags:   String,
  pub updated_at:   String,
  // item_ratings join; all NULL when the item was never rated
  pub rating:       Option<f64>,
  pub deviation:    Option<f64>,
  pub band:         Option<String>,
  pub observations: Option<i64>,
  pub version:      Option<i64>,
  pub last_updated: Option<String>,
}

impl RawItemRating {
  /// Select list matching [`RawItemRating::from_row`]; expects `items i` and
  /// `item_ratings r` in the FROM clause.
  pub const COLUMNS: &'static str = "
    i.item_id, i.status,
    (SELECT json_group_array(s.skill_id) FROM item_skills s WHERE s.item_id = i.item_id),
    i.updated_at,
    r.rating, r.deviation, r.band, r.observations, r.version, r.last_updated";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      item_id:      row.get(0)?,
      status:       row.get(1)?,
      skill_tags:   row.get(2)?,
      updated_at:   row.get(3)?,
      rating:       row.get(4)?,
      deviation:    row.get(5)?,
      band:         row.get(6)?,
      observations: row.get(7)?,
      version:      row.get(8)?,
      last_updated: row.get(9)?,
    })
  }

  pub fn into_rating(self) -> Result<ItemRating> {
    let skill_tags = decode_tags(&self.skill_tags)?;
    let status = decode_status(&self.status)?;

    let (Some(rating), Some(deviation), Some(band), Some(last_updated)) =
      (self.rating, self.deviation, self.band, self.last_updated)
    else {
      return Ok(ItemRating::seed(
        &self.item_id,
        None,
        skill_tags,
        status,
        decode_dt(&self.updated_at)?,
      ));
    };

    Ok(ItemRating {
      item_id: self.item_id,
      rating,
      deviation,
      band: decode_band(&band)?,
      skill_tags,
      status,
      observations: self.observations.unwrap_or(0) as u32,
      version: self.version.unwrap_or(0) as u64,
      last_updated: decode_dt(&last_updated)?,
    })
  }
}

/// Raw values read directly from a `review_cards` row.
pub struct RawReviewCard {
  pub user_id:      String,
  pub item_id:      String,
  pub due_at:       String,
  pub stability:    f64,
  pub difficulty:   f64,
  pub lapse_count:  i64,
  pub review_count: i64,
  pub version:      i64,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawReviewCard {
  /// Select list matching [`RawReviewCard::from_row`]; expects `review_cards c`.
  pub const COLUMNS: &'static str = "
    c.user_id, c.item_id, c.due_at, c.stability, c.difficulty,
    c.lapse_count, c.review_count, c.version, c.created_at, c.updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:      row.get(0)?,
      item_id:      row.get(1)?,
      due_at:       row.get(2)?,
      stability:    row.get(3)?,
      difficulty:   row.get(4)?,
      lapse_count:  row.get(5)?,
      review_count: row.get(6)?,
      version:      row.get(7)?,
      created_at:   row.get(8)?,
      updated_at:   row.get(9)?,
    })
  }

  pub fn into_card(self) -> Result<ReviewCard> {
    Ok(ReviewCard {
      user_id:      self.user_id,
      item_id:      self.item_id,
      due_at:       decode_dt(&self.due_at)?,
      stability:    self.stability,
      difficulty:   self.difficulty,
      lapse_count:  self.lapse_count as u32,
      review_count: self.review_count as u32,
      version:      self.version as u64,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// A due card row plus the joined item tags and rating.
pub struct RawDueCard {
  pub card:        RawReviewCard,
  pub skill_tags:  String,
  pub item_rating: f64,
}

impl RawDueCard {
  pub fn into_due(self) -> Result<DueCard> {
    Ok(DueCard {
      card:       self.card.into_card()?,
      skill_tags: decode_tags(&self.skill_tags)?,
      band:       DifficultyBand::classify(self.item_rating),
    })
  }
}
