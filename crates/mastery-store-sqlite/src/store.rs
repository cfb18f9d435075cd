//! [`SqliteStore`]: the SQLite implementation of [`RatingStore`] and
//! [`ContentCatalog`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use mastery_core::{
  outcome::{Claim, Completion, SubmissionLease},
  rating::{DEFAULT_RATING, DifficultyBand, ItemRating, SkillRating},
  review::ReviewCard,
  store::{AttemptWrite, CatalogItem, ContentCatalog, DueCard, ItemQuery, RatingStore},
};

use crate::{
  Result,
  encode::{RawDueCard, RawItemRating, RawReviewCard, RawSkillRating, encode_dt},
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A rating store and catalog mirror backed by a single SQLite file.
///
/// Clones share the inner connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Read one item joined with its rating. Shared by reads and upserts.
fn select_item(
  conn: &rusqlite::Connection,
  item_id: &str,
) -> rusqlite::Result<Option<RawItemRating>> {
  let sql = format!(
    "SELECT {} FROM items i
     LEFT JOIN item_ratings r ON r.item_id = i.item_id
     WHERE i.item_id = ?1",
    RawItemRating::COLUMNS
  );
  conn
    .query_row(&sql, rusqlite::params![item_id], RawItemRating::from_row)
    .optional()
}

// ── Row writes ───────────────────────────────────────────────────────────────
//
// Each returns `true` only if exactly one row changed. Callers run them inside
// a transaction when several must land together.

fn write_skill(
  conn: &rusqlite::Connection,
  next: &SkillRating,
  expected: u64,
) -> rusqlite::Result<bool> {
  let observations = i64::from(next.observations);
  let version      = next.version as i64;
  let updated_str  = encode_dt(next.last_updated);

  let changed = if expected == 0 {
    conn.execute(
      "INSERT INTO skill_ratings (
         user_id, skill_id, rating, deviation, observations, version, last_updated
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
       ON CONFLICT (user_id, skill_id) DO NOTHING",
      rusqlite::params![
        next.user_id, next.skill_id, next.rating, next.deviation, observations, version,
        updated_str,
      ],
    )?
  } else {
    conn.execute(
      "UPDATE skill_ratings
       SET rating = ?3, deviation = ?4, observations = ?5, version = ?6,
           last_updated = ?7
       WHERE user_id = ?1 AND skill_id = ?2 AND version = ?8",
      rusqlite::params![
        next.user_id, next.skill_id, next.rating, next.deviation, observations, version,
        updated_str, expected as i64,
      ],
    )?
  };
  Ok(changed == 1)
}

fn write_item(
  conn: &rusqlite::Connection,
  next: &ItemRating,
  expected: u64,
) -> rusqlite::Result<bool> {
  let band         = next.band.as_str();
  let observations = i64::from(next.observations);
  let version      = next.version as i64;
  let updated_str  = encode_dt(next.last_updated);

  let changed = if expected == 0 {
    conn.execute(
      "INSERT INTO item_ratings (
         item_id, rating, deviation, band, observations, version, last_updated
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
       ON CONFLICT (item_id) DO NOTHING",
      rusqlite::params![
        next.item_id, next.rating, next.deviation, band, observations, version, updated_str,
      ],
    )?
  } else {
    conn.execute(
      "UPDATE item_ratings
       SET rating = ?2, deviation = ?3, band = ?4, observations = ?5,
           version = ?6, last_updated = ?7
       WHERE item_id = ?1 AND version = ?8",
      rusqlite::params![
        next.item_id, next.rating, next.deviation, band, observations, version, updated_str,
        expected as i64,
      ],
    )?
  };
  Ok(changed == 1)
}

fn write_card(
  conn: &rusqlite::Connection,
  next: &ReviewCard,
  expected: u64,
) -> rusqlite::Result<bool> {
  let due_str      = encode_dt(next.due_at);
  let lapse_count  = i64::from(next.lapse_count);
  let review_count = i64::from(next.review_count);
  let version      = next.version as i64;
  let created_str  = encode_dt(next.created_at);
  let updated_str  = encode_dt(next.updated_at);

  let changed = if expected == 0 {
    conn.execute(
      "INSERT INTO review_cards (
         user_id, item_id, due_at, stability, difficulty,
         lapse_count, review_count, version, created_at, updated_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
       ON CONFLICT (user_id, item_id) DO NOTHING",
      rusqlite::params![
        next.user_id, next.item_id, due_str, next.stability, next.difficulty,
        lapse_count, review_count, version, created_str, updated_str,
      ],
    )?
  } else {
    conn.execute(
      "UPDATE review_cards
       SET due_at = ?3, stability = ?4, difficulty = ?5, lapse_count = ?6,
           review_count = ?7, version = ?8, updated_at = ?9
       WHERE user_id = ?1 AND item_id = ?2 AND version = ?10",
      rusqlite::params![
        next.user_id, next.item_id, due_str, next.stability, next.difficulty,
        lapse_count, review_count, version, updated_str, expected as i64,
      ],
    )?
  };
  Ok(changed == 1)
}

/// Record a submission response, provided its lease is still the one held.
fn write_completion(conn: &rusqlite::Connection, completion: &Completion) -> rusqlite::Result<bool> {
  let key = &completion.lease.key;
  let changed = conn.execute(
    "UPDATE submission_keys SET response = ?6
     WHERE user_id = ?1 AND item_id = ?2 AND kind = ?3 AND token = ?4
       AND lease_until = ?5 AND response IS NULL",
    rusqlite::params![
      key.user_id,
      key.item_id,
      key.kind.as_str(),
      key.token,
      encode_dt(completion.lease.until),
      completion.response,
    ],
  )?;
  Ok(changed == 1)
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    tracing::info!(path = %path.display(), "sqlite store opened");
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let found: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        conn.execute_batch(SCHEMA)?;
        // Revision 1 had no claim leases; its claims read back as expired.
        if found == 1 {
          conn.execute_batch(
            "ALTER TABLE submission_keys ADD COLUMN lease_until TEXT NOT NULL DEFAULT ''",
          )?;
        }
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── RatingStore impl ────────────────────────────────────────────────────────

impl RatingStore for SqliteStore {
  type Error = crate::Error;

  // ── Skill ratings ─────────────────────────────────────────────────────────

  async fn get_skill_rating(&self, user_id: &str, skill_id: &str) -> Result<Option<SkillRating>> {
    let user_id  = user_id.to_owned();
    let skill_id = skill_id.to_owned();

    let raw: Option<RawSkillRating> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM skill_ratings WHERE user_id = ?1 AND skill_id = ?2",
          RawSkillRating::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![user_id, skill_id], RawSkillRating::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSkillRating::into_rating).transpose()
  }

  async fn list_skill_ratings(&self, user_id: &str) -> Result<Vec<SkillRating>> {
    let user_id = user_id.to_owned();

    let raws: Vec<RawSkillRating> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM skill_ratings WHERE user_id = ?1 ORDER BY skill_id",
          RawSkillRating::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], RawSkillRating::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSkillRating::into_rating).collect()
  }

  async fn swap_skill_rating(&self, next: &SkillRating, expected_version: u64) -> Result<bool> {
    let next = next.clone();
    let changed = self
      .conn
      .call(move |conn| Ok(write_skill(conn, &next, expected_version)?))
      .await?;
    Ok(changed)
  }

  // ── Item ratings ──────────────────────────────────────────────────────────

  async fn get_item_rating(&self, item_id: &str) -> Result<Option<ItemRating>> {
    let item_id = item_id.to_owned();

    let raw: Option<RawItemRating> = self
      .conn
      .call(move |conn| Ok(select_item(conn, &item_id)?))
      .await?;

    raw.map(RawItemRating::into_rating).transpose()
  }

  async fn swap_item_rating(&self, next: &ItemRating, expected_version: u64) -> Result<bool> {
    let next = next.clone();
    let changed = self
      .conn
      .call(move |conn| Ok(write_item(conn, &next, expected_version)?))
      .await?;
    Ok(changed)
  }

  // ── Attempts ──────────────────────────────────────────────────────────────

  async fn swap_attempt(
    &self,
    write:      &AttemptWrite,
    completion: Option<&Completion>,
  ) -> Result<bool> {
    let write      = write.clone();
    let completion = completion.cloned();

    let landed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let landed = write_skill(&tx, &write.skill, write.skill_expected)?
          && write_item(&tx, &write.item, write.item_expected)?
          && match &completion {
            Some(c) => write_completion(&tx, c)?,
            None => true,
          };
        // Dropping the transaction uncommitted rolls back the partial write.
        if landed {
          tx.commit()?;
        }
        Ok(landed)
      })
      .await?;

    Ok(landed)
  }

  // ── Review cards ──────────────────────────────────────────────────────────

  async fn get_review_card(&self, user_id: &str, item_id: &str) -> Result<Option<ReviewCard>> {
    let user_id = user_id.to_owned();
    let item_id = item_id.to_owned();

    let raw: Option<RawReviewCard> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM review_cards c WHERE c.user_id = ?1 AND c.item_id = ?2",
          RawReviewCard::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![user_id, item_id], RawReviewCard::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawReviewCard::into_card).transpose()
  }

  async fn swap_review_card(
    &self,
    next:             &ReviewCard,
    expected_version: u64,
    completion:       Option<&Completion>,
  ) -> Result<bool> {
    let next       = next.clone();
    let completion = completion.cloned();

    let landed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let landed = write_card(&tx, &next, expected_version)?
          && match &completion {
            Some(c) => write_completion(&tx, c)?,
            None => true,
          };
        if landed {
          tx.commit()?;
        }
        Ok(landed)
      })
      .await?;

    Ok(landed)
  }

  async fn due_cards(
    &self,
    user_id: &str,
    as_of:   DateTime<Utc>,
    limit:   usize,
  ) -> Result<Vec<DueCard>> {
    let user_id   = user_id.to_owned();
    let as_of_str = encode_dt(as_of);
    let limit_val = limit as i64;

    let raws: Vec<RawDueCard> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {},
             (SELECT json_group_array(s.skill_id) FROM item_skills s WHERE s.item_id = c.item_id),
             COALESCE(r.rating, ?4)
           FROM review_cards c
           JOIN items i             ON i.item_id = c.item_id
           LEFT JOIN item_ratings r ON r.item_id = c.item_id
           WHERE c.user_id = ?1
             AND c.due_at <= ?2
             AND i.status = 'live'
           ORDER BY c.due_at ASC, c.item_id ASC
           LIMIT ?3",
          RawReviewCard::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![user_id, as_of_str, limit_val, DEFAULT_RATING],
            |row| {
              Ok(RawDueCard {
                card:        RawReviewCard::from_row(row)?,
                skill_tags:  row.get(10)?,
                item_rating: row.get(11)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDueCard::into_due).collect()
  }

  async fn delete_review_card(&self, user_id: &str, item_id: &str) -> Result<bool> {
    let user_id = user_id.to_owned();
    let item_id = item_id.to_owned();

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM review_cards WHERE user_id = ?1 AND item_id = ?2",
          rusqlite::params![user_id, item_id],
        )?)
      })
      .await?;

    Ok(deleted == 1)
  }

  // ── Submission tokens ─────────────────────────────────────────────────────

  async fn claim_submission(&self, lease: &SubmissionLease, now: DateTime<Utc>) -> Result<Claim> {
    let user_id   = lease.key.user_id.clone();
    let item_id   = lease.key.item_id.clone();
    let kind      = lease.key.kind.as_str();
    let token     = lease.key.token.clone();
    let lease_str = encode_dt(lease.until);
    let now_str   = encode_dt(now);

    let claim = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<(String, Option<String>, String)> = tx
          .query_row(
            "SELECT token, response, lease_until FROM submission_keys
             WHERE user_id = ?1 AND item_id = ?2 AND kind = ?3",
            rusqlite::params![user_id, item_id, kind],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
          )
          .optional()?;

        let claim = match existing {
          Some((stored, Some(response), _)) if stored == token => Claim::Completed(response),
          Some((stored, None, held_until)) if stored == token && held_until > now_str => {
            Claim::InFlight
          }
          _ => {
            tx.execute(
              "INSERT INTO submission_keys (
                 user_id, item_id, kind, token, response, claimed_at, lease_until
               ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
               ON CONFLICT (user_id, item_id, kind) DO UPDATE
               SET token = excluded.token, response = NULL,
                   claimed_at = excluded.claimed_at, lease_until = excluded.lease_until",
              rusqlite::params![user_id, item_id, kind, token, now_str, lease_str],
            )?;
            Claim::Fresh
          }
        };

        tx.commit()?;
        Ok(claim)
      })
      .await?;

    Ok(claim)
  }

  async fn release_submission(&self, lease: &SubmissionLease) -> Result<()> {
    let user_id   = lease.key.user_id.clone();
    let item_id   = lease.key.item_id.clone();
    let kind      = lease.key.kind.as_str();
    let token     = lease.key.token.clone();
    let lease_str = encode_dt(lease.until);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM submission_keys
           WHERE user_id = ?1 AND item_id = ?2 AND kind = ?3 AND token = ?4
             AND lease_until = ?5 AND response IS NULL",
          rusqlite::params![user_id, item_id, kind, token, lease_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ContentCatalog impl ─────────────────────────────────────────────────────

impl ContentCatalog for SqliteStore {
  type Error = crate::Error;

  async fn upsert_item(&self, item: CatalogItem) -> Result<ItemRating> {
    let now_str = encode_dt(Utc::now());
    let seed = item.initial_rating.map(|rating| {
      ItemRating::seed(&item.item_id, Some(rating), item.skill_tags.clone(), item.status, Utc::now())
    });
    let seed_row = seed.map(|s| (s.rating, s.deviation, s.band.as_str()));
    let item_id = item.item_id;
    let status  = item.status.as_str();
    let tags    = item.skill_tags;

    let raw: RawItemRating = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.execute(
          "INSERT INTO items (item_id, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?3)
           ON CONFLICT (item_id) DO UPDATE
           SET status = excluded.status, updated_at = excluded.updated_at",
          rusqlite::params![item_id, status, now_str],
        )?;

        tx.execute("DELETE FROM item_skills WHERE item_id = ?1", rusqlite::params![item_id])?;
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
          tx.execute(
            "INSERT OR IGNORE INTO item_skills (item_id, skill_id) VALUES (?1, ?2)",
            rusqlite::params![item_id, tag],
          )?;
        }

        // An authored rating only seeds; it never overwrites observed data.
        if let Some((rating, deviation, band)) = seed_row {
          tx.execute(
            "INSERT INTO item_ratings (
               item_id, rating, deviation, band, observations, version, last_updated
             ) VALUES (?1, ?2, ?3, ?4, 0, 1, ?5)
             ON CONFLICT (item_id) DO NOTHING",
            rusqlite::params![item_id, rating, deviation, band, now_str],
          )?;
        }

        let raw = select_item(&tx, &item_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_rating()
  }

  async fn get_item(&self, item_id: &str) -> Result<Option<CatalogItem>> {
    Ok(
      RatingStore::get_item_rating(self, item_id)
        .await?
        .map(|r| CatalogItem {
          item_id:        r.item_id,
          skill_tags:     r.skill_tags,
          status:         r.status,
          initial_rating: None,
        }),
    )
  }

  async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ItemRating>> {
    let skill        = query.skill.clone();
    let band         = query.band.map(DifficultyBand::as_str);
    let default_band = DifficultyBand::classify(DEFAULT_RATING).as_str();
    let live_only    = query.live_only;

    let raws: Vec<RawItemRating> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM items i
           LEFT JOIN item_ratings r ON r.item_id = i.item_id
           WHERE (?1 IS NULL OR EXISTS (
                   SELECT 1 FROM item_skills s
                   WHERE s.item_id = i.item_id AND s.skill_id = ?1))
             AND (?2 IS NULL OR COALESCE(r.band, ?3) = ?2)
             AND (?4 = 0 OR i.status = 'live')
           ORDER BY i.item_id",
          RawItemRating::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![skill, band, default_band, live_only],
            RawItemRating::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawItemRating::into_rating).collect()
  }
}
