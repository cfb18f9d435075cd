//! SQL schema for the mastery SQLite store.
//!
//! Applied on every open. `user_version` records the layout revision; see
//! [`SCHEMA_VERSION`].

/// Full schema DDL. Safe to re-run.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Catalog mirror. Written only by catalog sync, never by the engine.
CREATE TABLE IF NOT EXISTS items (
    item_id     TEXT PRIMARY KEY,
    status      TEXT NOT NULL DEFAULT 'live',   -- 'live' | 'retired'
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_skills (
    item_id   TEXT NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
    skill_id  TEXT NOT NULL,
    PRIMARY KEY (item_id, skill_id)
);

-- Every row below carries a `version`; writers compare-and-swap on it.

-- Missing rows read back as the default rating at version 0.
CREATE TABLE IF NOT EXISTS item_ratings (
    item_id       TEXT PRIMARY KEY REFERENCES items(item_id),
    rating        REAL NOT NULL,
    deviation     REAL NOT NULL,
    band          TEXT NOT NULL,   -- 'foundation' | 'core' | 'challenge'
    observations  INTEGER NOT NULL DEFAULT 0,
    version       INTEGER NOT NULL,
    last_updated  TEXT NOT NULL,
    CHECK (rating BETWEEN 1200 AND 1800),
    CHECK (version > 0)
);

CREATE TABLE IF NOT EXISTS skill_ratings (
    user_id       TEXT NOT NULL,
    skill_id      TEXT NOT NULL,
    rating        REAL NOT NULL,
    deviation     REAL NOT NULL,
    observations  INTEGER NOT NULL DEFAULT 0,
    version       INTEGER NOT NULL,
    last_updated  TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    PRIMARY KEY (user_id, skill_id),
    CHECK (rating BETWEEN 1200 AND 1800),
    CHECK (version > 0)
);

CREATE TABLE IF NOT EXISTS review_cards (
    user_id       TEXT NOT NULL,
    item_id       TEXT NOT NULL REFERENCES items(item_id),
    due_at        TEXT NOT NULL,
    stability     REAL NOT NULL,
    difficulty    REAL NOT NULL,
    lapse_count   INTEGER NOT NULL DEFAULT 0,
    review_count  INTEGER NOT NULL DEFAULT 0,
    version       INTEGER NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (user_id, item_id),
    CHECK (due_at >= updated_at),
    CHECK (difficulty BETWEEN 0 AND 1)
);

-- Last idempotency token per (user, item, kind); `response` is NULL while
-- the submission is being applied. Past `lease_until` an unanswered claim
-- may be taken over by a retry of the same token.
CREATE TABLE IF NOT EXISTS submission_keys (
    user_id      TEXT NOT NULL,
    item_id      TEXT NOT NULL,
    kind         TEXT NOT NULL,   -- 'attempt' | 'review'
    token        TEXT NOT NULL,
    response     TEXT,
    claimed_at   TEXT NOT NULL,
    lease_until  TEXT NOT NULL,
    PRIMARY KEY (user_id, item_id, kind)
);

CREATE INDEX IF NOT EXISTS item_skills_skill_idx ON item_skills(skill_id);
CREATE INDEX IF NOT EXISTS item_ratings_band_idx ON item_ratings(band);
CREATE INDEX IF NOT EXISTS review_cards_due_idx  ON review_cards(user_id, due_at);
";

/// Layout revision stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;
