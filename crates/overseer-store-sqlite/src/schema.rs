//! SQL schema for the Overseer SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.
//!
//! Terms are stored as their `YYYY-YYYY-H` identifier. With four-digit years
//! the textual order is the chronological order, so `term >= ?` range
//! queries compare correctly.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY,
    name          TEXT NOT NULL DEFAULT '',
    sex           TEXT NOT NULL DEFAULT '',
    email         TEXT NOT NULL DEFAULT '',
    phone         TEXT NOT NULL DEFAULT '',
    unit          TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL DEFAULT '',
    prorank       TEXT NOT NULL DEFAULT '',
    skill         TEXT NOT NULL DEFAULT '',
    password_hash TEXT NOT NULL,           -- argon2 PHC string
    is_guider     INTEGER NOT NULL DEFAULT 0,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);

-- Static roles only: teacher, admin, leader.
CREATE TABLE IF NOT EXISTS user_roles (
    username TEXT NOT NULL REFERENCES users(username),
    role     TEXT NOT NULL,
    active   INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (username, role)
);

CREATE TABLE IF NOT EXISTS terms (
    name       TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS supervision_groups (
    name        TEXT PRIMARY KEY,
    leader_name TEXT NOT NULL DEFAULT '',  -- '' when vacant
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

-- The Role Ledger. Rows are never deleted; retirement sets active = 0.
CREATE TABLE IF NOT EXISTS supervisors (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    username        TEXT NOT NULL REFERENCES users(username),
    name            TEXT NOT NULL,
    term            TEXT NOT NULL REFERENCES terms(name),
    group_name      TEXT REFERENCES supervision_groups(name),
    is_grouper      INTEGER NOT NULL DEFAULT 0,
    is_main_grouper INTEGER NOT NULL DEFAULT 0,
    active          INTEGER NOT NULL DEFAULT 1,
    CHECK (is_grouper = 0 OR group_name IS NOT NULL)
);

CREATE UNIQUE INDEX IF NOT EXISTS supervisors_user_term_uq
    ON supervisors(username, term) WHERE active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS supervisors_grouper_uq
    ON supervisors(term, group_name) WHERE active = 1 AND is_grouper = 1;
CREATE UNIQUE INDEX IF NOT EXISTS supervisors_main_grouper_uq
    ON supervisors(term) WHERE active = 1 AND is_main_grouper = 1;
CREATE INDEX IF NOT EXISTS supervisors_term_idx ON supervisors(term);

-- Placeholders for the lesson subsystem, one per provisioned term.
CREATE TABLE IF NOT EXISTS lesson_records (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    username   TEXT NOT NULL REFERENCES users(username),
    name       TEXT NOT NULL,
    term       TEXT NOT NULL REFERENCES terms(name),
    group_name TEXT,
    created_at TEXT NOT NULL
);

-- Append-only audit trail.
CREATE TABLE IF NOT EXISTS events (
    event_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    actor       TEXT NOT NULL,
    detail      TEXT NOT NULL,             -- JSON
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS events_recorded_idx ON events(recorded_at);

PRAGMA user_version = 1;
";
