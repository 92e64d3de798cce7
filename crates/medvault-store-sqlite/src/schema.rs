//! SQL schema for the medvault SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision for future migrations.

/// Full schema DDL; idempotent thanks to `CREATE … IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Institutions and individuals share one table; the kind decides which
-- login identifier is present. Rows are never deleted.
CREATE TABLE IF NOT EXISTS accounts (
    account_id    TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,   -- 'institution' | 'individual'
    login_email   TEXT UNIQUE,     -- institutions only
    subject_key   TEXT UNIQUE,     -- individuals only; immutable
    display_name  TEXT NOT NULL,
    name_folded   TEXT NOT NULL,   -- trimmed, lowercased display_name
    sex           TEXT,
    phone         TEXT,
    credential    TEXT NOT NULL,   -- argon2 PHC string
    created_at    TEXT NOT NULL,
    last_login_at TEXT,
    CHECK (
      (kind = 'institution' AND login_email IS NOT NULL AND subject_key IS NULL)
      OR
      (kind = 'individual' AND subject_key IS NOT NULL AND login_email IS NULL)
    )
);

-- subject_key and uploader_id are deliberately not foreign keys: a record
-- may name an account that is not visible yet.
CREATE TABLE IF NOT EXISTS records (
    record_id   TEXT PRIMARY KEY,
    subject_key TEXT NOT NULL,
    uploader_id TEXT NOT NULL,
    category    TEXT NOT NULL,     -- JSON-encoded RecordCategory
    payload     BLOB NOT NULL,
    filename    TEXT NOT NULL,
    mime_type   TEXT NOT NULL,
    notes       TEXT,
    created_at  TEXT NOT NULL,
    approved    INTEGER NOT NULL DEFAULT 0 CHECK (approved IN (0, 1))
);

CREATE TABLE IF NOT EXISTS consent_requests (
    request_id       TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,   -- 'upload' | 'access'
    record_id        TEXT REFERENCES records(record_id),
    subject_key      TEXT NOT NULL,
    institution_id   TEXT NOT NULL,
    institution_name TEXT NOT NULL,
    requested_at     TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending',
    resolved_at      TEXT,
    CHECK ((kind = 'upload') = (record_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS accounts_name_phone_idx ON accounts(name_folded, phone);
CREATE INDEX IF NOT EXISTS records_uploader_idx    ON records(uploader_id);
CREATE INDEX IF NOT EXISTS records_subject_idx     ON records(subject_key);
CREATE INDEX IF NOT EXISTS requests_subject_idx
    ON consent_requests(subject_key, status);
CREATE INDEX IF NOT EXISTS requests_grant_idx
    ON consent_requests(institution_id, subject_key, kind, status);

PRAGMA user_version = 1;
";
