//! v001 -- Initial schema: `contacts`, `messages` and the single-row
//! `local_profile`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id              TEXT PRIMARY KEY NOT NULL,   -- Beam ID
    name            TEXT NOT NULL,
    signing_key     TEXT NOT NULL,               -- hex-encoded Ed25519 pubkey
    agreement_key   TEXT NOT NULL,               -- hex-encoded X25519 pubkey
    avatar          TEXT,
    last_seen       TEXT,                        -- RFC-3339
    created_at      TEXT NOT NULL,
    muted           INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    contact_id    TEXT NOT NULL,                 -- FK -> contacts(id)
    plaintext     TEXT NOT NULL,
    cipher_blob   TEXT NOT NULL,                 -- wire envelope JSON
    direction     TEXT NOT NULL,                 -- 'sent' | 'received'
    timestamp     TEXT NOT NULL,                 -- RFC-3339
    status        TEXT NOT NULL,
    is_read       INTEGER NOT NULL DEFAULT 0,
    is_encrypted  INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_contact_ts
    ON messages(contact_id, timestamp DESC);

-- ----------------------------------------------------------------
-- Local profile (always row id 1)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_profile (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    display_name  TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
