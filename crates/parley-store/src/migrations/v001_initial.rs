//! v001 -- Initial schema creation.
//!
//! Creates `local_state` (string-keyed client values) and `security_events`
//! (append-only audit trail).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Local key/value state
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_state (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Security events
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS security_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,                -- e.g. rate_limited
    payload     TEXT NOT NULL,                -- JSON
    occurred_at TEXT NOT NULL                 -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_security_events_occurred
    ON security_events(occurred_at);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
