//! v001 -- Initial schema creation.
//!
//! Creates the `call_history` table and its per-participant indexes.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Call history (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS call_history (
    session_id    TEXT PRIMARY KEY NOT NULL,  -- UUID v4 of the terminated session
    caller        TEXT NOT NULL,              -- UUID v4 of the initiating user
    callee        TEXT NOT NULL,              -- UUID v4 of the called user
    kind          TEXT NOT NULL,              -- 'voice' | 'video'
    outcome       TEXT NOT NULL,              -- 'completed' | 'missed' | 'declined' | 'failed'
    duration_secs INTEGER,                    -- NULL unless the call connected
    started_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_call_history_caller
    ON call_history(caller, started_at DESC);

CREATE INDEX IF NOT EXISTS idx_call_history_callee
    ON call_history(callee, started_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
