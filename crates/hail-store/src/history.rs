use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use hail_shared::types::{CallKind, CallOutcome, SessionId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CallHistoryEntry, HistoryCursor};

impl Database {
    /// Append one terminated call.  The primary key on `session_id` makes a
    /// double insert an error rather than a silent duplicate.
    pub fn insert_history_entry(&self, entry: &CallHistoryEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO call_history
                 (session_id, caller, callee, kind, outcome, duration_secs, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.session_id.to_string(),
                entry.caller.to_string(),
                entry.callee.to_string(),
                entry.kind.as_str(),
                entry.outcome.as_str(),
                entry.duration_secs,
                entry.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Page through one user's history, most recent first.
    ///
    /// `cursor` is the last entry the client already has; entries strictly
    /// older than it are returned.  Keyset pagination keeps pages stable
    /// while new calls are being appended.
    pub fn history_for_user(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: u32,
    ) -> Result<Vec<CallHistoryEntry>> {
        let user = user.to_string();

        let mut entries = Vec::new();
        match cursor {
            Some(c) => {
                let mut stmt = self.conn().prepare(
                    "SELECT session_id, caller, callee, kind, outcome, duration_secs, started_at
                     FROM call_history
                     WHERE (caller = ?1 OR callee = ?1)
                       AND (started_at < ?2
                            OR (started_at = ?2 AND session_id < ?3))
                     ORDER BY started_at DESC, session_id DESC
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    params![
                        user,
                        c.started_at.to_rfc3339(),
                        c.session_id.to_string(),
                        limit
                    ],
                    row_to_entry,
                )?;
                for row in rows {
                    entries.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn().prepare(
                    "SELECT session_id, caller, callee, kind, outcome, duration_secs, started_at
                     FROM call_history
                     WHERE caller = ?1 OR callee = ?1
                     ORDER BY started_at DESC, session_id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![user, limit], row_to_entry)?;
                for row in rows {
                    entries.push(row?);
                }
            }
        }
        Ok(entries)
    }

    pub fn history_entry(&self, session_id: SessionId) -> Result<CallHistoryEntry> {
        self.conn()
            .query_row(
                "SELECT session_id, caller, callee, kind, outcome, duration_secs, started_at
                 FROM call_history WHERE session_id = ?1",
                params![session_id.to_string()],
                row_to_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn history_count(&self) -> Result<u64> {
        let count: u64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM call_history", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallHistoryEntry> {
    let session_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let callee_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let outcome_str: String = row.get(4)?;
    let duration_secs: Option<i64> = row.get(5)?;
    let ts_str: String = row.get(6)?;

    let session_id = parse_uuid(&session_str, 0)?;
    let caller = parse_uuid(&caller_str, 1)?;
    let callee = parse_uuid(&callee_str, 2)?;

    let kind = CallKind::from_str(&kind_str).ok_or_else(|| bad_column(3, &kind_str))?;
    let outcome =
        CallOutcome::from_str(&outcome_str).ok_or_else(|| bad_column(4, &outcome_str))?;

    let started_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CallHistoryEntry {
        session_id: SessionId(session_id),
        caller: UserId(caller),
        callee: UserId(callee),
        kind,
        outcome,
        duration_secs,
        started_at,
    })
}

fn parse_uuid(s: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn bad_column(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {value}").into(),
    )
}
