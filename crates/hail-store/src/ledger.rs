//! Async handle over the ledger database.
//!
//! The coordinator core runs on tokio while rusqlite is synchronous, so
//! the connection sits behind an async mutex.  Ledger operations are
//! single-row inserts and small indexed scans; they never hold the lock
//! long enough to matter.

use tokio::sync::Mutex;

use hail_shared::types::UserId;
use hail_shared::SignalError;

use crate::database::Database;
use crate::models::{CallHistoryEntry, HistoryCursor};

pub struct Ledger {
    db: Mutex<Database>,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Append one terminated call.
    ///
    /// A failure here never rolls back the in-memory transition that
    /// produced the entry; the caller logs it and moves on.
    pub async fn record(&self, entry: &CallHistoryEntry) -> Result<(), SignalError> {
        let db = self.db.lock().await;
        db.insert_history_entry(entry)
            .map_err(|e| SignalError::Persistence(e.to_string()))
    }

    /// Page through one user's history, most recent first.
    pub async fn history_for_user(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: u32,
    ) -> Result<Vec<CallHistoryEntry>, SignalError> {
        let db = self.db.lock().await;
        db.history_for_user(user, cursor, limit)
            .map_err(|e| SignalError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hail_shared::types::{CallKind, CallOutcome, SessionId};

    #[tokio::test]
    async fn record_and_query() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        let caller = UserId::new();
        let entry = CallHistoryEntry {
            session_id: SessionId::new(),
            caller,
            callee: UserId::new(),
            kind: CallKind::Video,
            outcome: CallOutcome::Declined,
            duration_secs: None,
            started_at: Utc::now(),
        };

        ledger.record(&entry).await.unwrap();

        let page = ledger.history_for_user(caller, None, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].outcome, CallOutcome::Declined);
        assert_eq!(page[0].duration_secs, None);
    }

    #[tokio::test]
    async fn double_record_surfaces_persistence_error() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        let entry = CallHistoryEntry {
            session_id: SessionId::new(),
            caller: UserId::new(),
            callee: UserId::new(),
            kind: CallKind::Voice,
            outcome: CallOutcome::Completed,
            duration_secs: Some(1),
            started_at: Utc::now(),
        };

        ledger.record(&entry).await.unwrap();
        match ledger.record(&entry).await {
            Err(SignalError::Persistence(_)) => {}
            other => panic!("Expected Persistence error, got {:?}", other),
        }
    }
}
