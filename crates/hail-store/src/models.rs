//! Domain model structs persisted in the call-history ledger.
//!
//! Every struct derives `Serialize` so it can be handed directly to API
//! responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hail_shared::types::{CallKind, CallOutcome, SessionId, UserId};

/// One completed, missed, declined or failed call.
///
/// Written exactly once, when the session reaches a terminal state, and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallHistoryEntry {
    /// The terminated session's id.
    pub session_id: SessionId,
    /// User who initiated the call.
    pub caller: UserId,
    /// User who was called.
    pub callee: UserId,
    /// Voice or video.
    pub kind: CallKind,
    /// Terminal outcome.
    pub outcome: CallOutcome,
    /// Call duration in seconds.  `None` unless the call connected.
    pub duration_secs: Option<i64>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
}

/// Direction of a history entry relative to one of its participants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
    Missed,
}

impl CallHistoryEntry {
    /// Derive the direction shown to `user` in their call log.
    ///
    /// A call the user placed is always `outgoing`; a call the user
    /// received is `incoming` if it connected and `missed` otherwise.
    pub fn direction_for(&self, user: UserId) -> CallDirection {
        if self.caller == user {
            CallDirection::Outgoing
        } else if self.outcome == CallOutcome::Completed {
            CallDirection::Incoming
        } else {
            CallDirection::Missed
        }
    }
}

/// Keyset cursor for paginating a user's history, most recent first.
///
/// Points at the last entry the client has already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub started_at: DateTime<Utc>,
    pub session_id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(caller: UserId, callee: UserId, outcome: CallOutcome) -> CallHistoryEntry {
        CallHistoryEntry {
            session_id: SessionId::new(),
            caller,
            callee,
            kind: CallKind::Voice,
            outcome,
            duration_secs: (outcome == CallOutcome::Completed).then_some(42),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn direction_from_each_side() {
        let a = UserId::new();
        let b = UserId::new();

        let completed = entry(a, b, CallOutcome::Completed);
        assert_eq!(completed.direction_for(a), CallDirection::Outgoing);
        assert_eq!(completed.direction_for(b), CallDirection::Incoming);

        let missed = entry(a, b, CallOutcome::Missed);
        assert_eq!(missed.direction_for(a), CallDirection::Outgoing);
        assert_eq!(missed.direction_for(b), CallDirection::Missed);

        let declined = entry(a, b, CallOutcome::Declined);
        assert_eq!(declined.direction_for(b), CallDirection::Missed);
    }
}
