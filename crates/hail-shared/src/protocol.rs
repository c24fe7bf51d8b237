use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallKind, CallState, FailReason, PresenceStatus, SessionId, UserId};

/// One frame on an endpoint's push channel.
///
/// `seq` increases by exactly one per frame on a given channel, so a client
/// can detect gaps after a reconnect and knows to re-register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub seq: u64,
    pub event: PushEvent,
}

/// Server-to-client push events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PushEvent {
    /// A call invite addressed to this endpoint.
    IncomingCall(IncomingCall),

    /// A session one of this endpoint's calls belongs to changed state.
    CallStateChanged(CallStateChanged),

    /// A negotiation payload relayed from the other participant.
    SignalRelayed(SignalRelayed),

    /// An observed user's presence changed.
    PresenceChanged(PresenceChanged),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCall {
    pub session_id: SessionId,
    pub caller: UserId,
    pub kind: CallKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStateChanged {
    pub session_id: SessionId,
    pub state: CallState,
    /// Populated only when `state` is `failed`.
    pub reason: Option<FailReason>,
    pub at: DateTime<Utc>,
}

/// Opaque negotiation payload, passed through unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRelayed {
    pub session_id: SessionId,
    pub from: UserId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

impl PushFrame {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_frame_round_trip() {
        let frame = PushFrame {
            seq: 7,
            event: PushEvent::SignalRelayed(SignalRelayed {
                session_id: SessionId::new(),
                from: UserId::new(),
                payload: vec![1, 2, 3, 4, 5],
            }),
        };

        let bytes = frame.to_bytes().unwrap();
        let restored = PushFrame::from_bytes(&bytes).unwrap();

        assert_eq!(restored.seq, 7);
        if let (PushEvent::SignalRelayed(orig), PushEvent::SignalRelayed(rest)) =
            (&frame.event, &restored.event)
        {
            assert_eq!(orig.session_id, rest.session_id);
            assert_eq!(orig.payload, rest.payload);
        } else {
            panic!("Event type mismatch");
        }
    }

    #[test]
    fn state_change_carries_fail_reason() {
        let frame = PushFrame {
            seq: 1,
            event: PushEvent::CallStateChanged(CallStateChanged {
                session_id: SessionId::new(),
                state: CallState::Failed,
                reason: Some(FailReason::PeerDisconnected),
                at: Utc::now(),
            }),
        };

        let restored = PushFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        match restored.event {
            PushEvent::CallStateChanged(change) => {
                assert_eq!(change.state, CallState::Failed);
                assert_eq!(change.reason, Some(FailReason::PeerDisconnected));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
