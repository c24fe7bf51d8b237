use serde::{Deserialize, Serialize};
use uuid::Uuid;

// A user may own several endpoints (one per device session), so users and
// endpoints get distinct id types to keep the two spaces from mixing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of media a call carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Voice => "voice",
            CallKind::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Media capabilities advertised by an endpoint at registration.
///
/// A voice-only device never receives video call invites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub voice: bool,
    pub video: bool,
}

impl Capabilities {
    pub fn voice_only() -> Self {
        Self {
            voice: true,
            video: false,
        }
    }

    pub fn full() -> Self {
        Self {
            voice: true,
            video: true,
        }
    }

    pub fn supports(&self, kind: CallKind) -> bool {
        match kind {
            CallKind::Voice => self.voice,
            CallKind::Video => self.video,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Lifecycle state of a call session.
///
/// `Ended`, `Declined` and `Failed` are terminal; a session never leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiating,
    Ringing,
    Connected,
    Ended,
    Declined,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Declined | CallState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiating => "initiating",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Declined => "declined",
            CallState::Failed => "failed",
        }
    }
}

/// Why a session reached `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    RingTimeout,
    PeerDisconnected,
    DeliveryFailed,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::RingTimeout => "ring_timeout",
            FailReason::PeerDisconnected => "peer_disconnected",
            FailReason::DeliveryFailed => "delivery_failed",
        }
    }
}

/// Terminal outcome archived to the call history ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Completed,
    Missed,
    Declined,
    Failed,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Completed => "completed",
            CallOutcome::Missed => "missed",
            CallOutcome::Declined => "declined",
            CallOutcome::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "missed" => Some(Self::Missed),
            "declined" => Some(Self::Declined),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-user presence as seen by subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
    InCall,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
            PresenceStatus::InCall => "in_call",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!CallState::Initiating.is_terminal());
        assert!(!CallState::Ringing.is_terminal());
        assert!(!CallState::Connected.is_terminal());
        assert!(CallState::Ended.is_terminal());
        assert!(CallState::Declined.is_terminal());
        assert!(CallState::Failed.is_terminal());
    }

    #[test]
    fn capabilities_gate_kind() {
        let caps = Capabilities::voice_only();
        assert!(caps.supports(CallKind::Voice));
        assert!(!caps.supports(CallKind::Video));
        assert!(Capabilities::full().supports(CallKind::Video));
    }

    #[test]
    fn outcome_round_trip() {
        for outcome in [
            CallOutcome::Completed,
            CallOutcome::Missed,
            CallOutcome::Declined,
            CallOutcome::Failed,
        ] {
            assert_eq!(CallOutcome::from_str(outcome.as_str()), Some(outcome));
        }
        assert_eq!(CallOutcome::from_str("busy"), None);
    }
}
