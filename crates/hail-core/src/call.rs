//! Call lifecycle state machine.
//!
//! One [`CallSession`] per call attempt, mutated only under its own lock so
//! racing `accept`/`decline`/`terminate` calls are linearized: the first
//! operation to be sequenced wins and the loser gets `SessionTerminated`.
//!
//! Legal transitions:
//!
//! ```text
//! initiating -> ringing -> connected -> ended
//! initiating|ringing -> declined | failed
//! connected -> failed            (peer disconnect)
//! ```
//!
//! On every terminal transition the session is archived to the call
//! history ledger exactly once, its ring timer is cancelled, and both
//! participants are notified over their push channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use hail_shared::protocol::{CallStateChanged, IncomingCall, PushEvent};
use hail_shared::types::{CallKind, CallOutcome, CallState, EndpointId, FailReason, PresenceStatus, SessionId, UserId};
use hail_shared::{error::Result, SignalError};

use hail_store::{CallHistoryEntry, Ledger};

use crate::presence::PresenceBroadcaster;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long a call may sit unanswered before it fails as missed.
    pub ring_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
        }
    }
}

/// One side of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub endpoint: EndpointId,
    pub user: UserId,
}

/// One entry in a session's transition history.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub state: CallState,
    pub at: DateTime<Utc>,
}

pub struct CallSession {
    pub id: SessionId,
    pub caller: Participant,
    pub callee: Participant,
    pub kind: CallKind,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub fail_reason: Option<FailReason>,
    transitions: Vec<Transition>,
    ring_timer: Option<tokio::task::AbortHandle>,
}

impl CallSession {
    fn new(id: SessionId, caller: Participant, callee: Participant, kind: CallKind) -> Self {
        let created_at = Utc::now();
        Self {
            id,
            caller,
            callee,
            kind,
            state: CallState::Initiating,
            created_at,
            connected_at: None,
            fail_reason: None,
            transitions: vec![Transition {
                state: CallState::Initiating,
                at: created_at,
            }],
            ring_timer: None,
        }
    }

    fn transition(&mut self, state: CallState) {
        debug!(
            session = %self.id,
            from = self.state.as_str(),
            to = state.as_str(),
            "Call transition"
        );
        self.state = state;
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    pub fn is_participant(&self, endpoint: EndpointId) -> bool {
        self.caller.endpoint == endpoint || self.callee.endpoint == endpoint
    }

    /// The participant opposite `endpoint`, if `endpoint` is a participant.
    pub fn other(&self, endpoint: EndpointId) -> Option<Participant> {
        if self.caller.endpoint == endpoint {
            Some(self.callee)
        } else if self.callee.endpoint == endpoint {
            Some(self.caller)
        } else {
            None
        }
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn cancel_ring_timer(&mut self) {
        if let Some(handle) = self.ring_timer.take() {
            handle.abort();
        }
    }
}

pub struct CallManager {
    config: CallConfig,
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceBroadcaster>,
    ledger: Arc<Ledger>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<CallSession>>>>,
    /// Busy index: endpoints that are party to a non-terminal session.
    /// Guarded separately from the sessions map so the no-call-waiting
    /// check-and-claim is atomic.
    active_by_endpoint: RwLock<HashMap<EndpointId, SessionId>>,
}

impl CallManager {
    pub fn new(
        config: CallConfig,
        registry: Arc<SessionRegistry>,
        presence: Arc<PresenceBroadcaster>,
        ledger: Arc<Ledger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            presence,
            ledger,
            sessions: RwLock::new(HashMap::new()),
            active_by_endpoint: RwLock::new(HashMap::new()),
        })
    }

    pub async fn session(&self, id: SessionId) -> Option<Arc<Mutex<CallSession>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn active_session_for(&self, endpoint: EndpointId) -> Option<SessionId> {
        self.active_by_endpoint.read().await.get(&endpoint).copied()
    }

    /// Start a call from `caller_endpoint` to some endpoint of
    /// `callee_user`.
    ///
    /// Routing picks the callee's oldest registered endpoint that supports
    /// `kind` and is not already in a call.  Fails with
    /// `EndpointUnavailable` when the caller is busy, the callee has no
    /// eligible endpoint, or the invite cannot be delivered.
    pub async fn initiate(
        self: &Arc<Self>,
        caller_endpoint: EndpointId,
        callee_user: UserId,
        kind: CallKind,
    ) -> Result<SessionId> {
        let caller_info = self.registry.info(caller_endpoint).await?;
        let candidates = self.registry.user_endpoints_for(callee_user, kind).await;
        if candidates.is_empty() {
            return Err(SignalError::EndpointUnavailable(callee_user));
        }

        let mut active = self.active_by_endpoint.write().await;

        if active.contains_key(&caller_endpoint) {
            return Err(SignalError::EndpointUnavailable(caller_info.user_id));
        }

        let callee = candidates
            .iter()
            .find(|c| !active.contains_key(&c.id))
            .ok_or(SignalError::EndpointUnavailable(callee_user))?;

        let session_id = SessionId::new();
        let session = Arc::new(Mutex::new(CallSession::new(
            session_id,
            Participant {
                endpoint: caller_endpoint,
                user: caller_info.user_id,
            },
            Participant {
                endpoint: callee.id,
                user: callee_user,
            },
            kind,
        )));

        // Take the session lock before the session becomes visible, so a
        // concurrent deregistration cascade cannot finalize it mid-setup.
        let mut sess = session.clone().lock_owned().await;

        active.insert(caller_endpoint, session_id);
        active.insert(callee.id, session_id);
        drop(active);
        self.sessions.write().await.insert(session_id, session);

        info!(
            session = %session_id,
            caller = %sess.caller.user.short(),
            callee = %callee_user.short(),
            kind = kind.as_str(),
            "Initiating call"
        );

        // Deliver the invite.  If the callee's mailbox cannot take it the
        // call can never be answered, so fail the session immediately.
        let invite = PushEvent::IncomingCall(IncomingCall {
            session_id,
            caller: sess.caller.user,
            kind,
        });
        let delivered = match self.registry.mailbox(sess.callee.endpoint).await {
            Ok(mailbox) => mailbox.push(invite),
            Err(e) => Err(e),
        };
        if delivered.is_err() {
            warn!(session = %session_id, "Call invite undeliverable");
            self.finalize(&mut sess, CallState::Failed, Some(FailReason::DeliveryFailed))
                .await;
            return Err(SignalError::EndpointUnavailable(callee_user));
        }

        sess.transition(CallState::Ringing);
        self.push_state(&sess).await;

        // Ring timeout, cancelled by whichever terminal transition wins.
        let manager = self.clone();
        let timeout = self.config.ring_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.ring_timeout_fired(session_id).await;
        });
        sess.ring_timer = Some(handle.abort_handle());

        Ok(session_id)
    }

    /// Accept a ringing call.  Only the callee endpoint may accept.
    pub async fn accept(&self, session_id: SessionId, endpoint: EndpointId) -> Result<()> {
        let session = self
            .session(session_id)
            .await
            .ok_or(SignalError::SessionNotActive(session_id))?;
        let mut sess = session.lock().await;

        if sess.state.is_terminal() {
            return Err(SignalError::SessionTerminated(session_id));
        }
        if sess.callee.endpoint != endpoint {
            return Err(SignalError::Unauthorized(endpoint));
        }
        if sess.state != CallState::Ringing {
            return Err(SignalError::InvalidTransition {
                session: session_id,
                state: sess.state.as_str(),
                operation: "accept",
            });
        }

        sess.cancel_ring_timer();
        sess.connected_at = Some(Utc::now());
        sess.transition(CallState::Connected);
        self.push_state(&sess).await;

        self.presence
            .publish(sess.caller.user, PresenceStatus::InCall)
            .await;
        self.presence
            .publish(sess.callee.user, PresenceStatus::InCall)
            .await;

        info!(session = %session_id, "Call connected");
        Ok(())
    }

    /// Decline a ringing call.  Only the callee endpoint may decline.
    pub async fn decline(&self, session_id: SessionId, endpoint: EndpointId) -> Result<()> {
        let session = self
            .session(session_id)
            .await
            .ok_or(SignalError::SessionNotActive(session_id))?;
        let mut sess = session.lock().await;

        if sess.state.is_terminal() {
            return Err(SignalError::SessionTerminated(session_id));
        }
        if sess.callee.endpoint != endpoint {
            return Err(SignalError::Unauthorized(endpoint));
        }
        if sess.state != CallState::Ringing {
            return Err(SignalError::InvalidTransition {
                session: session_id,
                state: sess.state.as_str(),
                operation: "decline",
            });
        }

        self.finalize(&mut sess, CallState::Declined, None).await;
        Ok(())
    }

    /// Hang up.  Valid from any non-terminal state, for either participant.
    pub async fn terminate(&self, session_id: SessionId, endpoint: EndpointId) -> Result<()> {
        let session = self
            .session(session_id)
            .await
            .ok_or(SignalError::SessionNotActive(session_id))?;
        let mut sess = session.lock().await;

        if sess.state.is_terminal() {
            // The loser of a terminate race lands here; this is expected,
            // not a bug to surface.
            return Err(SignalError::SessionTerminated(session_id));
        }
        if !sess.is_participant(endpoint) {
            return Err(SignalError::Unauthorized(endpoint));
        }

        self.finalize(&mut sess, CallState::Ended, None).await;
        Ok(())
    }

    /// Fail the active session `endpoint` is party to, if any.  Called by
    /// the deregistration cascade.
    pub async fn fail_endpoint(&self, endpoint: EndpointId, reason: FailReason) {
        let Some(session_id) = self.active_session_for(endpoint).await else {
            return;
        };
        let Some(session) = self.session(session_id).await else {
            return;
        };
        let mut sess = session.lock().await;
        if sess.state.is_terminal() {
            return;
        }
        self.finalize(&mut sess, CallState::Failed, Some(reason)).await;
    }

    async fn ring_timeout_fired(&self, session_id: SessionId) {
        let Some(session) = self.session(session_id).await else {
            return;
        };
        let mut sess = session.lock().await;
        if sess.state.is_terminal() {
            return;
        }
        info!(session = %session_id, "Ring timeout expired");
        self.finalize(&mut sess, CallState::Failed, Some(FailReason::RingTimeout))
            .await;
    }

    /// Run a terminal transition: flip the state, cancel the ring timer,
    /// release the busy index, notify both participants, restore presence,
    /// and archive to the ledger.  Callers guarantee `sess` is not already
    /// terminal, which makes the ledger handoff exactly-once.
    async fn finalize(&self, sess: &mut CallSession, state: CallState, reason: Option<FailReason>) {
        debug_assert!(state.is_terminal());

        sess.cancel_ring_timer();
        sess.fail_reason = reason;
        let was_connected = sess.connected_at.is_some();
        sess.transition(state);

        {
            let mut active = self.active_by_endpoint.write().await;
            active.remove(&sess.caller.endpoint);
            active.remove(&sess.callee.endpoint);
        }

        self.push_state(sess).await;

        if was_connected {
            for user in [sess.caller.user, sess.callee.user] {
                if self.registry.user_is_online(user).await {
                    self.presence.publish(user, PresenceStatus::Online).await;
                }
            }
        }

        let outcome = match state {
            CallState::Ended if was_connected => CallOutcome::Completed,
            CallState::Ended => CallOutcome::Missed,
            CallState::Declined => CallOutcome::Declined,
            CallState::Failed if reason == Some(FailReason::RingTimeout) => CallOutcome::Missed,
            _ => CallOutcome::Failed,
        };
        let duration_secs = match (state, sess.connected_at) {
            (CallState::Ended, Some(connected_at)) => {
                Some((Utc::now() - connected_at).num_seconds())
            }
            _ => None,
        };

        let entry = CallHistoryEntry {
            session_id: sess.id,
            caller: sess.caller.user,
            callee: sess.callee.user,
            kind: sess.kind,
            outcome,
            duration_secs,
            started_at: sess.created_at,
        };
        // The in-memory transition is the source of truth; a ledger write
        // failure is logged, never rolled back.
        if let Err(e) = self.ledger.record(&entry).await {
            error!(session = %sess.id, error = %e, "Failed to archive call history entry");
        }

        info!(
            session = %sess.id,
            state = state.as_str(),
            outcome = outcome.as_str(),
            "Call terminated"
        );
    }

    /// Best-effort state notification to both participants.
    async fn push_state(&self, sess: &CallSession) {
        let event = CallStateChanged {
            session_id: sess.id,
            state: sess.state,
            reason: sess.fail_reason,
            at: Utc::now(),
        };
        for participant in [sess.caller, sess.callee] {
            let Ok(mailbox) = self.registry.mailbox(participant.endpoint).await else {
                continue;
            };
            if mailbox
                .push(PushEvent::CallStateChanged(event.clone()))
                .is_err()
            {
                debug!(
                    session = %sess.id,
                    endpoint = %participant.endpoint,
                    "Dropping state notification for unreachable endpoint"
                );
            }
        }
    }
}
