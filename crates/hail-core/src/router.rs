//! Negotiation payload relay.
//!
//! Delivers opaque payloads between the two participants of an active
//! session, verbatim and at-most-once.  Payloads from one sender within a
//! session reach the receiver in `relay` call order: delivery happens
//! under the session lock, and each mailbox preserves enqueue order.
//! Stale negotiation data is useless, so there is no buffering and no
//! retry; an unreachable receiver surfaces as `DeliveryFailed`.

use std::sync::Arc;

use hail_shared::protocol::{PushEvent, SignalRelayed};
use hail_shared::types::{EndpointId, SessionId};
use hail_shared::{error::Result, SignalError};

use crate::call::CallManager;
use crate::registry::SessionRegistry;

pub struct SignalingRouter {
    calls: Arc<CallManager>,
    registry: Arc<SessionRegistry>,
}

impl SignalingRouter {
    pub fn new(calls: Arc<CallManager>, registry: Arc<SessionRegistry>) -> Self {
        Self { calls, registry }
    }

    /// Deliver `payload` to the other participant of `session_id`.
    pub async fn relay(
        &self,
        session_id: SessionId,
        from_endpoint: EndpointId,
        payload: Vec<u8>,
    ) -> Result<()> {
        let session = self
            .calls
            .session(session_id)
            .await
            .ok_or(SignalError::SessionNotActive(session_id))?;
        let sess = session.lock().await;

        if sess.state.is_terminal() {
            return Err(SignalError::SessionTerminated(session_id));
        }

        let receiver = sess
            .other(from_endpoint)
            .ok_or(SignalError::NotAParticipant {
                session: session_id,
                endpoint: from_endpoint,
            })?;
        let from_user = if sess.caller.endpoint == from_endpoint {
            sess.caller.user
        } else {
            sess.callee.user
        };

        let mailbox = self
            .registry
            .mailbox(receiver.endpoint)
            .await
            .map_err(|_| SignalError::DeliveryFailed(receiver.endpoint))?;

        mailbox.push(PushEvent::SignalRelayed(SignalRelayed {
            session_id,
            from: from_user,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallConfig;
    use crate::presence::PresenceBroadcaster;
    use hail_shared::protocol::PushFrame;
    use hail_shared::types::{Capabilities, CallKind, UserId};
    use hail_store::{Database, Ledger};
    use tokio::sync::mpsc;

    struct Rig {
        registry: Arc<SessionRegistry>,
        calls: Arc<CallManager>,
        router: SignalingRouter,
    }

    fn rig() -> Rig {
        let registry = Arc::new(SessionRegistry::new(Default::default()));
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let ledger = Arc::new(Ledger::new(Database::open_in_memory().unwrap()));
        let calls = CallManager::new(
            CallConfig::default(),
            registry.clone(),
            presence,
            ledger,
        );
        let router = SignalingRouter::new(calls.clone(), registry.clone());
        Rig {
            registry,
            calls,
            router,
        }
    }

    struct TestEndpoint {
        id: EndpointId,
        user: UserId,
        rx: mpsc::Receiver<PushFrame>,
    }

    async fn connect(rig: &Rig) -> TestEndpoint {
        let user = UserId::new();
        let ep = rig
            .registry
            .register(user, Capabilities::full())
            .await
            .unwrap();
        let rx = rig.registry.take_receiver(ep.id).await.unwrap().unwrap();
        TestEndpoint {
            id: ep.id,
            user,
            rx,
        }
    }

    fn drain_payloads(rx: &mut mpsc::Receiver<PushFrame>) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let PushEvent::SignalRelayed(signal) = frame.event {
                payloads.push(signal.payload);
            }
        }
        payloads
    }

    async fn ringing_session(rig: &Rig, a: &TestEndpoint, b: &TestEndpoint) -> SessionId {
        rig.calls
            .initiate(a.id, b.user, CallKind::Voice)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn payloads_arrive_in_call_order() {
        let rig = rig();
        let a = connect(&rig).await;
        let mut b = connect(&rig).await;

        let session_id = ringing_session(&rig, &a, &b).await;

        for payload in [b"P1".to_vec(), b"P2".to_vec(), b"P3".to_vec()] {
            rig.router.relay(session_id, a.id, payload).await.unwrap();
        }

        assert_eq!(
            drain_payloads(&mut b.rx),
            vec![b"P1".to_vec(), b"P2".to_vec(), b"P3".to_vec()]
        );
    }

    #[tokio::test]
    async fn relay_is_bidirectional_and_only_reaches_the_peer() {
        let rig = rig();
        let mut a = connect(&rig).await;
        let mut b = connect(&rig).await;

        let session_id = ringing_session(&rig, &a, &b).await;

        rig.router
            .relay(session_id, b.id, b"answer".to_vec())
            .await
            .unwrap();

        assert_eq!(drain_payloads(&mut a.rx), vec![b"answer".to_vec()]);
        assert!(drain_payloads(&mut b.rx).is_empty());
    }

    #[tokio::test]
    async fn outsiders_are_not_participants() {
        let rig = rig();
        let a = connect(&rig).await;
        let b = connect(&rig).await;
        let outsider = connect(&rig).await;

        let session_id = ringing_session(&rig, &a, &b).await;

        assert!(matches!(
            rig.router
                .relay(session_id, outsider.id, b"sdp".to_vec())
                .await,
            Err(SignalError::NotAParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_active() {
        let rig = rig();
        let a = connect(&rig).await;

        assert!(matches!(
            rig.router.relay(SessionId::new(), a.id, vec![1]).await,
            Err(SignalError::SessionNotActive(_))
        ));
    }

    #[tokio::test]
    async fn terminated_session_rejects_relay() {
        let rig = rig();
        let a = connect(&rig).await;
        let b = connect(&rig).await;

        let session_id = ringing_session(&rig, &a, &b).await;
        rig.calls.terminate(session_id, a.id).await.unwrap();

        assert!(matches!(
            rig.router.relay(session_id, a.id, vec![1]).await,
            Err(SignalError::SessionTerminated(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_receiver_is_delivery_failure() {
        let rig = rig();
        let a = connect(&rig).await;
        let b = connect(&rig).await;

        let session_id = ringing_session(&rig, &a, &b).await;

        // B vanishes from the registry but the session has not yet been
        // cascaded; the payload is dropped, not buffered.
        rig.registry.remove(b.id).await.unwrap();

        assert!(matches!(
            rig.router.relay(session_id, a.id, b"sdp".to_vec()).await,
            Err(SignalError::DeliveryFailed(_))
        ));
    }
}
