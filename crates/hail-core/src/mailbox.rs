//! Per-endpoint push mailbox.
//!
//! Every registered endpoint owns one bounded channel of [`PushFrame`]s.
//! The server side of the push channel drains the receiver; everything in
//! the coordinator that wants to reach an endpoint goes through
//! [`PushMailbox::push`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use hail_shared::protocol::{PushEvent, PushFrame};
use hail_shared::types::EndpointId;
use hail_shared::SignalError;

/// Sending half of an endpoint's push channel.
///
/// Sequence numbers are stamped under the same lock that enqueues the
/// frame, so a receiver never observes reordering or gaps: a frame is
/// either delivered with the next sequence number or not sent at all.
pub struct PushMailbox {
    endpoint: EndpointId,
    inner: std::sync::Mutex<Inner>,
}

struct Inner {
    next_seq: u64,
    tx: mpsc::Sender<PushFrame>,
}

impl PushMailbox {
    /// Create a mailbox and hand back the receiver the push channel drains.
    pub fn new(endpoint: EndpointId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<PushFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mailbox = Arc::new(Self {
            endpoint,
            inner: std::sync::Mutex::new(Inner { next_seq: 1, tx }),
        });
        (mailbox, rx)
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Enqueue an event for delivery.
    ///
    /// Fails with `DeliveryFailed` when the endpoint's buffer is full or
    /// its channel has been dropped.  There is no retry: callers that care
    /// (the signaling router) surface the error, callers that don't (state
    /// and presence fanout) log and move on.
    pub fn push(&self, event: PushEvent) -> Result<(), SignalError> {
        let mut inner = self.inner.lock().expect("mailbox lock poisoned");

        let frame = PushFrame {
            seq: inner.next_seq,
            event,
        };

        match inner.tx.try_send(frame) {
            Ok(()) => {
                trace!(endpoint = %self.endpoint, seq = inner.next_seq, "queued push frame");
                inner.next_seq += 1;
                Ok(())
            }
            Err(_) => Err(SignalError::DeliveryFailed(self.endpoint)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hail_shared::protocol::SignalRelayed;
    use hail_shared::types::{SessionId, UserId};

    fn relayed(payload: Vec<u8>) -> PushEvent {
        PushEvent::SignalRelayed(SignalRelayed {
            session_id: SessionId::new(),
            from: UserId::new(),
            payload,
        })
    }

    #[tokio::test]
    async fn sequence_numbers_are_contiguous() {
        let (mailbox, mut rx) = PushMailbox::new(EndpointId::new(), 8);

        for i in 0..3u8 {
            mailbox.push(relayed(vec![i])).unwrap();
        }

        for expected in 1..=3u64 {
            let frame = rx.try_recv().unwrap();
            assert_eq!(frame.seq, expected);
        }
    }

    #[tokio::test]
    async fn full_buffer_fails_without_burning_a_seq() {
        let (mailbox, mut rx) = PushMailbox::new(EndpointId::new(), 1);

        mailbox.push(relayed(vec![1])).unwrap();
        assert!(matches!(
            mailbox.push(relayed(vec![2])),
            Err(SignalError::DeliveryFailed(_))
        ));

        assert_eq!(rx.try_recv().unwrap().seq, 1);

        // The failed push must not have consumed sequence number 2.
        mailbox.push(relayed(vec![3])).unwrap();
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn closed_channel_fails() {
        let (mailbox, rx) = PushMailbox::new(EndpointId::new(), 8);
        drop(rx);
        assert!(matches!(
            mailbox.push(relayed(vec![0])),
            Err(SignalError::DeliveryFailed(_))
        ));
    }
}
