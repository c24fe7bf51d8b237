//! Presence fanout.
//!
//! Keeps the per-user presence record and the sets of endpoints observing
//! each user.  `publish` runs under the records lock so every subscriber
//! sees one user's status stream in the order the changes occurred;
//! fanout across different users is unordered and best-effort.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use hail_shared::protocol::{PresenceChanged, PushEvent};
use hail_shared::types::{EndpointId, PresenceStatus, UserId};
use hail_shared::error::Result;

use crate::registry::SessionRegistry;

/// Per-user presence as currently known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

pub struct PresenceBroadcaster {
    registry: Arc<SessionRegistry>,
    records: RwLock<HashMap<UserId, PresenceRecord>>,
    subscribers: RwLock<HashMap<UserId, HashSet<EndpointId>>>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            records: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Start delivering `user_id`'s status changes to `observer`.
    pub async fn subscribe(&self, user_id: UserId, observer: EndpointId) -> Result<()> {
        // Reject observers that are not registered endpoints.
        self.registry.info(observer).await?;

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(user_id).or_default().insert(observer);
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: UserId, observer: EndpointId) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(set) = subscribers.get_mut(&user_id) {
            set.remove(&observer);
            if set.is_empty() {
                subscribers.remove(&user_id);
            }
        }
    }

    /// Drop `observer` from every watch list.  Called when the endpoint
    /// deregisters or is evicted.
    pub async fn unsubscribe_endpoint(&self, observer: EndpointId) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|_, set| {
            set.remove(&observer);
            !set.is_empty()
        });
    }

    /// Record a status change and fan it out to current subscribers.
    ///
    /// Holding the records lock across the fanout keeps one user's stream
    /// ordered for every subscriber.  Undeliverable observers are skipped.
    pub async fn publish(&self, user_id: UserId, status: PresenceStatus) {
        let mut records = self.records.write().await;
        let last_seen = Utc::now();
        records.insert(user_id, PresenceRecord { status, last_seen });

        let observers: Vec<EndpointId> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&user_id) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        };

        for observer in observers {
            let Ok(mailbox) = self.registry.mailbox(observer).await else {
                continue;
            };
            let event = PushEvent::PresenceChanged(PresenceChanged {
                user_id,
                status,
                last_seen,
            });
            if mailbox.push(event).is_err() {
                debug!(
                    user = %user_id.short(),
                    observer = %observer,
                    "Dropping presence update for unreachable observer"
                );
            }
        }
    }

    pub async fn record(&self, user_id: UserId) -> Option<PresenceRecord> {
        self.records.read().await.get(&user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hail_shared::protocol::PushFrame;
    use hail_shared::types::Capabilities;
    use hail_shared::SignalError;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<SessionRegistry>, PresenceBroadcaster) {
        let registry = Arc::new(SessionRegistry::new(Default::default()));
        let presence = PresenceBroadcaster::new(registry.clone());
        (registry, presence)
    }

    async fn register_observer(
        registry: &SessionRegistry,
    ) -> (EndpointId, mpsc::Receiver<PushFrame>) {
        let ep = registry
            .register(UserId::new(), Capabilities::full())
            .await
            .unwrap();
        let rx = registry.take_receiver(ep.id).await.unwrap().unwrap();
        (ep.id, rx)
    }

    #[tokio::test]
    async fn subscribers_see_updates_in_order() {
        let (registry, presence) = setup().await;
        let (observer, mut rx) = register_observer(&registry).await;
        let watched = UserId::new();

        presence.subscribe(watched, observer).await.unwrap();

        presence.publish(watched, PresenceStatus::Online).await;
        presence.publish(watched, PresenceStatus::InCall).await;
        presence.publish(watched, PresenceStatus::Offline).await;

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let PushEvent::PresenceChanged(change) = frame.event {
                seen.push(change.status);
            }
        }
        assert_eq!(
            seen,
            vec![
                PresenceStatus::Online,
                PresenceStatus::InCall,
                PresenceStatus::Offline
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribed_observer_stops_receiving() {
        let (registry, presence) = setup().await;
        let (observer, mut rx) = register_observer(&registry).await;
        let watched = UserId::new();

        presence.subscribe(watched, observer).await.unwrap();
        presence.publish(watched, PresenceStatus::Online).await;

        presence.unsubscribe(watched, observer).await;
        presence.publish(watched, PresenceStatus::Offline).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_requires_registered_observer() {
        let (_registry, presence) = setup().await;
        assert!(matches!(
            presence.subscribe(UserId::new(), EndpointId::new()).await,
            Err(SignalError::UnknownEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_endpoint_clears_all_watches() {
        let (registry, presence) = setup().await;
        let (observer, mut rx) = register_observer(&registry).await;
        let u1 = UserId::new();
        let u2 = UserId::new();

        presence.subscribe(u1, observer).await.unwrap();
        presence.subscribe(u2, observer).await.unwrap();

        presence.unsubscribe_endpoint(observer).await;
        presence.publish(u1, PresenceStatus::Online).await;
        presence.publish(u2, PresenceStatus::Online).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn record_reflects_latest_status() {
        let (_registry, presence) = setup().await;
        let user = UserId::new();

        assert!(presence.record(user).await.is_none());

        presence.publish(user, PresenceStatus::Online).await;
        presence.publish(user, PresenceStatus::InCall).await;

        let record = presence.record(user).await.unwrap();
        assert_eq!(record.status, PresenceStatus::InCall);
    }
}
