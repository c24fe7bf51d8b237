//! Endpoint registration and liveness tracking.
//!
//! Maintains the table of connected endpoints, their heartbeat timestamps
//! and their push mailboxes.  Cascades on deregistration (failing the
//! endpoint's calls, flipping presence) are orchestrated by the
//! [`Coordinator`](crate::Coordinator); this module only owns the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use hail_shared::protocol::PushFrame;
use hail_shared::types::{Capabilities, CallKind, EndpointId, UserId};
use hail_shared::{error::Result, SignalError};

use crate::mailbox::PushMailbox;

/// Registry policy knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How stale a heartbeat may get before the sweep evicts the endpoint.
    pub heartbeat_timeout: Duration,
    /// Whether one user may hold several live endpoints at once.
    pub multi_device: bool,
    /// Bound on each endpoint's push buffer.
    pub mailbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            multi_device: true,
            mailbox_capacity: 256,
        }
    }
}

/// Immutable snapshot of a registered endpoint.
#[derive(Debug, Clone)]
pub struct RegisteredEndpoint {
    pub id: EndpointId,
    pub user_id: UserId,
    pub capabilities: Capabilities,
    pub registered_at: DateTime<Utc>,
}

struct EndpointEntry {
    info: RegisteredEndpoint,
    last_heartbeat: Instant,
    mailbox: Arc<PushMailbox>,
    /// Receiving half of the push channel, parked here until the endpoint
    /// opens its event stream.  Taken exactly once.
    receiver: Option<mpsc::Receiver<PushFrame>>,
}

pub struct SessionRegistry {
    config: RegistryConfig,
    endpoints: RwLock<HashMap<EndpointId, EndpointEntry>>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new endpoint for `user_id`.
    ///
    /// Fails with `DuplicateSession` when the user already has a live
    /// endpoint and the policy disallows multi-device.
    pub async fn register(
        &self,
        user_id: UserId,
        capabilities: Capabilities,
    ) -> Result<RegisteredEndpoint> {
        let mut endpoints = self.endpoints.write().await;

        if !self.config.multi_device
            && endpoints.values().any(|e| e.info.user_id == user_id)
        {
            return Err(SignalError::DuplicateSession(user_id));
        }

        let id = EndpointId::new();
        let (mailbox, receiver) = PushMailbox::new(id, self.config.mailbox_capacity);
        let info = RegisteredEndpoint {
            id,
            user_id,
            capabilities,
            registered_at: Utc::now(),
        };

        endpoints.insert(
            id,
            EndpointEntry {
                info: info.clone(),
                last_heartbeat: Instant::now(),
                mailbox,
                receiver: Some(receiver),
            },
        );

        info!(
            endpoint = %id,
            user = %user_id.short(),
            total = endpoints.len(),
            "Registered endpoint"
        );

        Ok(info)
    }

    /// Refresh an endpoint's liveness timestamp.
    pub async fn heartbeat(&self, id: EndpointId) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let entry = endpoints
            .get_mut(&id)
            .ok_or(SignalError::UnknownEndpoint(id))?;
        entry.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Remove an endpoint from the table.  Returns its snapshot so the
    /// caller can run the failure cascade.
    pub async fn remove(&self, id: EndpointId) -> Option<RegisteredEndpoint> {
        let mut endpoints = self.endpoints.write().await;
        let removed = endpoints.remove(&id).map(|e| e.info);
        if let Some(ref info) = removed {
            info!(
                endpoint = %id,
                user = %info.user_id.short(),
                remaining = endpoints.len(),
                "Removed endpoint"
            );
        }
        removed
    }

    pub async fn info(&self, id: EndpointId) -> Result<RegisteredEndpoint> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(&id)
            .map(|e| e.info.clone())
            .ok_or(SignalError::UnknownEndpoint(id))
    }

    pub async fn mailbox(&self, id: EndpointId) -> Result<Arc<PushMailbox>> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(&id)
            .map(|e| e.mailbox.clone())
            .ok_or(SignalError::UnknownEndpoint(id))
    }

    /// Hand out the push-channel receiver.  Returns `None` if a stream was
    /// already attached for this endpoint.
    pub async fn take_receiver(&self, id: EndpointId) -> Result<Option<mpsc::Receiver<PushFrame>>> {
        let mut endpoints = self.endpoints.write().await;
        let entry = endpoints
            .get_mut(&id)
            .ok_or(SignalError::UnknownEndpoint(id))?;
        Ok(entry.receiver.take())
    }

    /// All live endpoints of a user that can carry `kind`.
    pub async fn user_endpoints_for(
        &self,
        user_id: UserId,
        kind: CallKind,
    ) -> Vec<RegisteredEndpoint> {
        let endpoints = self.endpoints.read().await;
        let mut found: Vec<RegisteredEndpoint> = endpoints
            .values()
            .filter(|e| e.info.user_id == user_id && e.info.capabilities.supports(kind))
            .map(|e| e.info.clone())
            .collect();
        // Oldest registration first, so call routing is deterministic.
        found.sort_by_key(|e| e.registered_at);
        found
    }

    pub async fn user_is_online(&self, user_id: UserId) -> bool {
        let endpoints = self.endpoints.read().await;
        endpoints.values().any(|e| e.info.user_id == user_id)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Endpoints whose heartbeat age exceeds the timeout.  The sweep task
    /// deregisters each of these through the coordinator so the usual
    /// failure cascade applies.
    pub async fn stale_endpoints(&self) -> Vec<EndpointId> {
        let endpoints = self.endpoints.read().await;
        let now = Instant::now();
        let stale: Vec<EndpointId> = endpoints
            .values()
            .filter(|e| now.duration_since(e.last_heartbeat) > self.config.heartbeat_timeout)
            .map(|e| e.info.id)
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "Found stale endpoints");
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(multi_device: bool) -> SessionRegistry {
        SessionRegistry::new(RegistryConfig {
            multi_device,
            ..RegistryConfig::default()
        })
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = registry(true);
        let user = UserId::new();

        let ep = registry.register(user, Capabilities::full()).await.unwrap();
        assert_eq!(registry.endpoint_count().await, 1);
        assert!(registry.user_is_online(user).await);

        let info = registry.info(ep.id).await.unwrap();
        assert_eq!(info.user_id, user);
    }

    #[tokio::test]
    async fn heartbeat_after_remove_is_unknown() {
        let registry = registry(true);
        let ep = registry
            .register(UserId::new(), Capabilities::full())
            .await
            .unwrap();

        registry.heartbeat(ep.id).await.unwrap();
        registry.remove(ep.id).await.unwrap();

        assert!(matches!(
            registry.heartbeat(ep.id).await,
            Err(SignalError::UnknownEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn single_device_policy_rejects_second_registration() {
        let registry = registry(false);
        let user = UserId::new();

        registry.register(user, Capabilities::full()).await.unwrap();
        assert!(matches!(
            registry.register(user, Capabilities::full()).await,
            Err(SignalError::DuplicateSession(_))
        ));

        // A different user is unaffected.
        registry
            .register(UserId::new(), Capabilities::full())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn capability_filter_excludes_voice_only_from_video() {
        let registry = registry(true);
        let user = UserId::new();

        registry
            .register(user, Capabilities::voice_only())
            .await
            .unwrap();
        let full = registry.register(user, Capabilities::full()).await.unwrap();

        let video = registry.user_endpoints_for(user, CallKind::Video).await;
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].id, full.id);

        let voice = registry.user_endpoints_for(user, CallKind::Voice).await;
        assert_eq!(voice.len(), 2);
    }

    #[tokio::test]
    async fn receiver_is_taken_exactly_once() {
        let registry = registry(true);
        let ep = registry
            .register(UserId::new(), Capabilities::full())
            .await
            .unwrap();

        assert!(registry.take_receiver(ep.id).await.unwrap().is_some());
        assert!(registry.take_receiver(ep.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_detection_respects_timeout() {
        let registry = SessionRegistry::new(RegistryConfig {
            heartbeat_timeout: Duration::from_millis(20),
            ..RegistryConfig::default()
        });
        let ep = registry
            .register(UserId::new(), Capabilities::full())
            .await
            .unwrap();

        assert!(registry.stale_endpoints().await.is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(registry.stale_endpoints().await, vec![ep.id]);

        registry.heartbeat(ep.id).await.unwrap();
        assert!(registry.stale_endpoints().await.is_empty());
    }
}
