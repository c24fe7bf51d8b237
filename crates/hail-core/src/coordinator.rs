//! Component wiring and lifecycle cascades.
//!
//! The [`Coordinator`] owns the registry, call manager, signaling router,
//! presence broadcaster and ledger, and runs the operations that span more
//! than one of them: registration (table insert + presence), deregistration
//! (table removal + call failure cascade + presence), and the heartbeat
//! sweep.

use std::sync::Arc;

use tracing::info;

use hail_shared::types::{Capabilities, EndpointId, FailReason, PresenceStatus, UserId};
use hail_shared::error::Result;
use hail_shared::SignalError;

use hail_store::Ledger;

use crate::call::{CallConfig, CallManager};
use crate::presence::PresenceBroadcaster;
use crate::registry::{RegisteredEndpoint, RegistryConfig, SessionRegistry};
use crate::router::SignalingRouter;

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub registry: RegistryConfig,
    pub call: CallConfig,
}

pub struct Coordinator {
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceBroadcaster>,
    pub calls: Arc<CallManager>,
    pub router: SignalingRouter,
    pub ledger: Arc<Ledger>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, ledger: Ledger) -> Self {
        let ledger = Arc::new(ledger);
        let registry = Arc::new(SessionRegistry::new(config.registry));
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let calls = CallManager::new(
            config.call,
            registry.clone(),
            presence.clone(),
            ledger.clone(),
        );
        let router = SignalingRouter::new(calls.clone(), registry.clone());

        Self {
            registry,
            presence,
            calls,
            router,
            ledger,
        }
    }

    /// Register a new endpoint and announce the user online.
    pub async fn register(
        &self,
        user_id: UserId,
        capabilities: Capabilities,
    ) -> Result<RegisteredEndpoint> {
        let endpoint = self.registry.register(user_id, capabilities).await?;
        self.presence.publish(user_id, PresenceStatus::Online).await;
        Ok(endpoint)
    }

    /// Remove an endpoint and run the failure cascade: any call it was
    /// party to fails with `peer_disconnected`, its watches are dropped,
    /// and the user goes offline once their last endpoint is gone.
    pub async fn deregister(&self, endpoint: EndpointId) -> Result<()> {
        let info = self
            .registry
            .remove(endpoint)
            .await
            .ok_or(SignalError::UnknownEndpoint(endpoint))?;

        self.presence.unsubscribe_endpoint(endpoint).await;
        self.calls
            .fail_endpoint(endpoint, FailReason::PeerDisconnected)
            .await;

        if !self.registry.user_is_online(info.user_id).await {
            self.presence
                .publish(info.user_id, PresenceStatus::Offline)
                .await;
        }

        Ok(())
    }

    /// Evict every endpoint whose heartbeat has lapsed, applying the same
    /// cascade as an explicit deregistration.  Returns how many were
    /// evicted.
    pub async fn sweep_stale(&self) -> usize {
        let stale = self.registry.stale_endpoints().await;
        let mut evicted = 0;
        for endpoint in stale {
            // A concurrent explicit deregister may have won the race.
            if self.deregister(endpoint).await.is_ok() {
                info!(endpoint = %endpoint, "Evicted stale endpoint");
                evicted += 1;
            }
        }
        evicted
    }
}
