// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway Event Broadcaster
//!
//! Serializes a typed gateway event once and fans it out to every live
//! connection of the target gateway. A broadcast succeeds when at least one
//! connection accepts the envelope; connections that fail get their counters
//! bumped and are otherwise left alone.
//!
//! Retries are per event kind (see [`EventRetryPolicies`]) and reuse the same
//! envelope, so a gateway can de-duplicate on `correlationId`.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::api::{ApiId, Gateway, GatewayId};
use crate::domain::connection::ConnectionRegistry;
use crate::domain::deployment::DeploymentId;
use crate::domain::events::{
    ApiDeploymentEvent, ApiKeyEvent, ApiKeyRevokedEvent, ApiUndeploymentEvent, EventKind,
    EventRetryPolicies, GatewayEventEnvelope, GatewayEventPayload, MAX_EVENT_PAYLOAD_BYTES,
};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("no active connections for gateway {0}")]
    NoActiveConnections(GatewayId),

    #[error("event payload is {size} bytes, limit is {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery failed on all {attempted} connections: {last_error}")]
    AllDeliveriesFailed { attempted: usize, last_error: String },
}

impl BroadcastError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoActiveConnections(_) | Self::AllDeliveriesFailed { .. }
        )
    }
}

/// Outcome of a successful broadcast (the final attempt)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub correlation_id: String,
    pub delivered: usize,
    pub failed: usize,
    pub attempts: u32,
}

pub struct GatewayEventBroadcaster {
    registry: Arc<dyn ConnectionRegistry>,
    policies: EventRetryPolicies,
}

impl GatewayEventBroadcaster {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, policies: EventRetryPolicies) -> Self {
        Self { registry, policies }
    }

    pub async fn broadcast<P: GatewayEventPayload>(
        &self,
        gateway_id: GatewayId,
        payload: &P,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let kind = payload.kind();
        let correlation_id = Uuid::new_v4().to_string();

        let size = serde_json::to_vec(payload)?.len();
        if size > MAX_EVENT_PAYLOAD_BYTES {
            return Err(BroadcastError::PayloadTooLarge {
                size,
                max: MAX_EVENT_PAYLOAD_BYTES,
            });
        }

        let envelope = GatewayEventEnvelope::new(
            kind,
            payload,
            correlation_id.clone(),
            user_id.map(str::to_string),
        );
        let message = Bytes::from(serde_json::to_vec(&envelope)?);

        let policy = self.policies.for_kind(kind);
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.deliver(gateway_id, kind, &message).await {
                Ok((delivered, failed)) => {
                    debug!(
                        "Broadcast {} [{}] to gateway {}: {} delivered, {} failed",
                        kind, correlation_id, gateway_id, delivered, failed
                    );
                    return Ok(BroadcastReport {
                        correlation_id,
                        delivered,
                        failed,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Broadcast {} [{}] attempt {}/{} failed: {}",
                        kind, correlation_id, attempt, max_attempts, e
                    );
                    if let Some(delay) = policy.delay() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One fan-out over the connections registered right now
    async fn deliver(
        &self,
        gateway_id: GatewayId,
        kind: EventKind,
        message: &Bytes,
    ) -> Result<(usize, usize), BroadcastError> {
        let connections = self.registry.get_connections(gateway_id);
        if connections.is_empty() {
            return Err(BroadcastError::NoActiveConnections(gateway_id));
        }

        let results = join_all(connections.iter().map(|conn| {
            let message = message.clone();
            async move { (conn, conn.send(message).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut last_error = None;
        for (conn, result) in results {
            match result {
                Ok(()) => {
                    conn.stats().increment_total_sent();
                    delivered += 1;
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(
                        "Failed to deliver {} to connection {} of gateway {}: {}",
                        kind,
                        conn.connection_id(),
                        gateway_id,
                        reason
                    );
                    conn.stats().increment_failed(reason.clone());
                    last_error = Some(reason);
                }
            }
        }

        let failed = connections.len() - delivered;
        metrics::counter!("gateway_events_sent_total", "event_type" => kind.as_str())
            .increment(delivered as u64);
        metrics::counter!("gateway_events_failed_total", "event_type" => kind.as_str())
            .increment(failed as u64);

        if delivered == 0 {
            return Err(BroadcastError::AllDeliveriesFailed {
                attempted: connections.len(),
                last_error: last_error.unwrap_or_default(),
            });
        }
        Ok((delivered, failed))
    }

    pub async fn broadcast_deployment(
        &self,
        gateway: &Gateway,
        api_id: ApiId,
        deployment_id: DeploymentId,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let event = ApiDeploymentEvent::new(api_id, deployment_id, gateway);
        self.broadcast(gateway.id, &event, user_id).await
    }

    pub async fn broadcast_undeployment(
        &self,
        gateway: &Gateway,
        api_id: ApiId,
        deployment_id: DeploymentId,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let event = ApiUndeploymentEvent::new(api_id, deployment_id, gateway);
        self.broadcast(gateway.id, &event, user_id).await
    }

    pub async fn broadcast_api_key_created(
        &self,
        gateway_id: GatewayId,
        event: ApiKeyEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let event = ApiKeyEvent {
            rotated: false,
            ..event
        };
        self.broadcast(gateway_id, &event, user_id).await
    }

    pub async fn broadcast_api_key_updated(
        &self,
        gateway_id: GatewayId,
        event: ApiKeyEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let event = ApiKeyEvent {
            rotated: true,
            ..event
        };
        self.broadcast(gateway_id, &event, user_id).await
    }

    pub async fn broadcast_api_key_revoked(
        &self,
        gateway_id: GatewayId,
        event: &ApiKeyRevokedEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastReport, BroadcastError> {
        self.broadcast(gateway_id, event, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::OrganizationId;
    use crate::infrastructure::{ChannelConnection, InMemoryConnectionRegistry};
    use std::time::Duration;

    fn gateway() -> Gateway {
        Gateway {
            id: GatewayId::new(),
            organization_id: OrganizationId::new(),
            name: "edge".to_string(),
            vhost: "api.example.com".to_string(),
            environment: "production".to_string(),
        }
    }

    #[tokio::test]
    async fn test_envelope_reaches_every_connection() {
        let gateway = gateway();
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        let (a, mut rx_a) = ChannelConnection::new("a", gateway.id, 4, Duration::from_secs(1));
        let (b, mut rx_b) = ChannelConnection::new("b", gateway.id, 4, Duration::from_secs(1));
        registry.register(Arc::new(a));
        registry.register(Arc::new(b));

        let broadcaster = GatewayEventBroadcaster::new(registry, EventRetryPolicies::default());
        let api_id = ApiId::new();
        let deployment_id = DeploymentId::new();
        let report = broadcaster
            .broadcast_deployment(&gateway, api_id, deployment_id, Some("alice"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);
        for rx in [&mut rx_a, &mut rx_b] {
            let message = rx.recv().await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&message).unwrap();
            assert_eq!(json["type"], "api.deployed");
            assert_eq!(json["correlationId"], report.correlation_id);
            assert_eq!(json["userId"], "alice");
            assert_eq!(json["payload"]["deploymentId"], deployment_id.to_string());
            assert_eq!(json["payload"]["environment"], "production");
        }
    }

    #[tokio::test]
    async fn test_revoked_key_event_wire_type() {
        let gateway = gateway();
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        let (conn, mut rx) = ChannelConnection::new("a", gateway.id, 4, Duration::from_secs(1));
        registry.register(Arc::new(conn));

        let broadcaster = GatewayEventBroadcaster::new(registry, EventRetryPolicies::default());
        let event = ApiKeyRevokedEvent {
            api_id: ApiId::new(),
            key_name: "mobile".to_string(),
            vhost: gateway.vhost.clone(),
            environment: gateway.environment.clone(),
        };
        let report = broadcaster
            .broadcast_api_key_revoked(gateway.id, &event, None)
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);

        let json: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(json["type"], "apikey.revoked");
        assert_eq!(json["payload"]["keyName"], "mobile");
    }
}
