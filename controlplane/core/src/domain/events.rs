// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Gateway Events
//!
//! Typed notifications pushed from the control plane to gateway nodes. Every
//! payload carries enough identifiers (api, deployment, vhost, environment)
//! for the gateway to act without calling back.
//!
//! On the wire each event is wrapped in a JSON envelope:
//!
//! ```json
//! { "type": "api.deployed", "payload": { ... },
//!   "timestamp": "2026-01-01T00:00:00Z", "correlationId": "...", "userId": "..." }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::api::{ApiId, Gateway};
use crate::domain::deployment::DeploymentId;

/// Upper bound on a serialized event payload (1 MiB)
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ApiDeployed,
    ApiUndeployed,
    ApiKeyCreated,
    ApiKeyUpdated,
    ApiKeyRevoked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiDeployed => "api.deployed",
            Self::ApiUndeployed => "api.undeployed",
            Self::ApiKeyCreated => "apikey.created",
            Self::ApiKeyUpdated => "apikey.updated",
            Self::ApiKeyRevoked => "apikey.revoked",
        }
    }

    pub fn is_api_key_event(&self) -> bool {
        matches!(
            self,
            Self::ApiKeyCreated | Self::ApiKeyUpdated | Self::ApiKeyRevoked
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
}

/// How many times the broadcaster attempts one event before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// Fixed pause between attempts; a zero delay means none
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: if delay.is_zero() {
                Backoff::None
            } else {
                Backoff::Fixed(delay)
            },
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        match self.backoff {
            Backoff::None => None,
            Backoff::Fixed(d) => Some(d),
        }
    }
}

/// Retry policy per event kind.
///
/// Deployment events are sent once: the durable state already changed and a
/// stale gateway reconciles on reconnect. Key lifecycle events get a short
/// immediate retry since revocations are time-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRetryPolicies {
    pub deployment: RetryPolicy,
    pub api_key: RetryPolicy,
}

impl EventRetryPolicies {
    pub fn for_kind(&self, kind: EventKind) -> RetryPolicy {
        if kind.is_api_key_event() {
            self.api_key
        } else {
            self.deployment
        }
    }
}

impl Default for EventRetryPolicies {
    fn default() -> Self {
        Self {
            deployment: RetryPolicy::once(),
            api_key: RetryPolicy::immediate(2),
        }
    }
}

/// Event-specific payload with its fixed wire type
pub trait GatewayEventPayload: Serialize + Send + Sync {
    fn kind(&self) -> EventKind;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDeploymentEvent {
    pub api_id: ApiId,
    pub deployment_id: DeploymentId,
    pub vhost: String,
    pub environment: String,
}

impl ApiDeploymentEvent {
    pub fn new(api_id: ApiId, deployment_id: DeploymentId, gateway: &Gateway) -> Self {
        Self {
            api_id,
            deployment_id,
            vhost: gateway.vhost.clone(),
            environment: gateway.environment.clone(),
        }
    }
}

impl GatewayEventPayload for ApiDeploymentEvent {
    fn kind(&self) -> EventKind {
        EventKind::ApiDeployed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUndeploymentEvent {
    pub api_id: ApiId,
    pub deployment_id: DeploymentId,
    pub vhost: String,
    pub environment: String,
}

impl ApiUndeploymentEvent {
    pub fn new(api_id: ApiId, deployment_id: DeploymentId, gateway: &Gateway) -> Self {
        Self {
            api_id,
            deployment_id,
            vhost: gateway.vhost.clone(),
            environment: gateway.environment.clone(),
        }
    }
}

impl GatewayEventPayload for ApiUndeploymentEvent {
    fn kind(&self) -> EventKind {
        EventKind::ApiUndeployed
    }
}

/// Key created or rotated. `api_key` is the value the gateway validates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyEvent {
    pub api_id: ApiId,
    pub key_name: String,
    pub api_key: String,
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub vhost: String,
    pub environment: String,
    #[serde(skip)]
    pub rotated: bool,
}

impl GatewayEventPayload for ApiKeyEvent {
    fn kind(&self) -> EventKind {
        if self.rotated {
            EventKind::ApiKeyUpdated
        } else {
            EventKind::ApiKeyCreated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRevokedEvent {
    pub api_id: ApiId,
    pub key_name: String,
    pub vhost: String,
    pub environment: String,
}

impl GatewayEventPayload for ApiKeyRevokedEvent {
    fn kind(&self) -> EventKind {
        EventKind::ApiKeyRevoked
    }
}

/// Wire envelope shared by all event kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEventEnvelope<P> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: P,
    pub timestamp: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl<P> GatewayEventEnvelope<P> {
    pub fn new(kind: EventKind, payload: P, correlation_id: String, user_id: Option<String>) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            payload,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            correlation_id,
            user_id,
        }
    }
}
