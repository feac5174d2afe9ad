// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Deployment Aggregate
//!
//! A deployment artifact is the immutable, serialized form of one API bound to
//! one gateway. Artifacts are append-only; which of them is live is recorded
//! separately by a single [`DeploymentStatusPointer`] per binding, and every
//! other artifact of the binding is [`DeploymentStatus::Archived`].
//!
//! ```text
//!            deploy / restore                undeploy
//! (created) ───────────────────▶ DEPLOYED ─────────────▶ UNDEPLOYED
//!                                  │  ▲                      │
//!          another artifact        │  │ restore              │ another artifact
//!          becomes current         ▼  │                      ▼ becomes current
//!                                ARCHIVED ◀──────────────────┘
//! ```
//!
//! Only ARCHIVED artifacts are reclaimed by retention, and only non-DEPLOYED
//! artifacts may be deleted explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::api::{uuid_id, ApiId, GatewayId, OrganizationId};
use crate::domain::repository::RepositoryError;

uuid_id!(
    /// Unique identifier for a deployment artifact
    DeploymentId
);

/// Extra artifacts kept on top of the configured soft limit before eviction kicks in
pub const DEPLOYMENT_LIMIT_BUFFER: usize = 5;

/// Selector value meaning "snapshot the API's live configuration"
pub const BASE_CURRENT: &str = "current";

/// Metadata key carrying an upstream endpoint override
pub const METADATA_ENDPOINT_URL: &str = "endpointUrl";

/// Derived status of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Deployed,
    Undeployed,
    Archived,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "DEPLOYED",
            Self::Undeployed => "UNDEPLOYED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Resolve the status of `deployment_id` given the binding's pointer, if any
    pub fn derive(
        deployment_id: DeploymentId,
        pointer: Option<&DeploymentStatusPointer>,
    ) -> Self {
        match pointer {
            Some(p) if p.deployment_id == deployment_id => p.status.into(),
            _ => Self::Archived,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEPLOYED" => Ok(Self::Deployed),
            "UNDEPLOYED" => Ok(Self::Undeployed),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(DeploymentError::InvalidInput(format!(
                "unknown deployment status '{}'; expected DEPLOYED, UNDEPLOYED or ARCHIVED",
                other
            ))),
        }
    }
}

/// The two values a pointer row may hold. ARCHIVED is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointerStatus {
    Deployed,
    Undeployed,
}

impl PointerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "DEPLOYED",
            Self::Undeployed => "UNDEPLOYED",
        }
    }
}

impl FromStr for PointerStatus {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPLOYED" => Ok(Self::Deployed),
            "UNDEPLOYED" => Ok(Self::Undeployed),
            other => Err(RepositoryError::Serialization(format!(
                "invalid pointer status '{}'",
                other
            ))),
        }
    }
}

impl From<PointerStatus> for DeploymentStatus {
    fn from(status: PointerStatus) -> Self {
        match status {
            PointerStatus::Deployed => Self::Deployed,
            PointerStatus::Undeployed => Self::Undeployed,
        }
    }
}

/// Immutable deployment artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentArtifact {
    pub deployment_id: DeploymentId,
    pub api_id: ApiId,
    pub organization_id: OrganizationId,
    pub gateway_id: GatewayId,
    pub name: String,
    pub base_deployment_id: Option<DeploymentId>,
    /// Serialized deployment document; never rewritten after creation
    pub content: Vec<u8>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl DeploymentArtifact {
    pub fn new(
        binding: Binding,
        name: String,
        base_deployment_id: Option<DeploymentId>,
        content: Vec<u8>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            deployment_id: DeploymentId::new(),
            api_id: binding.api_id,
            organization_id: binding.organization_id,
            gateway_id: binding.gateway_id,
            name,
            base_deployment_id,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn binding(&self) -> Binding {
        Binding {
            api_id: self.api_id,
            organization_id: self.organization_id,
            gateway_id: self.gateway_id,
        }
    }
}

/// (API, gateway) pair an artifact is scoped to, plus the owning organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub api_id: ApiId,
    pub organization_id: OrganizationId,
    pub gateway_id: GatewayId,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api={} gateway={}", self.api_id, self.gateway_id)
    }
}

/// Current pointer for a binding; at most one per (api, gateway)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusPointer {
    pub api_id: ApiId,
    pub organization_id: OrganizationId,
    pub gateway_id: GatewayId,
    pub deployment_id: DeploymentId,
    pub status: PointerStatus,
    pub updated_at: DateTime<Utc>,
}

/// Artifact joined with its derived status
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactView {
    pub artifact: DeploymentArtifact,
    pub status: DeploymentStatus,
    /// Pointer timestamp, present only when the pointer references this artifact
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl ArtifactView {
    pub fn from_pointer(
        artifact: DeploymentArtifact,
        pointer: Option<&DeploymentStatusPointer>,
    ) -> Self {
        let status = DeploymentStatus::derive(artifact.deployment_id, pointer);
        let status_updated_at = match pointer {
            Some(p) if p.deployment_id == artifact.deployment_id => Some(p.updated_at),
            _ => None,
        };
        Self {
            artifact,
            status,
            status_updated_at,
        }
    }
}

/// Where the content of a new artifact comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseSelector {
    /// Serialize the API's live configuration
    Current,
    /// Clone an existing artifact byte-for-byte
    Deployment(DeploymentId),
}

impl FromStr for BaseSelector {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DeploymentError::InvalidInput("base is required".to_string()));
        }
        if trimmed == BASE_CURRENT {
            return Ok(Self::Current);
        }
        DeploymentId::from_string(trimmed)
            .map(Self::Deployment)
            .map_err(|_| {
                DeploymentError::InvalidInput(format!(
                    "base must be '{}' or a deployment id, got '{}'",
                    BASE_CURRENT, trimmed
                ))
            })
    }
}

/// Per-binding retention window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub soft_limit: usize,
}

impl RetentionPolicy {
    pub fn new(soft_limit: usize) -> Self {
        Self { soft_limit }
    }

    pub fn hard_limit(&self) -> usize {
        self.soft_limit + DEPLOYMENT_LIMIT_BUFFER
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Coarse classification used by callers that map errors to transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    PreconditionFailed,
    StoreFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("API not found: {0}")]
    ApiNotFound(String),

    #[error("gateway not found: {0}")]
    GatewayNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("base deployment not found: {0}")]
    BaseDeploymentNotFound(DeploymentId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpointUrl(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("API has no backend services attached; attach an upstream before deploying")]
    NoBackendServices,

    #[error("deployment {0} is already the deployed revision for this gateway")]
    DeploymentAlreadyDeployed(DeploymentId),

    #[error("deployment {0} is not currently deployed")]
    DeploymentNotActive(DeploymentId),

    #[error("deployment {0} is deployed and cannot be deleted; undeploy it first")]
    DeploymentIsDeployed(DeploymentId),

    #[error("deployment is bound to gateway {bound}, not {requested}")]
    GatewayIdMismatch {
        bound: GatewayId,
        requested: GatewayId,
    },

    #[error("deployment content error: {0}")]
    Content(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl DeploymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiNotFound(_)
            | Self::GatewayNotFound(_)
            | Self::DeploymentNotFound(_)
            | Self::BaseDeploymentNotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) | Self::InvalidEndpointUrl(_) | Self::InvalidMetadata(_) => {
                ErrorKind::InvalidInput
            }
            Self::NoBackendServices
            | Self::DeploymentAlreadyDeployed(_)
            | Self::DeploymentNotActive(_)
            | Self::DeploymentIsDeployed(_)
            | Self::GatewayIdMismatch { .. } => ErrorKind::PreconditionFailed,
            Self::Repository(RepositoryError::NotFound(_)) => ErrorKind::NotFound,
            Self::Repository(_) => ErrorKind::StoreFailure,
            Self::Content(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(deployment_id: DeploymentId, status: PointerStatus) -> DeploymentStatusPointer {
        DeploymentStatusPointer {
            api_id: ApiId::new(),
            organization_id: OrganizationId::new(),
            gateway_id: GatewayId::new(),
            deployment_id,
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_defaults_to_archived_without_pointer() {
        assert_eq!(
            DeploymentStatus::derive(DeploymentId::new(), None),
            DeploymentStatus::Archived
        );
    }

    #[test]
    fn test_status_follows_pointer_only_for_its_target() {
        let current = DeploymentId::new();
        let p = pointer(current, PointerStatus::Undeployed);

        assert_eq!(
            DeploymentStatus::derive(current, Some(&p)),
            DeploymentStatus::Undeployed
        );
        assert_eq!(
            DeploymentStatus::derive(DeploymentId::new(), Some(&p)),
            DeploymentStatus::Archived
        );
    }

    #[test]
    fn test_base_selector_parsing() {
        assert_eq!("current".parse::<BaseSelector>().unwrap(), BaseSelector::Current);

        let id = DeploymentId::new();
        assert_eq!(
            id.to_string().parse::<BaseSelector>().unwrap(),
            BaseSelector::Deployment(id)
        );

        assert!(matches!(
            "".parse::<BaseSelector>(),
            Err(DeploymentError::InvalidInput(_))
        ));
        assert!(matches!(
            "latest".parse::<BaseSelector>(),
            Err(DeploymentError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_hard_limit_adds_buffer() {
        assert_eq!(RetentionPolicy::new(3).hard_limit(), 3 + DEPLOYMENT_LIMIT_BUFFER);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(
            "undeployed".parse::<DeploymentStatus>().unwrap(),
            DeploymentStatus::Undeployed
        );
        assert!("live".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn test_error_kinds() {
        let id = DeploymentId::new();
        assert_eq!(
            DeploymentError::DeploymentIsDeployed(id).kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(DeploymentError::DeploymentNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            DeploymentError::Repository(RepositoryError::Database("down".into())).kind(),
            ErrorKind::StoreFailure
        );
    }
}
