// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts the deployment lifecycle depends on, defined in the
//! domain layer and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Records | Implementations |
//! |-------|---------|----------------|
//! | `ArtifactStore` | `DeploymentArtifact` + `DeploymentStatusPointer` | `InMemoryArtifactStore`, `PostgresArtifactStore` |
//! | `ApiRepository` | `Api` | `InMemoryApiRepository` |
//! | `GatewayRepository` | `Gateway` | `InMemoryGatewayRepository` |
//! | `ApiGatewayAssociationRepository` | `ApiGatewayAssociation` | `InMemoryAssociationRepository` |
//!
//! ## Atomicity
//!
//! Every `ArtifactStore` method that reads the current pointer and then writes
//! is ONE store operation. The lifecycle manager never reads a pointer and
//! writes it back in two calls; it states what it expects via
//! [`PointerExpectation`] and lets the store compare-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::api::{Api, ApiGatewayAssociation, ApiId, Gateway, GatewayId, OrganizationId};
use crate::domain::deployment::{
    ArtifactView, DeploymentArtifact, DeploymentId, DeploymentStatus, DeploymentStatusPointer,
    PointerStatus,
};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Condition on the binding's pointer that must hold for `set_current` to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerExpectation {
    /// Unconditional
    Any,
    /// The target must not already be the DEPLOYED artifact
    NotDeployed,
    /// The target must currently be the DEPLOYED artifact
    Deployed,
}

impl PointerExpectation {
    pub fn holds(
        &self,
        deployment_id: DeploymentId,
        pointer: Option<&DeploymentStatusPointer>,
    ) -> bool {
        let current = DeploymentStatus::derive(deployment_id, pointer);
        match self {
            Self::Any => true,
            Self::NotDeployed => current != DeploymentStatus::Deployed,
            Self::Deployed => current == DeploymentStatus::Deployed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetCurrentRequest {
    pub api_id: ApiId,
    pub organization_id: OrganizationId,
    pub gateway_id: GatewayId,
    pub deployment_id: DeploymentId,
    pub status: PointerStatus,
    pub expect: PointerExpectation,
}

#[derive(Debug, Clone)]
pub struct ArtifactQuery {
    pub api_id: ApiId,
    pub organization_id: OrganizationId,
    pub gateway_id: Option<GatewayId>,
    pub status: Option<DeploymentStatus>,
    pub limit: usize,
}

/// Durable storage for deployment artifacts and per-binding current pointers
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert `artifact` and make it the DEPLOYED pointer for its binding.
    ///
    /// If the binding would then hold more than `hard_limit` artifacts, the
    /// oldest ARCHIVED one is deleted first. At most one artifact is evicted
    /// per call; its id is returned.
    async fn create_artifact_and_set_current(
        &self,
        artifact: &DeploymentArtifact,
        hard_limit: usize,
    ) -> Result<Option<DeploymentId>, RepositoryError>;

    async fn get_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<DeploymentArtifact>, RepositoryError>;

    async fn get_artifact_with_status(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<ArtifactView>, RepositoryError>;

    /// Point the binding at `deployment_id` with `status`, creating the row if
    /// none exists. Returns `Conflict` when `expect` does not hold.
    async fn set_current(&self, request: SetCurrentRequest) -> Result<DateTime<Utc>, RepositoryError>;

    /// Newest first
    async fn list_artifacts_with_status(
        &self,
        query: ArtifactQuery,
    ) -> Result<Vec<ArtifactView>, RepositoryError>;

    /// Remove a non-DEPLOYED artifact. A pointer still referencing it
    /// (UNDEPLOYED) goes with it. Returns `Conflict` if it is DEPLOYED,
    /// `NotFound` if absent.
    async fn delete_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<(), RepositoryError>;

    async fn get_current_pointer(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
    ) -> Result<Option<DeploymentStatusPointer>, RepositoryError>;
}

#[async_trait]
pub trait ApiRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<Api>, RepositoryError>;

    async fn find_by_handle(
        &self,
        handle: &str,
        organization_id: OrganizationId,
    ) -> Result<Option<Api>, RepositoryError>;

    async fn save(&self, api: &Api) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait GatewayRepository: Send + Sync {
    async fn find_by_id(&self, id: GatewayId) -> Result<Option<Gateway>, RepositoryError>;

    async fn save(&self, gateway: &Gateway) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApiGatewayAssociationRepository: Send + Sync {
    async fn exists(
        &self,
        api_id: ApiId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<bool, RepositoryError>;

    async fn create(&self, association: &ApiGatewayAssociation) -> Result<(), RepositoryError>;

    async fn list_by_api(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Vec<ApiGatewayAssociation>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
