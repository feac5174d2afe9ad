// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve deployment artifacts and catalog records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL
//!
//! - **PostgresArtifactStore** - artifacts plus the per-binding pointer table,
//!   each compound operation in one transaction
//!
//! ## In-Memory
//!
//! - **InMemoryArtifactStore** - mutex-guarded artifact store
//! - **InMemoryApiRepository** / **InMemoryGatewayRepository** - catalog
//!   records seeded from the catalog file
//! - **InMemoryAssociationRepository** - API/gateway association bookkeeping

pub mod in_memory_artifact;
pub mod postgres_artifact;

pub use in_memory_artifact::InMemoryArtifactStore;
pub use postgres_artifact::PostgresArtifactStore;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::api::{Api, ApiGatewayAssociation, ApiId, Gateway, GatewayId, OrganizationId};
use crate::domain::repository::{
    ApiGatewayAssociationRepository, ApiRepository, GatewayRepository, RepositoryError,
};

#[derive(Clone, Default)]
pub struct InMemoryApiRepository {
    apis: Arc<RwLock<HashMap<ApiId, Api>>>,
}

impl InMemoryApiRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiRepository for InMemoryApiRepository {
    async fn find_by_id(
        &self,
        id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<Api>, RepositoryError> {
        let apis = self.apis.read();
        Ok(apis
            .get(&id)
            .filter(|api| api.organization_id == organization_id)
            .cloned())
    }

    async fn find_by_handle(
        &self,
        handle: &str,
        organization_id: OrganizationId,
    ) -> Result<Option<Api>, RepositoryError> {
        let apis = self.apis.read();
        Ok(apis
            .values()
            .find(|api| api.handle == handle && api.organization_id == organization_id)
            .cloned())
    }

    async fn save(&self, api: &Api) -> Result<(), RepositoryError> {
        let mut apis = self.apis.write();
        let handle_taken = apis.values().any(|existing| {
            existing.id != api.id
                && existing.handle == api.handle
                && existing.organization_id == api.organization_id
        });
        if handle_taken {
            return Err(RepositoryError::Conflict(format!(
                "handle '{}' is already used in organization {}",
                api.handle, api.organization_id
            )));
        }
        apis.insert(api.id, api.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryGatewayRepository {
    gateways: Arc<RwLock<HashMap<GatewayId, Gateway>>>,
}

impl InMemoryGatewayRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GatewayRepository for InMemoryGatewayRepository {
    async fn find_by_id(&self, id: GatewayId) -> Result<Option<Gateway>, RepositoryError> {
        Ok(self.gateways.read().get(&id).cloned())
    }

    async fn save(&self, gateway: &Gateway) -> Result<(), RepositoryError> {
        self.gateways.write().insert(gateway.id, gateway.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAssociationRepository {
    associations: Arc<RwLock<Vec<ApiGatewayAssociation>>>,
}

impl InMemoryAssociationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiGatewayAssociationRepository for InMemoryAssociationRepository {
    async fn exists(
        &self,
        api_id: ApiId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.associations.read().iter().any(|a| {
            a.api_id == api_id && a.gateway_id == gateway_id && a.organization_id == organization_id
        }))
    }

    async fn create(&self, association: &ApiGatewayAssociation) -> Result<(), RepositoryError> {
        let mut associations = self.associations.write();
        let duplicate = associations.iter().any(|a| {
            a.api_id == association.api_id
                && a.gateway_id == association.gateway_id
                && a.organization_id == association.organization_id
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "API {} is already associated with gateway {}",
                association.api_id, association.gateway_id
            )));
        }
        associations.push(association.clone());
        Ok(())
    }

    async fn list_by_api(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Vec<ApiGatewayAssociation>, RepositoryError> {
        Ok(self
            .associations
            .read()
            .iter()
            .filter(|a| a.api_id == api_id && a.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn api(org: OrganizationId, handle: &str) -> Api {
        Api {
            id: ApiId::new(),
            handle: handle.to_string(),
            organization_id: org,
            name: "Users".to_string(),
            version: "v1".to_string(),
            context: "/users".to_string(),
            backend_services: vec![],
            operations: vec![],
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_api_lookup_scoped_by_organization() {
        let repo = InMemoryApiRepository::new();
        let org = OrganizationId::new();
        let users = api(org, "users");
        repo.save(&users).await.unwrap();

        assert!(repo.find_by_id(users.id, org).await.unwrap().is_some());
        assert!(repo
            .find_by_id(users.id, OrganizationId::new())
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            repo.find_by_handle("users", org).await.unwrap().map(|a| a.id),
            Some(users.id)
        );
    }

    #[tokio::test]
    async fn test_duplicate_handle_rejected() {
        let repo = InMemoryApiRepository::new();
        let org = OrganizationId::new();
        repo.save(&api(org, "users")).await.unwrap();
        assert!(matches!(
            repo.save(&api(org, "users")).await,
            Err(RepositoryError::Conflict(_))
        ));
        repo.save(&api(OrganizationId::new(), "users")).await.unwrap();
    }

    #[tokio::test]
    async fn test_association_create_is_unique() {
        let repo = InMemoryAssociationRepository::new();
        let association =
            ApiGatewayAssociation::new(ApiId::new(), GatewayId::new(), OrganizationId::new());

        repo.create(&association).await.unwrap();
        assert!(repo
            .exists(
                association.api_id,
                association.gateway_id,
                association.organization_id
            )
            .await
            .unwrap());
        assert!(repo.create(&association).await.is_err());
        assert_eq!(
            repo.list_by_api(association.api_id, association.organization_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
