// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Lifecycle Manager
//!
//! Owns the artifact state machine for every (API, gateway) binding:
//! - creating artifacts from the live API or from an earlier artifact
//! - moving the current pointer (restore, undeploy)
//! - retention and explicit deletion
//!
//! Every pointer transition is a single `ArtifactStore` call carrying a
//! [`PointerExpectation`]; the pre-checks done here only pick the error
//! message, the store decides.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::api::{Api, ApiId, GatewayId, OrganizationId};
use crate::domain::deployment::{
    ArtifactView, BaseSelector, Binding, DeploymentArtifact, DeploymentError, DeploymentId,
    DeploymentStatus, PointerStatus, RetentionPolicy,
};
use crate::domain::deployment_document::{
    apply_endpoint_override, endpoint_override, DeploymentContentSerializer,
};
use crate::domain::repository::{
    ArtifactQuery, ArtifactStore, PointerExpectation, RepositoryError, SetCurrentRequest,
};

/// Raw deploy parameters as a caller supplies them
#[derive(Debug, Clone, Default)]
pub struct DeployInput {
    pub base: String,
    pub name: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Deploy parameters that passed input validation
#[derive(Debug, Clone)]
pub struct ValidatedDeploy {
    pub base: BaseSelector,
    pub name: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub endpoint_override: Option<String>,
}

impl DeployInput {
    /// Input checks that need no store access
    pub fn validate(self) -> Result<ValidatedDeploy, DeploymentError> {
        let base: BaseSelector = self.base.parse()?;
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DeploymentError::InvalidInput("name is required".to_string()));
        }
        let endpoint_override = endpoint_override(&self.metadata)?;

        Ok(ValidatedDeploy {
            base,
            name,
            metadata: self.metadata,
            endpoint_override,
        })
    }
}

pub struct DeploymentLifecycleManager {
    store: Arc<dyn ArtifactStore>,
    serializer: Arc<dyn DeploymentContentSerializer>,
    retention: RetentionPolicy,
}

impl DeploymentLifecycleManager {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        serializer: Arc<dyn DeploymentContentSerializer>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            serializer,
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Create an artifact for `api` on `gateway_id` and make it the DEPLOYED one.
    ///
    /// Existence of the API and gateway is the caller's concern; `api` is
    /// assumed to belong to its own `organization_id`.
    pub async fn deploy(
        &self,
        api: &Api,
        gateway_id: GatewayId,
        deploy: ValidatedDeploy,
    ) -> Result<ArtifactView, DeploymentError> {
        let organization_id = api.organization_id;

        let (content, base_deployment_id) = match deploy.base {
            BaseSelector::Current => (self.serializer.serialize(api)?, None),
            BaseSelector::Deployment(base_id) => {
                let base = self
                    .store
                    .get_artifact(base_id, api.id, organization_id)
                    .await?
                    .ok_or(DeploymentError::BaseDeploymentNotFound(base_id))?;
                debug!("Cloning deployment {} for API {}", base_id, api.id);
                (base.content, Some(base_id))
            }
        };

        let content = match &deploy.endpoint_override {
            Some(endpoint) => apply_endpoint_override(&content, endpoint)?,
            None => content,
        };

        let binding = Binding {
            api_id: api.id,
            organization_id,
            gateway_id,
        };
        let artifact = DeploymentArtifact::new(
            binding,
            deploy.name,
            base_deployment_id,
            content,
            deploy.metadata,
        );

        self.persist_as_current(artifact).await
    }

    /// Record an artifact reported by the gateway itself as the DEPLOYED one
    pub async fn record_gateway_deployment(
        &self,
        api_id: ApiId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
        content: Vec<u8>,
        name: Option<String>,
    ) -> Result<ArtifactView, DeploymentError> {
        if content.is_empty() {
            return Err(DeploymentError::InvalidInput(
                "deployment content must not be empty".to_string(),
            ));
        }
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("gateway-sync-{}", Utc::now().format("%Y%m%d%H%M%S")));

        let binding = Binding {
            api_id,
            organization_id,
            gateway_id,
        };
        let artifact =
            DeploymentArtifact::new(binding, name, None, content, serde_json::Map::new());

        self.persist_as_current(artifact).await
    }

    async fn persist_as_current(
        &self,
        artifact: DeploymentArtifact,
    ) -> Result<ArtifactView, DeploymentError> {
        let hard_limit = self.retention.hard_limit();
        let evicted = self
            .store
            .create_artifact_and_set_current(&artifact, hard_limit)
            .await?;

        metrics::counter!("deployments_created_total").increment(1);
        if let Some(evicted_id) = evicted {
            metrics::counter!("deployments_evicted_total").increment(1);
            info!(
                "Evicted archived deployment {} from {} (limit {})",
                evicted_id,
                artifact.binding(),
                hard_limit
            );
        }
        info!(
            "Deployed {} as '{}' on {}",
            artifact.deployment_id,
            artifact.name,
            artifact.binding()
        );

        Ok(ArtifactView {
            artifact,
            status: DeploymentStatus::Deployed,
            status_updated_at: None,
        })
    }

    /// Make an existing artifact the DEPLOYED one again
    pub async fn restore(
        &self,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<ArtifactView, DeploymentError> {
        let view = self.load_bound(deployment_id, gateway_id, api_id, organization_id).await?;
        if view.status == DeploymentStatus::Deployed {
            return Err(DeploymentError::DeploymentAlreadyDeployed(deployment_id));
        }

        let updated_at = self
            .store
            .set_current(SetCurrentRequest {
                api_id,
                organization_id,
                gateway_id,
                deployment_id,
                status: PointerStatus::Deployed,
                expect: PointerExpectation::NotDeployed,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => {
                    DeploymentError::DeploymentAlreadyDeployed(deployment_id)
                }
                other => transition_error(other, deployment_id),
            })?;

        info!(
            "Restored deployment {} (was {}) on {}",
            deployment_id,
            view.status,
            view.artifact.binding()
        );

        Ok(ArtifactView {
            artifact: view.artifact,
            status: DeploymentStatus::Deployed,
            status_updated_at: Some(updated_at),
        })
    }

    /// Take the DEPLOYED artifact offline without removing it
    pub async fn undeploy(
        &self,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<ArtifactView, DeploymentError> {
        let view = self.load_bound(deployment_id, gateway_id, api_id, organization_id).await?;
        if view.status != DeploymentStatus::Deployed {
            return Err(DeploymentError::DeploymentNotActive(deployment_id));
        }

        let updated_at = self
            .store
            .set_current(SetCurrentRequest {
                api_id,
                organization_id,
                gateway_id,
                deployment_id,
                status: PointerStatus::Undeployed,
                expect: PointerExpectation::Deployed,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => DeploymentError::DeploymentNotActive(deployment_id),
                other => transition_error(other, deployment_id),
            })?;

        info!(
            "Undeployed deployment {} on {}",
            deployment_id,
            view.artifact.binding()
        );

        Ok(ArtifactView {
            artifact: view.artifact,
            status: DeploymentStatus::Undeployed,
            status_updated_at: Some(updated_at),
        })
    }

    pub async fn delete(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<(), DeploymentError> {
        let view = self.get(deployment_id, api_id, organization_id).await?;
        if view.status == DeploymentStatus::Deployed {
            return Err(DeploymentError::DeploymentIsDeployed(deployment_id));
        }

        self.store
            .delete_artifact(deployment_id, api_id, organization_id)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => DeploymentError::DeploymentIsDeployed(deployment_id),
                other => transition_error(other, deployment_id),
            })?;

        info!(
            "Deleted {} deployment {} from {}",
            view.status,
            deployment_id,
            view.artifact.binding()
        );
        Ok(())
    }

    /// Artifacts with derived status, newest first, at most the hard limit
    pub async fn list(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: Option<GatewayId>,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<ArtifactView>, DeploymentError> {
        let views = self
            .store
            .list_artifacts_with_status(ArtifactQuery {
                api_id,
                organization_id,
                gateway_id,
                status,
                limit: self.retention.hard_limit(),
            })
            .await?;
        debug!("Listed {} deployments for API {}", views.len(), api_id);
        Ok(views)
    }

    pub async fn get(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<ArtifactView, DeploymentError> {
        self.store
            .get_artifact_with_status(deployment_id, api_id, organization_id)
            .await?
            .ok_or(DeploymentError::DeploymentNotFound(deployment_id))
    }

    pub async fn get_content(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Vec<u8>, DeploymentError> {
        self.store
            .get_artifact(deployment_id, api_id, organization_id)
            .await?
            .map(|artifact| artifact.content)
            .ok_or(DeploymentError::DeploymentNotFound(deployment_id))
    }

    /// Load an artifact and check it is bound to `gateway_id`
    async fn load_bound(
        &self,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<ArtifactView, DeploymentError> {
        let view = self.get(deployment_id, api_id, organization_id).await?;
        if view.artifact.gateway_id != gateway_id {
            return Err(DeploymentError::GatewayIdMismatch {
                bound: view.artifact.gateway_id,
                requested: gateway_id,
            });
        }
        Ok(view)
    }
}

// A concurrent delete can remove the artifact between the pre-check and the store call
fn transition_error(err: RepositoryError, deployment_id: DeploymentId) -> DeploymentError {
    match err {
        RepositoryError::NotFound(_) => DeploymentError::DeploymentNotFound(deployment_id),
        other => DeploymentError::Repository(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::BackendService;
    use crate::domain::deployment_document::DeploymentDocument;
    use crate::infrastructure::repositories::InMemoryArtifactStore;
    use crate::infrastructure::YamlDeploymentSerializer;
    use serde_json::json;

    fn api() -> Api {
        Api {
            id: ApiId::new(),
            handle: "orders".to_string(),
            organization_id: OrganizationId::new(),
            name: "Orders".to_string(),
            version: "v1".to_string(),
            context: "/orders".to_string(),
            backend_services: vec![BackendService {
                name: "primary".to_string(),
                url: "http://orders.internal:8080".to_string(),
            }],
            operations: vec![],
            updated_at: Utc::now(),
        }
    }

    fn manager(soft_limit: usize) -> (DeploymentLifecycleManager, Arc<InMemoryArtifactStore>) {
        let store = Arc::new(InMemoryArtifactStore::new());
        let manager = DeploymentLifecycleManager::new(
            store.clone(),
            Arc::new(YamlDeploymentSerializer::new()),
            RetentionPolicy::new(soft_limit),
        );
        (manager, store)
    }

    fn input(base: &str, name: &str) -> ValidatedDeploy {
        DeployInput {
            base: base.to_string(),
            name: name.to_string(),
            metadata: serde_json::Map::new(),
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let blank_name = DeployInput {
            base: "current".to_string(),
            name: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            blank_name.validate(),
            Err(DeploymentError::InvalidInput(_))
        ));

        let blank_base = DeployInput {
            base: String::new(),
            name: "v1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            blank_base.validate(),
            Err(DeploymentError::InvalidInput(_))
        ));

        let mut metadata = serde_json::Map::new();
        metadata.insert("endpointUrl".to_string(), json!(42));
        let bad_metadata = DeployInput {
            base: "current".to_string(),
            name: "v1".to_string(),
            metadata,
        };
        assert!(matches!(
            bad_metadata.validate(),
            Err(DeploymentError::InvalidMetadata(_))
        ));
    }

    #[tokio::test]
    async fn test_clone_copies_content_and_applies_override() {
        let (manager, _) = manager(5);
        let api = api();
        let gateway_id = GatewayId::new();

        let first = manager
            .deploy(&api, gateway_id, input("current", "first"))
            .await
            .unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("endpointUrl".to_string(), json!("https://staging.example.com"));
        let clone = manager
            .deploy(
                &api,
                gateway_id,
                DeployInput {
                    base: first.artifact.deployment_id.to_string(),
                    name: "clone".to_string(),
                    metadata,
                }
                .validate()
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            clone.artifact.base_deployment_id,
            Some(first.artifact.deployment_id)
        );
        let document = DeploymentDocument::from_yaml(&clone.artifact.content).unwrap();
        assert_eq!(
            document.spec.upstream.main.url.as_deref(),
            Some("https://staging.example.com")
        );

        let original = manager
            .get_content(first.artifact.deployment_id, api.id, api.organization_id)
            .await
            .unwrap();
        assert_eq!(original, first.artifact.content);
    }

    #[tokio::test]
    async fn test_unknown_base_is_not_found() {
        let (manager, _) = manager(5);
        let missing = DeploymentId::new();
        let result = manager
            .deploy(&api(), GatewayId::new(), input(&missing.to_string(), "clone"))
            .await;
        assert!(matches!(
            result,
            Err(DeploymentError::BaseDeploymentNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_undeploy_requires_deployed() {
        let (manager, _) = manager(5);
        let api = api();
        let gateway_id = GatewayId::new();
        let d1 = manager
            .deploy(&api, gateway_id, input("current", "d1"))
            .await
            .unwrap()
            .artifact
            .deployment_id;

        let undeployed = manager
            .undeploy(d1, gateway_id, api.id, api.organization_id)
            .await
            .unwrap();
        assert_eq!(undeployed.status, DeploymentStatus::Undeployed);
        assert!(undeployed.status_updated_at.is_some());

        assert!(matches!(
            manager.undeploy(d1, gateway_id, api.id, api.organization_id).await,
            Err(DeploymentError::DeploymentNotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_record_gateway_deployment_defaults_name() {
        let (manager, store) = manager(5);
        let api = api();
        let gateway_id = GatewayId::new();

        let view = manager
            .record_gateway_deployment(
                api.id,
                gateway_id,
                api.organization_id,
                b"kind: RestApi\n".to_vec(),
                None,
            )
            .await
            .unwrap();

        assert!(view.artifact.name.starts_with("gateway-sync-"));
        let pointer = store
            .get_current_pointer(api.id, api.organization_id, gateway_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.deployment_id, view.artifact.deployment_id);
        assert_eq!(pointer.status, PointerStatus::Deployed);

        assert!(matches!(
            manager
                .record_gateway_deployment(api.id, gateway_id, api.organization_id, vec![], None)
                .await,
            Err(DeploymentError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (manager, _) = manager(5);
        let api = api();
        let gateway_id = GatewayId::new();
        for name in ["a", "b", "c"] {
            manager
                .deploy(&api, gateway_id, input("current", name))
                .await
                .unwrap();
        }

        let archived = manager
            .list(
                api.id,
                api.organization_id,
                None,
                Some(DeploymentStatus::Archived),
            )
            .await
            .unwrap();
        let names: Vec<_> = archived.iter().map(|v| v.artifact.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let deployed = manager
            .list(
                api.id,
                api.organization_id,
                Some(gateway_id),
                Some(DeploymentStatus::Deployed),
            )
            .await
            .unwrap();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].artifact.name, "c");
    }
}
