// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Service
//!
//! Caller-facing facade over the lifecycle manager. It resolves the API and
//! gateway records, runs the lifecycle transition, then tells the gateway.
//! Once a transition is committed the call succeeds; association bookkeeping
//! and gateway notification failures are only logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::broadcaster::GatewayEventBroadcaster;
use crate::application::lifecycle::{DeployInput, DeploymentLifecycleManager};
use crate::domain::api::{Api, ApiGatewayAssociation, ApiRef, Gateway, GatewayId, OrganizationId};
use crate::domain::deployment::{ArtifactView, DeploymentError, DeploymentId, DeploymentStatus};
use crate::domain::repository::{
    ApiGatewayAssociationRepository, ApiRepository, GatewayRepository, RepositoryError,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployApiRequest {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub deployment_id: DeploymentId,
    pub name: String,
    pub gateway_id: GatewayId,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_deployment_id: Option<DeploymentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ArtifactView> for DeploymentResponse {
    fn from(view: ArtifactView) -> Self {
        let artifact = view.artifact;
        Self {
            deployment_id: artifact.deployment_id,
            name: artifact.name,
            gateway_id: artifact.gateway_id,
            status: view.status,
            base_deployment_id: artifact.base_deployment_id,
            metadata: Some(artifact.metadata).filter(|m| !m.is_empty()),
            created_at: artifact.created_at,
            updated_at: view.status_updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub count: usize,
    pub list: Vec<DeploymentResponse>,
}

impl From<Vec<ArtifactView>> for DeploymentListResponse {
    fn from(views: Vec<ArtifactView>) -> Self {
        let list: Vec<DeploymentResponse> = views.into_iter().map(Into::into).collect();
        Self {
            count: list.len(),
            list,
        }
    }
}

#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Create an artifact from the live API (or an earlier artifact) and deploy it
    async fn deploy_api(
        &self,
        api: &ApiRef,
        request: DeployApiRequest,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError>;

    async fn restore_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError>;

    async fn undeploy_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError>;

    async fn delete_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<(), DeploymentError>;

    async fn get_deployments(
        &self,
        api: &ApiRef,
        gateway_id: Option<GatewayId>,
        status: Option<DeploymentStatus>,
        organization_id: OrganizationId,
    ) -> Result<DeploymentListResponse, DeploymentError>;

    async fn get_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError>;

    async fn get_deployment_content(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<Vec<u8>, DeploymentError>;
}

pub struct StandardDeploymentService {
    lifecycle: Arc<DeploymentLifecycleManager>,
    broadcaster: Arc<GatewayEventBroadcaster>,
    apis: Arc<dyn ApiRepository>,
    gateways: Arc<dyn GatewayRepository>,
    associations: Arc<dyn ApiGatewayAssociationRepository>,
}

impl StandardDeploymentService {
    pub fn new(
        lifecycle: Arc<DeploymentLifecycleManager>,
        broadcaster: Arc<GatewayEventBroadcaster>,
        apis: Arc<dyn ApiRepository>,
        gateways: Arc<dyn GatewayRepository>,
        associations: Arc<dyn ApiGatewayAssociationRepository>,
    ) -> Self {
        Self {
            lifecycle,
            broadcaster,
            apis,
            gateways,
            associations,
        }
    }

    /// By id first, then by handle, always inside the organization
    async fn resolve_api(
        &self,
        api: &ApiRef,
        organization_id: OrganizationId,
    ) -> Result<Api, DeploymentError> {
        let found = match api {
            ApiRef::Id(id) => match self.apis.find_by_id(*id, organization_id).await? {
                Some(found) => Some(found),
                None => self.apis.find_by_handle(&id.to_string(), organization_id).await?,
            },
            ApiRef::Handle(handle) => self.apis.find_by_handle(handle, organization_id).await?,
        };
        found.ok_or_else(|| DeploymentError::ApiNotFound(api.to_string()))
    }

    async fn resolve_gateway(
        &self,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<Gateway, DeploymentError> {
        self.gateways
            .find_by_id(gateway_id)
            .await?
            .filter(|gateway| gateway.organization_id == organization_id)
            .ok_or_else(|| DeploymentError::GatewayNotFound(gateway_id.to_string()))
    }

    /// Gateway lookup after a committed transition; a miss skips the event
    async fn gateway_to_notify(
        &self,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Option<Gateway> {
        match self.resolve_gateway(gateway_id, organization_id).await {
            Ok(gateway) => Some(gateway),
            Err(e) => {
                warn!(
                    "Transition on gateway {} committed but no event was sent: {}",
                    gateway_id, e
                );
                None
            }
        }
    }

    async fn ensure_association(&self, api: &Api, gateway_id: GatewayId) {
        let result = async {
            if !self
                .associations
                .exists(api.id, gateway_id, api.organization_id)
                .await?
            {
                self.associations
                    .create(&ApiGatewayAssociation::new(
                        api.id,
                        gateway_id,
                        api.organization_id,
                    ))
                    .await?;
                debug!("Associated API {} with gateway {}", api.id, gateway_id);
            }
            Ok::<(), RepositoryError>(())
        }
        .await;

        match result {
            Ok(()) | Err(RepositoryError::Conflict(_)) => {}
            Err(e) => warn!(
                "Failed to record association of API {} with gateway {}: {}",
                api.id, gateway_id, e
            ),
        }
    }

    async fn notify_deployed(&self, gateway: &Gateway, api: &Api, deployment_id: DeploymentId) {
        if let Err(e) = self
            .broadcaster
            .broadcast_deployment(gateway, api.id, deployment_id, None)
            .await
        {
            warn!(
                "Deployment {} of API {} committed but gateway {} was not notified: {}",
                deployment_id, api.id, gateway.id, e
            );
        }
    }
}

fn parse_gateway_id(raw: &str) -> Result<GatewayId, DeploymentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DeploymentError::InvalidInput("gatewayId is required".to_string()));
    }
    GatewayId::from_string(trimmed).map_err(|_| {
        DeploymentError::InvalidInput(format!("gatewayId '{}' is not a valid UUID", trimmed))
    })
}

#[async_trait]
impl DeploymentService for StandardDeploymentService {
    async fn deploy_api(
        &self,
        api: &ApiRef,
        request: DeployApiRequest,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError> {
        let deploy = DeployInput {
            base: request.base,
            name: request.name,
            metadata: request.metadata.unwrap_or_default(),
        };
        let gateway_id = parse_gateway_id(&request.gateway_id)?;
        let deploy = deploy.validate()?;

        let gateway = self.resolve_gateway(gateway_id, organization_id).await?;
        let api = self.resolve_api(api, organization_id).await?;
        if !api.has_backend_services() {
            return Err(DeploymentError::NoBackendServices);
        }

        info!(
            "Deploying API {} ('{}') to gateway {} as '{}'",
            api.id, api.handle, gateway.id, deploy.name
        );
        let view = self.lifecycle.deploy(&api, gateway_id, deploy).await?;

        self.ensure_association(&api, gateway_id).await;
        self.notify_deployed(&gateway, &api, view.artifact.deployment_id)
            .await;

        Ok(view.into())
    }

    async fn restore_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;

        let view = self
            .lifecycle
            .restore(deployment_id, gateway_id, api.id, organization_id)
            .await?;

        if let Some(gateway) = self.gateway_to_notify(gateway_id, organization_id).await {
            self.notify_deployed(&gateway, &api, deployment_id).await;
        }
        Ok(view.into())
    }

    async fn undeploy_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        gateway_id: GatewayId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;

        let view = self
            .lifecycle
            .undeploy(deployment_id, gateway_id, api.id, organization_id)
            .await?;

        let Some(gateway) = self.gateway_to_notify(gateway_id, organization_id).await else {
            return Ok(view.into());
        };
        if let Err(e) = self
            .broadcaster
            .broadcast_undeployment(&gateway, api.id, deployment_id, None)
            .await
        {
            warn!(
                "Undeployment {} of API {} committed but gateway {} was not notified: {}",
                deployment_id, api.id, gateway.id, e
            );
        }
        Ok(view.into())
    }

    async fn delete_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<(), DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;
        self.lifecycle
            .delete(deployment_id, api.id, organization_id)
            .await
    }

    async fn get_deployments(
        &self,
        api: &ApiRef,
        gateway_id: Option<GatewayId>,
        status: Option<DeploymentStatus>,
        organization_id: OrganizationId,
    ) -> Result<DeploymentListResponse, DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;
        let views = self
            .lifecycle
            .list(api.id, organization_id, gateway_id, status)
            .await?;
        Ok(views.into())
    }

    async fn get_deployment(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<DeploymentResponse, DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;
        let view = self
            .lifecycle
            .get(deployment_id, api.id, organization_id)
            .await?;
        Ok(view.into())
    }

    async fn get_deployment_content(
        &self,
        api: &ApiRef,
        deployment_id: DeploymentId,
        organization_id: OrganizationId,
    ) -> Result<Vec<u8>, DeploymentError> {
        let api = self.resolve_api(api, organization_id).await?;
        self.lifecycle
            .get_content(deployment_id, api.id, organization_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_omits_empty_optionals() {
        let response = DeploymentResponse {
            deployment_id: DeploymentId::new(),
            name: "v1".to_string(),
            gateway_id: GatewayId::new(),
            status: DeploymentStatus::Archived,
            base_deployment_id: None,
            metadata: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ARCHIVED");
        assert!(json.get("deploymentId").is_some());
        assert!(json.get("baseDeploymentId").is_none());
        assert!(json.get("metadata").is_none());
        assert!(json.get("updatedAt").is_none());
    }

    #[test]
    fn test_gateway_id_parsing() {
        assert!(matches!(
            parse_gateway_id(" "),
            Err(DeploymentError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_gateway_id("edge-1"),
            Err(DeploymentError::InvalidInput(_))
        ));
        let id = GatewayId::new();
        assert_eq!(parse_gateway_id(&id.to_string()).unwrap(), id);
    }
}
