// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::application::{
    DeployApiRequest, DeploymentLifecycleManager, DeploymentService, GatewayEventBroadcaster,
    StandardDeploymentService,
};
use gateway_core::domain::api::{
    Api, ApiId, ApiRef, BackendService, Gateway, GatewayId, Operation, OrganizationId,
};
use gateway_core::domain::deployment::{DeploymentError, DeploymentStatus, RetentionPolicy};
use gateway_core::domain::events::EventRetryPolicies;
use gateway_core::domain::repository::{
    ApiGatewayAssociationRepository, ApiRepository, GatewayRepository,
};
use gateway_core::infrastructure::repositories::{
    InMemoryApiRepository, InMemoryArtifactStore, InMemoryAssociationRepository,
    InMemoryGatewayRepository,
};
use gateway_core::infrastructure::{
    ChannelConnection, InMemoryConnectionRegistry, YamlDeploymentSerializer,
};

struct Fixture {
    service: StandardDeploymentService,
    registry: Arc<InMemoryConnectionRegistry>,
    associations: Arc<InMemoryAssociationRepository>,
    apis: Arc<InMemoryApiRepository>,
    org: OrganizationId,
    api: Api,
    gateway: Gateway,
}

fn api(org: OrganizationId, handle: &str, backends: Vec<BackendService>) -> Api {
    Api {
        id: ApiId::new(),
        handle: handle.to_string(),
        organization_id: org,
        name: "Orders".to_string(),
        version: "v1".to_string(),
        context: "/orders".to_string(),
        backend_services: backends,
        operations: vec![Operation {
            method: "GET".to_string(),
            path: "/orders".to_string(),
        }],
        updated_at: Utc::now(),
    }
}

fn gateway(org: OrganizationId) -> Gateway {
    Gateway {
        id: GatewayId::new(),
        organization_id: org,
        name: "edge-us".to_string(),
        vhost: "api.us.example.com".to_string(),
        environment: "staging".to_string(),
    }
}

async fn fixture() -> Fixture {
    let org = OrganizationId::new();
    let api = api(
        org,
        "orders",
        vec![BackendService {
            name: "primary".to_string(),
            url: "http://orders.internal".to_string(),
        }],
    );
    let gateway = gateway(org);

    let apis = Arc::new(InMemoryApiRepository::new());
    apis.save(&api).await.unwrap();
    let gateways = Arc::new(InMemoryGatewayRepository::new());
    gateways.save(&gateway).await.unwrap();
    let associations = Arc::new(InMemoryAssociationRepository::new());
    let registry = Arc::new(InMemoryConnectionRegistry::new());

    let lifecycle = Arc::new(DeploymentLifecycleManager::new(
        Arc::new(InMemoryArtifactStore::new()),
        Arc::new(YamlDeploymentSerializer::new()),
        RetentionPolicy::new(5),
    ));
    let broadcaster = Arc::new(GatewayEventBroadcaster::new(
        registry.clone(),
        EventRetryPolicies::default(),
    ));
    let service = StandardDeploymentService::new(
        lifecycle,
        broadcaster,
        apis.clone(),
        gateways,
        associations.clone(),
    );

    Fixture {
        service,
        registry,
        associations,
        apis,
        org,
        api,
        gateway,
    }
}

fn request(gateway_id: GatewayId, name: &str) -> DeployApiRequest {
    DeployApiRequest {
        base: "current".to_string(),
        gateway_id: gateway_id.to_string(),
        name: name.to_string(),
        metadata: None,
    }
}

#[tokio::test]
async fn test_deploy_by_handle_records_association() {
    let f = fixture().await;

    let response = f
        .service
        .deploy_api(
            &ApiRef::parse("orders"),
            request(f.gateway.id, "first"),
            f.org,
        )
        .await
        .unwrap();
    assert_eq!(response.status, DeploymentStatus::Deployed);
    assert_eq!(response.gateway_id, f.gateway.id);

    let associations = f.associations.list_by_api(f.api.id, f.org).await.unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].gateway_id, f.gateway.id);

    // A second deploy to the same gateway does not duplicate the association
    f.service
        .deploy_api(&ApiRef::from(f.api.id), request(f.gateway.id, "second"), f.org)
        .await
        .unwrap();
    assert_eq!(
        f.associations.list_by_api(f.api.id, f.org).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_deploy_notifies_connected_gateway() {
    let f = fixture().await;
    let (conn, mut rx) =
        ChannelConnection::new("replica-1", f.gateway.id, 8, Duration::from_secs(1));
    f.registry.register(Arc::new(conn));

    let deployed = f
        .service
        .deploy_api(&ApiRef::from(f.api.id), request(f.gateway.id, "v1"), f.org)
        .await
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(json["type"], "api.deployed");
    assert_eq!(json["payload"]["deploymentId"], deployed.deployment_id.to_string());
    assert_eq!(json["payload"]["vhost"], "api.us.example.com");
    assert_eq!(json["payload"]["environment"], "staging");

    f.service
        .undeploy_deployment(
            &ApiRef::from(f.api.id),
            deployed.deployment_id,
            f.gateway.id,
            f.org,
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(json["type"], "api.undeployed");
}

#[tokio::test]
async fn test_deploy_succeeds_without_connected_gateway() {
    let f = fixture().await;
    assert_eq!(f.registry.connection_count(f.gateway.id), 0);

    let response = f
        .service
        .deploy_api(&ApiRef::from(f.api.id), request(f.gateway.id, "offline"), f.org)
        .await
        .unwrap();

    let listed = f
        .service
        .get_deployments(&ApiRef::from(f.api.id), Some(f.gateway.id), None, f.org)
        .await
        .unwrap();
    assert_eq!(listed.count, 1);
    assert_eq!(listed.list[0].deployment_id, response.deployment_id);
}

#[tokio::test]
async fn test_deploy_rejects_api_without_backends() {
    let f = fixture().await;
    let bare = api(f.org, "bare", vec![]);
    f.apis.save(&bare).await.unwrap();

    let err = f
        .service
        .deploy_api(&ApiRef::parse("bare"), request(f.gateway.id, "v1"), f.org)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::NoBackendServices));
}

#[tokio::test]
async fn test_resources_are_scoped_to_organization() {
    let f = fixture().await;
    let other_org = OrganizationId::new();

    let err = f
        .service
        .deploy_api(&ApiRef::from(f.api.id), request(f.gateway.id, "v1"), other_org)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::GatewayNotFound(_)));

    let err = f
        .service
        .get_deployments(&ApiRef::parse("orders"), None, None, other_org)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::ApiNotFound(_)));
}

#[tokio::test]
async fn test_request_validation_runs_before_lookups() {
    let f = fixture().await;
    let api_ref = ApiRef::parse("does-not-exist");

    let mut bad = request(f.gateway.id, "v1");
    bad.gateway_id = "  ".to_string();
    assert!(matches!(
        f.service.deploy_api(&api_ref, bad, f.org).await,
        Err(DeploymentError::InvalidInput(_))
    ));

    let mut bad = request(f.gateway.id, "v1");
    bad.base = "latest".to_string();
    assert!(matches!(
        f.service.deploy_api(&api_ref, bad, f.org).await,
        Err(DeploymentError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_content_and_restore_through_facade() {
    let f = fixture().await;
    let api_ref = ApiRef::from(f.api.id);

    let first = f
        .service
        .deploy_api(&api_ref, request(f.gateway.id, "first"), f.org)
        .await
        .unwrap();
    let mut from_first = request(f.gateway.id, "second");
    from_first.base = first.deployment_id.to_string();
    let second = f
        .service
        .deploy_api(&api_ref, from_first, f.org)
        .await
        .unwrap();
    assert_eq!(second.base_deployment_id, Some(first.deployment_id));

    let first_content = f
        .service
        .get_deployment_content(&api_ref, first.deployment_id, f.org)
        .await
        .unwrap();
    let second_content = f
        .service
        .get_deployment_content(&api_ref, second.deployment_id, f.org)
        .await
        .unwrap();
    assert_eq!(first_content, second_content);

    let restored = f
        .service
        .restore_deployment(&api_ref, first.deployment_id, f.gateway.id, f.org)
        .await
        .unwrap();
    assert_eq!(restored.status, DeploymentStatus::Deployed);
    assert!(restored.updated_at.is_some());

    let second_now = f
        .service
        .get_deployment(&api_ref, second.deployment_id, f.org)
        .await
        .unwrap();
    assert_eq!(second_now.status, DeploymentStatus::Archived);
}

#[tokio::test]
async fn test_restore_and_undeploy_report_binding_mismatch_for_unknown_gateway() {
    let f = fixture().await;
    let api_ref = ApiRef::from(f.api.id);
    let deployed = f
        .service
        .deploy_api(&api_ref, request(f.gateway.id, "v1"), f.org)
        .await
        .unwrap();

    // Not in the catalog at all
    let stranger = GatewayId::new();
    let err = f
        .service
        .restore_deployment(&api_ref, deployed.deployment_id, stranger, f.org)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeploymentError::GatewayIdMismatch { bound, requested }
            if bound == f.gateway.id && requested == stranger
    ));

    let err = f
        .service
        .undeploy_deployment(&api_ref, deployed.deployment_id, stranger, f.org)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::GatewayIdMismatch { .. }));

    let still = f
        .service
        .get_deployment(&api_ref, deployed.deployment_id, f.org)
        .await
        .unwrap();
    assert_eq!(still.status, DeploymentStatus::Deployed);
}
