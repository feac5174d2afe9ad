// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API for API deployments
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST | `/api/v1/apis/{api}/deployments` | deploy |
//! | GET | `/api/v1/apis/{api}/deployments?gatewayId=&status=` | list |
//! | GET | `/api/v1/apis/{api}/deployments/{deployment}` | get |
//! | DELETE | `/api/v1/apis/{api}/deployments/{deployment}` | delete |
//! | GET | `/api/v1/apis/{api}/deployments/{deployment}/content` | raw artifact |
//! | POST | `/api/v1/apis/{api}/deployments/{deployment}/restore?gatewayId=` | restore |
//! | POST | `/api/v1/apis/{api}/deployments/{deployment}/undeploy?gatewayId=` | undeploy |
//!
//! `{api}` is an API id or handle. Every request must carry `X-Organization-Id`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::deployment_service::{DeployApiRequest, DeploymentService};
use crate::domain::api::{ApiRef, GatewayId, OrganizationId};
use crate::domain::deployment::{DeploymentError, DeploymentId, DeploymentStatus, ErrorKind};

pub const ORGANIZATION_HEADER: &str = "x-organization-id";

pub struct AppState {
    pub deployment_service: Arc<dyn DeploymentService>,
}

pub fn app(service: Arc<dyn DeploymentService>) -> Router {
    let state = Arc::new(AppState {
        deployment_service: service,
    });

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/apis/{api}/deployments",
            post(deploy_api).get(list_deployments),
        )
        .route(
            "/api/v1/apis/{api}/deployments/{deployment}",
            get(get_deployment).delete(delete_deployment),
        )
        .route(
            "/api/v1/apis/{api}/deployments/{deployment}/content",
            get(get_deployment_content),
        )
        .route(
            "/api/v1/apis/{api}/deployments/{deployment}/restore",
            post(restore_deployment),
        )
        .route(
            "/api/v1/apis/{api}/deployments/{deployment}/undeploy",
            post(undeploy_deployment),
        )
        .with_state(state)
}

/// Error body: `{"error": "...", "kind": "..."}`
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "InvalidInput",
            message: message.into(),
        }
    }
}

impl From<DeploymentError> for ApiError {
    fn from(err: DeploymentError) -> Self {
        let (status, kind) = match err.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NotFound"),
            ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "InvalidInput"),
            ErrorKind::PreconditionFailed => (StatusCode::CONFLICT, "PreconditionFailed"),
            ErrorKind::StoreFailure => (StatusCode::INTERNAL_SERVER_ERROR, "StoreFailure"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        };
        if status.is_server_error() {
            tracing::error!("Deployment request failed: {}", err);
        }
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

fn organization(headers: &HeaderMap) -> Result<OrganizationId, ApiError> {
    let raw = headers
        .get(ORGANIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("X-Organization-Id header is required"))?;
    OrganizationId::from_string(raw)
        .map_err(|_| ApiError::bad_request(format!("invalid organization id '{}'", raw)))
}

fn deployment_id(raw: &str) -> Result<DeploymentId, ApiError> {
    DeploymentId::from_string(raw)
        .map_err(|_| ApiError::bad_request(format!("invalid deployment id '{}'", raw)))
}

fn gateway_id(raw: Option<&str>) -> Result<GatewayId, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("gatewayId query parameter is required"))?;
    GatewayId::from_string(raw)
        .map_err(|_| ApiError::bad_request(format!("invalid gateway id '{}'", raw)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentQuery {
    pub gateway_id: Option<String>,
    pub status: Option<String>,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn deploy_api(
    State(state): State<Arc<AppState>>,
    Path(api): Path<String>,
    headers: HeaderMap,
    body: Result<Json<DeployApiRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let Json(request) =
        body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let response = state
        .deployment_service
        .deploy_api(&ApiRef::parse(&api), request, org)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Path(api): Path<String>,
    Query(query): Query<DeploymentQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let gateway_id = match query.gateway_id.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(gateway_id(Some(raw))?),
        _ => None,
    };
    let status = match query.status.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<DeploymentStatus>()?),
        _ => None,
    };

    let response = state
        .deployment_service
        .get_deployments(&ApiRef::parse(&api), gateway_id, status, org)
        .await?;
    Ok(Json(response))
}

async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path((api, deployment)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let response = state
        .deployment_service
        .get_deployment(&ApiRef::parse(&api), deployment_id(&deployment)?, org)
        .await?;
    Ok(Json(response))
}

async fn delete_deployment(
    State(state): State<Arc<AppState>>,
    Path((api, deployment)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    state
        .deployment_service
        .delete_deployment(&ApiRef::parse(&api), deployment_id(&deployment)?, org)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_deployment_content(
    State(state): State<Arc<AppState>>,
    Path((api, deployment)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let content = state
        .deployment_service
        .get_deployment_content(&ApiRef::parse(&api), deployment_id(&deployment)?, org)
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], content))
}

async fn restore_deployment(
    State(state): State<Arc<AppState>>,
    Path((api, deployment)): Path<(String, String)>,
    Query(query): Query<DeploymentQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let response = state
        .deployment_service
        .restore_deployment(
            &ApiRef::parse(&api),
            deployment_id(&deployment)?,
            gateway_id(query.gateway_id.as_deref())?,
            org,
        )
        .await?;
    Ok(Json(response))
}

async fn undeploy_deployment(
    State(state): State<Arc<AppState>>,
    Path((api, deployment)): Path<(String, String)>,
    Query(query): Query<DeploymentQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let org = organization(&headers)?;
    let response = state
        .deployment_service
        .undeploy_deployment(
            &ApiRef::parse(&api),
            deployment_id(&deployment)?,
            gateway_id(query.gateway_id.as_deref())?,
            org,
        )
        .await?;
    Ok(Json(response))
}
