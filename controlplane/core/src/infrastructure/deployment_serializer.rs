// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// YAML Deployment Serializer
//
// Renders an API's live configuration as a RestApi deployment document.
// The primary backend service becomes `upstream.main`, a second one (if any)
// `upstream.sandbox`.

use std::collections::BTreeMap;

use crate::domain::api::Api;
use crate::domain::deployment::DeploymentError;
use crate::domain::deployment_document::{
    DeploymentContentSerializer, DeploymentDocument, DocumentMetadata, DocumentOperation,
    RestApiSpec, Upstream, UpstreamTarget, DOCUMENT_API_VERSION, DOCUMENT_KIND,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDeploymentSerializer;

impl YamlDeploymentSerializer {
    pub fn new() -> Self {
        Self
    }

    fn target(url: &str) -> UpstreamTarget {
        UpstreamTarget {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn to_document(api: &Api) -> Result<DeploymentDocument, DeploymentError> {
        let main = api
            .backend_services
            .first()
            .ok_or(DeploymentError::NoBackendServices)?;

        Ok(DeploymentDocument {
            api_version: DOCUMENT_API_VERSION.to_string(),
            kind: DOCUMENT_KIND.to_string(),
            metadata: DocumentMetadata {
                name: api.handle.clone(),
                extra: BTreeMap::new(),
            },
            spec: RestApiSpec {
                display_name: Some(api.name.clone()),
                version: api.version.clone(),
                context: api.context.clone(),
                upstream: Upstream {
                    main: Self::target(&main.url),
                    sandbox: api.backend_services.get(1).map(|b| Self::target(&b.url)),
                    extra: BTreeMap::new(),
                },
                operations: api
                    .operations
                    .iter()
                    .map(|op| DocumentOperation {
                        method: op.method.to_uppercase(),
                        path: op.path.clone(),
                        extra: BTreeMap::new(),
                    })
                    .collect(),
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        })
    }
}

impl DeploymentContentSerializer for YamlDeploymentSerializer {
    fn serialize(&self, api: &Api) -> Result<Vec<u8>, DeploymentError> {
        Self::to_document(api)?.to_yaml()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::{ApiId, BackendService, Operation, OrganizationId};
    use chrono::Utc;

    fn api(backends: Vec<BackendService>) -> Api {
        Api {
            id: ApiId::new(),
            handle: "orders".to_string(),
            organization_id: OrganizationId::new(),
            name: "Orders".to_string(),
            version: "v1.2".to_string(),
            context: "/orders/v1".to_string(),
            backend_services: backends,
            operations: vec![Operation {
                method: "get".to_string(),
                path: "/orders".to_string(),
            }],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_renders_document_from_api() {
        let serializer = YamlDeploymentSerializer::new();
        let content = serializer
            .serialize(&api(vec![
                BackendService {
                    name: "primary".to_string(),
                    url: "http://orders.internal:8080".to_string(),
                },
                BackendService {
                    name: "sandbox".to_string(),
                    url: "http://orders.sandbox:8080".to_string(),
                },
            ]))
            .unwrap();

        let document = DeploymentDocument::from_yaml(&content).unwrap();
        assert_eq!(document.kind, "RestApi");
        assert_eq!(document.metadata.name, "orders");
        assert_eq!(document.spec.context, "/orders/v1");
        assert_eq!(
            document.spec.upstream.main.url.as_deref(),
            Some("http://orders.internal:8080")
        );
        assert_eq!(
            document.spec.upstream.sandbox.and_then(|s| s.url).as_deref(),
            Some("http://orders.sandbox:8080")
        );
        assert_eq!(document.spec.operations[0].method, "GET");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let api = api(vec![BackendService {
            name: "primary".to_string(),
            url: "http://orders.internal".to_string(),
        }]);
        let serializer = YamlDeploymentSerializer::new();
        assert_eq!(serializer.serialize(&api).unwrap(), serializer.serialize(&api).unwrap());
    }

    #[test]
    fn test_requires_backend_service() {
        assert!(matches!(
            YamlDeploymentSerializer::new().serialize(&api(vec![])),
            Err(DeploymentError::NoBackendServices)
        ));
    }
}
