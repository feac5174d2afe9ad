// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Deployment Document
//!
//! Structured view of artifact content. Everywhere else the content is an
//! opaque byte blob; this module is the one place that opens it, to apply the
//! `endpointUrl` override at creation time.
//!
//! Every level that the override walks through keeps unknown keys in a
//! flattened `extra` map, so a parse/serialize round trip preserves fields
//! this crate knows nothing about.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::domain::api::Api;
use crate::domain::deployment::{DeploymentError, METADATA_ENDPOINT_URL};

pub const DOCUMENT_API_VERSION: &str = "gateway.api-platform.io/v1alpha1";
pub const DOCUMENT_KIND: &str = "RestApi";

type Extra = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: DocumentMetadata,
    pub spec: RestApiSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestApiSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub context: String,
    pub upstream: Upstream,
    #[serde(default)]
    pub operations: Vec<DocumentOperation>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub main: UpstreamTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<UpstreamTarget>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// An upstream is addressed either by `url` or by `ref` to a named backend, never both
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOperation {
    pub method: String,
    pub path: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl DeploymentDocument {
    pub fn from_yaml(content: &[u8]) -> Result<Self, DeploymentError> {
        serde_yaml::from_slice(content).map_err(|e| {
            DeploymentError::Content(format!("failed to parse deployment content: {}", e))
        })
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>, DeploymentError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| {
                DeploymentError::Content(format!("failed to serialize deployment content: {}", e))
            })
    }

    /// Point the primary upstream at `endpoint`, dropping any `ref` indirection
    pub fn override_main_endpoint(&mut self, endpoint: &str) {
        self.spec.upstream.main.url = Some(endpoint.to_string());
        self.spec.upstream.main.reference = None;
    }
}

/// Turns an API's live configuration into artifact content
pub trait DeploymentContentSerializer: Send + Sync {
    fn serialize(&self, api: &Api) -> Result<Vec<u8>, DeploymentError>;
}

/// Rewrite `content` so its primary upstream is `endpoint`. Unknown fields survive.
pub fn apply_endpoint_override(content: &[u8], endpoint: &str) -> Result<Vec<u8>, DeploymentError> {
    let mut document = DeploymentDocument::from_yaml(content)?;
    document.override_main_endpoint(endpoint);
    document.to_yaml()
}

/// Accepts absolute http(s) URLs with a non-empty host
pub fn validate_endpoint_url(raw: &str) -> Result<Url, DeploymentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DeploymentError::InvalidEndpointUrl(
            "endpoint URL must not be empty".to_string(),
        ));
    }

    let parsed = Url::parse(trimmed).map_err(|e| {
        DeploymentError::InvalidEndpointUrl(format!(
            "'{}' is not an absolute URL ({}); include the http:// or https:// scheme",
            trimmed, e
        ))
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DeploymentError::InvalidEndpointUrl(format!(
                "'{}' uses unsupported scheme '{}'; only http and https are allowed",
                trimmed, other
            )))
        }
    }

    // WHATWG parsing turns `http:///path` into host "path", so check the raw authority too
    let authority = trimmed
        .split_once("://")
        .and_then(|(_, rest)| rest.split(['/', '?', '#']).next())
        .unwrap_or("");
    if authority.is_empty() || parsed.host_str().map_or(true, str::is_empty) {
        return Err(DeploymentError::InvalidEndpointUrl(format!(
            "'{}' has no host",
            trimmed
        )));
    }

    Ok(parsed)
}

/// Extract and validate the `endpointUrl` override from deployment metadata.
///
/// Absent, null or blank means no override. Any other non-string value is an error.
pub fn endpoint_override(
    metadata: &serde_json::Map<String, serde_json::Value>,
) -> Result<Option<String>, DeploymentError> {
    match metadata.get(METADATA_ENDPOINT_URL) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(raw)) => {
            validate_endpoint_url(raw)?;
            Ok(Some(raw.trim().to_string()))
        }
        Some(other) => Err(DeploymentError::InvalidMetadata(format!(
            "'{}' must be a string, got {}",
            METADATA_ENDPOINT_URL,
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
apiVersion: gateway.api-platform.io/v1alpha1
kind: RestApi
metadata:
  name: users-api-v2
  labels:
    team: identity
spec:
  displayName: Users API
  version: v2.0
  context: /myapi/v2
  upstream:
    main:
      url: http://old.internal:8080
      ref: users-backend
    sandbox:
      url: http://sandbox.internal
  operations:
    - method: GET
      path: /users
    - method: POST
      path: /users
      policies:
        - name: rate-limit
  policies:
    - name: cors
"#;

    #[test]
    fn test_override_preserves_other_fields() {
        let original = DeploymentDocument::from_yaml(SAMPLE.as_bytes()).unwrap();
        let rewritten =
            apply_endpoint_override(SAMPLE.as_bytes(), "https://new.example.com:9090/api/v2")
                .unwrap();
        let updated = DeploymentDocument::from_yaml(&rewritten).unwrap();

        assert_eq!(updated.spec.operations, original.spec.operations);
        assert_eq!(updated.spec.version, "v2.0");
        assert_eq!(updated.spec.context, "/myapi/v2");
        assert_eq!(updated.spec.upstream.sandbox, original.spec.upstream.sandbox);
        assert_eq!(updated.spec.extra, original.spec.extra);
        assert_eq!(updated.metadata, original.metadata);
        assert_eq!(
            updated.spec.upstream.main.url.as_deref(),
            Some("https://new.example.com:9090/api/v2")
        );
        assert_eq!(updated.spec.upstream.main.reference, None);
    }

    #[test]
    fn test_override_rejects_garbage_content() {
        let err = apply_endpoint_override(b"{not: [valid", "http://x").unwrap_err();
        assert!(matches!(err, DeploymentError::Content(_)));
    }

    #[test]
    fn test_endpoint_url_accepts_http_and_https() {
        assert!(validate_endpoint_url("http://prod:8080").is_ok());
        assert!(validate_endpoint_url("https://x/y").is_ok());
    }

    #[test]
    fn test_endpoint_url_rejections() {
        for raw in ["", "ftp://x", "ws://x", "api.example.com/v1", "http:///path"] {
            match validate_endpoint_url(raw) {
                Err(DeploymentError::InvalidEndpointUrl(msg)) => assert!(!msg.is_empty()),
                other => panic!("expected rejection for {:?}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_endpoint_override_from_metadata() {
        let mut metadata = serde_json::Map::new();
        assert_eq!(endpoint_override(&metadata).unwrap(), None);

        metadata.insert(METADATA_ENDPOINT_URL.to_string(), json!(""));
        assert_eq!(endpoint_override(&metadata).unwrap(), None);

        metadata.insert(METADATA_ENDPOINT_URL.to_string(), json!("https://a.example.com"));
        assert_eq!(
            endpoint_override(&metadata).unwrap().as_deref(),
            Some("https://a.example.com")
        );

        metadata.insert(METADATA_ENDPOINT_URL.to_string(), json!(8080));
        assert!(matches!(
            endpoint_override(&metadata),
            Err(DeploymentError::InvalidMetadata(_))
        ));

        metadata.insert(METADATA_ENDPOINT_URL.to_string(), json!("ftp://files"));
        assert!(matches!(
            endpoint_override(&metadata),
            Err(DeploymentError::InvalidEndpointUrl(_))
        ));
    }
}
