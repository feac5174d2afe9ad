// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Catalog Loader
//!
//! Seeds the catalog repositories (APIs and gateways) from a YAML file at
//! startup:
//!
//! ```yaml
//! gateways:
//!   - id: 6f1c...
//!     organization_id: 0b7e...
//!     name: edge-eu
//!     vhost: api.eu.example.com
//! apis:
//!   - id: 91d2...
//!     handle: orders
//!     organization_id: 0b7e...
//!     name: Orders
//!     version: v1
//!     context: /orders/v1
//!     backend_services:
//!       - name: primary
//!         url: http://orders.internal:8080
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::domain::api::{Api, Gateway};
use crate::domain::repository::{ApiRepository, GatewayRepository};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub gateways: Vec<Gateway>,
    #[serde(default)]
    pub apis: Vec<Api>,
}

impl Catalog {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse catalog")
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog at {:?}", path))?;
        Self::from_yaml_str(&content)
    }

    pub async fn load_into(
        &self,
        apis: &dyn ApiRepository,
        gateways: &dyn GatewayRepository,
    ) -> Result<()> {
        for gateway in &self.gateways {
            gateways
                .save(gateway)
                .await
                .with_context(|| format!("Failed to load gateway '{}'", gateway.name))?;
        }
        for api in &self.apis {
            apis.save(api)
                .await
                .with_context(|| format!("Failed to load API '{}'", api.handle))?;
        }
        info!(
            "Loaded catalog: {} gateways, {} APIs",
            self.gateways.len(),
            self.apis.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::{ApiId, GatewayId, OrganizationId};
    use crate::infrastructure::repositories::{InMemoryApiRepository, InMemoryGatewayRepository};

    #[tokio::test]
    async fn test_load_catalog_into_repositories() {
        let org = OrganizationId::new();
        let gateway_id = GatewayId::new();
        let api_id = ApiId::new();
        let yaml = format!(
            r#"
gateways:
  - id: {gateway_id}
    organization_id: {org}
    name: edge-eu
    vhost: api.eu.example.com
apis:
  - id: {api_id}
    handle: orders
    organization_id: {org}
    name: Orders
    version: v1
    context: /orders/v1
    backend_services:
      - name: primary
        url: http://orders.internal:8080
"#
        );

        let catalog = Catalog::from_yaml_str(&yaml).unwrap();
        let apis = InMemoryApiRepository::new();
        let gateways = InMemoryGatewayRepository::new();
        catalog.load_into(&apis, &gateways).await.unwrap();

        let gateway = gateways.find_by_id(gateway_id).await.unwrap().unwrap();
        assert_eq!(gateway.environment, "production");
        let api = apis.find_by_handle("orders", org).await.unwrap().unwrap();
        assert_eq!(api.id, api_id);
        assert!(api.has_backend_services());
    }

    #[test]
    fn test_empty_catalog_is_valid() {
        let catalog = Catalog::from_yaml_str("{}").unwrap();
        assert!(catalog.apis.is_empty());
        assert!(catalog.gateways.is_empty());
    }
}
