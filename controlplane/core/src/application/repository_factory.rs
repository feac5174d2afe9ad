// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory
//!
//! Picks the concrete `ArtifactStore` for the configured storage backend.
//! Keeps the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wires repository implementations from configuration

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::repository::{ArtifactStore, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{InMemoryArtifactStore, PostgresArtifactStore};

/// Creates an ArtifactStore implementation based on the configured backend.
///
/// For PostgreSQL this connects and creates the tables if missing.
pub async fn create_artifact_store(backend: &StorageBackend) -> Result<Arc<dyn ArtifactStore>> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory artifact store");
            Ok(Arc::new(InMemoryArtifactStore::new()))
        }
        StorageBackend::PostgreSQL(config) => {
            let database = Database::connect(config).await?;
            let store = PostgresArtifactStore::new(database.get_pool().clone());
            store
                .ensure_schema()
                .await
                .context("Failed to prepare deployment tables")?;
            info!(
                "Using PostgreSQL artifact store (max {} connections)",
                config.max_connections
            );
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::{ApiId, GatewayId, OrganizationId};

    #[tokio::test]
    async fn test_in_memory_backend_needs_no_database() {
        let store = create_artifact_store(&StorageBackend::InMemory).await.unwrap();
        let pointer = store
            .get_current_pointer(ApiId::new(), OrganizationId::new(), GatewayId::new())
            .await
            .unwrap();
        assert!(pointer.is_none());
    }
}
