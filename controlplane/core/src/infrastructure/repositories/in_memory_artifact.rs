// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-Memory Artifact Store
//!
//! Holds artifacts and current pointers behind one `parking_lot::Mutex`.
//! Each trait method takes the lock once and does its whole read-check-write
//! under it, which is what makes the compound operations atomic.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Development and test backend for `ArtifactStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

use crate::domain::api::{ApiId, GatewayId, OrganizationId};
use crate::domain::deployment::{
    ArtifactView, DeploymentArtifact, DeploymentId, DeploymentStatus, DeploymentStatusPointer,
    PointerStatus,
};
use crate::domain::repository::{ArtifactQuery, ArtifactStore, RepositoryError, SetCurrentRequest};

struct StoredArtifact {
    artifact: DeploymentArtifact,
    /// Insertion order; breaks `created_at` ties
    seq: u64,
}

#[derive(Default)]
struct StoreState {
    artifacts: HashMap<DeploymentId, StoredArtifact>,
    pointers: HashMap<(ApiId, GatewayId), DeploymentStatusPointer>,
    next_seq: u64,
}

impl StoreState {
    fn pointer_for(&self, api_id: ApiId, gateway_id: GatewayId) -> Option<&DeploymentStatusPointer> {
        self.pointers.get(&(api_id, gateway_id))
    }

    fn find(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Option<&StoredArtifact> {
        self.artifacts.get(&deployment_id).filter(|stored| {
            stored.artifact.api_id == api_id && stored.artifact.organization_id == organization_id
        })
    }

    fn binding_artifacts(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
    ) -> impl Iterator<Item = &StoredArtifact> {
        self.artifacts.values().filter(move |stored| {
            stored.artifact.api_id == api_id
                && stored.artifact.organization_id == organization_id
                && stored.artifact.gateway_id == gateway_id
        })
    }

    fn upsert_pointer(
        &mut self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
        deployment_id: DeploymentId,
        status: PointerStatus,
    ) -> DateTime<Utc> {
        let updated_at = Utc::now();
        self.pointers.insert(
            (api_id, gateway_id),
            DeploymentStatusPointer {
                api_id,
                organization_id,
                gateway_id,
                deployment_id,
                status,
                updated_at,
            },
        );
        updated_at
    }
}

pub struct InMemoryArtifactStore {
    state: Mutex<StoreState>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Number of artifacts stored for a binding
    pub fn count_for_binding(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
    ) -> usize {
        self.state
            .lock()
            .binding_artifacts(api_id, organization_id, gateway_id)
            .count()
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn create_artifact_and_set_current(
        &self,
        artifact: &DeploymentArtifact,
        hard_limit: usize,
    ) -> Result<Option<DeploymentId>, RepositoryError> {
        let mut state = self.state.lock();

        if state.artifacts.contains_key(&artifact.deployment_id) {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} already exists",
                artifact.deployment_id
            )));
        }

        let binding = artifact.binding();
        let pointer = state.pointer_for(binding.api_id, binding.gateway_id).cloned();
        let count = state
            .binding_artifacts(binding.api_id, binding.organization_id, binding.gateway_id)
            .count();

        let mut evicted = None;
        if count + 1 > hard_limit {
            evicted = state
                .binding_artifacts(binding.api_id, binding.organization_id, binding.gateway_id)
                .filter(|stored| {
                    DeploymentStatus::derive(stored.artifact.deployment_id, pointer.as_ref())
                        == DeploymentStatus::Archived
                })
                .min_by_key(|stored| (stored.artifact.created_at, stored.seq))
                .map(|stored| stored.artifact.deployment_id);

            match evicted {
                Some(id) => {
                    state.artifacts.remove(&id);
                }
                None => warn!(
                    "Binding {} is at its limit of {} artifacts with nothing evictable",
                    binding, hard_limit
                ),
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.artifacts.insert(
            artifact.deployment_id,
            StoredArtifact {
                artifact: artifact.clone(),
                seq,
            },
        );
        state.upsert_pointer(
            binding.api_id,
            binding.organization_id,
            binding.gateway_id,
            artifact.deployment_id,
            PointerStatus::Deployed,
        );

        Ok(evicted)
    }

    async fn get_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<DeploymentArtifact>, RepositoryError> {
        let state = self.state.lock();
        Ok(state
            .find(deployment_id, api_id, organization_id)
            .map(|stored| stored.artifact.clone()))
    }

    async fn get_artifact_with_status(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<ArtifactView>, RepositoryError> {
        let state = self.state.lock();
        Ok(state.find(deployment_id, api_id, organization_id).map(|stored| {
            let pointer = state.pointer_for(stored.artifact.api_id, stored.artifact.gateway_id);
            ArtifactView::from_pointer(stored.artifact.clone(), pointer)
        }))
    }

    async fn set_current(&self, request: SetCurrentRequest) -> Result<DateTime<Utc>, RepositoryError> {
        let mut state = self.state.lock();

        let stored = state
            .find(request.deployment_id, request.api_id, request.organization_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("deployment {}", request.deployment_id))
            })?;
        if stored.artifact.gateway_id != request.gateway_id {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} is bound to gateway {}",
                request.deployment_id, stored.artifact.gateway_id
            )));
        }

        let pointer = state.pointer_for(request.api_id, request.gateway_id);
        if !request.expect.holds(request.deployment_id, pointer) {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} no longer satisfies {:?}",
                request.deployment_id, request.expect
            )));
        }

        Ok(state.upsert_pointer(
            request.api_id,
            request.organization_id,
            request.gateway_id,
            request.deployment_id,
            request.status,
        ))
    }

    async fn list_artifacts_with_status(
        &self,
        query: ArtifactQuery,
    ) -> Result<Vec<ArtifactView>, RepositoryError> {
        let state = self.state.lock();

        let mut matching: Vec<(&StoredArtifact, ArtifactView)> = state
            .artifacts
            .values()
            .filter(|stored| {
                stored.artifact.api_id == query.api_id
                    && stored.artifact.organization_id == query.organization_id
                    && query
                        .gateway_id
                        .map_or(true, |gateway_id| stored.artifact.gateway_id == gateway_id)
            })
            .map(|stored| {
                let pointer = state.pointer_for(stored.artifact.api_id, stored.artifact.gateway_id);
                (stored, ArtifactView::from_pointer(stored.artifact.clone(), pointer))
            })
            .filter(|(_, view)| query.status.map_or(true, |status| view.status == status))
            .collect();

        matching.sort_by(|(a, _), (b, _)| {
            (b.artifact.created_at, b.seq).cmp(&(a.artifact.created_at, a.seq))
        });

        Ok(matching
            .into_iter()
            .take(query.limit)
            .map(|(_, view)| view)
            .collect())
    }

    async fn delete_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();

        let gateway_id = state
            .find(deployment_id, api_id, organization_id)
            .map(|stored| stored.artifact.gateway_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deployment {}", deployment_id)))?;

        let key = (api_id, gateway_id);
        let pointed_status = state
            .pointers
            .get(&key)
            .filter(|p| p.deployment_id == deployment_id)
            .map(|p| p.status);
        match pointed_status {
            Some(PointerStatus::Deployed) => {
                return Err(RepositoryError::Conflict(format!(
                    "deployment {} is deployed",
                    deployment_id
                )));
            }
            Some(PointerStatus::Undeployed) => {
                state.pointers.remove(&key);
            }
            None => {}
        }

        state.artifacts.remove(&deployment_id);
        Ok(())
    }

    async fn get_current_pointer(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
    ) -> Result<Option<DeploymentStatusPointer>, RepositoryError> {
        let state = self.state.lock();
        Ok(state
            .pointer_for(api_id, gateway_id)
            .filter(|p| p.organization_id == organization_id)
            .cloned())
    }
}
