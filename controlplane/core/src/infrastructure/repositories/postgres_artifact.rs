// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Artifact Store
//!
//! Two tables: `deployments` (append-only artifacts) and
//! `deployment_status` (one row per `(api_id, gateway_id)`, enforced by its
//! primary key). Status is derived with a LEFT JOIN; no row means ARCHIVED.
//!
//! Each compound operation runs in one transaction that first takes a
//! transaction-scoped advisory lock keyed by the binding, so concurrent
//! deploys, restores and deletes on the same pair serialize while different
//! pairs proceed independently.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Production backend for `ArtifactStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::api::{ApiId, GatewayId, OrganizationId};
use crate::domain::deployment::{
    ArtifactView, DeploymentArtifact, DeploymentId, DeploymentStatus, DeploymentStatusPointer,
    PointerStatus,
};
use crate::domain::repository::{ArtifactQuery, ArtifactStore, RepositoryError, SetCurrentRequest};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS deployments (
        deployment_id      UUID PRIMARY KEY,
        api_id             UUID NOT NULL,
        organization_id    UUID NOT NULL,
        gateway_id         UUID NOT NULL,
        name               TEXT NOT NULL,
        base_deployment_id UUID NULL,
        content            BYTEA NOT NULL,
        metadata           JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at         TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_deployments_binding_created
        ON deployments (api_id, gateway_id, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deployment_status (
        api_id          UUID NOT NULL,
        organization_id UUID NOT NULL,
        gateway_id      UUID NOT NULL,
        deployment_id   UUID NOT NULL REFERENCES deployments (deployment_id) ON DELETE CASCADE,
        status          TEXT NOT NULL CHECK (status IN ('DEPLOYED', 'UNDEPLOYED')),
        updated_at      TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (api_id, gateway_id)
    )
    "#,
];

const ARTIFACT_COLUMNS: &str = r#"
    d.deployment_id, d.api_id, d.organization_id, d.gateway_id, d.name,
    d.base_deployment_id, d.content, d.metadata, d.created_at,
    s.status AS pointer_status, s.updated_at AS pointer_updated_at
"#;

pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(format!("Failed to apply schema: {}", e)))?;
        }
        Ok(())
    }

    async fn lock_binding(
        tx: &mut Transaction<'_, Postgres>,
        api_id: ApiId,
        gateway_id: GatewayId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("deployment-binding:{}:{}", api_id, gateway_id))
            .execute(&mut **tx)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to lock binding: {}", e)))?;
        Ok(())
    }

    async fn pointer_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        api_id: ApiId,
        gateway_id: GatewayId,
    ) -> Result<Option<DeploymentStatusPointer>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT api_id, organization_id, gateway_id, deployment_id, status, updated_at
            FROM deployment_status
            WHERE api_id = $1 AND gateway_id = $2
            FOR UPDATE
            "#,
        )
        .bind(api_id.0)
        .bind(gateway_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(parse_pointer_row).transpose()
    }

    async fn upsert_pointer_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
        deployment_id: DeploymentId,
        status: PointerStatus,
    ) -> Result<DateTime<Utc>, RepositoryError> {
        let updated_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO deployment_status (api_id, organization_id, gateway_id, deployment_id, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (api_id, gateway_id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                deployment_id = EXCLUDED.deployment_id,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(api_id.0)
        .bind(organization_id.0)
        .bind(gateway_id.0)
        .bind(deployment_id.0)
        .bind(status.as_str())
        .bind(updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update deployment pointer: {}", e)))?;
        Ok(updated_at)
    }

    async fn artifact_gateway_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<GatewayId>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT gateway_id FROM deployments
            WHERE deployment_id = $1 AND api_id = $2 AND organization_id = $3
            "#,
        )
        .bind(deployment_id.0)
        .bind(api_id.0)
        .bind(organization_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|r| r.try_get::<Uuid, _>("gateway_id").map(GatewayId))
            .transpose()
            .map_err(RepositoryError::from)
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    async fn create_artifact_and_set_current(
        &self,
        artifact: &DeploymentArtifact,
        hard_limit: usize,
    ) -> Result<Option<DeploymentId>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_binding(&mut tx, artifact.api_id, artifact.gateway_id).await?;

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM deployments
            WHERE api_id = $1 AND gateway_id = $2 AND organization_id = $3
            "#,
        )
        .bind(artifact.api_id.0)
        .bind(artifact.gateway_id.0)
        .bind(artifact.organization_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let mut evicted = None;
        if count as usize + 1 > hard_limit {
            let oldest_archived: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT d.deployment_id
                FROM deployments d
                LEFT JOIN deployment_status s ON s.deployment_id = d.deployment_id
                WHERE d.api_id = $1 AND d.gateway_id = $2 AND d.organization_id = $3
                  AND s.deployment_id IS NULL
                ORDER BY d.created_at ASC
                LIMIT 1
                "#,
            )
            .bind(artifact.api_id.0)
            .bind(artifact.gateway_id.0)
            .bind(artifact.organization_id.0)
            .fetch_optional(&mut *tx)
            .await?;

            match oldest_archived {
                Some(id) => {
                    sqlx::query("DELETE FROM deployments WHERE deployment_id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    evicted = Some(DeploymentId(id));
                }
                None => tracing::warn!(
                    "Binding {} is at its limit of {} artifacts with nothing evictable",
                    artifact.binding(),
                    hard_limit
                ),
            }
        }

        sqlx::query(
            r#"
            INSERT INTO deployments (
                deployment_id, api_id, organization_id, gateway_id, name,
                base_deployment_id, content, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(artifact.deployment_id.0)
        .bind(artifact.api_id.0)
        .bind(artifact.organization_id.0)
        .bind(artifact.gateway_id.0)
        .bind(&artifact.name)
        .bind(artifact.base_deployment_id.map(|id| id.0))
        .bind(&artifact.content)
        .bind(serde_json::Value::Object(artifact.metadata.clone()))
        .bind(artifact.created_at)
        .execute(&mut *tx)
        .await?;

        Self::upsert_pointer_in_tx(
            &mut tx,
            artifact.api_id,
            artifact.organization_id,
            artifact.gateway_id,
            artifact.deployment_id,
            PointerStatus::Deployed,
        )
        .await?;

        tx.commit().await?;
        Ok(evicted)
    }

    async fn get_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<DeploymentArtifact>, RepositoryError> {
        Ok(self
            .get_artifact_with_status(deployment_id, api_id, organization_id)
            .await?
            .map(|view| view.artifact))
    }

    async fn get_artifact_with_status(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<Option<ArtifactView>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM deployments d
            LEFT JOIN deployment_status s
                ON s.deployment_id = d.deployment_id
               AND s.api_id = d.api_id
               AND s.gateway_id = d.gateway_id
            WHERE d.deployment_id = $1 AND d.api_id = $2 AND d.organization_id = $3
            "#
        );
        let row = sqlx::query(&sql)
            .bind(deployment_id.0)
            .bind(api_id.0)
            .bind(organization_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(parse_view_row).transpose()
    }

    async fn set_current(&self, request: SetCurrentRequest) -> Result<DateTime<Utc>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_binding(&mut tx, request.api_id, request.gateway_id).await?;

        let bound_gateway = Self::artifact_gateway_in_tx(
            &mut tx,
            request.deployment_id,
            request.api_id,
            request.organization_id,
        )
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("deployment {}", request.deployment_id)))?;

        if bound_gateway != request.gateway_id {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} is bound to gateway {}",
                request.deployment_id, bound_gateway
            )));
        }

        let pointer = Self::pointer_in_tx(&mut tx, request.api_id, request.gateway_id).await?;
        if !request.expect.holds(request.deployment_id, pointer.as_ref()) {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} no longer satisfies {:?}",
                request.deployment_id, request.expect
            )));
        }

        let updated_at = Self::upsert_pointer_in_tx(
            &mut tx,
            request.api_id,
            request.organization_id,
            request.gateway_id,
            request.deployment_id,
            request.status,
        )
        .await?;

        tx.commit().await?;
        Ok(updated_at)
    }

    async fn list_artifacts_with_status(
        &self,
        query: ArtifactQuery,
    ) -> Result<Vec<ArtifactView>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM deployments d
            LEFT JOIN deployment_status s
                ON s.deployment_id = d.deployment_id
               AND s.api_id = d.api_id
               AND s.gateway_id = d.gateway_id
            WHERE d.api_id = $1 AND d.organization_id = $2
              AND ($3::uuid IS NULL OR d.gateway_id = $3)
              AND ($4::text IS NULL OR COALESCE(s.status, 'ARCHIVED') = $4)
            ORDER BY d.created_at DESC
            LIMIT $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.api_id.0)
            .bind(query.organization_id.0)
            .bind(query.gateway_id.map(|id| id.0))
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(parse_view_row).collect()
    }

    async fn delete_artifact(
        &self,
        deployment_id: DeploymentId,
        api_id: ApiId,
        organization_id: OrganizationId,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let gateway_id =
            Self::artifact_gateway_in_tx(&mut tx, deployment_id, api_id, organization_id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("deployment {}", deployment_id)))?;
        Self::lock_binding(&mut tx, api_id, gateway_id).await?;

        let pointer = Self::pointer_in_tx(&mut tx, api_id, gateway_id).await?;
        if DeploymentStatus::derive(deployment_id, pointer.as_ref()) == DeploymentStatus::Deployed {
            return Err(RepositoryError::Conflict(format!(
                "deployment {} is deployed",
                deployment_id
            )));
        }

        // Pointer rows referencing the artifact go with it (ON DELETE CASCADE)
        let result = sqlx::query(
            "DELETE FROM deployments WHERE deployment_id = $1 AND api_id = $2 AND organization_id = $3",
        )
        .bind(deployment_id.0)
        .bind(api_id.0)
        .bind(organization_id.0)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("deployment {}", deployment_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_current_pointer(
        &self,
        api_id: ApiId,
        organization_id: OrganizationId,
        gateway_id: GatewayId,
    ) -> Result<Option<DeploymentStatusPointer>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT api_id, organization_id, gateway_id, deployment_id, status, updated_at
            FROM deployment_status
            WHERE api_id = $1 AND organization_id = $2 AND gateway_id = $3
            "#,
        )
        .bind(api_id.0)
        .bind(organization_id.0)
        .bind(gateway_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_pointer_row).transpose()
    }
}

fn parse_pointer_row(row: PgRow) -> Result<DeploymentStatusPointer, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(DeploymentStatusPointer {
        api_id: ApiId(row.try_get("api_id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        gateway_id: GatewayId(row.try_get("gateway_id")?),
        deployment_id: DeploymentId(row.try_get("deployment_id")?),
        status: PointerStatus::from_str(&status)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_view_row(row: PgRow) -> Result<ArtifactView, RepositoryError> {
    let metadata = match row.try_get::<serde_json::Value, _>("metadata")? {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            return Err(RepositoryError::Serialization(format!(
                "deployment metadata must be an object, got {}",
                other
            )))
        }
    };

    let artifact = DeploymentArtifact {
        deployment_id: DeploymentId(row.try_get("deployment_id")?),
        api_id: ApiId(row.try_get("api_id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        gateway_id: GatewayId(row.try_get("gateway_id")?),
        name: row.try_get("name")?,
        base_deployment_id: row
            .try_get::<Option<Uuid>, _>("base_deployment_id")?
            .map(DeploymentId),
        content: row.try_get("content")?,
        metadata,
        created_at: row.try_get("created_at")?,
    };

    let pointer_status: Option<String> = row.try_get("pointer_status")?;
    let status = match pointer_status {
        Some(s) => PointerStatus::from_str(&s)?.into(),
        None => DeploymentStatus::Archived,
    };

    Ok(ArtifactView {
        artifact,
        status,
        status_updated_at: row.try_get("pointer_updated_at")?,
    })
}
