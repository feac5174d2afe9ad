// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `gwctl serve`
//!
//! Wires the control plane from configuration and serves the deployment API
//! until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use gateway_core::application::repository_factory::create_artifact_store;
use gateway_core::application::{
    DeploymentLifecycleManager, GatewayEventBroadcaster, StandardDeploymentService,
};
use gateway_core::domain::config::ControlPlaneConfig;
use gateway_core::infrastructure::catalog::Catalog;
use gateway_core::infrastructure::repositories::{
    InMemoryApiRepository, InMemoryAssociationRepository, InMemoryGatewayRepository,
};
use gateway_core::infrastructure::{InMemoryConnectionRegistry, YamlDeploymentSerializer};
use gateway_core::presentation::api;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on (overrides spec.server.port)
    #[arg(long, env = "GWCTL_PORT")]
    pub port: Option<u16>,
}

pub async fn run(config: ControlPlaneConfig, args: ServeArgs) -> Result<()> {
    if config.spec.metrics.enabled {
        let metrics_addr: SocketAddr = format!(
            "{}:{}",
            config.spec.server.bind_address, config.spec.metrics.port
        )
        .parse()
        .context("Invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }

    let store = create_artifact_store(&config.storage_backend()).await?;

    let apis = Arc::new(InMemoryApiRepository::new());
    let gateways = Arc::new(InMemoryGatewayRepository::new());
    if let Some(path) = &config.spec.catalog.path {
        Catalog::from_yaml_file(path)?
            .load_into(apis.as_ref(), gateways.as_ref())
            .await?;
    }

    let registry = Arc::new(InMemoryConnectionRegistry::with_settings(
        config.channel_settings(),
    ));
    let lifecycle = Arc::new(DeploymentLifecycleManager::new(
        store,
        Arc::new(YamlDeploymentSerializer::new()),
        config.retention_policy(),
    ));
    let broadcaster = Arc::new(GatewayEventBroadcaster::new(
        registry,
        config.retry_policies(),
    ));
    let service = Arc::new(StandardDeploymentService::new(
        lifecycle,
        broadcaster,
        apis,
        gateways,
        Arc::new(InMemoryAssociationRepository::new()),
    ));

    let app = api::app(service);

    let port = args.port.unwrap_or(config.spec.server.port);
    let addr = format!("{}:{}", config.spec.server.bind_address, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "Control plane '{}' listening on {} (retention: {} per API/gateway)",
        config.metadata.name,
        addr,
        config.spec.deployments.max_per_api_gateway
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Control plane shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
