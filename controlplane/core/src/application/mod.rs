// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod broadcaster;
pub mod deployment_service;
pub mod lifecycle;
pub mod repository_factory;

pub use broadcaster::{BroadcastError, BroadcastReport, GatewayEventBroadcaster};
pub use deployment_service::{
    DeployApiRequest, DeploymentListResponse, DeploymentResponse, DeploymentService,
    StandardDeploymentService,
};
pub use lifecycle::{DeployInput, DeploymentLifecycleManager, ValidatedDeploy};
