// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway Control Plane Core
//!
//! Deployment lifecycle management and gateway event broadcasting for the
//! API gateway control plane.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Turn API configuration into versioned per-gateway
//!   deployments, keep one current pointer per binding, and notify gateways

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
