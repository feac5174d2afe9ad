// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Deployment artifacts, derived status, gateway events, connection contracts
//! and the repository interfaces the application layer is written against.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and invariants with no I/O

pub mod api;
pub mod config;
pub mod connection;
pub mod deployment;
pub mod deployment_document;
pub mod events;
pub mod repository;
