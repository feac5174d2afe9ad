// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod catalog;
pub mod connection_registry;
pub mod db;
pub mod deployment_serializer;
pub mod repositories;

pub use connection_registry::{ChannelConnection, InMemoryConnectionRegistry};
pub use deployment_serializer::YamlDeploymentSerializer;
