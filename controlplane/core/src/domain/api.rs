// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # API Catalog Records
//!
//! Read-only views of the API, gateway and association records owned by the
//! catalog side of the control plane. The deployment lifecycle only reads
//! these; creating and editing them happens elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub ::uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            pub fn from_string(s: &str) -> Result<Self, ::uuid::Error> {
                Ok(Self(::uuid::Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(
    /// Unique identifier for a registered API
    ApiId
);

uuid_id!(
    /// Unique identifier for a gateway node (all replicas share it)
    GatewayId
);

uuid_id!(
    /// Tenant boundary; every lookup is scoped by it
    OrganizationId
);

/// Upstream service an API proxies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendService {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub method: String,
    pub path: String,
}

/// An API as configured by its owner right now
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub id: ApiId,
    /// URL-safe, organization-unique alias
    pub handle: String,
    pub organization_id: OrganizationId,
    pub name: String,
    pub version: String,
    pub context: String,
    #[serde(default)]
    pub backend_services: Vec<BackendService>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Api {
    pub fn has_backend_services(&self) -> bool {
        !self.backend_services.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub id: GatewayId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Virtual host the gateway serves APIs under
    pub vhost: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "production".to_string()
}

/// Bookkeeping record noting that an API has been bound to a gateway at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGatewayAssociation {
    pub api_id: ApiId,
    pub gateway_id: GatewayId,
    pub organization_id: OrganizationId,
    pub created_at: DateTime<Utc>,
}

impl ApiGatewayAssociation {
    pub fn new(api_id: ApiId, gateway_id: GatewayId, organization_id: OrganizationId) -> Self {
        Self {
            api_id,
            gateway_id,
            organization_id,
            created_at: Utc::now(),
        }
    }
}

/// How a caller names an API: by id, or by its organization-scoped handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRef {
    Id(ApiId),
    Handle(String),
}

impl ApiRef {
    /// Interpret a path segment; anything that parses as a UUID is an id
    pub fn parse(raw: &str) -> Self {
        match ApiId::from_string(raw) {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Handle(raw.to_string()),
        }
    }
}

impl From<ApiId> for ApiRef {
    fn from(id: ApiId) -> Self {
        Self::Id(id)
    }
}

impl std::fmt::Display for ApiRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Handle(handle) => write!(f, "{}", handle),
        }
    }
}
