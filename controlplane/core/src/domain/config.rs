// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Control Plane Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) covering:
// - HTTP listener
// - Artifact storage backend
// - Deployment retention window
// - Gateway broadcast and connection tuning
// - Catalog seed file, logging and metrics

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::connection::ChannelSettings;
use crate::domain::deployment::RetentionPolicy;
use crate::domain::events::{EventRetryPolicies, RetryPolicy};
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const CONFIG_API_VERSION: &str = "100monkeys.ai/v1";
pub const CONFIG_KIND: &str = "ControlPlaneConfig";
pub const CONFIG_ENV_VAR: &str = "GWCTL_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: ControlPlaneSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub deployments: DeploymentsConfig,

    #[serde(default)]
    pub broadcaster: BroadcasterConfig,

    #[serde(default)]
    pub connections: ConnectionsConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,

    /// Required when backend is postgres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentsConfig {
    /// Soft limit of artifacts kept per (API, gateway); a fixed buffer is added on top
    #[serde(default = "default_max_per_api_gateway")]
    pub max_per_api_gateway: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    #[serde(default = "default_api_key_max_attempts")]
    pub api_key_max_attempts: u32,

    /// Pause between apikey.* attempts; 0 retries immediately
    #[serde(default)]
    pub api_key_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// YAML file with APIs and gateways to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    9243
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Memory
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_per_api_gateway() -> usize {
    20
}

fn default_api_key_max_attempts() -> u32 {
    2
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for DeploymentsConfig {
    fn default() -> Self {
        Self {
            max_per_api_gateway: default_max_per_api_gateway(),
        }
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            api_key_max_attempts: default_api_key_max_attempts(),
            api_key_retry_delay_ms: 0,
        }
    }
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_version: CONFIG_API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ConfigMetadata {
                name: "gateway-controlplane".to_string(),
                version: None,
            },
            spec: ControlPlaneSpec::default(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Search standard locations: env var, working directory, home, system
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gwctl-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gwctl").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gwctl/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (container deployments)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GWCTL_DATABASE_URL") {
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }

        if let Some(val) = lookup("GWCTL_MAX_DEPLOYMENTS_PER_API_GATEWAY") {
            match val.parse::<usize>() {
                Ok(limit) => self.spec.deployments.max_per_api_gateway = limit,
                Err(_) => tracing::warn!(
                    "Ignoring GWCTL_MAX_DEPLOYMENTS_PER_API_GATEWAY='{}': not a positive integer",
                    val
                ),
            }
        }

        if let Some(addr) = lookup("GWCTL_BIND_ADDRESS") {
            self.spec.server.bind_address = addr;
        }

        if let Some(level) = lookup("GWCTL_LOG_LEVEL") {
            self.spec.logging.level = level;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != CONFIG_API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                CONFIG_API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.deployments.max_per_api_gateway == 0 {
            anyhow::bail!("spec.deployments.max_per_api_gateway must be at least 1");
        }

        if self.spec.broadcaster.api_key_max_attempts == 0 {
            anyhow::bail!("spec.broadcaster.api_key_max_attempts must be at least 1");
        }

        if self.spec.connections.channel_capacity == 0 {
            anyhow::bail!("spec.connections.channel_capacity must be at least 1");
        }

        if self.spec.storage.backend == StorageBackendKind::Postgres
            && self
                .spec
                .storage
                .database_url
                .as_deref()
                .map_or(true, str::is_empty)
        {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        match self.spec.logging.format.as_str() {
            "compact" | "json" => {}
            other => anyhow::bail!(
                "Invalid spec.logging.format: '{}'. Must be 'compact' or 'json'",
                other
            ),
        }

        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.spec.deployments.max_per_api_gateway)
    }

    pub fn retry_policies(&self) -> EventRetryPolicies {
        EventRetryPolicies {
            deployment: RetryPolicy::once(),
            api_key: RetryPolicy::fixed(
                self.spec.broadcaster.api_key_max_attempts,
                Duration::from_millis(self.spec.broadcaster.api_key_retry_delay_ms),
            ),
        }
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            capacity: self.spec.connections.channel_capacity,
            send_timeout: Duration::from_millis(self.spec.connections.send_timeout_ms),
        }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match (self.spec.storage.backend, &self.spec.storage.database_url) {
            (StorageBackendKind::Postgres, Some(url)) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.clone(),
                max_connections: self.spec.storage.max_connections,
            }),
            _ => StorageBackend::InMemory,
        }
    }
}
