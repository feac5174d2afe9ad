// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gateway_core::domain::config::{ControlPlaneConfig, StorageBackendKind, CONFIG_ENV_VAR};

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./gwctl-config.yaml)
        #[arg(short, long, default_value = "./gwctl-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = ControlPlaneConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_ENV_VAR,
            std::env::var(CONFIG_ENV_VAR)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./gwctl-config.yaml");
        println!("  4. ~/.gwctl/config.yaml");
        println!("  5. /etc/gwctl/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackendKind::Memory => println!("  Backend: memory"),
        StorageBackendKind::Postgres => {
            println!("  Backend: postgres");
            println!("  Max connections: {}", spec.storage.max_connections);
        }
    }
    println!();

    println!("{}", "Deployments:".bold());
    println!(
        "  Retained per API/gateway: {} (hard limit {})",
        spec.deployments.max_per_api_gateway,
        config.retention_policy().hard_limit()
    );
    println!(
        "  API key event attempts: {} ({}ms apart)",
        spec.broadcaster.api_key_max_attempts, spec.broadcaster.api_key_retry_delay_ms
    );
    println!("  Connection send timeout: {}ms", spec.connections.send_timeout_ms);
    println!();

    println!("{}", "Observability:".bold());
    println!("  Log: {} ({})", spec.logging.level, spec.logging.format);
    if spec.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControlPlaneConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid() {
        let minimal = ControlPlaneConfig::from_yaml_str(MINIMAL_TEMPLATE).unwrap();
        assert_eq!(minimal.spec.storage.backend, StorageBackendKind::Memory);

        let full = ControlPlaneConfig::from_yaml_str(EXAMPLES_TEMPLATE).unwrap();
        assert_eq!(full.spec.deployments.max_per_api_gateway, 20);
        assert_eq!(full.spec.logging.format, "compact");
    }

    #[tokio::test]
    async fn test_generate_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gwctl-config.yaml");
        generate(output.clone(), false).await.unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written, MINIMAL_TEMPLATE);
    }
}
