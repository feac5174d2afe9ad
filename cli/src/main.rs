// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # gwctl
//!
//! Control plane for the API gateway: serves the deployment API and pushes
//! deployment events to connected gateways.
//!
//! ## Commands
//!
//! - `gwctl serve` - Run the control plane HTTP server
//! - `gwctl config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gateway_controlplane::commands::{self, ConfigCommand, ServeArgs};
use gateway_core::domain::config::{ControlPlaneConfig, LoggingConfig};

/// API gateway control plane
#[derive(Parser)]
#[command(name = "gwctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GWCTL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = ControlPlaneConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            init_logging(&config.spec.logging)?;
            commands::serve::run(config, args).await
        }
        Commands::Config { command } => {
            init_logging(&LoggingConfig::default())?;
            commands::config::handle_command(command, cli.config).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format == "json" {
        builder.json().with_current_span(false).init();
    } else {
        builder.with_target(false).compact().init();
    }

    Ok(())
}
