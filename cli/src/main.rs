// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Switchboard Node Host
//!
//! The `switchboard` binary hosts a director and its agents in one process.
//!
//! ## Commands
//!
//! - `switchboard config show|validate|generate` - Configuration management
//! - `switchboard run` - Start an embedded node and serve until Ctrl-C
//! - `switchboard submit` - Start an embedded node, route one intent, print the outcome

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use switchboard_cli::commands::{self, ConfigCommand, RunArgs, SubmitArgs};
use switchboard_core::domain::node_config::SwitchboardConfigManifest;

/// Switchboard - route intents across a mesh of agents
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SWITCHBOARD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "SWITCHBOARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (compact, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run an embedded node until interrupted
    #[command(name = "run")]
    Run(RunArgs),

    /// Submit a single intent through an embedded node
    #[command(name = "submit")]
    Submit(SubmitArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging settings come from the manifest unless overridden on the command line.
    // A broken manifest must not stop `config validate` from reporting it.
    let logging = SwitchboardConfigManifest::load_or_default(cli.config.clone())
        .map(|manifest| manifest.spec.observability.logging)
        .unwrap_or_default();
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let format = cli.log_format.as_deref().unwrap_or(&logging.format);
    init_logging(level, format)?;

    match cli.command {
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Run(args)) => commands::run::execute(args, cli.config).await,
        Some(Commands::Submit(args)) => commands::submit::execute(args, cli.config).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{other}' (expected 'compact' or 'json')"),
    }

    Ok(())
}
