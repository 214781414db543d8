// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use switchboard_core::domain::node_config::SwitchboardConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./switchboard.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(&output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = SwitchboardConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  0. --config flag: {}", path.display());
        } else {
            println!("  0. --config flag: {}", "(not set)".dimmed());
        }
        for (index, path) in SwitchboardConfigManifest::candidate_paths().iter().enumerate() {
            let marker = if path.exists() { "found".green() } else { "missing".dimmed() };
            println!("  {}. {} [{}]", index + 1, path.display(), marker);
        }
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let transport = &config.spec.transport;
    println!("{}", "Transport:".bold());
    println!("  Channel capacity: {}", transport.channel_capacity);
    println!("  Enqueue timeout: {:?}", transport.enqueue_timeout);
    println!(
        "  Backoff: {:?} → {:?} over {} attempt(s)",
        transport.backoff.base_delay, transport.backoff.max_delay, transport.backoff.max_attempts
    );
    println!();

    let health = &config.spec.health;
    println!("{}", "Health:".bold());
    println!("  Heartbeat every {:?}, scan every {:?}", health.heartbeat_interval, health.scan_interval);
    println!(
        "  Degraded after {} miss(es), offline after {} (miss threshold {:?})",
        health.degraded_after_misses, health.offline_after_misses, health.miss_threshold
    );
    println!();

    let director = &config.spec.director;
    println!("{}", "Director:".bold());
    println!("  ID: {}", director.agent_id);
    println!("  Request deadline: {:?}, max retries: {}", director.request_deadline, director.max_retries);
    println!("  Fan-out deadline: {:?}", director.fan_out_deadline);
    println!();

    let admission = &config.spec.admission;
    println!("{}", "Admission:".bold());
    println!("  Default tier: {}", admission.default_tier);
    for (resource, quota) in &admission.quotas.resources {
        println!("  {} → {} per {:?}", resource.bold(), quota.limit, quota.window);
    }
    for (tier, multiplier) in &admission.quotas.tiers {
        println!("  tier {} ×{}", tier, multiplier);
    }
    println!();

    println!("{}", "Agents:".bold());
    if config.spec.agents.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for agent in &config.spec.agents {
        println!(
            "  {} ({}, threshold {:.2})",
            agent.id.to_string().bold(),
            agent.rung,
            agent.confidence_threshold
        );
        println!("    Capabilities: {}", agent.capabilities.join(", "));
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = SwitchboardConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!("Refusing to overwrite existing file {:?}", output);
    }

    SwitchboardConfigManifest::sample()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
