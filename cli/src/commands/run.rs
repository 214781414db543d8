// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run an embedded node until interrupted

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use switchboard_core::domain::node_config::SwitchboardConfigManifest;

use crate::embedded::{install_metrics_exporter, EmbeddedNode};

#[derive(Args)]
pub struct RunArgs {
    /// How long to wait for every agent's first heartbeat
    #[arg(long, default_value = "10", value_name = "SECONDS")]
    ready_timeout: u64,
}

pub async fn execute(args: RunArgs, config_override: Option<PathBuf>) -> Result<()> {
    let manifest = SwitchboardConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    install_metrics_exporter(&manifest.spec.observability)?;

    let node = EmbeddedNode::start(&manifest).await?;
    node.wait_until_ready(Duration::from_secs(args.ready_timeout))
        .await?;

    println!(
        "{}",
        format!(
            "✓ Node '{}' running with {} agent(s). Press Ctrl-C to stop.",
            manifest.metadata.name,
            node.agent_ids().len()
        )
        .green()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("{}", "Shutting down...".yellow());
    node.shutdown().await;
    Ok(())
}
