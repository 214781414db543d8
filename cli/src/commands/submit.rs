// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Submit a single intent through an embedded node

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use switchboard_core::domain::admission::{SubjectKey, DEFAULT_RESOURCE};
use switchboard_core::domain::envelope::Priority;
use switchboard_core::domain::node_config::SwitchboardConfigManifest;
use switchboard_director::domain::request::ANONYMOUS_SUBJECT;
use switchboard_director::{Delivered, IntentRequest, OrchestrationError};

use crate::embedded::EmbeddedNode;

#[derive(Args)]
pub struct SubmitArgs {
    /// Intent (capability name) to route
    #[arg(long)]
    intent: String,

    /// Caller's confidence in the intent, 0.0 to 1.0
    #[arg(long, default_value = "1.0")]
    confidence: f64,

    /// Subject for admission control (e.g. a user id)
    #[arg(long, default_value = ANONYMOUS_SUBJECT)]
    subject: String,

    /// Resource profile for admission control
    #[arg(long, default_value = DEFAULT_RESOURCE)]
    resource: String,

    /// Quota tier (defaults to the configured tier)
    #[arg(long)]
    tier: Option<String>,

    /// Delivery priority (critical, high, normal, low)
    #[arg(long, default_value = "normal")]
    priority: String,

    /// JSON arguments for the capability
    #[arg(long, default_value = "null")]
    payload: String,

    /// Per-attempt deadline in milliseconds (defaults to the configured deadline)
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

impl SubmitArgs {
    pub fn to_request(&self) -> Result<IntentRequest> {
        if !(0.0..=1.0).contains(&self.confidence) {
            anyhow::bail!("--confidence must be within [0, 1], got {}", self.confidence);
        }
        let args: Value = serde_json::from_str(&self.payload).context("--payload is not valid JSON")?;
        let priority: Priority = serde_json::from_value(Value::String(self.priority.to_lowercase()))
            .with_context(|| format!("Unknown priority '{}'", self.priority))?;

        let mut request = IntentRequest::new(&self.intent, self.confidence)
            .with_args(args)
            .for_subject(SubjectKey::new(&self.subject, &self.resource))
            .with_priority(priority);
        if let Some(tier) = &self.tier {
            request = request.with_tier(tier);
        }
        if let Some(deadline_ms) = self.deadline_ms {
            request = request.with_deadline(Duration::from_millis(deadline_ms));
        }
        Ok(request)
    }
}

pub async fn execute(args: SubmitArgs, config_override: Option<PathBuf>) -> Result<()> {
    let manifest = SwitchboardConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let request = args.to_request()?;

    let node = EmbeddedNode::start(&manifest).await?;
    node.wait_until_ready(Duration::from_secs(10)).await?;

    let outcome = node.director().submit(request).await;
    node.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }

    match outcome {
        Ok(_) => Ok(()),
        Err(err) => Err(anyhow::Error::new(err).context("Intent was not serviced")),
    }
}

pub fn outcome_json(outcome: &Result<Delivered, OrchestrationError>) -> Value {
    match outcome {
        Ok(delivered) => json!({ "ok": true, "delivered": delivered }),
        Err(err) => json!({ "ok": false, "error": err.to_payload() }),
    }
}

fn print_outcome(outcome: &Result<Delivered, OrchestrationError>) {
    match outcome {
        Ok(delivered) => {
            println!(
                "{}",
                format!("✓ Delivered by {} ({})", delivered.agent_id, delivered.rung).green()
            );
            println!("  Request: {}", delivered.request_id);
            println!(
                "  Attempts: {}, escalations: {}",
                delivered.attempts, delivered.escalations
            );
            println!("  Payload: {}", delivered.payload);
        }
        Err(err) => {
            println!("{}", format!("✗ {}", err).red());
            if let Some(last) = err.last_failure() {
                println!("  Last failure: {}", last);
            }
            if let Some(retry_after) = err.retry_after() {
                println!("  Retry after: {:?}", retry_after);
            }
        }
    }
}
