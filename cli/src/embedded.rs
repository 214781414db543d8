// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedded node
//!
//! Builds an in-process node from a manifest: the in-memory fabric, the
//! director service and one runtime per configured agent.
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Wire core and director services together for CLI commands

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use switchboard_core::application::{AgentHandle, AgentRuntime};
use switchboard_core::domain::agent::{AgentId, AgentStatus};
use switchboard_core::domain::capability::{CapabilityRegistry, FnCapability};
use switchboard_core::domain::node_config::{AgentSpec, ObservabilityConfig, SwitchboardConfigManifest};
use switchboard_core::infrastructure::event_bus::InMemoryBus;
use switchboard_director::{Director, DirectorHandle};

/// Capability every embedded agent can serve without custom code.
pub const ECHO_INTENT: &str = "echo";

pub struct EmbeddedNode {
    bus: Arc<InMemoryBus>,
    director: Director,
    service: DirectorHandle,
    agents: Vec<AgentHandle>,
}

impl EmbeddedNode {
    /// Validate `manifest` and bring every configured agent up.
    pub async fn start(manifest: &SwitchboardConfigManifest) -> Result<Self> {
        manifest
            .validate()
            .context("Configuration validation failed")?;

        let bus = Arc::new(InMemoryBus::from_config(&manifest.spec.transport));
        let director = Director::from_manifest(manifest, bus.clone(), CapabilityRegistry::new());
        let service = director
            .start()
            .await
            .context("Failed to start director service")?;

        let mut agents = Vec::with_capacity(manifest.spec.agents.len());
        for spec in &manifest.spec.agents {
            let runtime = AgentRuntime::new(spec.id.clone(), bus.clone(), builtin_capabilities(spec)?)
                .with_director(director.agent_id().clone())
                .with_heartbeat_interval(manifest.spec.health.heartbeat_interval)
                .with_backoff(manifest.spec.transport.backoff);
            let handle = runtime
                .spawn()
                .await
                .with_context(|| format!("Failed to start agent '{}'", spec.id))?;
            agents.push(handle);
        }

        info!(
            director = %director.agent_id(),
            agents = agents.len(),
            "Embedded node started"
        );

        Ok(Self {
            bus,
            director,
            service,
            agents,
        })
    }

    pub fn director(&self) -> &Director {
        &self.director
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|agent| agent.agent_id().clone()).collect()
    }

    /// Wait until the director has seen a heartbeat from every agent.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let ids = self.agent_ids();
        let registry = self.director.registry();
        tokio::time::timeout(timeout, async {
            while !ids.iter().all(|id| registry.status(id) == Some(AgentStatus::Online)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("Agents did not come online within {:?}", timeout))
    }

    /// Stop agents first so their final heartbeats still reach the director.
    pub async fn shutdown(self) {
        for agent in self.agents {
            agent.shutdown().await;
        }
        self.service.shutdown().await;
        self.bus.shutdown();
        info!("Embedded node stopped");
    }
}

/// Handlers for the capabilities an agent advertises. Only `echo` is built
/// in; anything else is advertised but answered with an unknown-capability
/// error.
pub fn builtin_capabilities(spec: &AgentSpec) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for intent in &spec.capabilities {
        if intent == ECHO_INTENT {
            registry
                .register(Arc::new(FnCapability::new(ECHO_INTENT, |args: Value| async move { Ok(args) })))
                .context("Failed to register echo capability")?;
        } else {
            warn!(agent_id = %spec.id, intent = %intent, "No built-in handler for capability");
        }
    }
    Ok(registry)
}

/// Install the Prometheus exporter when metrics are enabled.
pub fn install_metrics_exporter(observability: &ObservabilityConfig) -> Result<()> {
    let Some(config) = observability.metrics.as_ref().filter(|metrics| metrics.enabled) else {
        return Ok(());
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port = config.port, "Prometheus exporter listening");
    Ok(())
}
