// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Health Monitor - Background heartbeat scanner
//!
//! Applies the two-threshold [`HealthPolicy`] to every registered agent on a
//! fixed interval and records heartbeats as they arrive. Both paths mutate a
//! descriptor only under that agent's registry lock, so a heartbeat racing a
//! scan is applied either fully before or fully after it.
//!
//! Status changes are published as `health_changed` events; crossing the
//! offline threshold additionally publishes `restart_requested` for the
//! process supervisor.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Liveness tracking and lifecycle transitions

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::event_publisher::EventPublisher;
use crate::application::registry::AgentRegistry;
use crate::domain::agent::AgentId;
use crate::domain::envelope::{Envelope, MessageType};
use crate::domain::events::OrchestrationEvent;
use crate::domain::health::{HealthPolicy, HealthTransition, ReportedState};

pub struct HealthMonitor {
    registry: AgentRegistry,
    policy: HealthPolicy,
    events: EventPublisher,
    shutdown_token: CancellationToken,
}

impl HealthMonitor {
    pub fn new(registry: AgentRegistry, policy: HealthPolicy, events: EventPublisher) -> Self {
        Self {
            registry,
            policy,
            events,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the scan loop in the background
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            scan_interval_ms = self.policy.scan_interval.as_millis() as u64,
            miss_threshold_ms = self.policy.miss_threshold.as_millis() as u64,
            degraded_after = self.policy.degraded_after_misses,
            offline_after = self.policy.offline_after_misses,
            "Starting health monitor"
        );

        let mut tick = interval(self.policy.scan_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let changes = self.scan().await;
                    if !changes.is_empty() {
                        debug!(changes = changes.len(), "Health scan applied transitions");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping health monitor");
                    break;
                }
            }
        }
    }

    pub async fn scan(&self) -> Vec<HealthTransition> {
        self.scan_at(Utc::now()).await
    }

    /// One pass over the registry at `now`.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Vec<HealthTransition> {
        let mut transitions = Vec::new();

        for agent_id in self.registry.ids() {
            let outcome = self.registry.update(&agent_id, |descriptor| {
                let before = descriptor.consecutive_missed_heartbeats;
                let transition = self.policy.assess(descriptor, now);
                (descriptor.consecutive_missed_heartbeats > before, transition)
            });

            let Some((missed, transition)) = outcome else {
                // deregistered mid-scan
                continue;
            };
            if missed {
                metrics::counter!("switchboard_heartbeats_missed_total", "agent_id" => agent_id.to_string())
                    .increment(1);
            }
            if let Some(transition) = transition {
                self.announce(&transition, now).await;
                transitions.push(transition);
            }
        }

        transitions
    }

    /// Record a heartbeat from `agent_id`. Unknown agents are ignored.
    pub async fn record_heartbeat(
        &self,
        agent_id: &AgentId,
        at: DateTime<Utc>,
        reported: ReportedState,
    ) -> Option<HealthTransition> {
        let transition = match self
            .registry
            .update(agent_id, |descriptor| self.policy.heartbeat(descriptor, at, reported))
        {
            Some(transition) => transition,
            None => {
                debug!(agent_id = %agent_id, "Heartbeat from unregistered agent ignored");
                return None;
            }
        }?;

        self.announce(&transition, at).await;
        Some(transition)
    }

    /// Record a heartbeat envelope. Its sender clock is trusted only up to
    /// our own, so a skewed agent cannot postpone its own miss detection.
    pub async fn observe(&self, envelope: &Envelope) -> Option<HealthTransition> {
        if envelope.message_type != MessageType::Heartbeat {
            return None;
        }
        let at = envelope.created_at.min(Utc::now());
        self.record_heartbeat(&envelope.from_agent, at, ReportedState::from_heartbeat(envelope))
            .await
    }

    async fn announce(&self, transition: &HealthTransition, at: DateTime<Utc>) {
        self.events
            .publish(OrchestrationEvent::HealthChanged {
                agent_id: transition.agent_id.clone(),
                from: transition.from,
                to: transition.to,
                consecutive_misses: transition.consecutive_misses,
                changed_at: at,
            })
            .await;

        if transition.restart_requested {
            self.events
                .publish(OrchestrationEvent::RestartRequested {
                    agent_id: transition.agent_id.clone(),
                    consecutive_misses: transition.consecutive_misses,
                    requested_at: at,
                })
                .await;
        }
    }
}
