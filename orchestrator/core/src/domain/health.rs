// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Heartbeat Health Policy
//!
//! Pure two-threshold liveness state machine applied to an
//! [`AgentDescriptor`]. Every scan in which an agent's last heartbeat is older
//! than `miss_threshold` counts one consecutive miss:
//!
//! | Consecutive misses | Effect |
//! |--------------------|--------|
//! | ≥ `degraded_after_misses` | `online → degraded` (no new work routed) |
//! | ≥ `offline_after_misses` | `→ offline`, restart requested |
//!
//! A heartbeat resets the counter and brings `degraded`/`offline` agents back
//! `online`. The caller is responsible for holding the per-agent lock while
//! applying either function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::agent::{AgentDescriptor, AgentId, AgentStatus};
use crate::domain::envelope::Envelope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Age after which the last heartbeat counts as missed.
    #[serde(with = "humantime_serde", default = "default_miss_threshold")]
    pub miss_threshold: Duration,

    /// How often the monitor scans the registry.
    #[serde(with = "humantime_serde", default = "default_scan_interval")]
    pub scan_interval: Duration,

    /// How often each agent runtime emits a heartbeat.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(default = "default_degraded_after")]
    pub degraded_after_misses: u32,

    #[serde(default = "default_offline_after")]
    pub offline_after_misses: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            miss_threshold: default_miss_threshold(),
            scan_interval: default_scan_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            degraded_after_misses: default_degraded_after(),
            offline_after_misses: default_offline_after(),
        }
    }
}

fn default_miss_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_degraded_after() -> u32 {
    1
}

fn default_offline_after() -> u32 {
    3
}

/// Status the runtime reports about itself inside a heartbeat payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    Starting,
    Online,
    Stopping,
    Offline,
}

impl ReportedState {
    /// Heartbeat payload: `{"status": "online"}`.
    pub fn to_payload(self) -> serde_json::Value {
        serde_json::json!({ "status": self })
    }

    /// State carried by a heartbeat envelope. Heartbeats without a readable
    /// status count as `online`.
    pub fn from_heartbeat(envelope: &Envelope) -> Self {
        envelope
            .payload
            .get("status")
            .and_then(|status| serde_json::from_value(status.clone()).ok())
            .unwrap_or(ReportedState::Online)
    }
}

impl From<ReportedState> for AgentStatus {
    fn from(value: ReportedState) -> Self {
        match value {
            ReportedState::Starting => AgentStatus::Starting,
            ReportedState::Online => AgentStatus::Online,
            ReportedState::Stopping => AgentStatus::Stopping,
            ReportedState::Offline => AgentStatus::Offline,
        }
    }
}

/// A status change produced by the policy, published as a health event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTransition {
    pub agent_id: AgentId,
    pub from: AgentStatus,
    pub to: AgentStatus,
    pub consecutive_misses: u32,
    /// Set when the agent crossed the offline threshold; the process
    /// supervisor outside this core is expected to restart it.
    pub restart_requested: bool,
}

impl HealthPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.miss_threshold.is_zero() || self.scan_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err("health intervals and miss_threshold must be non-zero".into());
        }
        if self.heartbeat_interval >= self.miss_threshold {
            return Err(format!(
                "health.heartbeat_interval ({:?}) must be shorter than miss_threshold ({:?})",
                self.heartbeat_interval, self.miss_threshold
            ));
        }
        if self.degraded_after_misses == 0 {
            return Err("health.degraded_after_misses must be at least 1".into());
        }
        if self.offline_after_misses <= self.degraded_after_misses {
            return Err(format!(
                "health.offline_after_misses ({}) must exceed degraded_after_misses ({})",
                self.offline_after_misses, self.degraded_after_misses
            ));
        }
        Ok(())
    }

    /// Apply one scan to `descriptor` at `now`.
    pub fn assess(&self, descriptor: &mut AgentDescriptor, now: DateTime<Utc>) -> Option<HealthTransition> {
        if !matches!(
            descriptor.status,
            AgentStatus::Starting | AgentStatus::Online | AgentStatus::Degraded
        ) {
            return None;
        }
        let last = descriptor.last_heartbeat_at?;
        let silence = now.signed_duration_since(last).to_std().unwrap_or_default();
        if silence <= self.miss_threshold {
            return None;
        }

        descriptor.consecutive_missed_heartbeats = descriptor.consecutive_missed_heartbeats.saturating_add(1);
        let misses = descriptor.consecutive_missed_heartbeats;
        let from = descriptor.status;

        let to = if misses >= self.offline_after_misses {
            AgentStatus::Offline
        } else if misses >= self.degraded_after_misses && from == AgentStatus::Online {
            AgentStatus::Degraded
        } else {
            return None;
        };

        descriptor.status = from.transition(to).ok()?;
        Some(HealthTransition {
            agent_id: descriptor.agent_id.clone(),
            from,
            to,
            consecutive_misses: misses,
            restart_requested: to == AgentStatus::Offline,
        })
    }

    /// Record a heartbeat received at `at` reporting `reported`.
    pub fn heartbeat(
        &self,
        descriptor: &mut AgentDescriptor,
        at: DateTime<Utc>,
        reported: ReportedState,
    ) -> Option<HealthTransition> {
        descriptor.last_heartbeat_at = Some(descriptor.last_heartbeat_at.map_or(at, |last| last.max(at)));
        descriptor.consecutive_missed_heartbeats = 0;

        let from = descriptor.status;
        let mut to = AgentStatus::from(reported);
        // late stop notice from an agent already considered gone
        if from == AgentStatus::Offline && to == AgentStatus::Stopping {
            return None;
        }
        if from == AgentStatus::Degraded && to == AgentStatus::Starting {
            to = AgentStatus::Online;
        }
        if from == to || !from.can_transition_to(to) {
            return None;
        }

        descriptor.status = to;
        Some(HealthTransition {
            agent_id: descriptor.agent_id.clone(),
            from,
            to,
            consecutive_misses: 0,
            restart_requested: false,
        })
    }
}
