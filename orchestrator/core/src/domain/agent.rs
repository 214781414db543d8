// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Descriptor & Lifecycle
//!
//! Identity, lifecycle state machine and routing metadata of a registered
//! agent. Descriptors are owned by the director's registry; agents never
//! mutate them directly, they only emit heartbeats.
//!
//! ## Lifecycle
//!
//! ```text
//! offline → starting → online ⇄ degraded → stopping → offline
//!                        └──────→ offline (heartbeat loss) → online (recovery)
//! ```
//!
//! Any state may move to `stopping` on an explicit shutdown signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::domain::envelope::BROADCAST;

/// Stable agent identifier, unique for the lifetime of the process (e.g. `calendar-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn broadcast() -> Self {
        Self(BROADCAST.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Offline,
    Starting,
    Online,
    Degraded,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal lifecycle transition {from:?} -> {to:?}")]
pub struct LifecycleError {
    pub from: AgentStatus,
    pub to: AgentStatus,
}

impl AgentStatus {
    pub fn can_transition_to(&self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        match (*self, to) {
            (from, to) if from == to => false,
            (_, Stopping) => true,
            (Offline, Starting) => true,
            (Starting, Online) => true,
            (Online, Degraded) | (Degraded, Online) => true,
            // heartbeat loss past the second threshold
            (Starting, Offline) | (Online, Offline) | (Degraded, Offline) => true,
            // heartbeat resumption after an outage
            (Offline, Online) => true,
            (Stopping, Offline) => true,
            _ => false,
        }
    }

    pub fn transition(self, to: AgentStatus) -> Result<AgentStatus, LifecycleError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LifecycleError { from: self, to })
        }
    }

    /// Only `online` agents receive new work.
    pub fn is_routable(&self) -> bool {
        matches!(self, AgentStatus::Online)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Offline => "offline",
            AgentStatus::Starting => "starting",
            AgentStatus::Online => "online",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// One level of the escalation hierarchy. Ordered from most specialized to
/// the terminal human rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rung {
    #[default]
    Worker,
    Manager,
    Director,
    Human,
}

impl Rung {
    pub const LADDER: [Rung; 4] = [Rung::Worker, Rung::Manager, Rung::Director, Rung::Human];

    /// Next rung up, `None` once the human rung is reached.
    pub fn next(&self) -> Option<Rung> {
        match self {
            Rung::Worker => Some(Rung::Manager),
            Rung::Manager => Some(Rung::Director),
            Rung::Director => Some(Rung::Human),
            Rung::Human => None,
        }
    }

    /// Number of rungs above this one; bounds any escalation walk.
    pub fn remaining(&self) -> usize {
        Self::LADDER.len() - 1 - (*self as usize)
    }
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rung::Worker => "worker",
            Rung::Manager => "manager",
            Rung::Director => "director",
            Rung::Human => "human",
        };
        f.write_str(label)
    }
}

/// Registry entry for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: AgentId,
    /// Intent labels this agent can serve.
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    /// Hierarchy level the agent serves at (worker or manager).
    pub rung: Rung,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub consecutive_missed_heartbeats: u32,
    /// Minimum intent confidence at which the director routes here without escalating.
    pub confidence_threshold: f64,
    pub registered_at: DateTime<Utc>,
}

impl AgentDescriptor {
    pub fn new(agent_id: AgentId, rung: Rung, confidence_threshold: f64) -> Self {
        Self {
            agent_id,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Offline,
            rung,
            last_heartbeat_at: None,
            consecutive_missed_heartbeats: 0,
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
            registered_at: Utc::now(),
        }
    }

    pub fn worker(agent_id: impl Into<String>, confidence_threshold: f64) -> Self {
        Self::new(AgentId::new(agent_id), Rung::Worker, confidence_threshold)
    }

    pub fn manager(agent_id: impl Into<String>, confidence_threshold: f64) -> Self {
        Self::new(AgentId::new(agent_id), Rung::Manager, confidence_threshold)
    }

    pub fn with_capability(mut self, intent: impl Into<String>) -> Self {
        self.capabilities.insert(intent.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(intents.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn serves(&self, intent: &str) -> bool {
        self.capabilities.contains(intent)
    }

    /// Eligible for direct routing of `intent` at `confidence`.
    pub fn qualifies(&self, intent: &str, confidence: f64) -> bool {
        self.status.is_routable() && self.serves(intent) && self.confidence_threshold <= confidence
    }
}
