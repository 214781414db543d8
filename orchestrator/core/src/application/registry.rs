// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Registry
//!
//! Arena of agent descriptors keyed by [`AgentId`]. Every descriptor sits
//! behind its own mutex, so a heartbeat for one agent never waits on a
//! health scan or routing decision for another. Map shard guards are only
//! held long enough to clone an entry's `Arc`, never while a descriptor is
//! being modified.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Director-owned agent state with per-agent locking

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::domain::agent::{AgentDescriptor, AgentId, AgentStatus, Rung};

#[derive(Clone, Default)]
pub struct AgentRegistry {
    entries: Arc<DashMap<AgentId, Arc<Mutex<AgentDescriptor>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor. Returns true if the agent was new.
    pub fn register(&self, descriptor: AgentDescriptor) -> bool {
        let agent_id = descriptor.agent_id.clone();
        self.entries
            .insert(agent_id, Arc::new(Mutex::new(descriptor)))
            .is_none()
    }

    pub fn deregister(&self, agent_id: &AgentId) -> Option<AgentDescriptor> {
        self.entries
            .remove(agent_id)
            .map(|(_, entry)| entry.lock().clone())
    }

    fn entry(&self, agent_id: &AgentId) -> Option<Arc<Mutex<AgentDescriptor>>> {
        self.entries.get(agent_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.entries.contains_key(agent_id)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<AgentDescriptor> {
        self.entry(agent_id).map(|entry| entry.lock().clone())
    }

    pub fn status(&self, agent_id: &AgentId) -> Option<AgentStatus> {
        self.entry(agent_id).map(|entry| entry.lock().status)
    }

    /// Atomic read-modify-write of one descriptor.
    pub fn update<R>(&self, agent_id: &AgentId, f: impl FnOnce(&mut AgentDescriptor) -> R) -> Option<R> {
        let entry = self.entry(agent_id)?;
        let mut descriptor = entry.lock();
        Some(f(&mut descriptor))
    }

    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Point-in-time copy of every descriptor, ordered by id.
    pub fn snapshot(&self) -> Vec<AgentDescriptor> {
        self.ids().iter().filter_map(|id| self.get(id)).collect()
    }

    /// Agents at `rung` that may take `intent` at `confidence` right now,
    /// most specialized (highest threshold) first.
    pub fn eligible(&self, intent: &str, confidence: f64, rung: Rung) -> Vec<AgentDescriptor> {
        let mut candidates: Vec<AgentDescriptor> = self
            .snapshot()
            .into_iter()
            .filter(|agent| agent.rung == rung && agent.qualifies(intent, confidence))
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence_threshold
                .total_cmp(&a.confidence_threshold)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        candidates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
