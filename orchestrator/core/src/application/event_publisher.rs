// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Publisher
//!
//! Emits [`OrchestrationEvent`]s three ways: a structured log line, an
//! in-process broadcast for local observers (CLI, tests), and an `event`
//! envelope on the transport's broadcast channel. Event delivery is best
//! effort; a failed publish is logged and never fails the request that
//! produced the event.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Observability side channel for health and request outcomes

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::events::OrchestrationEvent;
use crate::domain::transport::{Channel, Transport};

#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    source: AgentId,
    local: broadcast::Sender<OrchestrationEvent>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>, source: AgentId) -> Self {
        let (local, _) = broadcast::channel(1024);
        Self {
            transport,
            source,
            local,
        }
    }

    /// Subscribe to events published through this publisher only.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.local.subscribe()
    }

    pub async fn publish(&self, event: OrchestrationEvent) {
        log_event(&event);

        // No local receivers is normal
        let _ = self.local.send(event.clone());

        match event.to_envelope(self.source.clone()) {
            Ok(envelope) => {
                if let Err(e) = self.transport.publish(&Channel::Broadcast, envelope).await {
                    warn!(event = event.name(), "Failed to publish orchestration event: {}", e);
                }
            }
            Err(e) => warn!(event = event.name(), "Failed to encode orchestration event: {}", e),
        }
    }
}

fn log_event(event: &OrchestrationEvent) {
    match event {
        OrchestrationEvent::Escalated {
            request_id,
            intent,
            from_rung,
            to_rung,
            reason,
            ..
        } => warn!(
            request_id = %request_id,
            intent = %intent,
            from_rung = %from_rung,
            to_rung = %to_rung,
            reason = %reason,
            "Request escalated"
        ),
        OrchestrationEvent::RequestCompleted {
            request_id,
            agent_id,
            rung,
            attempts,
            escalations,
            ..
        } => info!(
            request_id = %request_id,
            agent_id = %agent_id,
            rung = %rung,
            attempts,
            escalations,
            "Request completed"
        ),
        OrchestrationEvent::RequestFailed {
            request_id, kind, message, ..
        } => warn!(request_id = %request_id, kind = %kind, "Request failed: {}", message),
        OrchestrationEvent::RequestCancelled { request_id, .. } => {
            info!(request_id = %request_id, "Request cancelled")
        }
        OrchestrationEvent::FanOutCompleted {
            request_id,
            intent,
            responses,
            ..
        } => info!(request_id = %request_id, intent = %intent, responses, "Fan-out completed"),
        OrchestrationEvent::AdmissionDenied {
            subject,
            retry_after_ms,
            ..
        } => warn!(subject = %subject, retry_after_ms, "Admission denied"),
        OrchestrationEvent::HealthChanged {
            agent_id,
            from,
            to,
            consecutive_misses,
            ..
        } => info!(
            agent_id = %agent_id,
            from = %from,
            to = %to,
            consecutive_misses,
            "Agent health changed"
        ),
        OrchestrationEvent::RestartRequested {
            agent_id,
            consecutive_misses,
            ..
        } => warn!(agent_id = %agent_id, consecutive_misses, "Agent restart requested"),
        OrchestrationEvent::OrphanResponseDiscarded {
            correlation_id,
            from_agent,
            ..
        } => debug!(
            correlation_id = ?correlation_id,
            from_agent = %from_agent,
            "Discarded uncorrelated response"
        ),
    }
}
