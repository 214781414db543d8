// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestration Events
//!
//! Every escalation, terminal request outcome and health change is published
//! as an `event` envelope on the broadcast channel, so dashboards and the
//! process supervisor can observe the core without coupling to it. The
//! payload is the serialized [`OrchestrationEvent`], tagged by `"event"`:
//!
//! ```json
//! { "event": "escalated", "request_id": "…", "intent": "schedule_meeting",
//!   "from_rung": "worker", "to_rung": "manager", "reason": "no_eligible_agent", … }
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Observable side effects of orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::admission::SubjectKey;
use crate::domain::agent::{AgentId, AgentStatus, Rung};
use crate::domain::envelope::{Envelope, EnvelopeError, EnvelopeId, MessageType};

/// Logical identifier of one submitted request. Stable across retries and
/// escalation hops, unlike the per-hop envelope ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// No online agent at the rung serves the intent at this confidence.
    NoEligibleAgent,
    /// Retries exhausted, or the agent left `online` while we waited.
    Timeout,
    /// The agent answered with an `error` envelope.
    ErrorReply,
    /// Publishing to the agent failed even after backoff.
    TransportFailure,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EscalationReason::NoEligibleAgent => "no_eligible_agent",
            EscalationReason::Timeout => "timeout",
            EscalationReason::ErrorReply => "error_reply",
            EscalationReason::TransportFailure => "transport_failure",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Escalated {
        request_id: RequestId,
        intent: String,
        from_rung: Rung,
        to_rung: Rung,
        reason: EscalationReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        escalated_at: DateTime<Utc>,
    },
    RequestCompleted {
        request_id: RequestId,
        intent: String,
        agent_id: AgentId,
        rung: Rung,
        attempts: u32,
        escalations: u32,
        completed_at: DateTime<Utc>,
    },
    RequestFailed {
        request_id: RequestId,
        intent: String,
        kind: String,
        message: String,
        escalations: u32,
        failed_at: DateTime<Utc>,
    },
    RequestCancelled {
        request_id: RequestId,
        intent: String,
        cancelled_at: DateTime<Utc>,
    },
    /// A broadcast query's collection window closed and the merge ran.
    FanOutCompleted {
        request_id: RequestId,
        intent: String,
        responses: usize,
        completed_at: DateTime<Utc>,
    },
    AdmissionDenied {
        subject: SubjectKey,
        tier: String,
        retry_after_ms: u64,
        denied_at: DateTime<Utc>,
    },
    HealthChanged {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
        consecutive_misses: u32,
        changed_at: DateTime<Utc>,
    },
    RestartRequested {
        agent_id: AgentId,
        consecutive_misses: u32,
        requested_at: DateTime<Utc>,
    },
    OrphanResponseDiscarded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<EnvelopeId>,
        from_agent: AgentId,
        discarded_at: DateTime<Utc>,
    },
}

impl OrchestrationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationEvent::Escalated { .. } => "escalated",
            OrchestrationEvent::RequestCompleted { .. } => "request_completed",
            OrchestrationEvent::RequestFailed { .. } => "request_failed",
            OrchestrationEvent::RequestCancelled { .. } => "request_cancelled",
            OrchestrationEvent::FanOutCompleted { .. } => "fan_out_completed",
            OrchestrationEvent::AdmissionDenied { .. } => "admission_denied",
            OrchestrationEvent::HealthChanged { .. } => "health_changed",
            OrchestrationEvent::RestartRequested { .. } => "restart_requested",
            OrchestrationEvent::OrphanResponseDiscarded { .. } => "orphan_response_discarded",
        }
    }

    /// Terminal outcome of a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationEvent::RequestCompleted { .. }
                | OrchestrationEvent::RequestFailed { .. }
                | OrchestrationEvent::RequestCancelled { .. }
                | OrchestrationEvent::FanOutCompleted { .. }
                | OrchestrationEvent::AdmissionDenied { .. }
        )
    }

    pub fn to_envelope(&self, from: AgentId) -> Result<Envelope, EnvelopeError> {
        Ok(Envelope::event(from, serde_json::to_value(self)?))
    }

    /// Decode an event envelope. `None` for anything else on the broadcast channel.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if envelope.message_type != MessageType::Event {
            return None;
        }
        serde_json::from_value(envelope.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escalated_event_payload_is_tagged() {
        let event = OrchestrationEvent::Escalated {
            request_id: RequestId::new(),
            intent: "schedule_meeting".into(),
            from_rung: Rung::Worker,
            to_rung: Rung::Manager,
            reason: EscalationReason::NoEligibleAgent,
            agent_id: None,
            escalated_at: Utc::now(),
        };

        let envelope = event.to_envelope(AgentId::new("director")).unwrap();
        assert_eq!(envelope.message_type, MessageType::Event);
        assert!(envelope.is_broadcast());
        assert_eq!(envelope.payload["event"], "escalated");
        assert_eq!(envelope.payload["reason"], "no_eligible_agent");
        assert_eq!(envelope.payload["to_rung"], "manager");
        assert!(envelope.payload.get("agent_id").is_none());

        assert_eq!(OrchestrationEvent::from_envelope(&envelope), Some(event));
    }

    #[test]
    fn test_terminal_classification() {
        let denied = OrchestrationEvent::AdmissionDenied {
            subject: SubjectKey::subject("user-42"),
            tier: "free".into(),
            retry_after_ms: 1200,
            denied_at: Utc::now(),
        };
        let health = OrchestrationEvent::HealthChanged {
            agent_id: AgentId::new("calendar-1"),
            from: AgentStatus::Online,
            to: AgentStatus::Degraded,
            consecutive_misses: 1,
            changed_at: Utc::now(),
        };
        assert!(denied.is_terminal());
        assert!(!health.is_terminal());
        assert_eq!(health.name(), "health_changed");
    }

    #[test]
    fn test_non_event_envelopes_are_ignored() {
        let command = Envelope::command(AgentId::new("a"), AgentId::new("b"), json!({"event": "escalated"}));
        assert!(OrchestrationEvent::from_envelope(&command).is_none());

        let noise = Envelope::event(AgentId::new("a"), json!({"event": "something_else"}));
        assert!(OrchestrationEvent::from_envelope(&noise).is_none());
    }
}
