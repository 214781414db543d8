// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Value Objects
//!
//! - [`IntentRequest`]: what a caller submits.
//! - [`Delivered`]: the successful terminal outcome.
//! - [`PendingRequest`]: director-side bookkeeping while a request is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use switchboard_core::domain::admission::SubjectKey;
use switchboard_core::domain::agent::{AgentId, Rung};
use switchboard_core::domain::capability::CapabilityCall;
use switchboard_core::domain::envelope::{EnvelopeId, Priority};
use switchboard_core::domain::events::RequestId;

/// Subject used when a caller does not identify itself.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// An intent submitted to the director.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub intent: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    pub args: Value,
    pub subject: SubjectKey,
    /// Admission tier; the controller's default tier when `None`.
    pub tier: Option<String>,
    pub priority: Priority,
    /// Per-attempt deadline; the director's configured deadline when `None`.
    pub deadline: Option<Duration>,
}

impl IntentRequest {
    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            args: Value::Null,
            subject: SubjectKey::subject(ANONYMOUS_SUBJECT),
            tier: None,
            priority: Priority::Normal,
            deadline: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn for_subject(mut self, subject: SubjectKey) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn call(&self) -> CapabilityCall {
        CapabilityCall::new(self.intent.clone(), self.args.clone())
    }
}

/// A reply that made it back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivered {
    pub request_id: RequestId,
    pub agent_id: AgentId,
    pub rung: Rung,
    pub payload: Value,
    /// Dispatch attempts across every rung tried, retries included.
    pub attempts: u32,
    pub escalations: u32,
}

/// Director-side state of one in-flight request.
///
/// Created on dispatch and dropped on the terminal outcome. `correlation_id`
/// tracks the envelope of the hop currently awaiting a reply; a retry
/// re-sends that envelope, an escalation hop issues a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub intent: String,
    pub correlation_id: Option<EnvelopeId>,
    pub issued_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub escalation_level: Rung,
}

impl PendingRequest {
    pub fn new(request_id: RequestId, intent: impl Into<String>) -> Self {
        Self {
            request_id,
            intent: intent.into(),
            correlation_id: None,
            issued_at: Utc::now(),
            deadline: None,
            attempt_count: 0,
            escalation_level: Rung::Worker,
        }
    }

    /// Record one dispatch of `envelope_id` awaiting a reply until `deadline`.
    pub fn attempt(&mut self, envelope_id: EnvelopeId, deadline: DateTime<Utc>) {
        self.correlation_id = Some(envelope_id);
        self.deadline = Some(deadline);
        self.attempt_count += 1;
    }

    /// Move up to `rung`. The next hop will carry a new correlation id.
    pub fn escalate(&mut self, rung: Rung) {
        self.escalation_level = rung;
        self.correlation_id = None;
        self.deadline = None;
    }

    /// Whether `correlation_id` is the reply this request is waiting for.
    pub fn awaits(&self, correlation_id: EnvelopeId) -> bool {
        self.correlation_id == Some(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_request_defaults() {
        let request = IntentRequest::new("schedule_meeting", 0.92).with_args(json!({"with": "ana"}));
        assert_eq!(request.subject, SubjectKey::subject(ANONYMOUS_SUBJECT));
        assert!(request.tier.is_none());
        assert_eq!(request.call().to_payload()["args"]["with"], "ana");
    }

    #[test]
    fn test_pending_request_tracks_hops() {
        let mut pending = PendingRequest::new(RequestId::new(), "schedule_meeting");
        let first = EnvelopeId::new();
        let deadline = Utc::now();

        pending.attempt(first, deadline);
        pending.attempt(first, deadline);
        assert_eq!(pending.attempt_count, 2);
        assert!(pending.awaits(first));

        pending.escalate(Rung::Manager);
        assert!(!pending.awaits(first));
        assert_eq!(pending.escalation_level, Rung::Manager);
        assert_eq!(pending.attempt_count, 2);
    }
}
