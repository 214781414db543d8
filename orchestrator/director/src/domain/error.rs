// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestration Error
//!
//! Typed outcome of a request that did not deliver. Transient transport
//! failures and single timeouts are retried inside the director and only
//! show up here as the last failure of an exhausted escalation walk.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Public failure taxonomy of the director

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use switchboard_core::domain::admission::SubjectKey;
use switchboard_core::domain::agent::AgentId;
use switchboard_core::domain::events::RequestId;
use switchboard_core::domain::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("Transport failure: {0}")]
    TransientTransportFailure(#[from] TransportError),

    #[error("Agent '{agent_id}' rejected intent '{intent}' ({kind}): {message}")]
    CapabilityValidation {
        intent: String,
        agent_id: AgentId,
        kind: String,
        message: String,
    },

    #[error("No reply from agent '{agent_id}' after {attempts} attempt(s)")]
    RequestTimeout { agent_id: AgentId, attempts: u32 },

    #[error("Admission denied for {subject}, retry after {retry_after:?}")]
    AdmissionDenied {
        subject: SubjectKey,
        limit: u32,
        retry_after: Duration,
    },

    #[error("Cannot service intent '{intent}' after {escalations} escalation(s)")]
    AgentUnavailable {
        intent: String,
        escalations: u32,
        last_failure: Option<Box<OrchestrationError>>,
    },

    #[error("Request {0} was cancelled")]
    Cancelled(RequestId),
}

impl OrchestrationError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationError::TransientTransportFailure(_) => "transient_transport_failure",
            OrchestrationError::CapabilityValidation { .. } => "capability_validation",
            OrchestrationError::RequestTimeout { .. } => "request_timeout",
            OrchestrationError::AdmissionDenied { .. } => "admission_denied",
            OrchestrationError::AgentUnavailable { .. } => "agent_unavailable",
            OrchestrationError::Cancelled(_) => "cancelled",
        }
    }

    /// How long the caller should wait before trying again, for denials only.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OrchestrationError::AdmissionDenied { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// The failure that made the last rung give up, if any rung was tried.
    pub fn last_failure(&self) -> Option<&OrchestrationError> {
        match self {
            OrchestrationError::AgentUnavailable { last_failure, .. } => last_failure.as_deref(),
            _ => None,
        }
    }

    /// `error` envelope payload for callers reached over the bus.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({ "kind": self.kind(), "message": self.to_string() });
        if let Some(retry_after) = self.retry_after() {
            payload["retry_after_ms"] = json!(retry_after.as_millis() as u64);
        }
        if let Some(last) = self.last_failure() {
            payload["last_failure"] = json!({ "kind": last.kind(), "message": last.to_string() });
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_payload_carries_retry_after() {
        let error = OrchestrationError::AdmissionDenied {
            subject: SubjectKey::subject("user-42"),
            limit: 5,
            retry_after: Duration::from_millis(1500),
        };
        let payload = error.to_payload();
        assert_eq!(payload["kind"], "admission_denied");
        assert_eq!(payload["retry_after_ms"], 1500);
    }

    #[test]
    fn test_unavailable_reports_last_failure() {
        let error = OrchestrationError::AgentUnavailable {
            intent: "schedule_meeting".into(),
            escalations: 3,
            last_failure: Some(Box::new(OrchestrationError::RequestTimeout {
                agent_id: AgentId::new("manager-1"),
                attempts: 2,
            })),
        };
        assert_eq!(error.last_failure().map(|e| e.kind()), Some("request_timeout"));
        assert_eq!(error.to_payload()["last_failure"]["kind"], "request_timeout");
        assert!(error.retry_after().is_none());
        assert_eq!(error.to_string(), "Cannot service intent 'schedule_meeting' after 3 escalation(s)");
    }

    #[test]
    fn test_transport_errors_convert() {
        let error: OrchestrationError = TransportError::Closed.into();
        assert_eq!(error.kind(), "transient_transport_failure");
    }
}
