// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope
//!
//! The atomic unit of inter-agent communication. An [`Envelope`] is an
//! immutable value carrying routing and protocol metadata around an opaque
//! JSON payload whose schema is owned by the receiving capability.
//!
//! The JSON shape produced by [`Envelope::to_json`] is the one bit-exact
//! compatibility surface shared by independently deployed agent processes:
//!
//! ```json
//! {
//!   "id": "0b6f…",
//!   "from_agent": "director",
//!   "to_agent": "calendar-1",
//!   "created_at": "2026-01-01T12:00:00Z",
//!   "message_type": "command",
//!   "payload": { "intent": "schedule_meeting", "args": {} },
//!   "priority": "high",
//!   "requires_response": true,
//!   "deadline": "2026-01-01T12:00:02Z"
//! }
//! ```
//!
//! `correlation_id` and `deadline` are omitted when absent.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Wire-level message protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Reserved recipient meaning "every subscriber of the broadcast channel".
pub const BROADCAST: &str = "broadcast";

/// Unique identifier of an [`Envelope`], generated at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Command,
    Query,
    Response,
    Event,
    Heartbeat,
    Error,
}

impl MessageType {
    /// Request types are the only ones a runtime dispatches to capabilities.
    pub fn is_request(&self) -> bool {
        matches!(self, MessageType::Command | MessageType::Query)
    }

    /// Reply types must carry a `correlation_id`.
    pub fn is_reply(&self) -> bool {
        matches!(self, MessageType::Response | MessageType::Error)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageType::Command => "command",
            MessageType::Query => "query",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Error => "error",
        };
        f.write_str(label)
    }
}

/// Delivery priority. Ordered so that `Critical < Low` sorts most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

/// Immutable message value. Construct through the builder functions so the
/// reply invariants (`correlation_id` on response/error) always hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub from_agent: AgentId,
    /// Concrete agent id or [`BROADCAST`].
    pub to_agent: AgentId,
    pub created_at: DateTime<Utc>,
    pub message_type: MessageType,
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requires_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<EnvelopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{message_type:?} envelope {id} is missing its correlation_id")]
    MissingCorrelation { id: EnvelopeId, message_type: MessageType },
}

impl Envelope {
    fn base(from: AgentId, to: AgentId, message_type: MessageType, payload: Value) -> Self {
        Self {
            id: EnvelopeId::new(),
            from_agent: from,
            to_agent: to,
            created_at: Utc::now(),
            message_type,
            payload,
            priority: Priority::Normal,
            requires_response: false,
            correlation_id: None,
            deadline: None,
        }
    }

    /// Command that expects a correlated reply.
    pub fn command(from: AgentId, to: AgentId, payload: Value) -> Self {
        let mut envelope = Self::base(from, to, MessageType::Command, payload);
        envelope.requires_response = true;
        envelope
    }

    /// Query that expects a correlated reply.
    pub fn query(from: AgentId, to: AgentId, payload: Value) -> Self {
        let mut envelope = Self::base(from, to, MessageType::Query, payload);
        envelope.requires_response = true;
        envelope
    }

    /// Fire-and-forget notification addressed to the broadcast channel.
    pub fn event(from: AgentId, payload: Value) -> Self {
        Self::base(from, AgentId::broadcast(), MessageType::Event, payload)
    }

    pub fn heartbeat(from: AgentId, to: AgentId, payload: Value) -> Self {
        Self::base(from, to, MessageType::Heartbeat, payload)
    }

    /// Successful reply to `request`, addressed back to its sender.
    pub fn reply_to(request: &Envelope, from: AgentId, payload: Value) -> Self {
        let mut envelope = Self::base(from, request.from_agent.clone(), MessageType::Response, payload);
        envelope.correlation_id = Some(request.id);
        envelope.priority = request.priority;
        envelope
    }

    /// Error reply to `request`, addressed back to its sender.
    pub fn error_for(request: &Envelope, from: AgentId, payload: Value) -> Self {
        let mut envelope = Self::base(from, request.from_agent.clone(), MessageType::Error, payload);
        envelope.correlation_id = Some(request.id);
        envelope.priority = request.priority;
        envelope
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Suppress the correlated reply. Such an envelope never produces one.
    pub fn without_response(mut self) -> Self {
        self.requires_response = false;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(deadline_after(timeout))
    }

    /// Same request (same id, so replies still correlate) with a new deadline.
    pub fn redelivered(&self, deadline: DateTime<Utc>) -> Self {
        let mut envelope = self.clone();
        envelope.deadline = Some(deadline);
        envelope
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_broadcast()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }

    /// Intent label of a command/query payload (`{"intent": ..., "args": ...}`).
    pub fn intent(&self) -> Option<&str> {
        self.payload.get("intent").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(data)?;
        envelope.check()?;
        Ok(envelope)
    }

    /// Structural invariant: replies always reference their request.
    pub fn check(&self) -> Result<(), EnvelopeError> {
        if self.message_type.is_reply() && self.correlation_id.is_none() {
            return Err(EnvelopeError::MissingCorrelation {
                id: self.id,
                message_type: self.message_type,
            });
        }
        Ok(())
    }
}

/// Absolute deadline `timeout` from now, saturating at the far future.
pub fn deadline_after(timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Envelope {
        Envelope::command(
            AgentId::new("director"),
            AgentId::new("calendar-1"),
            json!({"intent": "schedule_meeting", "args": {"title": "sync"}}),
        )
        .with_priority(Priority::High)
    }

    #[test]
    fn test_wire_shape_uses_lowercase_enums_and_omits_absent_fields() {
        let envelope = request();
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["message_type"], "command");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["from_agent"], "director");
        assert_eq!(value["to_agent"], "calendar-1");
        assert_eq!(value["requires_response"], true);
        assert!(value.get("correlation_id").is_none());
        assert!(value.get("deadline").is_none());
        assert!(value["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_decodes_envelope_from_foreign_process() {
        let raw = r#"{
            "id": "6f1c1a53-7d6c-4c59-9d7a-8d6f3c1f2b10",
            "from_agent": "calendar-1",
            "to_agent": "director",
            "created_at": "2026-03-01T09:30:00Z",
            "message_type": "response",
            "payload": {"ok": true},
            "priority": "critical",
            "requires_response": false,
            "correlation_id": "0d1f1b1e-57b6-4f0e-b1cb-1a38a51e5d55",
            "deadline": "2026-03-01T09:30:02Z"
        }"#;

        let envelope = Envelope::from_json(raw).unwrap();
        assert_eq!(envelope.message_type, MessageType::Response);
        assert_eq!(envelope.priority, Priority::Critical);
        assert_eq!(
            envelope.correlation_id,
            Some(EnvelopeId::from_string("0d1f1b1e-57b6-4f0e-b1cb-1a38a51e5d55").unwrap())
        );
        assert!(envelope.deadline.is_some());
    }

    #[test]
    fn test_reply_without_correlation_is_rejected() {
        let raw = r#"{
            "id": "6f1c1a53-7d6c-4c59-9d7a-8d6f3c1f2b10",
            "from_agent": "calendar-1",
            "to_agent": "director",
            "created_at": "2026-03-01T09:30:00Z",
            "message_type": "error",
            "payload": {}
        }"#;

        assert!(matches!(
            Envelope::from_json(raw),
            Err(EnvelopeError::MissingCorrelation { .. })
        ));
    }

    #[test]
    fn test_unknown_message_type_is_malformed() {
        let raw = r#"{"id":"6f1c1a53-7d6c-4c59-9d7a-8d6f3c1f2b10","from_agent":"a","to_agent":"b",
            "created_at":"2026-03-01T09:30:00Z","message_type":"gossip","payload":{}}"#;
        assert!(matches!(Envelope::from_json(raw), Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn test_reply_correlates_to_request() {
        let request = request();
        let reply = Envelope::reply_to(&request, AgentId::new("calendar-1"), json!({"ok": true}));

        assert_eq!(reply.correlation_id, Some(request.id));
        assert_eq!(reply.to_agent, request.from_agent);
        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.priority, Priority::High);
        assert!(!reply.requires_response);
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn test_redelivery_keeps_identity() {
        let request = request();
        let later = Utc::now() + chrono::Duration::seconds(5);
        let again = request.redelivered(later);

        assert_eq!(again.id, request.id);
        assert_eq!(again.deadline, Some(later));
    }

    #[test]
    fn test_priority_orders_most_urgent_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn test_intent_and_broadcast_helpers() {
        let envelope = request();
        assert_eq!(envelope.intent(), Some("schedule_meeting"));
        assert!(!envelope.is_broadcast());

        let event = Envelope::event(AgentId::new("director"), json!({"event": "noop"}));
        assert!(event.is_broadcast());
        assert_eq!(event.intent(), None);
    }
}
