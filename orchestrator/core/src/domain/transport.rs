// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transport Contract
//!
//! Publish/subscribe fabric with named channels:
//!
//! | Channel | Wire name | Purpose |
//! |---------|-----------|---------|
//! | [`Channel::Inbox`] | `agent:<id>:inbox` | one inbound channel per agent |
//! | [`Channel::Broadcast`] | `broadcast:all` | outbound events to every listener |
//! | [`Channel::Response`] | `response:<envelope id>` | ephemeral per-request replies |
//!
//! ## Guarantees
//!
//! - **Per-channel order only.** Envelopes published to one channel are
//!   delivered in publish order. Nothing is promised across channels: two
//!   agents' responses may arrive in any order relative to their requests.
//! - **At-most-once.** A subscriber that is not listening when an envelope is
//!   published never receives it. A durable-log implementation may be
//!   substituted behind this trait without changing callers.
//! - **Bounded publish.** `publish` never blocks longer than the fabric's
//!   enqueue timeout.
//!
//! `ChannelUnavailable` and `EnqueueTimeout` are transient; callers retry with
//! backoff (see `application::backoff`).

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::envelope::{Envelope, EnvelopeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum Channel {
    Inbox(AgentId),
    Broadcast,
    Response(EnvelopeId),
}

impl Channel {
    pub fn inbox(agent_id: &AgentId) -> Self {
        Channel::Inbox(agent_id.clone())
    }

    /// Where replies to `request` are published.
    pub fn reply_for(request: &Envelope) -> Self {
        Channel::Response(request.id)
    }

    /// Channel an envelope is naturally addressed to.
    pub fn destination(envelope: &Envelope) -> Self {
        if envelope.message_type.is_reply() {
            if let Some(correlation_id) = envelope.correlation_id {
                return Channel::Response(correlation_id);
            }
        }
        if envelope.is_broadcast() {
            Channel::Broadcast
        } else {
            Channel::Inbox(envelope.to_agent.clone())
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Channel::Response(_))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Inbox(agent_id) => write!(f, "agent:{}:inbox", agent_id),
            Channel::Broadcast => f.write_str("broadcast:all"),
            Channel::Response(id) => write!(f, "response:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Channel {0} is unavailable")]
    ChannelUnavailable(String),

    #[error("Timed out enqueueing on channel {0}")]
    EnqueueTimeout(String),

    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    /// Every transport failure is worth retrying except a deliberate close.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

/// Ordered stream of envelopes from one channel. Dropping it unsubscribes.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish, bounded by the enqueue timeout.
    async fn publish(&self, channel: &Channel, envelope: Envelope) -> Result<(), TransportError>;

    /// Start listening on `channel`. Only envelopes published after this call
    /// returns are delivered.
    async fn subscribe(&self, channel: &Channel) -> Result<EnvelopeStream, TransportError>;
}
