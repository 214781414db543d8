// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Director Inbox Service
//!
//! Background loop on the director's own inbox. Heartbeats go to the health
//! monitor; command and query envelopes are answered on their response
//! channel:
//!
//! - `orchestrate` submits the nested intent on the caller's behalf and
//!   replies with the delivered payload or the typed failure.
//! - `status` reports the director and every registered agent.
//! - any other intent runs against the director's own capabilities.
//!
//! Replies never arrive here (they travel on response channels), so one that
//! does is discarded as an orphan.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Director as a participant on the bus

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::application::{publish_with_backoff, STATUS_INTENT};
use switchboard_core::domain::admission::{SubjectKey, DEFAULT_RESOURCE};
use switchboard_core::domain::capability::{CapabilityCall, CapabilityError};
use switchboard_core::domain::envelope::{Envelope, MessageType};
use switchboard_core::domain::transport::{Channel, EnvelopeStream, TransportError};

use crate::application::director::Director;
use crate::domain::error::OrchestrationError;
use crate::domain::request::IntentRequest;

pub const ORCHESTRATE_INTENT: &str = "orchestrate";

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Arguments of an `orchestrate` command.
#[derive(Debug, Deserialize)]
struct OrchestrateArgs {
    intent: String,
    confidence: f64,
    #[serde(default)]
    payload: Value,
    /// Defaults to the requesting agent.
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    tier: Option<String>,
}

/// Running director loops: inbox service, health scans and rate-window purging.
pub struct DirectorHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DirectorHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every loop and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Director task ended abnormally: {}", e);
            }
        }
    }
}

impl Director {
    /// Subscribe to the director inbox and start the background loops.
    /// Heartbeats published after this returns are observed. Call once per
    /// director.
    pub async fn start(&self) -> Result<DirectorHandle, TransportError> {
        let inbox = self.state.transport.subscribe(&Channel::inbox(self.agent_id())).await?;
        let shutdown = CancellationToken::new();

        let health_stop = self.state.health.shutdown_token();
        let health = Arc::clone(&self.state.health).start();
        let purger = Arc::clone(&self.state.admission).start_purger(PURGE_INTERVAL, shutdown.clone());
        let service = tokio::spawn(self.clone().serve(inbox, shutdown.clone()));

        let stop = shutdown.clone();
        let linker = tokio::spawn(async move {
            stop.cancelled().await;
            health_stop.cancel();
        });

        info!(agent_id = %self.agent_id(), "Director started");
        Ok(DirectorHandle {
            shutdown,
            tasks: vec![service, health, purger, linker],
        })
    }

    async fn serve(self, mut inbox: EnvelopeStream, shutdown: CancellationToken) {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                envelope = inbox.next() => match envelope {
                    Some(envelope) => self.accept(envelope, &mut in_flight).await,
                    None => {
                        warn!(agent_id = %self.agent_id(), "Director inbox closed by transport");
                        break;
                    }
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // orchestrated requests still running lose their caller's reply
        in_flight.abort_all();
        info!(agent_id = %self.agent_id(), "Director inbox service stopped");
    }

    async fn accept(&self, envelope: Envelope, in_flight: &mut JoinSet<()>) {
        match envelope.message_type {
            MessageType::Heartbeat => {
                self.state.health.observe(&envelope).await;
            }
            MessageType::Response | MessageType::Error => {
                let awaited = envelope
                    .correlation_id
                    .is_some_and(|correlation_id| self.state.pending.awaits(correlation_id));
                if awaited {
                    debug!(
                        correlation_id = ?envelope.correlation_id,
                        from_agent = %envelope.from_agent,
                        "Reply delivered to inbox instead of its response channel"
                    );
                } else {
                    self.state.discard_orphan(&envelope).await;
                }
            }
            MessageType::Event => {}
            MessageType::Command | MessageType::Query if envelope.is_expired_at(Utc::now()) => {
                debug!(envelope_id = %envelope.id, from_agent = %envelope.from_agent, "Dropping expired request");
                metrics::counter!("switchboard_expired_requests_total", "agent_id" => self.agent_id().to_string())
                    .increment(1);
            }
            MessageType::Command | MessageType::Query => {
                let director = self.clone();
                in_flight.spawn(async move { director.answer(envelope).await });
            }
        }
    }

    async fn answer(&self, request: Envelope) {
        let result = match CapabilityCall::from_envelope(&request) {
            Ok(call) if call.intent == ORCHESTRATE_INTENT => self.orchestrate(&request, call.args).await,
            Ok(call) if call.intent == STATUS_INTENT && !self.state.local.contains(STATUS_INTENT) => {
                Ok(self.status_payload())
            }
            Ok(call) => self
                .state
                .local
                .invoke(call, &request)
                .await
                .map_err(|e| e.to_payload()),
            Err(e) => Err(e.to_payload()),
        };

        if !request.requires_response {
            return;
        }
        let reply = match result {
            Ok(payload) => Envelope::reply_to(&request, self.agent_id().clone(), payload),
            Err(payload) => Envelope::error_for(&request, self.agent_id().clone(), payload),
        };
        if let Err(e) = publish_with_backoff(
            self.state.transport.as_ref(),
            &Channel::reply_for(&request),
            reply,
            &self.state.backoff,
        )
        .await
        {
            warn!(envelope_id = %request.id, "Failed to publish director reply: {}", e);
        }
    }

    async fn orchestrate(&self, request: &Envelope, args: Value) -> Result<Value, Value> {
        let args: OrchestrateArgs = serde_json::from_value(args).map_err(|e| {
            CapabilityError::Validation {
                intent: ORCHESTRATE_INTENT.to_string(),
                message: e.to_string(),
            }
            .to_payload()
        })?;

        let subject = SubjectKey::new(
            args.subject.unwrap_or_else(|| request.from_agent.to_string()),
            args.resource.unwrap_or_else(|| DEFAULT_RESOURCE.to_string()),
        );
        let mut intent = IntentRequest::new(args.intent, args.confidence)
            .with_args(args.payload)
            .for_subject(subject)
            .with_priority(request.priority);
        if let Some(tier) = args.tier {
            intent = intent.with_tier(tier);
        }
        // the caller's remaining budget bounds every attempt
        if let Some(remaining) = request.deadline.and_then(|deadline| (deadline - Utc::now()).to_std().ok()) {
            intent = intent.with_deadline(remaining);
        }

        match self.submit(intent).await {
            Ok(delivered) => serde_json::to_value(&delivered).map_err(|e| {
                OrchestrationError::CapabilityValidation {
                    intent: ORCHESTRATE_INTENT.to_string(),
                    agent_id: self.agent_id().clone(),
                    kind: "handler".to_string(),
                    message: e.to_string(),
                }
                .to_payload()
            }),
            Err(e) => Err(e.to_payload()),
        }
    }

    fn status_payload(&self) -> Value {
        let agents: Vec<Value> = self
            .registry()
            .snapshot()
            .into_iter()
            .map(|agent| {
                json!({
                    "agent_id": agent.agent_id,
                    "status": agent.status,
                    "rung": agent.rung,
                    "capabilities": agent.capabilities,
                })
            })
            .collect();
        json!({
            "status": "online",
            "agent_id": self.agent_id(),
            "in_flight": self.in_flight(),
            "capabilities": self.state.local.intents(),
            "agents": agents,
        })
    }
}
