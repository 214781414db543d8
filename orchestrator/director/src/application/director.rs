// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Director
//!
//! Routes an [`IntentRequest`] up the escalation ladder until some rung
//! delivers a reply:
//!
//! 1. **Admission.** The subject's sliding window must have room; a denial
//!    is returned straight to the caller.
//! 2. **Worker, then manager rung.** The most specialized online agent that
//!    serves the intent at the caller's confidence gets the request. Silence
//!    past the deadline is retried against the same agent while it stays
//!    online; an `error` reply escalates at once.
//! 3. **Director rung.** Handlers registered on the director itself run
//!    in-process.
//! 4. **Human rung.** Nothing could serve the request; the caller gets
//!    [`OrchestrationError::AgentUnavailable`].
//!
//! Each hop subscribes to its response channel before publishing, so a fast
//! reply is never missed. Once a request is cancelled or finished the
//! subscription is dropped and any late reply is discarded by the transport.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Intent routing, correlation, retry and escalation

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::application::{
    publish_with_backoff, AdmissionController, AgentRegistry, EventPublisher, HealthMonitor,
};
use switchboard_core::domain::admission::QuotaTable;
use switchboard_core::domain::agent::{AgentDescriptor, AgentId, AgentStatus, Rung};
use switchboard_core::domain::capability::{CapabilityError, CapabilityRegistry};
use switchboard_core::domain::envelope::{deadline_after, Envelope, EnvelopeId, MessageType};
use switchboard_core::domain::events::{EscalationReason, OrchestrationEvent, RequestId};
use switchboard_core::domain::health::HealthPolicy;
use switchboard_core::domain::node_config::{BackoffPolicy, DirectorConfig, SwitchboardConfigManifest};
use switchboard_core::domain::transport::{Channel, EnvelopeStream, Transport, TransportError};

use crate::application::pending::PendingTable;
use crate::domain::error::OrchestrationError;
use crate::domain::request::{Delivered, IntentRequest, PendingRequest};

/// Outcome of trying one rung.
enum Hop {
    Delivered {
        agent_id: AgentId,
        payload: Value,
    },
    Escalate {
        reason: EscalationReason,
        agent_id: Option<AgentId>,
        failure: Option<OrchestrationError>,
    },
    Cancelled,
}

impl Hop {
    fn nobody() -> Self {
        Hop::Escalate {
            reason: EscalationReason::NoEligibleAgent,
            agent_id: None,
            failure: None,
        }
    }
}

pub(crate) struct DirectorState {
    pub(crate) config: DirectorConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: AgentRegistry,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) events: EventPublisher,
    pub(crate) local: CapabilityRegistry,
    pub(crate) pending: PendingTable,
    pub(crate) backoff: BackoffPolicy,
}

/// Removes the pending entry however the request ends, including when the
/// caller drops the future mid-flight.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.request_id);
    }
}

pub struct DirectorBuilder {
    transport: Arc<dyn Transport>,
    registry: AgentRegistry,
    config: DirectorConfig,
    admission: Option<AdmissionController>,
    health: HealthPolicy,
    backoff: BackoffPolicy,
    local: CapabilityRegistry,
}

impl DirectorBuilder {
    pub fn config(mut self, config: DirectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn admission(mut self, admission: AdmissionController) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn health_policy(mut self, policy: HealthPolicy) -> Self {
        self.health = policy;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handlers for the director rung.
    pub fn local_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.local = capabilities;
        self
    }

    pub fn build(self) -> Director {
        let events = EventPublisher::new(Arc::clone(&self.transport), self.config.agent_id.clone());
        let health = Arc::new(HealthMonitor::new(self.registry.clone(), self.health, events.clone()));
        let admission = self
            .admission
            .unwrap_or_else(|| AdmissionController::new(QuotaTable::default()));

        Director {
            state: Arc::new(DirectorState {
                config: self.config,
                transport: self.transport,
                registry: self.registry,
                admission: Arc::new(admission),
                health,
                events,
                local: self.local,
                pending: PendingTable::new(),
                backoff: self.backoff,
            }),
        }
    }
}

/// Cheap to clone; clones share one registry, pending table and rate windows.
#[derive(Clone)]
pub struct Director {
    pub(crate) state: Arc<DirectorState>,
}

/// Caller-side view of a request running in the background.
pub struct RequestHandle {
    request_id: RequestId,
    cancel: CancellationToken,
    task: JoinHandle<Result<Delivered, OrchestrationError>>,
}

impl RequestHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Idempotent. A reply arriving afterwards is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn outcome(self) -> Result<Delivered, OrchestrationError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(request_id = %self.request_id, "Request task ended abnormally: {}", e);
                Err(OrchestrationError::Cancelled(self.request_id))
            }
        }
    }
}

impl Director {
    pub fn builder(transport: Arc<dyn Transport>, registry: AgentRegistry) -> DirectorBuilder {
        DirectorBuilder {
            transport,
            registry,
            config: DirectorConfig::default(),
            admission: None,
            health: HealthPolicy::default(),
            backoff: BackoffPolicy::default(),
            local: CapabilityRegistry::new(),
        }
    }

    /// Director configured from a node manifest, with every declared agent
    /// registered as `offline` until its first heartbeat.
    pub fn from_manifest(
        manifest: &SwitchboardConfigManifest,
        transport: Arc<dyn Transport>,
        local: CapabilityRegistry,
    ) -> Self {
        let registry = AgentRegistry::new();
        for agent in &manifest.spec.agents {
            registry.register(agent.descriptor());
        }

        Director::builder(transport, registry)
            .config(manifest.spec.director.clone())
            .admission(AdmissionController::from_config(&manifest.spec.admission))
            .health_policy(manifest.spec.health.clone())
            .backoff(manifest.spec.transport.backoff.clone())
            .local_capabilities(local)
            .build()
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.state.config.agent_id
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.state.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.state.admission
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.state.health
    }

    pub fn events(&self) -> &EventPublisher {
        &self.state.events
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.pending.len()
    }

    pub fn pending(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.state.pending.get(request_id)
    }

    /// Agents that could take `intent` at `confidence` right now, worker
    /// rung first, most specialized first within a rung.
    pub fn route(&self, intent: &str, confidence: f64) -> Vec<AgentDescriptor> {
        [Rung::Worker, Rung::Manager]
            .into_iter()
            .flat_map(|rung| self.state.registry.eligible(intent, confidence, rung))
            .collect()
    }

    /// Run `request` to its terminal outcome in the caller's task.
    pub async fn submit(&self, request: IntentRequest) -> Result<Delivered, OrchestrationError> {
        let request_id = RequestId::new();
        let cancel = self.state.pending.insert(PendingRequest::new(request_id, &request.intent));
        self.state.run(request_id, request, cancel).await
    }

    /// Run `request` in the background. The request is already cancellable
    /// by id when this returns.
    pub fn dispatch(&self, request: IntentRequest) -> RequestHandle {
        let request_id = RequestId::new();
        let cancel = self.state.pending.insert(PendingRequest::new(request_id, &request.intent));
        let state = Arc::clone(&self.state);
        let token = cancel.clone();
        let task = tokio::spawn(async move { state.run(request_id, request, token).await });

        RequestHandle {
            request_id,
            cancel,
            task,
        }
    }

    /// Cancel an in-flight request. Idempotent; false once the request has
    /// finished or was never issued.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let cancelled = self.state.pending.cancel(request_id);
        if cancelled {
            debug!(request_id = %request_id, "Cancellation requested");
        }
        cancelled
    }

    /// Broadcast `request` as a query and hand every reply that arrives
    /// before the aggregate deadline to `merge`, which runs exactly once.
    /// Only agents serving the intent answer; each contributes at most one
    /// reply, in arrival order.
    pub async fn fan_out<R>(
        &self,
        request: IntentRequest,
        merge: impl FnOnce(Vec<Envelope>) -> R,
    ) -> Result<R, OrchestrationError> {
        self.fan_out_until(request, CancellationToken::new(), merge).await
    }

    /// [`Director::fan_out`] that gives up when `cancel` fires. A cancelled
    /// fan-out returns [`OrchestrationError::Cancelled`] and never calls
    /// `merge`. While collecting, the fan-out counts toward
    /// [`Director::in_flight`] and can also be cancelled by id.
    pub async fn fan_out_until<R>(
        &self,
        request: IntentRequest,
        cancel: CancellationToken,
        merge: impl FnOnce(Vec<Envelope>) -> R,
    ) -> Result<R, OrchestrationError> {
        let state = &self.state;
        state.admit(&request).await?;

        let request_id = RequestId::new();
        let by_id = state.pending.insert(PendingRequest::new(request_id, &request.intent));
        let _guard = PendingGuard {
            table: &state.pending,
            request_id,
        };

        let window = request.deadline.unwrap_or(state.config.fan_out_deadline);
        let query = Envelope::query(state.config.agent_id.clone(), AgentId::broadcast(), request.call().to_payload())
            .with_priority(request.priority)
            .with_timeout(window);

        let replies = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = by_id.cancelled() => None,
            replies = state.collect(query, window) => Some(replies),
        };
        let Some(replies) = replies else {
            debug!(request_id = %request_id, intent = %request.intent, "Fan-out cancelled");
            state
                .events
                .publish(OrchestrationEvent::RequestCancelled {
                    request_id,
                    intent: request.intent,
                    cancelled_at: Utc::now(),
                })
                .await;
            return Err(OrchestrationError::Cancelled(request_id));
        };

        let responses = replies.len();
        let merged = merge(replies);

        state
            .events
            .publish(OrchestrationEvent::FanOutCompleted {
                request_id,
                intent: request.intent,
                responses,
                completed_at: Utc::now(),
            })
            .await;
        Ok(merged)
    }
}

impl DirectorState {
    async fn run(
        &self,
        request_id: RequestId,
        request: IntentRequest,
        cancel: CancellationToken,
    ) -> Result<Delivered, OrchestrationError> {
        let _guard = PendingGuard {
            table: &self.pending,
            request_id,
        };

        let outcome = if cancel.is_cancelled() {
            Err(OrchestrationError::Cancelled(request_id))
        } else {
            self.walk(request_id, &request, &cancel).await
        };

        let now = Utc::now();
        let event = match &outcome {
            Ok(delivered) => Some(OrchestrationEvent::RequestCompleted {
                request_id,
                intent: request.intent.clone(),
                agent_id: delivered.agent_id.clone(),
                rung: delivered.rung,
                attempts: delivered.attempts,
                escalations: delivered.escalations,
                completed_at: now,
            }),
            Err(OrchestrationError::Cancelled(_)) => Some(OrchestrationEvent::RequestCancelled {
                request_id,
                intent: request.intent.clone(),
                cancelled_at: now,
            }),
            // already announced by the admission check
            Err(OrchestrationError::AdmissionDenied { .. }) => None,
            Err(e) => Some(OrchestrationEvent::RequestFailed {
                request_id,
                intent: request.intent.clone(),
                kind: e.kind().to_string(),
                message: e.to_string(),
                escalations: match e {
                    OrchestrationError::AgentUnavailable { escalations, .. } => *escalations,
                    _ => 0,
                },
                failed_at: now,
            }),
        };
        if let Some(event) = event {
            self.events.publish(event).await;
        }
        outcome
    }

    pub(crate) async fn admit(&self, request: &IntentRequest) -> Result<(), OrchestrationError> {
        let tier = request
            .tier
            .clone()
            .unwrap_or_else(|| self.admission.default_tier().to_string());
        let decision = self.admission.allow(&request.subject, &tier);
        if decision.admitted {
            return Ok(());
        }

        self.events
            .publish(OrchestrationEvent::AdmissionDenied {
                subject: request.subject.clone(),
                tier,
                retry_after_ms: decision.retry_after.as_millis() as u64,
                denied_at: Utc::now(),
            })
            .await;
        Err(OrchestrationError::AdmissionDenied {
            subject: request.subject.clone(),
            limit: decision.limit,
            retry_after: decision.retry_after,
        })
    }

    async fn walk(
        &self,
        request_id: RequestId,
        request: &IntentRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivered, OrchestrationError> {
        self.admit(request).await?;

        let deadline = request.deadline.unwrap_or(self.config.request_deadline);
        let mut rung = Rung::Worker;
        let mut escalations = 0;
        let mut last_failure = None;

        loop {
            let hop = match rung {
                Rung::Worker | Rung::Manager => self.try_agents(request_id, request, rung, deadline, cancel).await,
                Rung::Director => self.try_local(request_id, request, deadline, cancel).await,
                Rung::Human => break,
            };

            match hop {
                Hop::Delivered { agent_id, payload } => {
                    let attempts = self
                        .pending
                        .get(&request_id)
                        .map_or(1, |pending| pending.attempt_count);
                    return Ok(Delivered {
                        request_id,
                        agent_id,
                        rung,
                        payload,
                        attempts,
                        escalations,
                    });
                }
                Hop::Cancelled => return Err(OrchestrationError::Cancelled(request_id)),
                Hop::Escalate {
                    reason,
                    agent_id,
                    failure,
                } => {
                    if failure.is_some() {
                        last_failure = failure;
                    }
                    let Some(next) = rung.next() else {
                        break;
                    };
                    self.escalate(request_id, &request.intent, rung, next, reason, agent_id)
                        .await;
                    escalations += 1;
                    rung = next;
                }
            }
        }

        Err(OrchestrationError::AgentUnavailable {
            intent: request.intent.clone(),
            escalations,
            last_failure: last_failure.map(Box::new),
        })
    }

    async fn escalate(
        &self,
        request_id: RequestId,
        intent: &str,
        from: Rung,
        to: Rung,
        reason: EscalationReason,
        agent_id: Option<AgentId>,
    ) {
        self.pending.update(&request_id, |pending| pending.escalate(to));
        metrics::counter!(
            "switchboard_escalations_total",
            "from" => from.to_string(),
            "to" => to.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);

        self.events
            .publish(OrchestrationEvent::Escalated {
                request_id,
                intent: intent.to_string(),
                from_rung: from,
                to_rung: to,
                reason,
                agent_id,
                escalated_at: Utc::now(),
            })
            .await;
    }

    async fn try_agents(
        &self,
        request_id: RequestId,
        request: &IntentRequest,
        rung: Rung,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Hop {
        let Some(agent) = self
            .registry
            .eligible(&request.intent, request.confidence, rung)
            .into_iter()
            .next()
        else {
            debug!(
                request_id = %request_id,
                intent = %request.intent,
                rung = %rung,
                confidence = request.confidence,
                "No eligible agent at rung"
            );
            return Hop::nobody();
        };

        self.ask(request_id, request, agent.agent_id, deadline, cancel).await
    }

    /// Send the request to one agent and await its reply, retrying silence
    /// with the same envelope id while the agent stays online.
    async fn ask(
        &self,
        request_id: RequestId,
        request: &IntentRequest,
        agent_id: AgentId,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Hop {
        let envelope = Envelope::command(self.config.agent_id.clone(), agent_id.clone(), request.call().to_payload())
            .with_priority(request.priority);

        let mut replies = match self.transport.subscribe(&Channel::reply_for(&envelope)).await {
            Ok(replies) => replies,
            Err(e) => return transport_failure(agent_id, e),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let expires = deadline_after(deadline);
            let attempt = envelope.redelivered(expires);
            self.pending.update(&request_id, |pending| pending.attempt(attempt.id, expires));
            debug!(
                request_id = %request_id,
                correlation_id = %attempt.id,
                agent_id = %agent_id,
                attempt = attempts,
                "Dispatching request"
            );

            let inbox = Channel::inbox(&agent_id);
            let published = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Hop::Cancelled,
                published = publish_with_backoff(self.transport.as_ref(), &inbox, attempt, &self.backoff) => published,
            };
            if let Err(e) = published {
                warn!(request_id = %request_id, agent_id = %agent_id, "Dispatch failed: {}", e);
                return transport_failure(agent_id, e);
            }

            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Hop::Cancelled,
                waited = tokio::time::timeout(deadline, self.await_reply(&mut replies, envelope.id)) => waited,
            };

            match waited {
                Ok(Some(reply)) if reply.message_type == MessageType::Response => {
                    return Hop::Delivered {
                        agent_id,
                        payload: reply.payload,
                    };
                }
                Ok(Some(reply)) => {
                    let failure = rejection(&request.intent, &agent_id, &reply.payload);
                    warn!(request_id = %request_id, agent_id = %agent_id, "Agent refused request: {}", failure);
                    return Hop::Escalate {
                        reason: EscalationReason::ErrorReply,
                        agent_id: Some(agent_id),
                        failure: Some(failure),
                    };
                }
                Ok(None) => return transport_failure(agent_id, TransportError::Closed),
                Err(_) => {
                    metrics::counter!("switchboard_request_timeouts_total", "agent_id" => agent_id.to_string())
                        .increment(1);
                    let still_online = self.registry.status(&agent_id) == Some(AgentStatus::Online);
                    if still_online && attempts <= self.config.max_retries {
                        warn!(
                            request_id = %request_id,
                            agent_id = %agent_id,
                            attempt = attempts,
                            "No reply before deadline, retrying"
                        );
                        continue;
                    }
                    warn!(
                        request_id = %request_id,
                        agent_id = %agent_id,
                        attempts,
                        still_online,
                        "No reply before deadline, giving up on agent"
                    );
                    return Hop::Escalate {
                        reason: EscalationReason::Timeout,
                        agent_id: Some(agent_id.clone()),
                        failure: Some(OrchestrationError::RequestTimeout { agent_id, attempts }),
                    };
                }
            }
        }
    }

    /// Next reply correlated to `expected`. Anything else on the channel is
    /// an orphan. `None` if the transport closed the stream.
    async fn await_reply(&self, replies: &mut EnvelopeStream, expected: EnvelopeId) -> Option<Envelope> {
        while let Some(envelope) = replies.next().await {
            if envelope.message_type.is_reply() && envelope.correlation_id == Some(expected) {
                return Some(envelope);
            }
            self.discard_orphan(&envelope).await;
        }
        None
    }

    pub(crate) async fn discard_orphan(&self, envelope: &Envelope) {
        metrics::counter!("switchboard_orphan_responses_total").increment(1);
        self.events
            .publish(OrchestrationEvent::OrphanResponseDiscarded {
                correlation_id: envelope.correlation_id,
                from_agent: envelope.from_agent.clone(),
                discarded_at: Utc::now(),
            })
            .await;
    }

    async fn try_local(
        &self,
        request_id: RequestId,
        request: &IntentRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Hop {
        let call = request.call();
        let handler = match self.local.resolve(&call) {
            Ok(handler) => handler,
            Err(CapabilityError::UnknownCapability(_)) => return Hop::nobody(),
            Err(e) => {
                return Hop::Escalate {
                    reason: EscalationReason::ErrorReply,
                    agent_id: Some(self.config.agent_id.clone()),
                    failure: Some(OrchestrationError::CapabilityValidation {
                        intent: call.intent,
                        agent_id: self.config.agent_id.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        };

        let expires = deadline_after(deadline);
        let envelope = Envelope::command(self.config.agent_id.clone(), self.config.agent_id.clone(), call.to_payload())
            .with_priority(request.priority)
            .with_deadline(expires);
        self.pending.update(&request_id, |pending| pending.attempt(envelope.id, expires));
        debug!(request_id = %request_id, intent = %call.intent, "Handling request on the director rung");

        // own task, so a panicking handler only fails this request
        let mut invocation = tokio::spawn(async move { handler.handle(call.args, &envelope).await });
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = tokio::time::timeout(deadline, &mut invocation) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            invocation.abort();
            return Hop::Cancelled;
        };

        let director = self.config.agent_id.clone();
        match outcome {
            Ok(Ok(Ok(payload))) => Hop::Delivered {
                agent_id: director,
                payload,
            },
            Ok(Ok(Err(e))) => Hop::Escalate {
                reason: EscalationReason::ErrorReply,
                agent_id: Some(director.clone()),
                failure: Some(OrchestrationError::CapabilityValidation {
                    intent: request.intent.clone(),
                    agent_id: director,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
            },
            Ok(Err(join_error)) => {
                warn!(request_id = %request_id, "Director handler failed: {}", join_error);
                Hop::Escalate {
                    reason: EscalationReason::ErrorReply,
                    agent_id: Some(director.clone()),
                    failure: Some(OrchestrationError::CapabilityValidation {
                        intent: request.intent.clone(),
                        agent_id: director,
                        kind: "handler".to_string(),
                        message: "handler panicked".to_string(),
                    }),
                }
            }
            Err(_) => {
                invocation.abort();
                Hop::Escalate {
                    reason: EscalationReason::Timeout,
                    agent_id: Some(director.clone()),
                    failure: Some(OrchestrationError::RequestTimeout {
                        agent_id: director,
                        attempts: 1,
                    }),
                }
            }
        }
    }

    /// Broadcast `query` and gather correlated replies until `window` closes.
    async fn collect(&self, query: Envelope, window: Duration) -> Vec<Envelope> {
        let mut replies = Vec::new();
        let mut stream = match self.transport.subscribe(&Channel::reply_for(&query)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(correlation_id = %query.id, "Fan-out could not subscribe for replies: {}", e);
                return replies;
            }
        };

        let query_id = query.id;
        let closes_at = tokio::time::Instant::now() + window;
        if let Err(e) = publish_with_backoff(self.transport.as_ref(), &Channel::Broadcast, query, &self.backoff).await {
            warn!(correlation_id = %query_id, "Fan-out broadcast failed: {}", e);
            return replies;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(closes_at) => break,
                next = stream.next() => match next {
                    Some(reply) if reply.message_type.is_reply() && reply.correlation_id == Some(query_id) => {
                        if replies.iter().all(|seen: &Envelope| seen.from_agent != reply.from_agent) {
                            replies.push(reply);
                        }
                    }
                    Some(other) => self.discard_orphan(&other).await,
                    None => break,
                },
            }
        }

        info!(correlation_id = %query_id, replies = replies.len(), "Fan-out window closed");
        replies
    }
}

fn transport_failure(agent_id: AgentId, error: TransportError) -> Hop {
    Hop::Escalate {
        reason: EscalationReason::TransportFailure,
        agent_id: Some(agent_id),
        failure: Some(error.into()),
    }
}

/// Decode an `error` reply payload (`{"kind", "message"}`).
fn rejection(intent: &str, agent_id: &AgentId, payload: &Value) -> OrchestrationError {
    let field = |name: &str, fallback: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    OrchestrationError::CapabilityValidation {
        intent: intent.to_string(),
        agent_id: agent_id.clone(),
        kind: field("kind", "handler"),
        message: field("message", "agent reported an error"),
    }
}
