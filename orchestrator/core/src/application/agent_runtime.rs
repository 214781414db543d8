// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Runtime
//!
//! Per-agent message loop. Each runtime is its own tokio task: it subscribes
//! to its inbox and the broadcast channel, emits heartbeats to the director,
//! and dispatches command/query envelopes to its [`CapabilityRegistry`].
//!
//! ```text
//! offline → starting ──(subscribed + first heartbeat)──→ online
//!                                                          │ shutdown
//!                                  offline ←── stopping ←──┘
//! ```
//!
//! Every handler runs in a task of its own. A slow handler never stalls the
//! inbox, and a panicking one is reported to the requester as a `handler`
//! error instead of taking the agent down. Requests that fail validation
//! are answered with an `error` envelope, never dropped.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Agent message loop, lifecycle and capability dispatch

use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::backoff::publish_with_backoff;
use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::capability::{CapabilityCall, CapabilityError, CapabilityHandler, CapabilityRegistry};
use crate::domain::envelope::Envelope;
use crate::domain::health::ReportedState;
use crate::domain::node_config::BackoffPolicy;
use crate::domain::transport::{Channel, EnvelopeStream, Transport, TransportError};

/// Query every runtime answers unless a capability overrides it.
pub const STATUS_INTENT: &str = "status";

pub struct AgentRuntime {
    agent_id: AgentId,
    director_id: AgentId,
    capabilities: CapabilityRegistry,
    transport: Arc<dyn Transport>,
    heartbeat_interval: Duration,
    backoff: BackoffPolicy,
    status: watch::Sender<AgentStatus>,
}

impl AgentRuntime {
    pub fn new(agent_id: AgentId, transport: Arc<dyn Transport>, capabilities: CapabilityRegistry) -> Self {
        let (status, _) = watch::channel(AgentStatus::Offline);
        Self {
            agent_id,
            director_id: AgentId::new("director"),
            capabilities,
            transport,
            heartbeat_interval: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            status,
        }
    }

    /// Agent that receives this runtime's heartbeats.
    pub fn with_director(mut self, director_id: AgentId) -> Self {
        self.director_id = director_id;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Subscribe and start the message loop. Subscriptions are in place when
    /// this returns, so nothing published afterwards is missed.
    pub async fn spawn(self) -> Result<AgentHandle, TransportError> {
        let runtime = Arc::new(self);
        runtime.set_status(AgentStatus::Starting);

        let subscriptions = async {
            let inbox = runtime.transport.subscribe(&Channel::inbox(&runtime.agent_id)).await?;
            let broadcast = runtime.transport.subscribe(&Channel::Broadcast).await?;
            Ok::<_, TransportError>((inbox, broadcast))
        };
        let (inbox, broadcast) = match subscriptions.await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(agent_id = %runtime.agent_id, "Agent failed to subscribe: {}", e);
                runtime.set_status(AgentStatus::Offline);
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        let status = runtime.status.subscribe();
        let agent_id = runtime.agent_id.clone();
        let task = tokio::spawn(Arc::clone(&runtime).run(inbox, broadcast, shutdown.clone()));

        Ok(AgentHandle {
            agent_id,
            status,
            shutdown,
            task,
        })
    }

    fn current_status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    fn set_status(&self, to: AgentStatus) {
        let from = self.current_status();
        match from.transition(to) {
            Ok(to) => {
                self.status.send_replace(to);
                info!(agent_id = %self.agent_id, from = %from, to = %to, "Agent lifecycle transition");
            }
            Err(e) => warn!(agent_id = %self.agent_id, "{}", e),
        }
    }

    async fn run(self: Arc<Self>, mut inbox: EnvelopeStream, mut broadcast: EnvelopeStream, shutdown: CancellationToken) {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut tick = interval(self.heartbeat_interval);
        let mut broadcast_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => self.beat().await,
                envelope = inbox.next() => match envelope {
                    Some(envelope) => self.accept(envelope, false, &mut in_flight),
                    None => {
                        warn!(agent_id = %self.agent_id, "Inbox closed by transport");
                        break;
                    }
                },
                envelope = broadcast.next(), if broadcast_open => match envelope {
                    Some(envelope) => self.accept(envelope, true, &mut in_flight),
                    None => broadcast_open = false,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        self.stop(in_flight).await;
    }

    async fn beat(&self) {
        let current = self.current_status();
        let reported = match current {
            AgentStatus::Starting | AgentStatus::Online | AgentStatus::Degraded => ReportedState::Online,
            AgentStatus::Stopping => ReportedState::Stopping,
            AgentStatus::Offline => ReportedState::Offline,
        };
        match self.send_heartbeat(reported).await {
            Ok(()) if current == AgentStatus::Starting => self.set_status(AgentStatus::Online),
            Ok(()) => {}
            Err(e) => warn!(agent_id = %self.agent_id, "Heartbeat publish failed: {}", e),
        }
    }

    async fn send_heartbeat(&self, reported: ReportedState) -> Result<(), TransportError> {
        let heartbeat = Envelope::heartbeat(self.agent_id.clone(), self.director_id.clone(), reported.to_payload());
        self.transport.publish(&Channel::inbox(&self.director_id), heartbeat).await
    }

    fn accept(self: &Arc<Self>, envelope: Envelope, via_broadcast: bool, in_flight: &mut JoinSet<()>) {
        if envelope.from_agent == self.agent_id {
            return;
        }
        if !envelope.message_type.is_request() {
            debug!(
                agent_id = %self.agent_id,
                envelope_id = %envelope.id,
                message_type = %envelope.message_type,
                "Ignoring non-request envelope"
            );
            return;
        }
        // the requester has already timed out or retried
        if envelope.is_expired_at(Utc::now()) {
            debug!(
                agent_id = %self.agent_id,
                envelope_id = %envelope.id,
                "Dropping expired request"
            );
            metrics::counter!("switchboard_expired_requests_total", "agent_id" => self.agent_id.to_string())
                .increment(1);
            return;
        }

        let call = match CapabilityCall::from_envelope(&envelope) {
            Ok(call) => call,
            Err(e) => {
                if !via_broadcast {
                    self.spawn_reply(envelope, Err(e), in_flight);
                }
                return;
            }
        };

        if call.intent == STATUS_INTENT && !self.capabilities.contains(STATUS_INTENT) {
            let status = self.status_payload();
            self.spawn_reply(envelope, Ok(status), in_flight);
            return;
        }

        let handler = match self.capabilities.resolve(&call) {
            Ok(handler) => handler,
            // broadcast queries are only answered by agents that serve them
            Err(CapabilityError::UnknownCapability(_)) if via_broadcast => return,
            Err(e) => {
                self.spawn_reply(envelope, Err(e), in_flight);
                return;
            }
        };

        debug!(
            agent_id = %self.agent_id,
            envelope_id = %envelope.id,
            intent = %call.intent,
            "Dispatching request"
        );
        let runtime = Arc::clone(self);
        in_flight.spawn(async move { runtime.execute(handler, call.args, envelope).await });
    }

    fn spawn_reply(self: &Arc<Self>, request: Envelope, result: Result<Value, CapabilityError>, in_flight: &mut JoinSet<()>) {
        let runtime = Arc::clone(self);
        in_flight.spawn(async move { runtime.reply(&request, result).await });
    }

    async fn execute(self: Arc<Self>, handler: Arc<dyn CapabilityHandler>, args: Value, request: Envelope) {
        let task_request = request.clone();
        let outcome = tokio::spawn(async move { handler.handle(args, &task_request).await }).await;

        let result = match outcome {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                warn!(agent_id = %self.agent_id, envelope_id = %request.id, "Capability handler panicked");
                Err(CapabilityError::Handler("handler panicked".to_string()))
            }
            Err(_) => Err(CapabilityError::Handler("handler cancelled".to_string())),
        };
        self.reply(&request, result).await;
    }

    async fn reply(&self, request: &Envelope, result: Result<Value, CapabilityError>) {
        if !request.requires_response {
            if let Err(e) = result {
                warn!(agent_id = %self.agent_id, envelope_id = %request.id, "Fire-and-forget request failed: {}", e);
            }
            return;
        }

        let envelope = match result {
            Ok(payload) => Envelope::reply_to(request, self.agent_id.clone(), payload),
            Err(e) => {
                debug!(agent_id = %self.agent_id, envelope_id = %request.id, kind = e.kind(), "Replying with error: {}", e);
                Envelope::error_for(request, self.agent_id.clone(), e.to_payload())
            }
        };

        if let Err(e) = publish_with_backoff(self.transport.as_ref(), &Channel::reply_for(request), envelope, &self.backoff).await {
            warn!(agent_id = %self.agent_id, envelope_id = %request.id, "Failed to publish reply: {}", e);
        }
    }

    fn status_payload(&self) -> Value {
        let mut capabilities = self.capabilities.intents();
        capabilities.push(STATUS_INTENT.to_string());
        capabilities.sort();
        capabilities.dedup();
        json!({
            "status": self.current_status(),
            "agent_id": self.agent_id,
            "capabilities": capabilities,
        })
    }

    async fn stop(&self, mut in_flight: JoinSet<()>) {
        self.set_status(AgentStatus::Stopping);
        if let Err(e) = self.send_heartbeat(ReportedState::Stopping).await {
            debug!(agent_id = %self.agent_id, "Stopping heartbeat not delivered: {}", e);
        }

        // give running handlers one heartbeat interval to publish their replies
        let drain = async { while in_flight.join_next().await.is_some() {} };
        if tokio::time::timeout(self.heartbeat_interval, drain).await.is_err() {
            warn!(agent_id = %self.agent_id, pending = in_flight.len(), "Aborting unfinished handlers");
            in_flight.abort_all();
        }

        self.set_status(AgentStatus::Offline);
        if let Err(e) = self.send_heartbeat(ReportedState::Offline).await {
            debug!(agent_id = %self.agent_id, "Offline heartbeat not delivered: {}", e);
        }
        info!(agent_id = %self.agent_id, "Agent runtime stopped");
    }
}

/// Owner-side handle of a running agent.
pub struct AgentHandle {
    agent_id: AgentId,
    status: watch::Receiver<AgentStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.clone()
    }

    /// Resolves once the runtime reports `target`. False if it stopped first.
    pub async fn wait_for(&mut self, target: AgentStatus) -> bool {
        self.status.wait_for(|status| *status == target).await.is_ok()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for the loop to finish going offline.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(agent_id = %self.agent_id, "Agent runtime task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::FnCapability;
    use crate::domain::envelope::MessageType;
    use crate::infrastructure::event_bus::InMemoryBus;

    fn capabilities() -> CapabilityRegistry {
        let echo: Arc<dyn CapabilityHandler> = Arc::new(
            FnCapability::new("echo", |args: Value| async move { Ok(json!({ "echo": args["text"] })) }).with_schema(
                json!({ "type": "object", "required": ["text"], "properties": { "text": { "type": "string" } } }),
            ),
        );
        let explode: Arc<dyn CapabilityHandler> = Arc::new(FnCapability::new("explode", |_args: Value| async move {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        }));
        CapabilityRegistry::new().with(echo).unwrap().with(explode).unwrap()
    }

    async fn start(bus: Arc<InMemoryBus>) -> AgentHandle {
        let mut handle = AgentRuntime::new(AgentId::new("echo-1"), bus, capabilities())
            .with_heartbeat_interval(Duration::from_secs(1))
            .spawn()
            .await
            .unwrap();
        assert!(handle.wait_for(AgentStatus::Online).await);
        handle
    }

    async fn request(bus: &InMemoryBus, payload: Value) -> Envelope {
        let request = Envelope::query(AgentId::new("director"), AgentId::new("echo-1"), payload);
        let mut replies = bus.subscribe(&Channel::reply_for(&request)).await.unwrap();
        bus.publish(&Channel::inbox(&AgentId::new("echo-1")), request.clone())
            .await
            .unwrap();
        let reply = replies.next().await.unwrap();
        assert_eq!(reply.correlation_id, Some(request.id));
        assert_eq!(reply.to_agent, AgentId::new("director"));
        reply
    }

    #[tokio::test]
    async fn test_startup_heartbeat_reaches_director() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let mut director = bus.subscribe(&Channel::inbox(&AgentId::new("director"))).await.unwrap();

        let handle = start(bus.clone()).await;
        let heartbeat = director.next().await.unwrap();
        assert_eq!(heartbeat.message_type, MessageType::Heartbeat);
        assert_eq!(heartbeat.from_agent, AgentId::new("echo-1"));
        assert_eq!(ReportedState::from_heartbeat(&heartbeat), ReportedState::Online);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_valid_request_gets_correlated_response() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let handle = start(bus.clone()).await;

        let reply = request(&bus, json!({ "intent": "echo", "args": { "text": "hi" } })).await;
        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.payload, json!({ "echo": "hi" }));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_payload_gets_error_envelope() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let handle = start(bus.clone()).await;

        let reply = request(&bus, json!({ "intent": "echo", "args": { "text": 7 } })).await;
        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(reply.payload["kind"], "validation");

        let unknown = request(&bus, json!({ "intent": "fly", "args": {} })).await;
        assert_eq!(unknown.payload["kind"], "unknown_capability");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let handle = start(bus.clone()).await;

        let reply = request(&bus, json!({ "intent": "explode", "args": {} })).await;
        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(reply.payload["kind"], "handler");

        // still serving
        let reply = request(&bus, json!({ "intent": "echo", "args": { "text": "again" } })).await;
        assert_eq!(reply.payload["echo"], "again");
        assert_eq!(handle.status(), AgentStatus::Online);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_builtin_status_query() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let handle = start(bus.clone()).await;

        let reply = request(&bus, json!({ "intent": "status" })).await;
        assert_eq!(reply.payload["status"], "online");
        assert_eq!(reply.payload["agent_id"], "echo-1");
        assert_eq!(reply.payload["capabilities"], json!(["echo", "explode", "status"]));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_produces_no_reply() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let handle = start(bus.clone()).await;

        let command = Envelope::command(
            AgentId::new("director"),
            AgentId::new("echo-1"),
            json!({ "intent": "echo", "args": { "text": "quiet" } }),
        )
        .without_response();
        let mut replies = bus.subscribe(&Channel::reply_for(&command)).await.unwrap();
        bus.publish(&Channel::inbox(&AgentId::new("echo-1")), command).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(5), replies.next()).await;
        assert!(waited.is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_request_is_never_executed() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let record = FnCapability::new("record", move |args: Value| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(args)
            }
        });
        let mut handle = AgentRuntime::new(
            AgentId::new("echo-1"),
            bus.clone(),
            CapabilityRegistry::new().with(Arc::new(record)).unwrap(),
        )
        .spawn()
        .await
        .unwrap();
        assert!(handle.wait_for(AgentStatus::Online).await);

        let expired = Envelope::command(
            AgentId::new("director"),
            AgentId::new("echo-1"),
            json!({ "intent": "record", "args": "late" }),
        )
        .with_deadline(Utc::now() - chrono::Duration::seconds(60));
        let mut late_replies = bus.subscribe(&Channel::reply_for(&expired)).await.unwrap();
        bus.publish(&Channel::inbox(&AgentId::new("echo-1")), expired).await.unwrap();

        // a live request sent afterwards is served, so the expired one was already seen
        let reply = request(&bus, json!({ "intent": "record", "args": "fresh" })).await;
        assert_eq!(reply.payload, json!("fresh"));

        let late = tokio::time::timeout(Duration::from_millis(200), late_replies.next()).await;
        assert!(late.is_err());
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_reports_stopping_then_offline() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let mut director = bus.subscribe(&Channel::inbox(&AgentId::new("director"))).await.unwrap();
        let handle = start(bus.clone()).await;
        let mut status = handle.watch_status();

        handle.shutdown().await;

        let mut reported = Vec::new();
        while let Ok(Some(heartbeat)) = tokio::time::timeout(Duration::from_millis(100), director.next()).await {
            reported.push(ReportedState::from_heartbeat(&heartbeat));
        }
        assert_eq!(reported.last(), Some(&ReportedState::Offline));
        assert!(reported.contains(&ReportedState::Stopping));
        assert_eq!(*status.borrow_and_update(), AgentStatus::Offline);
    }
}
