// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::application::{AgentHandle, AgentRegistry, AgentRuntime};
use switchboard_core::domain::agent::{AgentDescriptor, AgentId, AgentStatus, Rung};
use switchboard_core::domain::capability::{CapabilityHandler, CapabilityRegistry, FnCapability};
use switchboard_core::domain::envelope::Envelope;
use switchboard_core::domain::events::{EscalationReason, OrchestrationEvent};
use switchboard_core::domain::node_config::BackoffPolicy;
use switchboard_core::domain::transport::{Channel, Transport};
use switchboard_core::infrastructure::event_bus::InMemoryBus;
use switchboard_director::{Director, IntentRequest, OrchestrationError};
use tokio::sync::broadcast;

fn answering(intent: &str, agent: &'static str) -> Arc<dyn CapabilityHandler> {
    Arc::new(FnCapability::new(intent, move |args: Value| async move {
        Ok(json!({ "handled_by": agent, "args": args }))
    }))
}

async fn start_agent(bus: &Arc<InMemoryBus>, id: &str, capability: Arc<dyn CapabilityHandler>) -> AgentHandle {
    let capabilities = CapabilityRegistry::new().with(capability).unwrap();
    AgentRuntime::new(AgentId::new(id), bus.clone(), capabilities)
        .spawn()
        .await
        .unwrap()
}

fn online(descriptor: AgentDescriptor) -> AgentDescriptor {
    descriptor.with_status(AgentStatus::Online)
}

fn drain(events: &mut broadcast::Receiver<OrchestrationEvent>) -> Vec<OrchestrationEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn escalations(events: &[OrchestrationEvent]) -> Vec<(Rung, Rung, EscalationReason)> {
    events
        .iter()
        .filter_map(|event| match event {
            OrchestrationEvent::Escalated {
                from_rung,
                to_rung,
                reason,
                ..
            } => Some((*from_rung, *to_rung, *reason)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_confident_intent_goes_straight_to_specialist() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    registry.register(online(AgentDescriptor::manager("manager-1", 0.3).with_capability("schedule_meeting")));
    let calendar = start_agent(&bus, "calendar-1", answering("schedule_meeting", "calendar-1")).await;

    let director = Director::builder(bus.clone(), registry).build();
    let mut events = director.events().subscribe();

    let delivered = director
        .submit(IntentRequest::new("schedule_meeting", 0.92).with_args(json!({"title": "standup"})))
        .await
        .unwrap();

    assert_eq!(delivered.agent_id, AgentId::new("calendar-1"));
    assert_eq!(delivered.rung, Rung::Worker);
    assert_eq!(delivered.escalations, 0);
    assert_eq!(delivered.attempts, 1);
    assert_eq!(delivered.payload["args"]["title"], "standup");

    let events = drain(&mut events);
    assert!(escalations(&events).is_empty());
    assert_eq!(events.last().map(|e| e.name()), Some("request_completed"));
    assert_eq!(director.in_flight(), 0);

    calendar.shutdown().await;
}

#[tokio::test]
async fn test_degraded_specialist_is_skipped_for_manager() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(
        AgentDescriptor::worker("calendar-1", 0.8)
            .with_capability("schedule_meeting")
            .with_status(AgentStatus::Degraded),
    );
    registry.register(online(AgentDescriptor::manager("manager-1", 0.3).with_capability("schedule_meeting")));
    let manager = start_agent(&bus, "manager-1", answering("schedule_meeting", "manager-1")).await;

    let director = Director::builder(bus.clone(), registry).build();
    let mut events = director.events().subscribe();
    assert_eq!(director.route("schedule_meeting", 0.92).len(), 1);

    let delivered = director
        .submit(IntentRequest::new("schedule_meeting", 0.92))
        .await
        .unwrap();

    assert_eq!(delivered.agent_id, AgentId::new("manager-1"));
    assert_eq!(delivered.rung, Rung::Manager);
    assert_eq!(delivered.escalations, 1);
    assert_eq!(
        escalations(&drain(&mut events)),
        vec![(Rung::Worker, Rung::Manager, EscalationReason::NoEligibleAgent)]
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_is_retried_once_then_escalated() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    // calendar-1 is believed online but nothing is listening on its inbox
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    registry.register(online(AgentDescriptor::manager("manager-1", 0.3).with_capability("schedule_meeting")));
    let manager = start_agent(&bus, "manager-1", answering("schedule_meeting", "manager-1")).await;

    let director = Director::builder(bus.clone(), registry).build();
    assert_eq!(director.config().max_retries, 1);
    let mut events = director.events().subscribe();

    let started = tokio::time::Instant::now();
    let delivered = director
        .submit(IntentRequest::new("schedule_meeting", 0.92).with_deadline(Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(delivered.agent_id, AgentId::new("manager-1"));
    assert_eq!(delivered.attempts, 3);
    assert_eq!(
        escalations(&drain(&mut events)),
        vec![(Rung::Worker, Rung::Manager, EscalationReason::Timeout)]
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_agent_leaving_online_is_not_retried() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    let director = Director::builder(bus.clone(), registry.clone()).build();

    let handle = director.dispatch(IntentRequest::new("schedule_meeting", 0.92).with_deadline(Duration::from_secs(2)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    registry.update(&AgentId::new("calendar-1"), |agent| agent.status = AgentStatus::Degraded);

    let started = tokio::time::Instant::now();
    let error = handle.outcome().await.unwrap_err();

    // one deadline only, no second attempt against the degraded agent
    assert!(started.elapsed() < Duration::from_secs(2));
    let last = error.last_failure().cloned();
    assert_eq!(
        last,
        Some(OrchestrationError::RequestTimeout {
            agent_id: AgentId::new("calendar-1"),
            attempts: 1,
        })
    );
}

#[tokio::test]
async fn test_error_reply_escalates_without_retry() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    registry.register(online(AgentDescriptor::manager("manager-1", 0.3).with_capability("schedule_meeting")));

    let strict = Arc::new(
        FnCapability::new("schedule_meeting", |_args: Value| async move { Ok(json!({"handled_by": "calendar-1"})) })
            .with_schema(json!({
                "type": "object",
                "required": ["title"],
                "properties": { "title": { "type": "string" } }
            })),
    );
    let calendar = start_agent(&bus, "calendar-1", strict).await;
    let manager = start_agent(&bus, "manager-1", answering("schedule_meeting", "manager-1")).await;

    let director = Director::builder(bus.clone(), registry).build();
    let mut events = director.events().subscribe();

    let delivered = director
        .submit(IntentRequest::new("schedule_meeting", 0.92).with_args(json!({"attendees": 3})))
        .await
        .unwrap();

    assert_eq!(delivered.payload["handled_by"], "manager-1");
    assert_eq!(delivered.attempts, 2);
    assert_eq!(
        escalations(&drain(&mut events)),
        vec![(Rung::Worker, Rung::Manager, EscalationReason::ErrorReply)]
    );

    calendar.shutdown().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_validation_failure_surfaces_when_nothing_else_serves() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    let strict = Arc::new(
        FnCapability::new("schedule_meeting", |_args: Value| async move { Ok(Value::Null) })
            .with_schema(json!({ "type": "object", "required": ["title"] })),
    );
    let calendar = start_agent(&bus, "calendar-1", strict).await;
    let director = Director::builder(bus.clone(), registry).build();

    let error = director
        .submit(IntentRequest::new("schedule_meeting", 0.92).with_args(json!({})))
        .await
        .unwrap_err();

    match error.last_failure() {
        Some(OrchestrationError::CapabilityValidation { agent_id, kind, .. }) => {
            assert_eq!(agent_id, &AgentId::new("calendar-1"));
            assert_eq!(kind, "validation");
        }
        other => panic!("unexpected last failure: {other:?}"),
    }
    assert_eq!(error.kind(), "agent_unavailable");

    calendar.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_never_sees_late_reply() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    let mut inbox = bus.subscribe(&Channel::inbox(&AgentId::new("calendar-1"))).await.unwrap();

    let director = Director::builder(bus.clone(), registry).build();
    let mut events = director.events().subscribe();
    let handle = director.dispatch(IntentRequest::new("schedule_meeting", 0.92));
    let request_id = handle.request_id();

    let request = inbox.next().await.unwrap();
    assert!(director.pending(&request_id).unwrap().awaits(request.id));

    assert!(director.cancel(&request_id));
    handle.cancel();
    let outcome = handle.outcome().await;
    assert_eq!(outcome, Err(OrchestrationError::Cancelled(request_id)));
    assert!(!director.cancel(&request_id));
    assert_eq!(director.in_flight(), 0);

    // the slow agent answers after all; nobody is listening any more
    let late = Envelope::reply_to(&request, AgentId::new("calendar-1"), json!({"ok": true}));
    bus.publish(&Channel::reply_for(&request), late).await.unwrap();
    assert_eq!(bus.subscriber_count(&Channel::reply_for(&request)), 0);

    let names: Vec<&str> = drain(&mut events).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["request_cancelled"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_dispatch_backoff() {
    // single-slot inbox, filled and never drained: every dispatch times out
    let bus = Arc::new(InMemoryBus::new(1, Duration::from_millis(100)));
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    let _stalled = bus.subscribe(&Channel::inbox(&AgentId::new("calendar-1"))).await.unwrap();
    bus.publish(
        &Channel::inbox(&AgentId::new("calendar-1")),
        Envelope::command(AgentId::new("director"), AgentId::new("calendar-1"), Value::Null),
    )
    .await
    .unwrap();

    let director = Director::builder(bus.clone(), registry)
        .backoff(BackoffPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        })
        .build();

    let started = tokio::time::Instant::now();
    let handle = director.dispatch(IntentRequest::new("schedule_meeting", 0.92));
    let request_id = handle.request_id();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(director.cancel(&request_id));

    assert_eq!(handle.outcome().await, Err(OrchestrationError::Cancelled(request_id)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(director.in_flight(), 0);
}

#[tokio::test]
async fn test_failed_event_reports_the_same_escalations_as_the_error() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let director = Director::builder(bus, AgentRegistry::new()).build();
    let mut events = director.events().subscribe();

    let error = director.submit(IntentRequest::new("book_flight", 0.9)).await.unwrap_err();
    let OrchestrationError::AgentUnavailable { escalations, .. } = &error else {
        panic!("unexpected outcome: {error:?}");
    };

    let reported: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestrationEvent::RequestFailed { escalations, .. } => Some(escalations),
            _ => None,
        })
        .collect();
    assert_eq!(reported, vec![*escalations]);
}

#[tokio::test]
async fn test_uncorrelated_reply_is_discarded() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    let registry = AgentRegistry::new();
    registry.register(online(AgentDescriptor::worker("calendar-1", 0.8).with_capability("schedule_meeting")));
    let mut inbox = bus.subscribe(&Channel::inbox(&AgentId::new("calendar-1"))).await.unwrap();

    // hand-driven agent: a stray reply first, then the real one
    let agent_bus = bus.clone();
    let agent = tokio::spawn(async move {
        let request = inbox.next().await.unwrap();
        let unrelated = Envelope::command(AgentId::new("director"), AgentId::new("calendar-1"), Value::Null);
        let stray = Envelope::reply_to(&unrelated, AgentId::new("calendar-1"), json!({"stale": true}));
        agent_bus.publish(&Channel::reply_for(&request), stray).await.unwrap();
        let reply = Envelope::reply_to(&request, AgentId::new("calendar-1"), json!({"fresh": true}));
        agent_bus.publish(&Channel::reply_for(&request), reply).await.unwrap();
    });

    let director = Director::builder(bus.clone(), registry).build();
    let mut events = director.events().subscribe();

    let delivered = director
        .submit(IntentRequest::new("schedule_meeting", 0.92))
        .await
        .unwrap();
    agent.await.unwrap();

    assert_eq!(delivered.payload, json!({"fresh": true}));
    let names: Vec<&str> = drain(&mut events).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["orphan_response_discarded", "request_completed"]);
}
