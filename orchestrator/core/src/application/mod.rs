// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod admission;
pub mod agent_runtime;
pub mod backoff;
pub mod event_publisher;
pub mod health_monitor;
pub mod registry;

pub use admission::{AdmissionController, UsageReport};
pub use agent_runtime::{AgentHandle, AgentRuntime, STATUS_INTENT};
pub use backoff::publish_with_backoff;
pub use event_publisher::EventPublisher;
pub use health_monitor::HealthMonitor;
pub use registry::AgentRegistry;
