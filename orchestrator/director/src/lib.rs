// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `switchboard-director` - Orchestration & Escalation
//!
//! Turns an intent plus a confidence score into a delivered reply. The
//! director owns the agent registry, correlates every dispatched envelope
//! with its reply, retries silent agents and walks the escalation ladder
//! when an agent cannot serve a request.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `IntentRequest`, `Delivered`, `PendingRequest`, `OrchestrationError` |
//! | [`application`] | Application | `Director`, `RequestHandle`, `PendingTable`, inbox service |
//!
//! ## Key Concepts
//!
//! - **Escalation ladder**: worker → manager → director → human. A request
//!   moves up one rung when no agent at the current rung qualifies, when the
//!   chosen agent answers with an `error` envelope, or when it stays silent
//!   past its retries.
//! - **Pending request**: per-request state (current correlation id, attempts,
//!   rung) held only while the request is in flight, one lock per request.
//! - **Fan-out**: broadcast queries collect whatever replies arrive before
//!   one aggregate deadline and hand them to a merge callback exactly once.
//!
//! Requests are never persisted; a director restart loses in-flight work.

pub mod application;
pub mod domain;

pub use application::{Director, DirectorBuilder, DirectorHandle, RequestHandle};
pub use domain::*;
