// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Switchboard Core
//!
//! Messaging layer shared by every agent process: the envelope wire
//! protocol, the publish/subscribe transport contract and its in-memory
//! fabric, the per-agent runtime, heartbeat health tracking and admission
//! control. Routing and escalation live in `switchboard-director`.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Protocol, transport and per-agent runtime

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
