// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Director application layer
//!
//! Request routing and the director's own presence on the bus.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Use cases for submitting, tracking and cancelling requests

pub mod director;
pub mod pending;
pub mod service;

pub use director::{Director, DirectorBuilder, RequestHandle};
pub use pending::PendingTable;
pub use service::{DirectorHandle, ORCHESTRATE_INTENT};
