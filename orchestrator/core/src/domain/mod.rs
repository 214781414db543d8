// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value types, state machines and contracts shared by every participant on
//! the bus. Nothing here performs I/O.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Protocol, lifecycle, health and admission rules

pub mod admission;
pub mod agent;
pub mod capability;
pub mod envelope;
pub mod events;
pub mod health;
pub mod node_config;
pub mod transport;
