// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Director Domain Layer
//!
//! Pure request and outcome types. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`request`] | `IntentRequest`, `Delivered`, `PendingRequest` |
//! | [`error`] | `OrchestrationError` |

pub mod error;
pub mod request;

pub use error::OrchestrationError;
pub use request::{Delivered, IntentRequest, PendingRequest};
