// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pending Request Table
//!
//! In-flight requests keyed by [`RequestId`], one mutex per request. Each
//! slot also carries the request's cancellation token, so `cancel` never
//! has to touch the request state itself.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Correlation bookkeeping and cancellation for dispatched requests

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use switchboard_core::domain::envelope::EnvelopeId;
use switchboard_core::domain::events::RequestId;

use crate::domain::request::PendingRequest;

#[derive(Clone)]
struct Slot {
    state: Arc<Mutex<PendingRequest>>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct PendingTable {
    slots: DashMap<RequestId, Slot>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request` and return the token that cancels it.
    pub fn insert(&self, request: PendingRequest) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.slots.insert(
            request.request_id,
            Slot {
                state: Arc::new(Mutex::new(request)),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    fn slot(&self, request_id: &RequestId) -> Option<Slot> {
        self.slots.get(request_id).map(|slot| slot.value().clone())
    }

    pub fn update<R>(&self, request_id: &RequestId, f: impl FnOnce(&mut PendingRequest) -> R) -> Option<R> {
        let slot = self.slot(request_id)?;
        let mut state = slot.state.lock();
        Some(f(&mut state))
    }

    pub fn get(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.slot(request_id).map(|slot| slot.state.lock().clone())
    }

    /// Fire the request's cancellation token. Idempotent; false if the
    /// request is no longer in flight.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        match self.slot(request_id) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.slots
            .remove(request_id)
            .map(|(_, slot)| slot.state.lock().clone())
    }

    /// Whether any in-flight request is waiting on `correlation_id`.
    pub fn awaits(&self, correlation_id: EnvelopeId) -> bool {
        let slots: Vec<Slot> = self.slots.iter().map(|slot| slot.value().clone()).collect();
        slots.iter().any(|slot| slot.state.lock().awaits(correlation_id))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
