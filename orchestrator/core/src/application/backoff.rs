// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Publish With Backoff
//!
//! `ChannelUnavailable` and `EnqueueTimeout` are transient: the publish is
//! retried with exponential backoff until it succeeds or the attempt budget
//! runs out. A closed transport is never retried.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Transient transport failure recovery

use tracing::{debug, warn};

use crate::domain::envelope::Envelope;
use crate::domain::node_config::BackoffPolicy;
use crate::domain::transport::{Channel, Transport, TransportError};

pub async fn publish_with_backoff(
    transport: &dyn Transport,
    channel: &Channel,
    envelope: Envelope,
    policy: &BackoffPolicy,
) -> Result<(), TransportError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match transport.publish(channel, envelope.clone()).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(channel = %channel, attempt, "Publish succeeded after retry");
                }
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    channel = %channel,
                    envelope_id = %envelope.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient publish failure: {}", e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
