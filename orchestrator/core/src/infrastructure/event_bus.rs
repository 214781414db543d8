// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Bus - Pub/Sub Transport for Envelopes
//
// Provides the in-process implementation of the `Transport` contract using
// one bounded tokio mpsc queue per subscriber.
//
// - Subscribers that are not listening when an envelope is published never
//   see it (at-most-once, no replay)
// - Envelopes are lost on restart; a durable log can be layered under the
//   `Transport` trait instead of this bus

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::domain::envelope::Envelope;
use crate::domain::node_config::TransportConfig;
use crate::domain::transport::{Channel, EnvelopeStream, Transport, TransportError};

/// Envelope bus for publishing to and subscribing on named channels
pub struct InMemoryBus {
    channels: DashMap<Channel, Vec<mpsc::Sender<Envelope>>>,
    capacity: usize,
    enqueue_timeout: Duration,
    closed: AtomicBool,
}

impl InMemoryBus {
    /// Create a bus whose subscriber queues hold `capacity` envelopes and
    /// whose publishes wait at most `enqueue_timeout` on a full queue
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            enqueue_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.channel_capacity, config.enqueue_timeout)
    }

    /// Create bus with default capacity (256) and enqueue timeout (100ms)
    pub fn with_defaults() -> Self {
        Self::from_config(&TransportConfig::default())
    }

    /// Take the fabric down. Every later publish/subscribe fails with
    /// `ChannelUnavailable` and every open stream ends.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .get(channel)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn prune(&self, channel: &Channel) {
        if let Some(mut senders) = self.channels.get_mut(channel) {
            senders.retain(|sender| !sender.is_closed());
        }
        self.channels.remove_if(channel, |_, senders| senders.is_empty());
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn publish(&self, channel: &Channel, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::ChannelUnavailable(channel.to_string()));
        }

        // Snapshot the senders so no map guard is held across an await
        let senders: Vec<mpsc::Sender<Envelope>> = match self.channels.get(channel) {
            Some(senders) => senders.clone(),
            None => {
                debug!(channel = %channel, envelope_id = %envelope.id, "No subscribers, envelope dropped");
                return Ok(());
            }
        };

        let timeout = self.enqueue_timeout;
        let results = join_all(
            senders
                .iter()
                .map(|sender| sender.send_timeout(envelope.clone(), timeout)),
        )
        .await;

        let mut delivered = 0usize;
        let mut timed_out = 0usize;
        let mut closed = 0usize;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => timed_out += 1,
                Err(SendTimeoutError::Closed(_)) => closed += 1,
            }
        }

        if closed > 0 {
            self.prune(channel);
        }

        metrics::counter!(
            "switchboard_transport_published_total",
            "message_type" => envelope.message_type.to_string()
        )
        .increment(1);

        if timed_out > 0 {
            warn!(
                channel = %channel,
                envelope_id = %envelope.id,
                delivered,
                timed_out,
                "Subscriber queue full past enqueue timeout"
            );
            if delivered == 0 {
                return Err(TransportError::EnqueueTimeout(channel.to_string()));
            }
        }

        debug!(channel = %channel, envelope_id = %envelope.id, delivered, "Published envelope");
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<EnvelopeStream, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::ChannelUnavailable(channel.to_string()));
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        self.channels.entry(channel.clone()).or_default().push(sender);
        debug!(channel = %channel, "Subscribed");

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use futures::StreamExt;
    use serde_json::json;

    fn command(n: u64) -> Envelope {
        Envelope::command(AgentId::new("director"), AgentId::new("mail-1"), json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_publish_subscribe_preserves_channel_order() {
        let bus = InMemoryBus::with_defaults();
        let inbox = Channel::inbox(&AgentId::new("mail-1"));
        let mut stream = bus.subscribe(&inbox).await.unwrap();

        for n in 0..10 {
            bus.publish(&inbox, command(n)).await.unwrap();
        }
        for n in 0..10 {
            let envelope = stream.next().await.unwrap();
            assert_eq!(envelope.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_envelopes() {
        let bus = InMemoryBus::with_defaults();
        let inbox = Channel::inbox(&AgentId::new("mail-1"));

        bus.publish(&inbox, command(1)).await.unwrap();
        let mut stream = bus.subscribe(&inbox).await.unwrap();
        bus.publish(&inbox, command(2)).await.unwrap();

        assert_eq!(stream.next().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy() {
        let bus = InMemoryBus::with_defaults();
        let mut first = bus.subscribe(&Channel::Broadcast).await.unwrap();
        let mut second = bus.subscribe(&Channel::Broadcast).await.unwrap();
        assert_eq!(bus.subscriber_count(&Channel::Broadcast), 2);

        bus.publish(&Channel::Broadcast, Envelope::event(AgentId::new("director"), json!({})))
            .await
            .unwrap();

        assert!(first.next().await.is_some());
        assert!(second.next().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let bus = InMemoryBus::with_defaults();
        let inbox = Channel::inbox(&AgentId::new("mail-1"));
        let stream = bus.subscribe(&inbox).await.unwrap();
        drop(stream);

        bus.publish(&inbox, command(1)).await.unwrap();
        assert_eq!(bus.subscriber_count(&inbox), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out() {
        let bus = InMemoryBus::new(1, Duration::from_millis(50));
        let inbox = Channel::inbox(&AgentId::new("mail-1"));
        let _stream = bus.subscribe(&inbox).await.unwrap();

        bus.publish(&inbox, command(1)).await.unwrap();
        let err = bus.publish(&inbox, command(2)).await.unwrap_err();
        assert_eq!(err, TransportError::EnqueueTimeout(inbox.to_string()));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_shutdown_makes_channels_unavailable() {
        let bus = InMemoryBus::with_defaults();
        let inbox = Channel::inbox(&AgentId::new("mail-1"));
        let mut stream = bus.subscribe(&inbox).await.unwrap();

        bus.shutdown();

        assert!(stream.next().await.is_none());
        assert!(matches!(
            bus.publish(&inbox, command(1)).await,
            Err(TransportError::ChannelUnavailable(_))
        ));
        assert!(bus.subscribe(&inbox).await.is_err());
    }
}
