//! Broadcast bus for scheduler notifications.
//!
//! The scheduler runs on one thread and never awaits, so besides the usual
//! async `recv` the bus offers [`EventBus::drain`] for frame loops that
//! collect everything published during a tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::types::EventEnvelope;

const DEFAULT_CAPACITY: usize = 1000;

/// Result of draining a receiver.
#[derive(Debug, Default)]
pub struct Drained {
    pub envelopes: Vec<EventEnvelope>,
    /// Envelopes lost because the receiver fell behind the channel capacity.
    pub skipped: u64,
}

/// Clonable notification bus. Clones publish into the same channel.
///
/// Publishing never blocks. With no subscribers the envelope is dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns how many subscribers the envelope reached.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Only envelopes published after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Take everything currently buffered for `receiver` without waiting.
    pub fn drain(receiver: &mut broadcast::Receiver<EventEnvelope>) -> Drained {
        let mut drained = Drained::default();
        loop {
            match receiver.try_recv() {
                Ok(envelope) => drained.envelopes.push(envelope),
                Err(TryRecvError::Lagged(skipped)) => drained.skipped += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        drained
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total envelopes published, including dropped ones.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    fn error_event(message: &str) -> EventEnvelope {
        EventEnvelope::new(Event::Error {
            message: message.to_string(),
            context: None,
        })
    }

    #[tokio::test]
    async fn test_async_recv_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        let envelope = error_event("boom");
        let id = envelope.id;
        assert_eq!(bus.publish(envelope), 2);

        assert_eq!(rx1.recv().await.unwrap().id, id);
        assert_eq!(rx2.recv().await.unwrap().id, id);
    }

    #[test]
    fn test_publish_without_subscribers_is_counted() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(error_event("lost")), 0);
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn test_drain_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(error_event("first"));
        bus.publish(error_event("second"));

        let drained = EventBus::drain(&mut rx);
        let messages: Vec<String> = drained
            .envelopes
            .into_iter()
            .filter_map(|envelope| match envelope.event {
                Event::Error { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(drained.skipped, 0);
        assert!(EventBus::drain(&mut rx).envelopes.is_empty());
    }

    #[test]
    fn test_drain_reports_lag() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(error_event(&i.to_string()));
        }

        let drained = EventBus::drain(&mut rx);
        assert_eq!(drained.skipped, 3);
        assert_eq!(drained.envelopes.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let bus = EventBus::with_capacity(0);
        let mut rx = bus.subscribe();
        bus.publish(error_event("only"));
        assert_eq!(EventBus::drain(&mut rx).envelopes.len(), 1);
    }
}
