//! Sequence-numbered publishing for scheduler notifications.
//!
//! The runner, the dispatcher and the command manager can each be handed a
//! clone of one emitter. Clones share a counter, so every envelope they
//! publish gets a slot in one total order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};

#[derive(Clone, Debug)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    next: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            next: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish `event` stamped with the next number, starting at 0.
    /// Returns how many subscribers received it.
    pub fn emit(&self, event: Event) -> usize {
        let number = self.next.fetch_add(1, Ordering::SeqCst);
        self.bus.publish(EventEnvelope::new(event).with_sequence(number))
    }

    /// Number the next envelope will carry; equals the count emitted so far.
    pub fn next_sequence(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// No-op when the owner was built without an emitter.
pub(crate) fn emit(emitter: &Option<OrderedEventEmitter>, event: Event) {
    if let Some(emitter) = emitter {
        emitter.emit(event);
    }
}
