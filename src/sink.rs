//! Hand-off of refined events to the application.
//!
//! The core does not store anything. An [`EventSink`] receives each
//! refined event (with its references and contacts) and owns persistence,
//! deduplication against history and UI notification.
//! [`drain_into_sink`] wires a [`Subscription`] through a [`Refiner`] into a
//! sink.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::nostr::{Event, EventId};
use crate::refiner::{RefineError, RefinedEvent, Refiner};
use crate::relay::{Subscription, SubscriptionEvent};

/// Receiver of refined events.
pub trait EventSink: Send + Sync {
    /// Takes a refined event.
    fn accept(&self, event: RefinedEvent);

    /// Told about an event the refiner rejected.
    fn rejected(&self, event: &Event, reason: &RefineError) {
        let _ = (event, reason);
    }
}

/// When [`drain_into_sink`] stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainUntil {
    /// After the end of stored events.
    Eose,
    /// When the subscription stream ends.
    End,
}

/// Counts from one [`drain_into_sink`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Events handed to [`EventSink::accept`].
    pub accepted: usize,
    /// Events handed to [`EventSink::rejected`].
    pub rejected: usize,
}

/// Refines every event from `subscription` into `sink`.
pub async fn drain_into_sink(
    subscription: &mut Subscription,
    refiner: &Refiner,
    sink: &dyn EventSink,
    until: DrainUntil,
) -> DrainStats {
    let mut stats = DrainStats::default();
    while let Some(item) = subscription.recv().await {
        match item {
            SubscriptionEvent::Event { relay, event } => match refiner.refine(&event) {
                Ok(refined) => {
                    stats.accepted += 1;
                    sink.accept(refined);
                }
                Err(reason) => {
                    warn!(%relay, event = %event.id(), %reason, "event rejected by refiner");
                    stats.rejected += 1;
                    sink.rejected(&event, &reason);
                }
            },
            SubscriptionEvent::Eose { timed_out } => {
                debug!(subscription = %subscription.id(), timed_out, "end of stored events");
                if until == DrainUntil::Eose {
                    break;
                }
            }
            SubscriptionEvent::Closed { relay, message } => {
                debug!(subscription = %subscription.id(), %relay, %message, "relay closed subscription");
            }
        }
    }
    info!(
        subscription = %subscription.id(),
        accepted = stats.accepted,
        rejected = stats.rejected,
        "drained subscription"
    );
    stats
}

/// Sink that keeps everything in memory, first copy of each id wins.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seen: HashSet<EventId>,
    events: Vec<RefinedEvent>,
    rejected: Vec<(EventId, RefineError)>,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<RefinedEvent> {
        self.lock().events.clone()
    }

    /// Rejected event ids with their reasons.
    #[must_use]
    pub fn rejections(&self) -> Vec<(EventId, RefineError)> {
        self.lock().rejected.clone()
    }

    /// Number of accepted events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Returns true if nothing was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for MemorySink {
    fn accept(&self, event: RefinedEvent) {
        let mut state = self.lock();
        if state.seen.insert(event.event.id()) {
            state.events.push(event);
        }
    }

    fn rejected(&self, event: &Event, reason: &RefineError) {
        self.lock().rejected.push((event.id(), reason.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::{EventBuilder, KeyPair};

    #[test]
    fn memory_sink_keeps_first_copy() {
        let sink = MemorySink::new();
        let event = EventBuilder::text_note("once").sign(&KeyPair::generate().unwrap()).unwrap();
        let refined = Refiner::new().refine(&event).unwrap();
        sink.accept(refined.clone());
        sink.accept(refined);
        assert_eq!(sink.len(), 1);
        assert!(sink.rejections().is_empty());
    }

    #[test]
    fn memory_sink_records_rejections() {
        let sink = MemorySink::new();
        let event = EventBuilder::text_note("bad").sign(&KeyPair::generate().unwrap()).unwrap();
        sink.rejected(&event, &RefineError::InvalidSignature);
        assert!(sink.is_empty());
        assert_eq!(
            sink.rejections(),
            vec![(event.id(), RefineError::InvalidSignature)]
        );
    }
}
