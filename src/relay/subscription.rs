//! Merged subscriptions across relays.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::nostr::{Event, EventId, Filter, SubscriptionId};
use crate::relay::manager::Inner;
use crate::relay::types::SubscriptionEvent;

/// Manager-side state of one logical subscription.
pub(crate) struct SubscriptionState {
    pub(crate) filters: Vec<Filter>,
    /// Relays the REQ was sent to.
    pub(crate) relays: HashSet<String>,
    /// Follows relays added to the manager later.
    pub(crate) all_relays: bool,
    /// Targeted relays that have not sent EOSE yet.
    pub(crate) eose_pending: HashSet<String>,
    pub(crate) eose_sent: bool,
    /// Ids already delivered; released with the subscription.
    pub(crate) seen: HashSet<EventId>,
    pub(crate) generation: u64,
    pub(crate) sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionState {
    /// Emits the aggregated EOSE once no targeted relay is outstanding.
    pub(crate) fn finish_eose_if_ready(&mut self) {
        if !self.eose_sent && self.eose_pending.is_empty() {
            self.eose_sent = true;
            let _ = self.sender.send(SubscriptionEvent::Eose { timed_out: false });
        }
    }

    /// Records `relay` as no longer part of the subscription.
    pub(crate) fn drop_relay(&mut self, relay: &str) {
        self.relays.remove(relay);
        self.eose_pending.remove(relay);
        self.finish_eose_if_ready();
    }
}

/// A live subscription returned by
/// [`RelayManager::subscribe`](super::RelayManager::subscribe).
///
/// Yields each distinct event once, whichever relay delivers it first, then
/// a single [`SubscriptionEvent::Eose`]. The id stays the same across
/// reconnects. Dropping the handle closes the subscription on every relay
/// and frees its deduplication state.
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) generation: u64,
    pub(crate) events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    pub(crate) manager: Weak<Inner>,
}

impl Subscription {
    /// Subscription id used on every relay.
    #[must_use]
    pub const fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Next item, or `None` once the subscription was replaced, closed or
    /// the manager shut down.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Next event, skipping EOSE and CLOSED markers.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let SubscriptionEvent::Event { event, .. } = self.recv().await? {
                return Some(*event);
            }
        }
    }

    /// Collects events until the aggregated EOSE.
    pub async fn stored_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(item) = self.recv().await {
            match item {
                SubscriptionEvent::Event { event, .. } => events.push(*event),
                SubscriptionEvent::Eose { .. } => break,
                SubscriptionEvent::Closed { .. } => {}
            }
        }
        events
    }

    /// Closes the subscription.
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(&self.id, Some(self.generation));
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
