//! Relay manager: the set of connections and the subscriptions across them.
//!
//! The manager owns every [`RelayConnection`] and runs one forwarder task per
//! relay that reads the connection's broadcast and feeds merged
//! subscriptions. Inbound events are verified, deduplicated by id per
//! subscription (first arrival wins) and delivered in per-relay order.
//! There is no ordering across relays.
//!
//! # Architecture
//!
//! ```text
//!  RelayConnection A ──broadcast──▶ forwarder A ─┐
//!  RelayConnection B ──broadcast──▶ forwarder B ─┼─▶ SubscriptionState ─▶ Subscription
//!  RelayConnection C ──broadcast──▶ forwarder C ─┘    (dedup, EOSE)
//! ```
//!
//! The manager is an ordinary value: construct one per application and
//! hand clones to whoever needs it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::nostr::{Event, EventBuilder, Filter, KeyPair, RelayMessage, SubscriptionId};
use crate::relay::connection::{normalize_url, RelayConnection};
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::subscription::{Subscription, SubscriptionState};
use crate::relay::types::{
    ConnectionEvent, Notification, PublishOutcome, PublishResult, RelayConnectionStatus,
    RelayStatus, SubscriptionEvent,
};

const NOTIFICATION_CAPACITY: usize = 256;

// Lock order: `relays` before `subscriptions`. Both are held together
// whenever a relay or a subscription is added, so every relay and
// all-relays subscription pair is wired up exactly once.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Manages relay connections and multiplexed subscriptions.
///
/// # Example
///
/// ```no_run
/// use ostrich_core::config::ManagerConfig;
/// use ostrich_core::nostr::{Filter, Kind};
/// use ostrich_core::relay::RelayManager;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = RelayManager::new(ManagerConfig::default());
/// manager.add_relay("wss://relay.damus.io")?;
/// manager.add_relay("wss://nos.lol")?;
///
/// let mut notes = manager.subscribe(vec![Filter::new().kind(Kind::TEXT_NOTE).limit(20)])?;
/// for event in notes.stored_events().await {
///     println!("{}: {}", event.pubkey(), event.content());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RelayManager {
    inner: Arc<Inner>,
}

struct RelayEntry {
    connection: Arc<RelayConnection>,
    forwarder: JoinHandle<()>,
}

pub(crate) struct Inner {
    config: ManagerConfig,
    signer: Option<Arc<KeyPair>>,
    relays: Mutex<HashMap<String, RelayEntry>>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionState>>,
    generation: AtomicU64,
    urls: watch::Sender<Vec<String>>,
    connectivity: watch::Sender<f64>,
    notifications: broadcast::Sender<Notification>,
}

impl RelayManager {
    /// Creates a manager with no relays and no signing key.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a manager that answers NIP-42 challenges and signs events
    /// with `keypair`.
    #[must_use]
    pub fn with_signer(config: ManagerConfig, keypair: KeyPair) -> Self {
        Self::build(config, Some(Arc::new(keypair)))
    }

    fn build(config: ManagerConfig, signer: Option<Arc<KeyPair>>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                signer,
                relays: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                urls: watch::Sender::new(Vec::new()),
                connectivity: watch::Sender::new(0.0),
                notifications,
            }),
        }
    }

    /// Adds a relay and starts connecting to it. Subscriptions opened for
    /// all relays are extended to it. Adding a known relay is a no-op.
    ///
    /// Returns the normalized URL.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] for anything but a `ws`/`wss` URL.
    pub fn add_relay(&self, url: &str) -> RelayResult<String> {
        let url = normalize_url(url)?;
        {
            let mut relays = lock(&self.inner.relays);
            if relays.contains_key(&url) {
                return Ok(url);
            }
            let connection = Arc::new(RelayConnection::connect(
                &url,
                self.inner.config.relay.clone(),
                self.inner.signer.clone(),
            )?);
            let forwarder = tokio::spawn(forward(
                Arc::downgrade(&self.inner),
                url.clone(),
                connection.events(),
                connection.watch_status(),
            ));
            relays.insert(
                url.clone(),
                RelayEntry {
                    connection: Arc::clone(&connection),
                    forwarder,
                },
            );

            let mut subscriptions = lock(&self.inner.subscriptions);
            for (id, state) in subscriptions.iter_mut().filter(|(_, s)| s.all_relays) {
                state.relays.insert(url.clone());
                if !state.eose_sent {
                    state.eose_pending.insert(url.clone());
                }
                let _ = connection.subscribe(id.clone(), state.filters.clone());
            }
        }

        info!(relay = %url, "relay added");
        self.inner.publish_urls();
        self.inner.refresh_connectivity();
        Ok(url)
    }

    /// Disconnects and forgets a relay. Its events stop reaching every
    /// subscription at once; other relays are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownRelay`] if the relay is not managed.
    pub fn remove_relay(&self, url: &str) -> RelayResult<()> {
        let url = normalize_url(url)?;
        let entry = lock(&self.inner.relays)
            .remove(&url)
            .ok_or_else(|| RelayError::UnknownRelay(url.clone()))?;
        entry.forwarder.abort();
        entry.connection.shutdown();

        for state in lock(&self.inner.subscriptions).values_mut() {
            state.drop_relay(&url);
        }

        info!(relay = %url, "relay removed");
        self.inner.publish_urls();
        self.inner.refresh_connectivity();
        self.inner.notify(Notification::StatusChanged {
            url,
            status: RelayStatus::Disconnected,
        });
        Ok(())
    }

    /// Subscribes on every relay with a generated id.
    ///
    /// # Errors
    ///
    /// See [`RelayManager::subscribe_with`].
    pub fn subscribe(&self, filters: Vec<Filter>) -> RelayResult<Subscription> {
        self.subscribe_with(SubscriptionId::generate(), filters, None)
    }

    /// Subscribes on the given relays only, with a generated id.
    ///
    /// # Errors
    ///
    /// See [`RelayManager::subscribe_with`].
    pub fn subscribe_to(&self, filters: Vec<Filter>, relays: &[String]) -> RelayResult<Subscription> {
        self.subscribe_with(SubscriptionId::generate(), filters, Some(relays))
    }

    /// Opens subscription `id` on `relays`, or on every relay (including
    /// ones added later) when `relays` is `None`.
    ///
    /// Reusing the id of an open subscription replaces it: the old handle's
    /// stream ends and relays no longer targeted receive `CLOSE`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Subscription`] without filters,
    /// [`RelayError::UnknownRelay`] for a relay not in the manager and
    /// [`RelayError::NoRelays`] if nothing is targeted.
    pub fn subscribe_with(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
        relays: Option<&[String]>,
    ) -> RelayResult<Subscription> {
        if filters.is_empty() {
            return Err(RelayError::Subscription(
                "at least one filter is required".to_string(),
            ));
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::unbounded_channel();

        let (targets, target_urls, replaced) = {
            let all = lock(&self.inner.relays);
            let targets = select_targets(&all, relays)?;
            let target_urls: HashSet<String> =
                targets.iter().map(|(url, _)| url.clone()).collect();
            let replaced = lock(&self.inner.subscriptions).insert(
                id.clone(),
                SubscriptionState {
                    filters: filters.clone(),
                    relays: target_urls.clone(),
                    all_relays: relays.is_none(),
                    eose_pending: target_urls.clone(),
                    eose_sent: false,
                    seen: HashSet::new(),
                    generation,
                    sender,
                },
            );
            (targets, target_urls, replaced)
        };
        if let Some(replaced) = replaced {
            debug!(subscription = %id, "replacing subscription");
            for url in replaced.relays.difference(&target_urls) {
                if let Some(connection) = self.inner.connection(url) {
                    let _ = connection.unsubscribe(id.clone());
                }
            }
        }

        for (url, connection) in &targets {
            if connection.subscribe(id.clone(), filters.clone()).is_err() {
                warn!(relay = %url, subscription = %id, "connection gone while subscribing");
            }
        }

        self.spawn_eose_timer(id.clone(), generation);
        info!(
            subscription = %id,
            relays = targets.len(),
            filters = filters.len(),
            "subscription opened"
        );

        Ok(Subscription {
            id,
            generation,
            events,
            manager: Arc::downgrade(&self.inner),
        })
    }

    /// Closes subscription `id`. Returns false if it was not open.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.release(id, None)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    /// Publishes to every relay.
    ///
    /// # Errors
    ///
    /// See [`RelayManager::publish_to`].
    pub async fn publish(&self, event: &Event) -> RelayResult<PublishResult> {
        self.publish_to(event, None).await
    }

    /// Sends `event` to `relays` (or all) in parallel and waits for every
    /// relay's outcome, bounded by the publish timeout.
    ///
    /// The call never fails because of a relay: unreachable, slow and
    /// rejecting relays are reported in the result.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownRelay`] or [`RelayError::NoRelays`] if
    /// the target set is invalid or empty.
    pub async fn publish_to(
        &self,
        event: &Event,
        relays: Option<&[String]>,
    ) -> RelayResult<PublishResult> {
        let targets = self.inner.targets(relays)?;
        let wait = self.inner.config.publish_timeout;

        let outcomes = join_all(targets.into_iter().map(|(url, connection)| async move {
            let outcome = timeout(wait, connection.publish(event))
                .await
                .unwrap_or(PublishOutcome::TimedOut);
            (url, outcome)
        }))
        .await;

        let result = PublishResult {
            event_id: event.id(),
            outcomes: outcomes.into_iter().collect(),
        };
        info!(
            event = %event.id(),
            accepted = result.success_count(),
            relays = result.total_attempted(),
            "event published"
        );
        for (url, reason) in result.rejected_by() {
            warn!(relay = %url, event = %event.id(), %reason, "event rejected");
        }
        Ok(result)
    }

    /// Signs `builder` with the manager's key and publishes the event.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoSigner`] without a key, a signing error, or
    /// an error from [`RelayManager::publish`].
    pub async fn sign_and_publish(
        &self,
        builder: EventBuilder,
    ) -> RelayResult<(Event, PublishResult)> {
        let signer = self.inner.signer.as_ref().ok_or(RelayError::NoSigner)?;
        let event = builder.sign(signer)?;
        let result = self.publish(&event).await?;
        Ok((event, result))
    }

    /// Configured relay URLs, sorted.
    #[must_use]
    pub fn relay_urls(&self) -> Vec<String> {
        self.inner.urls.borrow().clone()
    }

    /// Receiver that observes every change to the relay set.
    #[must_use]
    pub fn watch_relay_urls(&self) -> watch::Receiver<Vec<String>> {
        self.inner.urls.subscribe()
    }

    /// Fraction of configured relays currently connected, `0.0` without
    /// relays.
    #[must_use]
    pub fn connectivity(&self) -> f64 {
        *self.inner.connectivity.borrow()
    }

    /// Receiver that observes the connectivity ratio.
    #[must_use]
    pub fn watch_connectivity(&self) -> watch::Receiver<f64> {
        self.inner.connectivity.subscribe()
    }

    /// Status of one relay.
    #[must_use]
    pub fn relay_status(&self, url: &str) -> Option<RelayConnectionStatus> {
        let url = normalize_url(url).ok()?;
        self.inner.connection(&url).map(|c| c.connection_status())
    }

    /// Status of every relay, sorted by URL.
    #[must_use]
    pub fn relay_statuses(&self) -> Vec<RelayConnectionStatus> {
        let mut statuses: Vec<RelayConnectionStatus> = lock(&self.inner.relays)
            .values()
            .map(|entry| entry.connection.connection_status())
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    /// Waits until `url` is connected.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownRelay`] or [`RelayError::Timeout`].
    pub async fn wait_connected(&self, url: &str, wait: Duration) -> RelayResult<()> {
        let url = normalize_url(url)?;
        let mut status = self
            .inner
            .connection(&url)
            .ok_or_else(|| RelayError::UnknownRelay(url.clone()))?
            .watch_status();
        timeout(wait, status.wait_for(|s| s.status.is_connected()))
            .await
            .map_err(|_| RelayError::Timeout(format!("connecting to {url}")))?
            .map_err(|_| RelayError::Shutdown)?;
        Ok(())
    }

    /// Receiver for manager-wide notifications.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Disconnects every relay and ends every subscription stream.
    pub fn shutdown(&self) {
        let relays: Vec<(String, RelayEntry)> = lock(&self.inner.relays).drain().collect();
        for (url, entry) in relays {
            entry.forwarder.abort();
            entry.connection.shutdown();
            debug!(relay = %url, "relay shut down");
        }
        lock(&self.inner.subscriptions).clear();
        self.inner.publish_urls();
        self.inner.refresh_connectivity();
        info!("relay manager shut down");
    }

    fn spawn_eose_timer(&self, id: SubscriptionId, generation: u64) {
        let manager = Arc::downgrade(&self.inner);
        let wait = self.inner.config.eose_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(inner) = manager.upgrade() else {
                return;
            };
            let mut subscriptions = lock(&inner.subscriptions);
            let Some(state) = subscriptions.get_mut(&id) else {
                return;
            };
            if state.generation == generation && !state.eose_sent {
                state.eose_sent = true;
                warn!(
                    subscription = %id,
                    pending = state.eose_pending.len(),
                    "EOSE timeout, synthesizing end of stored events"
                );
                let _ = state.sender.send(SubscriptionEvent::Eose { timed_out: true });
            }
        });
    }
}

impl std::fmt::Debug for RelayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayManager")
            .field("relays", &self.relay_urls())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn connection(&self, url: &str) -> Option<Arc<RelayConnection>> {
        lock(&self.relays)
            .get(url)
            .map(|entry| Arc::clone(&entry.connection))
    }

    fn targets(&self, relays: Option<&[String]>) -> RelayResult<Vec<(String, Arc<RelayConnection>)>> {
        select_targets(&lock(&self.relays), relays)
    }

    /// Removes subscription `id` if its generation matches and sends `CLOSE`
    /// to its relays. Returns true if something was removed.
    pub(crate) fn release(&self, id: &SubscriptionId, generation: Option<u64>) -> bool {
        let state = {
            let mut subscriptions = lock(&self.subscriptions);
            match subscriptions.get(id) {
                Some(state) if generation.is_none_or(|g| g == state.generation) => {
                    subscriptions.remove(id)
                }
                _ => None,
            }
        };
        let Some(state) = state else {
            return false;
        };
        for url in &state.relays {
            if let Some(connection) = self.connection(url) {
                let _ = connection.unsubscribe(id.clone());
            }
        }
        debug!(subscription = %id, seen = state.seen.len(), "subscription closed");
        true
    }

    fn publish_urls(&self) {
        let mut urls: Vec<String> = lock(&self.relays).keys().cloned().collect();
        urls.sort();
        self.urls.send_if_modified(|current| {
            if *current == urls {
                return false;
            }
            *current = urls;
            true
        });
    }

    fn refresh_connectivity(&self) {
        let ratio = {
            let relays = lock(&self.relays);
            if relays.is_empty() {
                0.0
            } else {
                let connected = relays
                    .values()
                    .filter(|entry| entry.connection.status().is_connected())
                    .count();
                #[allow(clippy::cast_precision_loss)]
                let ratio = connected as f64 / relays.len() as f64;
                ratio
            }
        };
        self.connectivity.send_replace(ratio);
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    fn on_status(&self, url: &str, status: RelayStatus) {
        debug!(relay = %url, %status, "relay status changed");
        self.refresh_connectivity();
        self.notify(Notification::StatusChanged {
            url: url.to_string(),
            status,
        });
    }

    fn on_message(&self, url: &str, message: RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.on_event(url, &subscription_id, event),
            RelayMessage::Eose(subscription_id) => {
                if let Some(state) = lock(&self.subscriptions).get_mut(&subscription_id) {
                    state.eose_pending.remove(url);
                    state.finish_eose_if_ready();
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(relay = %url, subscription = %subscription_id, %message, "subscription closed by relay");
                // Resent by the connection once authenticated
                if !message.starts_with("auth-required:") {
                    if let Some(state) = lock(&self.subscriptions).get_mut(&subscription_id) {
                        let _ = state.sender.send(SubscriptionEvent::Closed {
                            relay: url.to_string(),
                            message: message.clone(),
                        });
                        state.drop_relay(url);
                    }
                }
                self.notify(Notification::Closed {
                    url: url.to_string(),
                    subscription_id,
                    message,
                });
            }
            RelayMessage::Notice(message) => self.notify(Notification::Notice {
                url: url.to_string(),
                message,
            }),
            _ => {}
        }
    }

    fn on_event(&self, url: &str, subscription_id: &SubscriptionId, event: Box<Event>) {
        let id = event.id();
        {
            let subscriptions = lock(&self.subscriptions);
            let Some(state) = subscriptions.get(subscription_id) else {
                debug!(relay = %url, subscription = %subscription_id, "event for unknown subscription");
                return;
            };
            if !state.relays.contains(url) || state.seen.contains(&id) {
                return;
            }
        }

        if self.config.verify_signatures {
            if let Err(e) = event.verify() {
                warn!(relay = %url, event = %id, error = %e, "dropping invalid event");
                self.notify(Notification::InvalidEvent {
                    url: url.to_string(),
                    event_id: id,
                    reason: e.to_string(),
                });
                return;
            }
        }

        if let Some(state) = lock(&self.subscriptions).get_mut(subscription_id) {
            if state.seen.insert(id) {
                let _ = state.sender.send(SubscriptionEvent::Event {
                    relay: url.to_string(),
                    event,
                });
            }
        }
    }
}

fn select_targets(
    all: &HashMap<String, RelayEntry>,
    relays: Option<&[String]>,
) -> RelayResult<Vec<(String, Arc<RelayConnection>)>> {
    let targets: Vec<(String, Arc<RelayConnection>)> = match relays {
        None => all
            .iter()
            .map(|(url, entry)| (url.clone(), Arc::clone(&entry.connection)))
            .collect(),
        Some(urls) => {
            let mut targets = Vec::with_capacity(urls.len());
            for url in urls {
                let url = normalize_url(url)?;
                let entry = all
                    .get(&url)
                    .ok_or_else(|| RelayError::UnknownRelay(url.clone()))?;
                if !targets.iter().any(|(known, _)| known == &url) {
                    targets.push((url, Arc::clone(&entry.connection)));
                }
            }
            targets
        }
    };
    if targets.is_empty() {
        return Err(RelayError::NoRelays);
    }
    Ok(targets)
}

async fn forward(
    manager: Weak<Inner>,
    url: String,
    mut events: broadcast::Receiver<ConnectionEvent>,
    mut status: watch::Receiver<RelayConnectionStatus>,
) {
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().status;
                let Some(inner) = manager.upgrade() else { break };
                inner.on_status(&url, current);
            }
            event = events.recv() => {
                let Some(inner) = manager.upgrade() else { break };
                match event {
                    Ok(ConnectionEvent::Message(message)) => inner.on_message(&url, message),
                    Ok(ConnectionEvent::Authenticated) => {
                        inner.notify(Notification::Authenticated { url: url.clone() });
                    }
                    Ok(ConnectionEvent::Connected | ConnectionEvent::Lost { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(relay = %url, skipped, "forwarder lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(relay = %url, "forwarder exited");
}
