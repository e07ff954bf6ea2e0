//! A single persistent relay connection.
//!
//! Each [`RelayConnection`] owns one background task that walks the state
//! machine
//!
//! ```text
//! Disconnected → Connecting → Connected → Reconnecting → Connecting ...
//! ```
//!
//! The task is the only owner of the socket. Callers talk to it through a
//! command channel and listen on a broadcast channel, so any number of
//! consumers can read the inbound envelopes independently. The set of active
//! subscriptions lives in the task and is replayed on every (re)connect.
//!
//! # Send policy
//!
//! - `REQ`/`CLOSE` are never dropped: they update the active set, which is
//!   sent when the socket is next open.
//! - `EVENT` publishes are not queued: while disconnected they resolve to
//!   [`PublishOutcome::NotConnected`], and publishes waiting for `OK` when
//!   the socket drops resolve to [`PublishOutcome::Cancelled`].
//! - Raw [`RelayConnection::send`] fails with [`RelayError::NotConnected`]
//!   unless connected.
//! - A publish whose caller stopped waiting is forgotten the next time a
//!   publish is sent, whether or not the relay ever answers.
//!
//! Shutdown is honoured while the handshake is still in progress, so a
//! removed relay never receives the subscriptions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RelayConfig;
use crate::nostr::{
    ClientMessage, Event, EventBuilder, EventId, Filter, KeyPair, MessageError, RelayMessage,
    SubscriptionId,
};
use crate::relay::backoff::Backoff;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::types::{ConnectionEvent, PublishOutcome, RelayConnectionStatus, RelayStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Checks a relay URL and returns its canonical form.
///
/// Only `ws` and `wss` are accepted. Host case and a trailing slash are
/// normalized, so `wss://Relay.example/` and `wss://relay.example` name the
/// same relay.
///
/// # Errors
///
/// Returns [`RelayError::InvalidUrl`] for unparseable URLs, other schemes or
/// URLs without a host.
pub fn normalize_url(url: &str) -> RelayResult<String> {
    let parsed = Url::parse(url.trim()).map_err(|e| RelayError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(RelayError::InvalidUrl(format!(
            "{url}: scheme must be ws or wss"
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(RelayError::InvalidUrl(format!("{url}: missing host")));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

enum Command {
    Subscribe {
        id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Unsubscribe(SubscriptionId),
    Publish {
        event: Box<Event>,
        reply: oneshot::Sender<PublishOutcome>,
    },
    Send(ClientMessage),
    Shutdown,
}

/// Handle to one relay connection.
///
/// Dropping the handle shuts the connection down.
pub struct RelayConnection {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Receiver<RelayConnectionStatus>,
}

impl RelayConnection {
    /// Starts connecting to `url` in the background and returns at once.
    ///
    /// Connection failures are retried with backoff and show up only as
    /// status changes. If `signer` is set, NIP-42 challenges are answered
    /// with it. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] if the URL is not a relay URL.
    pub fn connect(
        url: &str,
        config: RelayConfig,
        signer: Option<Arc<KeyPair>>,
    ) -> RelayResult<Self> {
        let url = normalize_url(url)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        let (state_tx, state) = watch::channel(RelayConnectionStatus {
            url: url.clone(),
            status: RelayStatus::Disconnected,
            last_connected: None,
        });

        let actor = Actor {
            url: url.clone(),
            backoff: Backoff::from_config(&config),
            config,
            signer,
            commands: command_rx,
            events: events.clone(),
            state: state_tx,
            subscriptions: BTreeMap::new(),
            pending: HashMap::new(),
            auth_event: None,
            auth_closed: BTreeSet::new(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            url,
            commands,
            events,
            state,
        })
    }

    /// Normalized relay URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RelayStatus {
        self.state.borrow().status
    }

    /// Status snapshot including the last connect time.
    #[must_use]
    pub fn connection_status(&self) -> RelayConnectionStatus {
        self.state.borrow().clone()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<RelayConnectionStatus> {
        self.state.clone()
    }

    /// New receiver for inbound envelopes and connection events, starting
    /// from the next one.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// [`RelayConnection::events`] as a stream. Ends when the connection
    /// task exits; messages missed by a lagging consumer are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = ConnectionEvent> + Send + 'static {
        let url = self.url.clone();
        futures::stream::unfold(self.events(), move |mut rx| {
            let url = url.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(relay = %url, skipped, "connection stream consumer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
    }

    /// Opens or replaces subscription `id`. Sent now if connected, and again
    /// after every reconnect until unsubscribed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Shutdown`] if the connection task has exited.
    pub fn subscribe(&self, id: SubscriptionId, filters: Vec<Filter>) -> RelayResult<()> {
        self.command(Command::Subscribe { id, filters })
    }

    /// Closes subscription `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Shutdown`] if the connection task has exited.
    pub fn unsubscribe(&self, id: SubscriptionId) -> RelayResult<()> {
        self.command(Command::Unsubscribe(id))
    }

    /// Sends `event` and waits for the relay's `OK`.
    ///
    /// Never fails; every way the publish can end is a [`PublishOutcome`].
    /// There is no timeout here, callers bound the wait.
    pub async fn publish(&self, event: &Event) -> PublishOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = Command::Publish {
            event: Box::new(event.clone()),
            reply,
        };
        if self.command(command).is_err() {
            return PublishOutcome::Cancelled;
        }
        outcome.await.unwrap_or(PublishOutcome::Cancelled)
    }

    /// Sends one raw envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] unless connected, or
    /// [`RelayError::Shutdown`] if the connection task has exited.
    pub fn send(&self, message: ClientMessage) -> RelayResult<()> {
        if !self.status().is_connected() {
            return Err(RelayError::NotConnected(self.url.clone()));
        }
        self.command(Command::Send(message))
    }

    /// Closes the socket and stops reconnecting. Pending publishes resolve
    /// to [`PublishOutcome::Cancelled`].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn command(&self, command: Command) -> RelayResult<()> {
        self.commands.send(command).map_err(|_| RelayError::Shutdown)
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

enum Offline {
    Elapsed,
    Shutdown,
}

enum Handshake {
    Open(Box<WsStream>),
    Failed(String),
    Shutdown,
}

struct Actor {
    url: String,
    config: RelayConfig,
    backoff: Backoff,
    signer: Option<Arc<KeyPair>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Sender<RelayConnectionStatus>,
    subscriptions: BTreeMap<SubscriptionId, Vec<Filter>>,
    pending: HashMap<EventId, Vec<oneshot::Sender<PublishOutcome>>>,
    auth_event: Option<EventId>,
    /// Subscriptions refused with `auth-required:` on this session.
    auth_closed: BTreeSet<SubscriptionId>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            self.set_status(RelayStatus::Connecting);
            debug!(relay = %self.url, "connecting");

            let reason = match self.open().await {
                Handshake::Shutdown => break,
                Handshake::Failed(reason) => reason,
                Handshake::Open(ws) => {
                    self.backoff.reset();
                    self.set_status(RelayStatus::Connected);
                    info!(
                        relay = %self.url,
                        subscriptions = self.subscriptions.len(),
                        "connected to relay"
                    );
                    let end = self.session(*ws).await;
                    self.cancel_pending();
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            let _ = self.events.send(ConnectionEvent::Lost {
                                reason: reason.clone(),
                            });
                            reason
                        }
                    }
                }
            };

            let Some(delay) = self.backoff.next_delay() else {
                warn!(relay = %self.url, %reason, "giving up on relay after max attempts");
                self.set_status(RelayStatus::Disconnected);
                self.idle_until_shutdown().await;
                break;
            };

            self.set_status(RelayStatus::Reconnecting);
            info!(
                relay = %self.url,
                %reason,
                delay_ms = delay.as_millis(),
                attempt = self.backoff.attempt(),
                "relay connection lost, reconnecting"
            );
            if matches!(self.wait_offline(delay).await, Offline::Shutdown) {
                break;
            }
        }

        self.cancel_pending();
        self.set_status(RelayStatus::Disconnected);
        debug!(relay = %self.url, "connection task exited");
    }

    /// Runs the handshake while still serving commands, so a shutdown
    /// during `Connecting` ends the task before anything is sent.
    async fn open(&mut self) -> Handshake {
        let handshake = timeout(self.config.connect_timeout, connect_async(self.url.clone()));
        tokio::pin!(handshake);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if !self.handle_offline(command) {
                        debug!(relay = %self.url, "shutdown during handshake");
                        return Handshake::Shutdown;
                    }
                }
                result = &mut handshake => {
                    return match result {
                        Ok(Ok((ws, _response))) => Handshake::Open(Box::new(ws)),
                        Ok(Err(e)) => Handshake::Failed(e.to_string()),
                        Err(_) => Handshake::Failed(format!(
                            "connect timed out after {}ms",
                            self.config.connect_timeout.as_millis()
                        )),
                    };
                }
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        self.auth_event = None;
        self.auth_closed.clear();

        if let Err(reason) = self.replay(&mut sink).await {
            return SessionEnd::Lost(reason);
        }
        let _ = self.events.send(ConnectionEvent::Connected);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    };
                    match self.handle_online(command, &mut sink).await {
                        Ok(true) => {}
                        Ok(false) => {
                            let _ = sink.close().await;
                            return SessionEnd::Shutdown;
                        }
                        Err(reason) => return SessionEnd::Lost(reason),
                    }
                }
                frame = stream.next() => {
                    if let Err(reason) = self.handle_frame(frame, &mut sink).await {
                        return SessionEnd::Lost(reason);
                    }
                }
            }
        }
    }

    async fn replay(&self, sink: &mut WsSink) -> Result<(), String> {
        for (id, filters) in &self.subscriptions {
            debug!(relay = %self.url, subscription = %id, "replaying subscription");
            write_req(sink, id, filters).await?;
        }
        Ok(())
    }

    /// Resends the subscriptions the relay refused before authentication.
    async fn resubscribe_after_auth(&mut self, sink: &mut WsSink) -> Result<(), String> {
        for id in std::mem::take(&mut self.auth_closed) {
            if let Some(filters) = self.subscriptions.get(&id) {
                debug!(relay = %self.url, subscription = %id, "resubscribing after auth");
                write_req(sink, &id, filters).await?;
            }
        }
        Ok(())
    }

    /// Drops waiters whose caller gave up, e.g. after a publish timeout.
    fn prune_pending(&mut self) {
        self.pending.retain(|_, waiters| {
            waiters.retain(|waiter| !waiter.is_closed());
            !waiters.is_empty()
        });
    }

    /// Returns `Ok(false)` on shutdown and `Err` when the socket failed.
    async fn handle_online(&mut self, command: Command, sink: &mut WsSink) -> Result<bool, String> {
        match command {
            Command::Subscribe { id, filters } => {
                let message = ClientMessage::Req {
                    subscription_id: id.clone(),
                    filters: filters.clone(),
                };
                self.subscriptions.insert(id, filters);
                write(sink, &message).await?;
            }
            Command::Unsubscribe(id) => {
                self.auth_closed.remove(&id);
                if self.subscriptions.remove(&id).is_some() {
                    write(sink, &ClientMessage::Close(id)).await?;
                }
            }
            Command::Publish { event, reply } => {
                self.prune_pending();
                let event_id = event.id();
                if let Err(reason) = write(sink, &ClientMessage::Event(event)).await {
                    let _ = reply.send(PublishOutcome::Cancelled);
                    return Err(reason);
                }
                self.pending.entry(event_id).or_default().push(reply);
            }
            Command::Send(message) => write(sink, &message).await?,
            Command::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        sink: &mut WsSink,
    ) -> Result<(), String> {
        match frame {
            None => Err("stream ended".to_string()),
            Some(Err(e)) => Err(e.to_string()),
            Some(Ok(Message::Close(frame))) => Err(frame.map_or_else(
                || "closed by relay".to_string(),
                |f| format!("closed by relay: {}", &*f.reason),
            )),
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), sink).await,
            // Pings are answered by tungstenite on the next write or read
            Some(Ok(_)) => Ok(()),
        }
    }

    async fn handle_text(&mut self, text: &str, sink: &mut WsSink) -> Result<(), String> {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(MessageError::UnknownType(kind)) => {
                debug!(relay = %self.url, %kind, "ignoring unknown envelope");
                return Ok(());
            }
            Err(e) => {
                warn!(relay = %self.url, error = %e, "ignoring malformed envelope");
                return Ok(());
            }
        };

        match &message {
            RelayMessage::Ok {
                event_id,
                accepted,
                message: reason,
            } => {
                if self.auth_event == Some(*event_id) {
                    self.auth_event = None;
                    if *accepted {
                        info!(relay = %self.url, "authenticated");
                        let _ = self.events.send(ConnectionEvent::Authenticated);
                        self.resubscribe_after_auth(sink).await?;
                    } else {
                        warn!(relay = %self.url, %reason, "authentication rejected");
                    }
                } else if let Some(waiters) = self.pending.remove(event_id) {
                    debug!(relay = %self.url, event = %event_id, accepted, "publish acknowledged");
                    for waiter in waiters {
                        let outcome = if *accepted {
                            PublishOutcome::Accepted {
                                message: reason.clone(),
                            }
                        } else {
                            PublishOutcome::Rejected {
                                message: reason.clone(),
                            }
                        };
                        let _ = waiter.send(outcome);
                    }
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message: reason,
            } if reason.starts_with("auth-required:") => {
                if self.subscriptions.contains_key(subscription_id) {
                    self.auth_closed.insert(subscription_id.clone());
                }
            }
            RelayMessage::Auth { challenge } => self.authenticate(challenge, sink).await?,
            RelayMessage::Notice(notice) => {
                info!(relay = %self.url, %notice, "relay notice");
            }
            _ => {}
        }

        let _ = self.events.send(ConnectionEvent::Message(message));
        Ok(())
    }

    async fn authenticate(&mut self, challenge: &str, sink: &mut WsSink) -> Result<(), String> {
        let Some(signer) = &self.signer else {
            debug!(relay = %self.url, "auth challenge received without a signer");
            return Ok(());
        };
        let event = match EventBuilder::auth(&self.url, challenge).sign(signer) {
            Ok(event) => event,
            Err(e) => {
                warn!(relay = %self.url, error = %e, "failed to sign auth event");
                return Ok(());
            }
        };
        self.auth_event = Some(event.id());
        write(sink, &ClientMessage::Auth(Box::new(event))).await
    }

    async fn wait_offline(&mut self, delay: std::time::Duration) -> Offline {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Offline::Elapsed,
                command = self.commands.recv() => {
                    if !self.handle_offline(command) {
                        return Offline::Shutdown;
                    }
                }
            }
        }
    }

    async fn idle_until_shutdown(&mut self) {
        loop {
            let command = self.commands.recv().await;
            if !self.handle_offline(command) {
                break;
            }
        }
    }

    /// Returns false when the task should exit.
    fn handle_offline(&mut self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Shutdown) => false,
            Some(Command::Subscribe { id, filters }) => {
                self.subscriptions.insert(id, filters);
                true
            }
            Some(Command::Unsubscribe(id)) => {
                self.auth_closed.remove(&id);
                self.subscriptions.remove(&id);
                true
            }
            Some(Command::Publish { event, reply }) => {
                debug!(relay = %self.url, event = %event.id(), "publish while disconnected");
                let _ = reply.send(PublishOutcome::NotConnected);
                true
            }
            Some(Command::Send(message)) => {
                debug!(relay = %self.url, kind = message.name(), "dropping envelope while disconnected");
                true
            }
        }
    }

    fn cancel_pending(&mut self) {
        for (event_id, waiters) in self.pending.drain() {
            debug!(relay = %self.url, event = %event_id, "publish cancelled");
            for waiter in waiters {
                let _ = waiter.send(PublishOutcome::Cancelled);
            }
        }
    }

    fn set_status(&self, status: RelayStatus) {
        self.state.send_if_modified(|state| {
            if state.status == status {
                return false;
            }
            state.status = status;
            if status == RelayStatus::Connected {
                state.last_connected = Some(Utc::now().timestamp());
            }
            true
        });
    }
}

async fn write_req(sink: &mut WsSink, id: &SubscriptionId, filters: &[Filter]) -> Result<(), String> {
    write(
        sink,
        &ClientMessage::Req {
            subscription_id: id.clone(),
            filters: filters.to_vec(),
        },
    )
    .await
}

async fn write(sink: &mut WsSink, message: &ClientMessage) -> Result<(), String> {
    let json = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::text(json)).await.map_err(|e| e.to_string())
}
