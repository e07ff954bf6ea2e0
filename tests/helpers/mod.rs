//! In-process mock relay for integration tests.
//!
//! Each [`MockRelay`] listens on `127.0.0.1:0` and speaks enough of the
//! relay protocol for the client to be exercised end to end: it answers
//! `REQ` with matching stored events and `EOSE`, acknowledges publishes
//! with `OK`, optionally demands NIP-42 authentication and can drop every
//! open connection on request. Setters switch on misbehaviour: slow
//! handshakes, missing `EOSE` or `OK`, and subscriptions refused with
//! `CLOSED`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use ostrich_core::config::{ManagerConfig, RelayConfig};
use ostrich_core::nostr::{ClientMessage, Event, Filter, Kind, RelayMessage, SubscriptionId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Manager settings with short timeouts and no jitter.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        relay: RelayConfig {
            connect_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(200),
            jitter: 0.0,
            ..RelayConfig::default()
        },
        eose_timeout: Duration::from_secs(3),
        publish_timeout: Duration::from_secs(2),
        verify_signatures: true,
    }
}

#[derive(Default)]
struct MockState {
    stored: Mutex<Vec<Event>>,
    reqs: Mutex<Vec<SubscriptionId>>,
    closes: Mutex<Vec<SubscriptionId>>,
    published: Mutex<Vec<Event>>,
    reject: Mutex<Option<String>>,
    ignore_publishes: AtomicBool,
    withhold_eose: AtomicBool,
    close_reason: Mutex<Option<String>>,
    handshake_delay: Mutex<Option<Duration>>,
    protected: Mutex<Option<(Kind, String)>>,
    challenge: Option<String>,
    authenticated: AtomicBool,
    connections: AtomicUsize,
}

/// A relay running inside the test process.
pub struct MockRelay {
    /// `ws://` URL of the relay.
    pub url: String,
    state: Arc<MockState>,
    kill: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockRelay {
    /// Starts a relay that stores `events`.
    pub async fn start(events: Vec<Event>) -> Self {
        Self::spawn(events, None).await
    }

    /// Starts a relay that answers every connection with `["AUTH", challenge]`
    /// and refuses subscriptions until authenticated.
    pub async fn with_auth(events: Vec<Event>, challenge: &str) -> Self {
        Self::spawn(events, Some(challenge.to_string())).await
    }

    async fn spawn(events: Vec<Event>, challenge: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock relay");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        let state = Arc::new(MockState {
            stored: Mutex::new(events),
            challenge,
            ..MockState::default()
        });
        let (kill, _) = broadcast::channel(4);

        let task = {
            let state = Arc::clone(&state);
            let kill = kill.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&state), kill.subscribe()));
                }
            })
        };

        Self {
            url,
            state,
            kill,
            task,
        }
    }

    /// Makes every later publish fail with `OK false` and `message`.
    pub fn reject_publishes(&self, message: &str) {
        *self.state.reject.lock().unwrap() = Some(message.to_string());
    }

    /// Accepts later publishes without ever answering `OK`.
    pub fn ignore_publishes(&self) {
        self.state.ignore_publishes.store(true, Ordering::SeqCst);
    }

    /// Serves stored events but never sends `EOSE`.
    pub fn withhold_eose(&self) {
        self.state.withhold_eose.store(true, Ordering::SeqCst);
    }

    /// Answers every later `REQ` with `CLOSED` and `reason`.
    pub fn close_subscriptions(&self, reason: &str) {
        *self.state.close_reason.lock().unwrap() = Some(reason.to_string());
    }

    /// Waits `delay` before completing each WebSocket handshake.
    pub fn delay_handshakes(&self, delay: Duration) {
        *self.state.handshake_delay.lock().unwrap() = Some(delay);
    }

    /// Requires authentication only for `REQ`s asking for `kind`, sending
    /// the challenge when such a `REQ` is refused.
    pub fn protect_kind(&self, kind: Kind, challenge: &str) {
        *self.state.protected.lock().unwrap() = Some((kind, challenge.to_string()));
    }

    /// Drops every open connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// Subscription ids of every `REQ` received, in order.
    pub fn reqs(&self) -> Vec<SubscriptionId> {
        self.state.reqs.lock().unwrap().clone()
    }

    /// Subscription ids of every `CLOSE` received, in order.
    pub fn closes(&self) -> Vec<SubscriptionId> {
        self.state.closes.lock().unwrap().clone()
    }

    /// Events received through `EVENT`.
    pub fn published(&self) -> Vec<Event> {
        self.state.published.lock().unwrap().clone()
    }

    /// Number of WebSocket handshakes completed.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Whether a client authenticated.
    pub fn authenticated(&self) -> bool {
        self.state.authenticated.load(Ordering::SeqCst)
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.kill.send(());
    }
}

async fn send(sink: &mut Sink, message: RelayMessage) -> bool {
    let json = message.to_json().expect("encode relay message");
    sink.send(Message::text(json)).await.is_ok()
}

async fn serve(stream: TcpStream, state: Arc<MockState>, mut kill: broadcast::Receiver<()>) {
    let delay = *state.handshake_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut source) = ws.split();

    let mut authenticated = false;
    if let Some(challenge) = &state.challenge {
        let challenge = challenge.clone();
        if !send(&mut sink, RelayMessage::Auth { challenge }).await {
            return;
        }
    }

    loop {
        let text = tokio::select! {
            _ = kill.recv() => return,
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => continue,
            },
        };
        let Ok(message) = ClientMessage::from_json(&text) else {
            let notice = RelayMessage::Notice("could not parse message".to_string());
            if !send(&mut sink, notice).await {
                return;
            }
            continue;
        };

        let replies = handle(&state, &mut authenticated, message);
        for reply in replies {
            if !send(&mut sink, reply).await {
                return;
            }
        }
    }
}

fn handle(state: &MockState, authenticated: &mut bool, message: ClientMessage) -> Vec<RelayMessage> {
    match message {
        ClientMessage::Req {
            subscription_id,
            filters,
        } => {
            state.reqs.lock().unwrap().push(subscription_id.clone());
            if let Some(reason) = state.close_reason.lock().unwrap().clone() {
                return vec![RelayMessage::Closed {
                    subscription_id,
                    message: reason,
                }];
            }
            let protected = state.protected.lock().unwrap().clone();
            let wants_protected = protected
                .as_ref()
                .is_some_and(|(kind, _)| filters.iter().any(|f| f.kinds.contains(kind)));
            if !*authenticated && (state.challenge.is_some() || wants_protected) {
                let mut replies = Vec::new();
                if wants_protected {
                    if let Some((_, challenge)) = protected {
                        replies.push(RelayMessage::Auth { challenge });
                    }
                }
                replies.push(RelayMessage::Closed {
                    subscription_id,
                    message: "auth-required: authenticate first".to_string(),
                });
                return replies;
            }
            let mut replies: Vec<RelayMessage> = state
                .stored
                .lock()
                .unwrap()
                .iter()
                .filter(|event| filters.iter().any(|f: &Filter| f.matches(event)))
                .map(|event| RelayMessage::Event {
                    subscription_id: subscription_id.clone(),
                    event: Box::new(event.clone()),
                })
                .collect();
            if !state.withhold_eose.load(Ordering::SeqCst) {
                replies.push(RelayMessage::Eose(subscription_id));
            }
            replies
        }
        ClientMessage::Close(id) => {
            state.closes.lock().unwrap().push(id);
            Vec::new()
        }
        ClientMessage::Event(event) => {
            state.published.lock().unwrap().push((*event).clone());
            if state.ignore_publishes.load(Ordering::SeqCst) {
                return Vec::new();
            }
            let reject = state.reject.lock().unwrap().clone();
            vec![RelayMessage::Ok {
                event_id: event.id(),
                accepted: reject.is_none(),
                message: reject.unwrap_or_default(),
            }]
        }
        ClientMessage::Auth(event) => {
            let expected = state.challenge.clone().or_else(|| {
                state
                    .protected
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|(_, challenge)| challenge.clone())
            });
            let accepted = event.verify().is_ok()
                && event.kind() == Kind::CLIENT_AUTH
                && event.tag_value("challenge") == expected.as_deref();
            if accepted {
                *authenticated = true;
                state.authenticated.store(true, Ordering::SeqCst);
            }
            vec![RelayMessage::Ok {
                event_id: event.id(),
                accepted,
                message: if accepted {
                    String::new()
                } else {
                    "auth-required: bad challenge".to_string()
                },
            }]
        }
        ClientMessage::Count { .. } => Vec::new(),
    }
}
