//! Types for relay status, publish results and notifications.

use std::collections::HashMap;
use std::fmt;

use crate::nostr::{Event, EventId, RelayMessage, SubscriptionId};

/// Connection status for a relay.
///
/// ```text
/// Disconnected → Connecting → Connected → Reconnecting → Connecting ...
///                                  └──────────────────→ Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    /// Not connected and not trying to.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl RelayStatus {
    /// Returns true for [`RelayStatus::Connected`].
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Status of a single relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConnectionStatus {
    /// The relay URL.
    pub url: String,
    /// Current connection status.
    pub status: RelayStatus,
    /// Last time the relay connected (Unix timestamp).
    pub last_connected: Option<i64>,
}

/// What happened to an event sent to one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// `OK true`.
    Accepted {
        /// Relay message, usually empty.
        message: String,
    },
    /// `OK false`.
    Rejected {
        /// Reason given by the relay.
        message: String,
    },
    /// The relay was not connected; the event was not sent.
    NotConnected,
    /// No `OK` arrived in time.
    TimedOut,
    /// The connection went away while waiting for `OK`.
    Cancelled,
}

impl PublishOutcome {
    /// Returns true for [`PublishOutcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Result of publishing an event to relays.
///
/// Publishing succeeds when at least one relay accepted the event; every
/// relay's outcome is kept regardless.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// The event ID that was published.
    pub event_id: EventId,
    /// Outcome per relay URL.
    pub outcomes: HashMap<String, PublishOutcome>,
}

impl PublishResult {
    /// Returns true if at least one relay accepted the event.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.values().any(PublishOutcome::is_accepted)
    }

    /// Relays that accepted the event.
    #[must_use]
    pub fn accepted_by(&self) -> Vec<&str> {
        self.urls_where(|o| o.is_accepted())
    }

    /// Relays that rejected the event, with their reasons.
    #[must_use]
    pub fn rejected_by(&self) -> Vec<(&str, &str)> {
        let mut rejected: Vec<(&str, &str)> = self
            .outcomes
            .iter()
            .filter_map(|(url, outcome)| match outcome {
                PublishOutcome::Rejected { message } => Some((url.as_str(), message.as_str())),
                _ => None,
            })
            .collect();
        rejected.sort_unstable();
        rejected
    }

    /// Relays that never answered: not connected, timed out or cancelled.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.urls_where(|o| {
            matches!(
                o,
                PublishOutcome::NotConnected | PublishOutcome::TimedOut | PublishOutcome::Cancelled
            )
        })
    }

    /// Returns the number of successful relays.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_accepted()).count()
    }

    /// Returns the total number of relays attempted.
    #[must_use]
    pub fn total_attempted(&self) -> usize {
        self.outcomes.len()
    }

    fn urls_where(&self, keep: impl Fn(&PublishOutcome) -> bool) -> Vec<&str> {
        let mut urls: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|(_, outcome)| keep(outcome))
            .map(|(url, _)| url.as_str())
            .collect();
        urls.sort_unstable();
        urls
    }
}

/// Events broadcast by a single relay connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A decoded envelope, in arrival order.
    Message(RelayMessage),
    /// The socket is open and subscriptions have been replayed.
    Connected,
    /// The relay acknowledged our NIP-42 authentication.
    Authenticated,
    /// The socket went away; a reconnect follows unless shut down.
    Lost {
        /// What ended the session.
        reason: String,
    },
}

/// Item delivered on a [`Subscription`](super::Subscription).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// First arrival of an event across all targeted relays.
    Event {
        /// Relay the event came from.
        relay: String,
        /// The event.
        event: Box<Event>,
    },
    /// Every targeted relay reported end of stored events, or the timeout
    /// passed first.
    Eose {
        /// True if synthesized by the timeout.
        timed_out: bool,
    },
    /// A relay ended the subscription.
    Closed {
        /// Relay that closed it.
        relay: String,
        /// Reason given by the relay.
        message: String,
    },
}

/// Manager-wide notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A relay changed status.
    StatusChanged {
        /// Relay URL.
        url: String,
        /// New status.
        status: RelayStatus,
    },
    /// A relay sent `NOTICE`.
    Notice {
        /// Relay URL.
        url: String,
        /// Notice text.
        message: String,
    },
    /// A relay sent `CLOSED` for a subscription.
    Closed {
        /// Relay URL.
        url: String,
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Reason.
        message: String,
    },
    /// A relay sent an event that failed verification.
    InvalidEvent {
        /// Relay URL.
        url: String,
        /// Claimed event id.
        event_id: EventId,
        /// Why it was rejected.
        reason: String,
    },
    /// A relay accepted our authentication.
    Authenticated {
        /// Relay URL.
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcomes: &[(&str, PublishOutcome)]) -> PublishResult {
        PublishResult {
            event_id: EventId::from_bytes([0; 32]),
            outcomes: outcomes
                .iter()
                .map(|(url, o)| ((*url).to_string(), o.clone()))
                .collect(),
        }
    }

    #[test]
    fn publish_result_is_success_with_one_accept() {
        let result = result(&[
            (
                "wss://a",
                PublishOutcome::Accepted {
                    message: String::new(),
                },
            ),
            (
                "wss://b",
                PublishOutcome::Rejected {
                    message: "blocked".to_string(),
                },
            ),
            ("wss://c", PublishOutcome::TimedOut),
        ]);
        assert!(result.is_success());
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.total_attempted(), 3);
        assert_eq!(result.accepted_by(), vec!["wss://a"]);
        assert_eq!(result.rejected_by(), vec![("wss://b", "blocked")]);
        assert_eq!(result.failed(), vec!["wss://c"]);
    }

    #[test]
    fn publish_result_not_success_without_accept() {
        let result = result(&[
            ("wss://a", PublishOutcome::NotConnected),
            ("wss://b", PublishOutcome::Cancelled),
        ]);
        assert!(!result.is_success());
        assert_eq!(result.failed(), vec!["wss://a", "wss://b"]);
    }

    #[test]
    fn empty_publish_result_is_not_success() {
        assert!(!result(&[]).is_success());
    }

    #[test]
    fn relay_status_display() {
        assert_eq!(RelayStatus::Reconnecting.to_string(), "reconnecting");
        assert!(RelayStatus::Connected.is_connected());
        assert!(!RelayStatus::Connecting.is_connected());
    }
}
