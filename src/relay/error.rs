//! Error types for relay operations.
//!
//! Transport failures never show up here: a dropped socket becomes a
//! status change and a reconnect, and a publish that could not reach a relay
//! is reported per relay in [`PublishResult`](super::PublishResult).

use thiserror::Error;

use crate::nostr::{MessageError, NostrError};

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid relay URL.
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    /// The relay is not connected.
    #[error("Relay {0} is not connected")]
    NotConnected(String),

    /// The relay is not in the manager's set.
    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    /// The operation targets no relays.
    #[error("No relays configured")]
    NoRelays,

    /// Subscription failed.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The connection or manager has shut down.
    #[error("Relay connection shut down")]
    Shutdown,

    /// Timeout waiting for operation.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration could not be loaded.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The manager has no keypair to sign with.
    #[error("No signing key configured")]
    NoSigner,

    /// Building or signing an event failed.
    #[error(transparent)]
    Nostr(#[from] NostrError),

    /// An envelope could not be encoded.
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
