//! Relay connectivity.
//!
//! Two layers:
//!
//! - [`RelayConnection`]: one persistent WebSocket to one relay. Reconnects
//!   with exponential backoff, replays its subscriptions on every reconnect
//!   and answers NIP-42 challenges when given a key.
//! - [`RelayManager`]: the pool. Fans subscriptions and publishes out to
//!   many relays and merges what comes back into one deduplicated stream
//!   per subscription.
//!
//! # Architecture
//!
//! ```text
//! Application
//!     │  subscribe / publish
//!     ▼
//! RelayManager ──────────── notifications (status, NOTICE, CLOSED)
//!     │
//!     ├── RelayConnection ─── wss://relay-a
//!     ├── RelayConnection ─── wss://relay-b
//!     └── RelayConnection ─── wss://relay-c
//! ```
//!
//! Relay failures never surface as errors from subscribe or publish. They
//! are statuses, notifications and per-relay publish outcomes.

pub(crate) mod backoff;
mod connection;
mod error;
mod manager;
mod subscription;
mod types;

pub use backoff::Backoff;
pub use connection::{normalize_url, RelayConnection};
pub use error::{RelayError, RelayResult};
pub use manager::RelayManager;
pub use subscription::Subscription;
pub use types::{
    ConnectionEvent, Notification, PublishOutcome, PublishResult, RelayConnectionStatus,
    RelayStatus, SubscriptionEvent,
};
