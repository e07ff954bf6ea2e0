//! Ostrich Core Library
//!
//! Relay connection engine and event protocol layer for a Nostr client.
//!
//! - [`nostr`]: keys, signatures, Bech32, events, filters and wire envelopes.
//! - [`relay`]: persistent relay connections and the multiplexing manager.
//! - [`refiner`]: classification of verified events.
//! - [`sink`]: hand-off of refined events to the application.
//! - [`config`]: connection and manager settings.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod config;
pub mod nostr;
pub mod refiner;
pub mod relay;
pub mod sink;

pub use config::{ManagerConfig, RelayConfig};
pub use refiner::Refiner;
pub use relay::RelayManager;
