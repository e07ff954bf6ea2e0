//! Keys, events and the relay wire protocol.
//!
//! # Architecture
//!
//! ```text
//! KeyPair ──sign──▶ UnsignedEvent ──▶ Event ──▶ ClientMessage (EVENT/REQ/...)
//!                                       ▲
//!                    RelayMessage ──────┘ (decoded, then verified)
//! ```
//!
//! # Security
//!
//! - Secret keys are drawn by rejection sampling and zeroized on drop
//! - Event ids are compared in constant time during verification
//! - Inbound events are never trusted before [`Event::verify`]

mod builder;
mod contact;
mod error;
mod event;
mod filter;
mod keys;
mod message;
pub mod nip19;
mod profile;
mod pubkey;
mod tags;
mod types;

pub use builder::EventBuilder;
pub use contact::{Contact, EventReference};
pub use error::{Bech32Error, MessageError, NostrError, Result};
pub use event::{compute_id, Event, UnsignedEvent};
pub use filter::Filter;
pub use keys::{is_valid_secret, verify, KeyPair, MAX_SEC};
pub use message::{ClientMessage, RelayMessage, SubscriptionId};
pub use profile::Profile;
pub use pubkey::PubKey;
pub use tags::{Marker, Tag, TagBuilder};
pub use types::{EventId, Kind, Signature};
