//! Event refinement.
//!
//! Turns verified events into typed records a client can store and render:
//!
//! ```text
//! Event ──verify──▶ classify by kind ──▶ RefinedEvent
//!                        │                  ├── EventClass (note, reply, reaction, ...)
//!                        │                  ├── references (NIP-10)
//!                        └── tags ─────────▶├── mentions, hashtags
//!                                           └── skipped_tags
//! ```
//!
//! A bad tag never sinks an event: it is skipped and counted. A bad
//! signature, a payload that is not JSON, or a missing tag the kind cannot
//! do without rejects the whole event with a [`RefineError`].

mod classify;
mod error;
mod types;

pub use classify::Refiner;
pub use error::{RefineError, Result};
pub use types::{EventClass, RefinedEvent, ZapReceipt, ZapRequest};
