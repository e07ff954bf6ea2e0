//! Error types for event refinement.
//!
//! A refine error rejects the whole event. Individual malformed tags are
//! not errors; they are skipped and counted in
//! [`RefinedEvent::skipped_tags`](super::RefinedEvent::skipped_tags).

use thiserror::Error;

use crate::nostr::{Kind, NostrError};

/// Why an event was rejected by the refiner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefineError {
    /// The signature does not verify against the id and author.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The id does not match the event content.
    #[error("Event id does not match content")]
    IdMismatch,

    /// The content is not the JSON payload this kind requires.
    #[error("Malformed content for kind {kind}: {reason}")]
    MalformedContent {
        /// Kind of the rejected event.
        kind: Kind,
        /// Parser message.
        reason: String,
    },

    /// A field of the event itself (key, hex, JSON) could not be decoded.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// A tag this kind cannot do without is absent.
    #[error("Kind {kind} event is missing a {tag:?} tag")]
    MissingTag {
        /// Kind of the rejected event.
        kind: Kind,
        /// Name of the missing tag.
        tag: &'static str,
    },
}

/// Result type alias for refinement.
pub type Result<T> = std::result::Result<T, RefineError>;

impl From<NostrError> for RefineError {
    fn from(err: NostrError) -> Self {
        match err {
            NostrError::IdMismatch => Self::IdMismatch,
            NostrError::InvalidSignature => Self::InvalidSignature,
            other => Self::Malformed(other.to_string()),
        }
    }
}
