//! Contacts (NIP-02) and event references (NIP-10) derived from tags.

use serde::{Deserialize, Serialize};

use crate::nostr::pubkey::PubKey;
use crate::nostr::tags::{Marker, Tag};
use crate::nostr::types::EventId;

/// A followed profile taken from a `p` tag of a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    /// Followed public key.
    pub pubkey: PubKey,
    /// Relay where the profile can be found.
    pub relay_url: Option<String>,
    /// Local petname.
    pub petname: Option<String>,
}

impl Contact {
    /// Creates a contact with only a public key.
    #[must_use]
    pub const fn new(pubkey: PubKey) -> Self {
        Self {
            pubkey,
            relay_url: None,
            petname: None,
        }
    }

    /// Parses a `p` tag.
    ///
    /// Returns `None` for any other tag, for a `p` tag without a pubkey and
    /// for a pubkey that is not 64 hex characters. Empty relay and petname
    /// positions are treated as absent; hex case is ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use ostrich_core::nostr::Contact;
    ///
    /// let pk = "12bbde125d610b64f79194eb80478fe33ad95ed34184c7f0577e6214f3266cb0";
    /// let tag = vec!["p".to_string(), pk.to_string(), String::new(), String::new()];
    /// let contact = Contact::from_tag(&tag).unwrap();
    /// assert!(contact.relay_url.is_none() && contact.petname.is_none());
    /// assert!(Contact::from_tag(&["p".to_string()]).is_none());
    /// ```
    #[must_use]
    pub fn from_tag(tag: &[String]) -> Option<Self> {
        match Tag::parse(tag) {
            Tag::PTag {
                pubkey,
                relay,
                petname,
            } => Some(Self {
                pubkey,
                relay_url: relay,
                petname,
            }),
            _ => None,
        }
    }

    /// Converts the contact back to a `p` tag.
    #[must_use]
    pub fn to_tag(&self) -> Vec<String> {
        Tag::PTag {
            pubkey: self.pubkey,
            relay: self.relay_url.clone(),
            petname: self.petname.clone(),
        }
        .to_vec()
    }
}

/// A reference from one event to another, taken from an `e` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventReference {
    /// The referencing event.
    pub source: EventId,
    /// The referenced event.
    pub target: EventId,
    /// Relay hint for fetching the target.
    pub relay_hint: Option<String>,
    /// NIP-10 marker as written in the tag.
    pub marker: Option<Marker>,
}

impl EventReference {
    /// Builds a reference from `source` if `tag` is a well-formed `e` tag.
    #[must_use]
    pub fn from_tag(source: EventId, tag: &[String]) -> Option<Self> {
        match Tag::parse(tag) {
            Tag::ETag {
                event_id,
                relay,
                marker,
                ..
            } => Some(Self {
                source,
                target: event_id,
                relay_hint: relay,
                marker,
            }),
            _ => None,
        }
    }
}
