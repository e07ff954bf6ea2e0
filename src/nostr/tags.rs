//! Event tags.
//!
//! On the wire a tag is an array of strings whose first element names the
//! tag. [`Tag::parse`] gives a typed view over the tags this crate
//! understands and keeps everything else, including malformed `p`/`e` tags,
//! as [`Tag::Unknown`] with the raw strings intact. The raw form stays the
//! source of truth so that event ids are always computed over exactly what
//! was signed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::nostr::pubkey::PubKey;
use crate::nostr::types::EventId;

/// NIP-10 marker on an `e` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// Direct parent being replied to.
    Reply,
    /// Root of the thread.
    Root,
    /// Quoted or cited event.
    Mention,
}

impl Marker {
    /// Wire spelling of the marker.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Root => "root",
            Self::Mention => "mention",
        }
    }
}

impl FromStr for Marker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reply" => Ok(Self::Reply),
            "root" => Ok(Self::Root),
            "mention" => Ok(Self::Mention),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// `["p", <pubkey>, <relay>?, <petname>?]`
    PTag {
        /// Referenced public key.
        pubkey: PubKey,
        /// Relay hint, if non-empty.
        relay: Option<String>,
        /// Petname (NIP-02), if non-empty.
        petname: Option<String>,
    },
    /// `["e", <event-id>, <relay>?, <marker>?, <pubkey>?]`
    ETag {
        /// Referenced event.
        event_id: EventId,
        /// Relay hint, if non-empty.
        relay: Option<String>,
        /// NIP-10 marker, if recognised.
        marker: Option<Marker>,
        /// Author of the referenced event, if given.
        author: Option<PubKey>,
    },
    /// `["t", <hashtag>]`
    TTag(String),
    /// Any other tag, or a `p`/`e`/`t` tag that failed to parse.
    Unknown(Vec<String>),
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl Tag {
    /// Parses a raw tag. Never fails: unparseable tags become
    /// [`Tag::Unknown`].
    #[must_use]
    pub fn parse(raw: &[String]) -> Self {
        let unknown = || Self::Unknown(raw.to_vec());
        match raw.first().map(String::as_str) {
            Some("p") => match raw.get(1).map(|v| PubKey::from_hex(v)) {
                Some(Ok(pubkey)) => Self::PTag {
                    pubkey,
                    relay: non_empty(raw.get(2)),
                    petname: non_empty(raw.get(3)),
                },
                _ => unknown(),
            },
            Some("e") => match raw.get(1).map(|v| EventId::from_hex(v)) {
                Some(Ok(event_id)) => Self::ETag {
                    event_id,
                    relay: non_empty(raw.get(2)),
                    marker: raw.get(3).and_then(|m| m.parse().ok()),
                    author: raw.get(4).and_then(|p| PubKey::from_hex(p).ok()),
                },
                _ => unknown(),
            },
            Some("t") => match raw.get(1) {
                Some(tag) if !tag.is_empty() => Self::TTag(tag.clone()),
                _ => unknown(),
            },
            _ => unknown(),
        }
    }

    /// Wire form of the tag.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::PTag {
                pubkey,
                relay,
                petname,
            } => {
                let mut tag = vec!["p".to_string(), pubkey.to_hex()];
                if relay.is_some() || petname.is_some() {
                    tag.push(relay.clone().unwrap_or_default());
                }
                if let Some(petname) = petname {
                    tag.push(petname.clone());
                }
                tag
            }
            Self::ETag {
                event_id,
                relay,
                marker,
                author,
            } => {
                let mut tag = vec!["e".to_string(), event_id.to_hex()];
                if relay.is_some() || marker.is_some() || author.is_some() {
                    tag.push(relay.clone().unwrap_or_default());
                }
                if marker.is_some() || author.is_some() {
                    tag.push(marker.map(|m| m.as_str().to_string()).unwrap_or_default());
                }
                if let Some(author) = author {
                    tag.push(author.to_hex());
                }
                tag
            }
            Self::TTag(hashtag) => vec!["t".to_string(), hashtag.clone()],
            Self::Unknown(raw) => raw.clone(),
        }
    }
}

/// Builder for tags used by events this crate constructs.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::TagBuilder;
///
/// let tag = TagBuilder::hashtag("Nostr");
/// assert_eq!(tag, vec!["t", "nostr"]);
/// ```
pub struct TagBuilder;

impl TagBuilder {
    /// Builds a `p` tag.
    #[must_use]
    pub fn pubkey(pubkey: &PubKey, relay: Option<&str>) -> Vec<String> {
        Tag::PTag {
            pubkey: *pubkey,
            relay: relay.filter(|r| !r.is_empty()).map(str::to_string),
            petname: None,
        }
        .to_vec()
    }

    /// Builds an `e` tag with an optional relay hint and NIP-10 marker.
    #[must_use]
    pub fn event(event_id: &EventId, relay: Option<&str>, marker: Option<Marker>) -> Vec<String> {
        Tag::ETag {
            event_id: *event_id,
            relay: relay.filter(|r| !r.is_empty()).map(str::to_string),
            marker,
            author: None,
        }
        .to_vec()
    }

    /// Builds a `t` tag; hashtags are stored lowercase.
    #[must_use]
    pub fn hashtag(hashtag: &str) -> Vec<String> {
        vec!["t".to_string(), hashtag.trim_start_matches('#').to_lowercase()]
    }

    /// Builds the NIP-57 `relays` tag listing where zap receipts go.
    #[must_use]
    pub fn relays(relays: &[String]) -> Vec<String> {
        std::iter::once("relays".to_string())
            .chain(relays.iter().cloned())
            .collect()
    }

    /// Builds the NIP-57 `amount` tag (millisatoshis).
    #[must_use]
    pub fn amount(millisats: u64) -> Vec<String> {
        vec!["amount".to_string(), millisats.to_string()]
    }

    /// Builds the NIP-42 `relay` tag.
    #[must_use]
    pub fn relay(url: &str) -> Vec<String> {
        vec!["relay".to_string(), url.to_string()]
    }

    /// Builds the NIP-42 `challenge` tag.
    #[must_use]
    pub fn challenge(challenge: &str) -> Vec<String> {
        vec!["challenge".to_string(), challenge.to_string()]
    }

    /// Builds the `alt` tag for NIP-31 human-readable descriptions.
    #[must_use]
    pub fn alt(description: &str) -> Vec<String> {
        vec!["alt".to_string(), description.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "12bbde125d610b64f79194eb80478fe33ad95ed34184c7f0577e6214f3266cb0";
    const ID: &str = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36";

    fn raw(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_p_tag_with_relay_and_petname() {
        let tag = Tag::parse(&raw(&["p", PK, "wss://r.example", "alice"]));
        assert_eq!(
            tag,
            Tag::PTag {
                pubkey: PubKey::from_hex(PK).unwrap(),
                relay: Some("wss://r.example".to_string()),
                petname: Some("alice".to_string()),
            }
        );
    }

    #[test]
    fn parses_marked_e_tag() {
        let tag = Tag::parse(&raw(&["e", ID, "", "root"]));
        assert_eq!(
            tag,
            Tag::ETag {
                event_id: EventId::from_hex(ID).unwrap(),
                relay: None,
                marker: Some(Marker::Root),
                author: None,
            }
        );
    }

    #[test]
    fn unknown_marker_is_dropped() {
        let Tag::ETag { marker, .. } = Tag::parse(&raw(&["e", ID, "", "quote"])) else {
            panic!("expected e tag");
        };
        assert_eq!(marker, None);
    }

    #[test]
    fn malformed_reference_tags_fall_back_to_unknown() {
        for parts in [&["p", "zz"][..], &["e"][..], &["t", ""][..], &[][..]] {
            let parts = raw(parts);
            assert_eq!(Tag::parse(&parts), Tag::Unknown(parts.clone()));
        }
    }

    #[test]
    fn unknown_tags_preserve_raw_strings() {
        let parts = raw(&["expiration", "1700000000", "extra"]);
        assert_eq!(Tag::parse(&parts).to_vec(), parts);
    }

    #[test]
    fn e_tag_to_vec_pads_positions() {
        let id = EventId::from_hex(ID).unwrap();
        assert_eq!(
            TagBuilder::event(&id, None, Some(Marker::Reply)),
            raw(&["e", ID, "", "reply"])
        );
        assert_eq!(TagBuilder::event(&id, None, None), raw(&["e", ID]));
    }

    #[test]
    fn p_tag_builder_skips_empty_relay() {
        let pk = PubKey::from_hex(PK).unwrap();
        assert_eq!(TagBuilder::pubkey(&pk, Some("")), raw(&["p", PK]));
    }

    #[test]
    fn zap_tags() {
        assert_eq!(TagBuilder::amount(21_000), raw(&["amount", "21000"]));
        assert_eq!(
            TagBuilder::relays(&["wss://a".to_string(), "wss://b".to_string()]),
            raw(&["relays", "wss://a", "wss://b"])
        );
    }

    #[test]
    fn marker_roundtrip() {
        for marker in [Marker::Reply, Marker::Root, Marker::Mention] {
            assert_eq!(marker.as_str().parse::<Marker>(), Ok(marker));
        }
    }
}
