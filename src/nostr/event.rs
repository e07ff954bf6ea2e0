//! The signed event and its canonical id.
//!
//! An event id is the SHA-256 of the UTF-8 JSON array
//! `[0, <pubkey hex>, <created_at>, <kind>, <tags>, <content>]` with no
//! whitespace. The layout is part of the wire contract and must match every
//! other Nostr implementation bit for bit.
//!
//! ```json
//! {
//!   "id": "...",           // SHA256 of the canonical serialization
//!   "pubkey": "...",       // x-only public key
//!   "created_at": 123456,  // Unix timestamp
//!   "kind": 1,
//!   "tags": [["e", "..."], ["p", "..."]],
//!   "content": "...",
//!   "sig": "..."           // Schnorr signature over id
//! }
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::nostr::contact::{Contact, EventReference};
use crate::nostr::error::{NostrError, Result};
use crate::nostr::keys::{self, KeyPair};
use crate::nostr::pubkey::PubKey;
use crate::nostr::tags::Tag;
use crate::nostr::types::{EventId, Kind, Signature};

/// Computes the canonical event id.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::{compute_id, Kind, PubKey};
///
/// let pubkey = PubKey::from_bytes([1; 32]);
/// let a = compute_id(&pubkey, 1_700_000_000, Kind::TEXT_NOTE, &[], "hi");
/// let b = compute_id(&pubkey, 1_700_000_000, Kind::TEXT_NOTE, &[], "hi!");
/// assert_ne!(a, b);
/// ```
#[must_use]
pub fn compute_id(
    pubkey: &PubKey,
    created_at: i64,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let serialized =
        serde_json::json!([0, pubkey.to_hex(), created_at, kind.as_u16(), tags, content])
            .to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    EventId(digest.into())
}

/// An event that has everything but its id and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author.
    pub pubkey: PubKey,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: Kind,
    /// Raw tags.
    pub tags: Vec<Vec<String>>,
    /// Content.
    pub content: String,
}

impl UnsignedEvent {
    /// The id this event will have once signed.
    #[must_use]
    pub fn id(&self) -> EventId {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Signs the event with BIP-340 auxiliary randomness.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::Signing`] if `keypair` is not the author, or an
    /// error from the signer.
    pub fn sign(self, keypair: &KeyPair) -> Result<Event> {
        self.check_author(keypair)?;
        let id = self.id();
        let sig = keypair.sign(id.as_bytes())?;
        Ok(self.into_event(id, sig))
    }

    /// Signs the event without auxiliary randomness.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::Signing`] if `keypair` is not the author.
    pub fn sign_deterministic(self, keypair: &KeyPair) -> Result<Event> {
        self.check_author(keypair)?;
        let id = self.id();
        let sig = keypair.sign_deterministic(id.as_bytes())?;
        Ok(self.into_event(id, sig))
    }

    fn check_author(&self, keypair: &KeyPair) -> Result<()> {
        if keypair.public_key() == self.pubkey {
            Ok(())
        } else {
            Err(NostrError::Signing(
                "keypair does not match event pubkey".to_string(),
            ))
        }
    }

    fn into_event(self, id: EventId, sig: Signature) -> Event {
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

/// A signed event.
///
/// Fields are read-only: an event is either produced by signing an
/// [`UnsignedEvent`] or decoded from the wire, and its id can never be
/// changed independently of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    pubkey: PubKey,
    created_at: i64,
    kind: Kind,
    tags: Vec<Vec<String>>,
    content: String,
    sig: Signature,
}

impl Event {
    /// Event id.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Author.
    #[must_use]
    pub const fn pubkey(&self) -> PubKey {
        self.pubkey
    }

    /// Unix timestamp in seconds.
    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Raw tags as signed.
    #[must_use]
    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    /// Content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Signature.
    #[must_use]
    pub const fn sig(&self) -> Signature {
        self.sig
    }

    /// Checks that the id matches the content and the signature matches the
    /// id and author.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::IdMismatch`] or [`NostrError::InvalidSignature`].
    pub fn verify(&self) -> Result<()> {
        let calculated = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        if !bool::from(calculated.as_bytes().ct_eq(self.id.as_bytes())) {
            return Err(NostrError::IdMismatch);
        }

        if keys::verify(
            self.sig.as_bytes(),
            self.id.as_bytes(),
            self.pubkey.as_bytes(),
        ) {
            Ok(())
        } else {
            Err(NostrError::InvalidSignature)
        }
    }

    /// Serializes the event to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(NostrError::from)
    }

    /// Deserializes an event from JSON. The result is not verified.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or a field has the wrong shape.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(NostrError::from)
    }

    /// Typed view of every tag.
    pub fn typed_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.tags.iter().map(|t| Tag::parse(t))
    }

    /// First value of the first tag named `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1).map(String::as_str))
    }

    /// References from this event's well-formed `e` tags, in tag order.
    #[must_use]
    pub fn event_references(&self) -> Vec<EventReference> {
        self.tags
            .iter()
            .filter_map(|tag| EventReference::from_tag(self.id, tag))
            .collect()
    }

    /// Contacts from this event's well-formed `p` tags.
    #[must_use]
    pub fn contacts(&self) -> Vec<Contact> {
        self.tags.iter().filter_map(|t| Contact::from_tag(t)).collect()
    }

    /// Lowercased `t` tag values.
    #[must_use]
    pub fn hashtags(&self) -> Vec<String> {
        self.typed_tags()
            .filter_map(|tag| match tag {
                Tag::TTag(hashtag) => Some(hashtag.to_lowercase()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSEC: &str = "nsec16pzcl7krecytvxdj28wlzver8tuwfvfs6wytjn7plyyvp6acdkzq705x7t";
    const PK: &str = "12bbde125d610b64f79194eb80478fe33ad95ed34184c7f0577e6214f3266cb0";

    fn unsigned(content: &str) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: PubKey::from_hex(PK).unwrap(),
            created_at: 1_700_000_000,
            kind: Kind::TEXT_NOTE,
            tags: vec![
                vec!["t".to_string(), "nostr".to_string()],
                vec!["p".to_string(), PK.to_string()],
            ],
            content: content.to_string(),
        }
    }

    #[test]
    fn canonical_id_matches_reference_vector() {
        let event = unsigned("hello \"world\"\nü");
        assert_eq!(
            event.id().to_hex(),
            "a63245b3ad443d9379ee260363e425e16d3146397d05b4e5c7d5df9e8f34064b"
        );
    }

    #[test]
    fn signed_event_verifies() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let event = unsigned("gm").sign(&keypair).unwrap();
        assert!(event.verify().is_ok());
        assert_eq!(event.id(), unsigned("gm").id());
    }

    #[test]
    fn deterministic_signing_is_stable() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let a = unsigned("gm").sign_deterministic(&keypair).unwrap();
        let b = unsigned("gm").sign_deterministic(&keypair).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signing_with_other_key_fails() {
        let other = KeyPair::generate().unwrap();
        assert!(matches!(
            unsigned("gm").sign(&other),
            Err(NostrError::Signing(_))
        ));
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let mut event = unsigned("original").sign(&keypair).unwrap();
        event.content = "tampered".to_string();
        assert!(matches!(event.verify(), Err(NostrError::IdMismatch)));
    }

    #[test]
    fn tampered_tags_and_kind_fail() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let event = unsigned("x").sign(&keypair).unwrap();

        let mut tags = event.clone();
        tags.tags.pop();
        assert!(tags.verify().is_err());

        let mut kind = event.clone();
        kind.kind = Kind::REACTION;
        assert!(kind.verify().is_err());

        let mut created = event;
        created.created_at += 1;
        assert!(created.verify().is_err());
    }

    #[test]
    fn forged_signature_is_rejected() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let mut event = unsigned("x").sign(&keypair).unwrap();
        event.sig = Signature([0u8; 64]);
        assert!(matches!(event.verify(), Err(NostrError::InvalidSignature)));
    }

    #[test]
    fn json_roundtrip_keeps_verification() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let event = unsigned("x").sign(&keypair).unwrap();
        let decoded = Event::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn from_json_rejects_bad_shapes() {
        assert!(Event::from_json("not json").is_err());
        assert!(Event::from_json(r#"{"id":"00"}"#).is_err());
    }

    #[test]
    fn tag_accessors() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let mut tagged = unsigned("x");
        tagged.tags.push(vec!["t".to_string(), "Rust".to_string()]);
        let event = tagged.sign(&keypair).unwrap();

        assert_eq!(event.tag_value("t"), Some("nostr"));
        assert_eq!(event.hashtags(), vec!["nostr", "rust"]);
        assert_eq!(event.contacts().len(), 1);
        assert!(event.event_references().is_empty());
    }
}
