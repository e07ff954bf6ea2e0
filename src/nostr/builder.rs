//! Construction of outbound events.
//!
//! [`EventBuilder`] collects kind, tags and content; [`EventBuilder::sign`]
//! stamps the author and timestamp, computes the id and signs it. The
//! constructors cover the events a client publishes:
//!
//! | Constructor | Kind | Tags |
//! |-------------|------|------|
//! | `text_note` | 1 | hashtags |
//! | `reply` | 1 | `e` root/reply, `p` thread participants |
//! | `reaction` | 7 | `e`, `p` |
//! | `repost` | 6 | `e`, `p` |
//! | `contact_list` | 3 | one `p` per contact |
//! | `metadata` | 0 | none |
//! | `deletion` | 5 | one `e` per target |
//! | `zap_request` | 9734 | `relays`, `amount`, `p`, optional `e` |
//! | `auth` | 22242 | `relay`, `challenge` |

use chrono::Utc;

use crate::nostr::contact::Contact;
use crate::nostr::error::Result;
use crate::nostr::event::{Event, UnsignedEvent};
use crate::nostr::keys::KeyPair;
use crate::nostr::profile::Profile;
use crate::nostr::pubkey::PubKey;
use crate::nostr::tags::{Marker, Tag, TagBuilder};
use crate::nostr::types::{EventId, Kind};

/// Builder for signed events.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::{EventBuilder, KeyPair, Kind};
///
/// let keypair = KeyPair::generate().unwrap();
/// let event = EventBuilder::text_note("gm")
///     .created_at(1_700_000_000)
///     .sign(&keypair)
///     .unwrap();
/// assert_eq!(event.kind(), Kind::TEXT_NOTE);
/// assert!(event.verify().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: Kind,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: Option<i64>,
}

impl EventBuilder {
    /// Starts an event of `kind` with `content` and no tags.
    #[must_use]
    pub fn new(kind: Kind, content: impl Into<String>) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content: content.into(),
            created_at: None,
        }
    }

    /// Appends a raw tag.
    #[must_use]
    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    /// Appends several raw tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Overrides the timestamp, which otherwise is the signing time.
    #[must_use]
    pub const fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Produces the unsigned event for `pubkey`.
    #[must_use]
    pub fn to_unsigned(self, pubkey: PubKey) -> UnsignedEvent {
        UnsignedEvent {
            pubkey,
            created_at: self.created_at.unwrap_or_else(|| Utc::now().timestamp()),
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }

    /// Signs the event with `keypair`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign(self, keypair: &KeyPair) -> Result<Event> {
        self.to_unsigned(keypair.public_key()).sign(keypair)
    }

    /// Short text note. `#hashtags` in the content become `t` tags.
    #[must_use]
    pub fn text_note(content: impl Into<String>) -> Self {
        let content = content.into();
        let mut hashtags: Vec<Vec<String>> = Vec::new();
        for word in content.split_whitespace() {
            let Some(hashtag) = word.strip_prefix('#') else {
                continue;
            };
            let hashtag = hashtag.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
            if hashtag.is_empty() {
                continue;
            }
            let tag = TagBuilder::hashtag(hashtag);
            if !hashtags.contains(&tag) {
                hashtags.push(tag);
            }
        }
        Self::new(Kind::TEXT_NOTE, content).tags(hashtags)
    }

    /// Reply to `parent` with NIP-10 marked tags.
    ///
    /// The thread root is taken from the parent's `root` marker, or its
    /// first unmarked `e` tag; a parent without `e` tags is the root. The
    /// parent's author and every pubkey the parent tagged are notified.
    #[must_use]
    pub fn reply(parent: &Event, content: impl Into<String>, relay_hint: Option<&str>) -> Self {
        let references: Vec<Tag> = parent
            .typed_tags()
            .filter(|t| matches!(t, Tag::ETag { .. }))
            .collect();
        let root = references
            .iter()
            .find_map(|t| match t {
                Tag::ETag {
                    event_id,
                    relay,
                    marker: Some(Marker::Root),
                    ..
                } => Some((*event_id, relay.clone())),
                _ => None,
            })
            .or_else(|| {
                references.first().and_then(|t| match t {
                    Tag::ETag {
                        event_id,
                        relay,
                        marker: None,
                        ..
                    } => Some((*event_id, relay.clone())),
                    _ => None,
                })
            });

        let mut builder = Self::new(Kind::TEXT_NOTE, content);
        match root {
            Some((root_id, root_relay)) if root_id != parent.id() => {
                builder = builder
                    .tag(TagBuilder::event(
                        &root_id,
                        root_relay.as_deref(),
                        Some(Marker::Root),
                    ))
                    .tag(TagBuilder::event(&parent.id(), relay_hint, Some(Marker::Reply)));
            }
            _ => {
                builder = builder.tag(TagBuilder::event(
                    &parent.id(),
                    relay_hint,
                    Some(Marker::Root),
                ));
            }
        }

        let mut participants = vec![parent.pubkey()];
        for contact in parent.contacts() {
            if !participants.contains(&contact.pubkey) {
                participants.push(contact.pubkey);
            }
        }
        builder.tags(participants.iter().map(|pk| TagBuilder::pubkey(pk, None)))
    }

    /// Reaction to `target`. `content` is `+`, `-` or an emoji.
    #[must_use]
    pub fn reaction(target: &Event, content: impl Into<String>) -> Self {
        Self::new(Kind::REACTION, content)
            .tag(TagBuilder::event(&target.id(), None, None))
            .tag(TagBuilder::pubkey(&target.pubkey(), None))
    }

    /// Repost of `target`; the content is the reposted event's JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` cannot be serialized.
    pub fn repost(target: &Event, relay_hint: Option<&str>) -> Result<Self> {
        Ok(Self::new(Kind::REPOST, target.to_json()?)
            .tag(TagBuilder::event(&target.id(), relay_hint, None))
            .tag(TagBuilder::pubkey(&target.pubkey(), None)))
    }

    /// Follow list replacing the author's previous one.
    #[must_use]
    pub fn contact_list(contacts: &[Contact]) -> Self {
        Self::new(Kind::CONTACT_LIST, "").tags(contacts.iter().map(Contact::to_tag))
    }

    /// Profile metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be serialized.
    pub fn metadata(profile: &Profile) -> Result<Self> {
        Ok(Self::new(Kind::METADATA, profile.to_content()?))
    }

    /// Deletion request for the author's own events.
    #[must_use]
    pub fn deletion(targets: &[EventId], reason: Option<&str>) -> Self {
        Self::new(Kind::DELETION, reason.unwrap_or_default())
            .tags(targets.iter().map(|id| TagBuilder::event(id, None, None)))
    }

    /// Zap request to be handed to the recipient's LNURL server.
    ///
    /// `relays` tells the server where to publish the receipt; callers
    /// usually pass the manager's current relay URLs.
    #[must_use]
    pub fn zap_request(
        recipient: &PubKey,
        amount_msat: u64,
        relays: &[String],
        target: Option<&EventId>,
        comment: &str,
    ) -> Self {
        let mut builder = Self::new(Kind::ZAP_REQUEST, comment)
            .tag(TagBuilder::relays(relays))
            .tag(TagBuilder::amount(amount_msat))
            .tag(TagBuilder::pubkey(recipient, None));
        if let Some(target) = target {
            builder = builder.tag(TagBuilder::event(target, None, None));
        }
        builder
    }

    /// NIP-42 authentication answer to `challenge` from `relay_url`.
    #[must_use]
    pub fn auth(relay_url: &str, challenge: &str) -> Self {
        Self::new(Kind::CLIENT_AUTH, "")
            .tag(TagBuilder::relay(relay_url))
            .tag(TagBuilder::challenge(challenge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> KeyPair {
        KeyPair::generate().unwrap()
    }

    fn raw(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn text_note_extracts_hashtags() {
        let event = EventBuilder::text_note("learning #Rust and #nostr, #rust again #")
            .sign(&keypair())
            .unwrap();
        assert_eq!(event.hashtags(), vec!["rust", "nostr"]);
    }

    #[test]
    fn created_at_override() {
        let event = EventBuilder::text_note("x")
            .created_at(42)
            .sign(&keypair())
            .unwrap();
        assert_eq!(event.created_at(), 42);
    }

    #[test]
    fn default_timestamp_is_now() {
        let before = Utc::now().timestamp();
        let event = EventBuilder::text_note("x").sign(&keypair()).unwrap();
        assert!(event.created_at() >= before);
    }

    #[test]
    fn reply_to_root_marks_parent_as_root() {
        let alice = keypair();
        let root = EventBuilder::text_note("root").sign(&alice).unwrap();
        let reply = EventBuilder::reply(&root, "hi", Some("wss://r"))
            .sign(&keypair())
            .unwrap();
        assert_eq!(
            reply.tags()[0],
            raw(&["e", &root.id().to_hex(), "wss://r", "root"])
        );
        assert_eq!(reply.tags()[1], raw(&["p", &alice.public_key().to_hex()]));
    }

    #[test]
    fn nested_reply_keeps_root_and_participants() {
        let alice = keypair();
        let bob = keypair();
        let root = EventBuilder::text_note("root").sign(&alice).unwrap();
        let first = EventBuilder::reply(&root, "first", None).sign(&bob).unwrap();
        let second = EventBuilder::reply(&first, "second", None)
            .sign(&keypair())
            .unwrap();

        let refs = second.event_references();
        assert_eq!(refs[0].target, root.id());
        assert_eq!(refs[0].marker, Some(Marker::Root));
        assert_eq!(refs[1].target, first.id());
        assert_eq!(refs[1].marker, Some(Marker::Reply));

        let notified: Vec<PubKey> = second.contacts().iter().map(|c| c.pubkey).collect();
        assert_eq!(notified, vec![bob.public_key(), alice.public_key()]);
    }

    #[test]
    fn reaction_tags_target_and_author() {
        let author = keypair();
        let note = EventBuilder::text_note("x").sign(&author).unwrap();
        let reaction = EventBuilder::reaction(&note, "+").sign(&keypair()).unwrap();
        assert_eq!(reaction.kind(), Kind::REACTION);
        assert_eq!(reaction.tag_value("e"), Some(note.id().to_hex().as_str()));
        assert_eq!(
            reaction.tag_value("p"),
            Some(author.public_key().to_hex().as_str())
        );
    }

    #[test]
    fn repost_embeds_original() {
        let note = EventBuilder::text_note("x").sign(&keypair()).unwrap();
        let repost = EventBuilder::repost(&note, None)
            .unwrap()
            .sign(&keypair())
            .unwrap();
        assert_eq!(Event::from_json(repost.content()).unwrap(), note);
    }

    #[test]
    fn deletion_with_reason() {
        let ids = [EventId::from_bytes([1; 32]), EventId::from_bytes([2; 32])];
        let event = EventBuilder::deletion(&ids, Some("oops"))
            .sign(&keypair())
            .unwrap();
        assert_eq!(event.content(), "oops");
        assert_eq!(event.event_references().len(), 2);
    }

    #[test]
    fn zap_request_tags() {
        let recipient = keypair().public_key();
        let target = EventId::from_bytes([9; 32]);
        let event = EventBuilder::zap_request(
            &recipient,
            21_000,
            &["wss://a".to_string()],
            Some(&target),
            "",
        )
        .sign(&keypair())
        .unwrap();
        assert_eq!(event.kind(), Kind::ZAP_REQUEST);
        assert_eq!(event.tags()[0], raw(&["relays", "wss://a"]));
        assert_eq!(event.tag_value("amount"), Some("21000"));
        assert_eq!(event.tag_value("e"), Some(target.to_hex().as_str()));
    }

    #[test]
    fn auth_event_carries_relay_and_challenge() {
        let event = EventBuilder::auth("wss://relay.example", "abc")
            .sign(&keypair())
            .unwrap();
        assert_eq!(event.kind(), Kind::CLIENT_AUTH);
        assert_eq!(event.tag_value("relay"), Some("wss://relay.example"));
        assert_eq!(event.tag_value("challenge"), Some("abc"));
    }

    #[test]
    fn metadata_content_is_profile_json() {
        let profile = Profile {
            name: Some("alice".to_string()),
            ..Profile::default()
        };
        let event = EventBuilder::metadata(&profile)
            .unwrap()
            .sign(&keypair())
            .unwrap();
        assert_eq!(event.content(), r#"{"name":"alice"}"#);
    }
}
