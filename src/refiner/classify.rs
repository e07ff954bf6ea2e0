//! Classification of verified events.

use tracing::debug;

use super::error::{RefineError, Result};
use super::types::{EventClass, RefinedEvent, ZapReceipt, ZapRequest};
use crate::nostr::{Event, EventId, EventReference, Kind, Marker, Profile, PubKey, Tag};

/// Turns raw events into [`RefinedEvent`]s.
///
/// Refining is pure: the same event always gives the same result, and
/// nothing is kept between calls.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::{EventBuilder, KeyPair};
/// use ostrich_core::refiner::{EventClass, Refiner};
///
/// let keypair = KeyPair::generate().unwrap();
/// let event = EventBuilder::text_note("hello #Nostr").sign(&keypair).unwrap();
///
/// let refined = Refiner::new().refine(&event).unwrap();
/// assert_eq!(refined.class, EventClass::Note);
/// assert_eq!(refined.hashtags, vec!["nostr"]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Refiner {
    verify: bool,
}

impl Default for Refiner {
    fn default() -> Self {
        Self::new()
    }
}

impl Refiner {
    /// A refiner that verifies id and signature first.
    #[must_use]
    pub const fn new() -> Self {
        Self { verify: true }
    }

    /// A refiner for events that were already verified, e.g. by a
    /// [`RelayManager`](crate::relay::RelayManager) with verification on.
    #[must_use]
    pub const fn without_verification() -> Self {
        Self { verify: false }
    }

    /// Verifies and classifies `event`.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::IdMismatch`] or
    /// [`RefineError::InvalidSignature`] for events that fail verification,
    /// [`RefineError::MalformedContent`] when a kind's JSON payload cannot be
    /// parsed and [`RefineError::MissingTag`] when a kind's required tag is
    /// absent.
    pub fn refine(&self, event: &Event) -> Result<RefinedEvent> {
        if self.verify {
            event.verify()?;
        }

        let tags: Vec<Tag> = event.typed_tags().collect();
        let skipped_tags = tags.iter().filter(|t| is_malformed(t)).count();
        let mut references = event.event_references();

        let class = match event.kind() {
            Kind::TEXT_NOTE => thread_position(&mut references),
            Kind::REACTION => reaction(event, &tags)?,
            Kind::REPOST => repost(event, &tags)?,
            Kind::METADATA => EventClass::Metadata(
                Profile::from_content(event.content()).map_err(|e| malformed(event, &e))?,
            ),
            Kind::CONTACT_LIST => EventClass::ContactList(event.contacts()),
            Kind::DELETION => EventClass::Deletion {
                targets: references.iter().map(|r| r.target).collect(),
                reason: Some(event.content().to_string()).filter(|c| !c.is_empty()),
            },
            Kind::ZAP_REQUEST => EventClass::ZapRequest(zap_request(event, &tags)?),
            Kind::ZAP_RECEIPT => EventClass::ZapReceipt(zap_receipt(event, &tags)?),
            other => EventClass::Other(other),
        };

        let mentions = if event.kind() == Kind::CONTACT_LIST {
            Vec::new()
        } else {
            dedup(tags.iter().filter_map(|t| match t {
                Tag::PTag { pubkey, .. } => Some(*pubkey),
                _ => None,
            }))
        };

        if skipped_tags > 0 {
            debug!(event = %event.id(), skipped_tags, "skipped malformed tags");
        }

        Ok(RefinedEvent {
            event: event.clone(),
            class,
            references,
            mentions,
            hashtags: dedup(event.hashtags()),
            skipped_tags,
        })
    }
}

/// A `p`, `e` or `t` tag that did not parse, or an empty tag.
fn is_malformed(tag: &Tag) -> bool {
    match tag {
        Tag::Unknown(raw) => raw
            .first()
            .is_none_or(|name| matches!(name.as_str(), "p" | "e" | "t")),
        _ => false,
    }
}

fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut unique = Vec::new();
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn malformed(event: &Event, reason: &impl ToString) -> RefineError {
    RefineError::MalformedContent {
        kind: event.kind(),
        reason: reason.to_string(),
    }
}

const fn missing(event: &Event, tag: &'static str) -> RefineError {
    RefineError::MissingTag {
        kind: event.kind(),
        tag,
    }
}

/// Reply or note per NIP-10. Marked tags win; without markers the first
/// `e` tag is the root, the last the parent and any in between are
/// mentions, and the references are rewritten to say so.
fn thread_position(references: &mut [EventReference]) -> EventClass {
    if references.iter().any(|r| r.marker.is_some()) {
        let find = |marker| {
            references
                .iter()
                .find(|r| r.marker == Some(marker))
                .map(|r| r.target)
        };
        return match (find(Marker::Root), find(Marker::Reply)) {
            (root, Some(reply_to)) => EventClass::Reply {
                root: root.unwrap_or(reply_to),
                reply_to,
            },
            (Some(root), None) => EventClass::Reply {
                root,
                reply_to: root,
            },
            (None, None) => EventClass::Note,
        };
    }

    let last = references.len().saturating_sub(1);
    for (i, reference) in references.iter_mut().enumerate() {
        reference.marker = Some(match i {
            0 => Marker::Root,
            i if i == last => Marker::Reply,
            _ => Marker::Mention,
        });
    }
    match (references.first(), references.last()) {
        (Some(root), Some(reply_to)) => EventClass::Reply {
            root: root.target,
            reply_to: reply_to.target,
        },
        _ => EventClass::Note,
    }
}

fn last_event(tags: &[Tag]) -> Option<EventId> {
    tags.iter().rev().find_map(|t| match t {
        Tag::ETag { event_id, .. } => Some(*event_id),
        _ => None,
    })
}

fn last_pubkey(tags: &[Tag]) -> Option<PubKey> {
    tags.iter().rev().find_map(|t| match t {
        Tag::PTag { pubkey, .. } => Some(*pubkey),
        _ => None,
    })
}

fn reaction(event: &Event, tags: &[Tag]) -> Result<EventClass> {
    Ok(EventClass::Reaction {
        target: last_event(tags).ok_or_else(|| missing(event, "e"))?,
        target_author: last_pubkey(tags),
        content: event.content().to_string(),
    })
}

fn repost(event: &Event, tags: &[Tag]) -> Result<EventClass> {
    let target = last_event(tags).ok_or_else(|| missing(event, "e"))?;
    let reposted = if event.content().trim().is_empty() {
        None
    } else {
        Some(Box::new(
            Event::from_json(event.content()).map_err(|e| malformed(event, &e))?,
        ))
    };
    Ok(EventClass::Repost { target, reposted })
}

fn zap_request(event: &Event, tags: &[Tag]) -> Result<ZapRequest> {
    let relays = event
        .tags()
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("relays"))
        .map(|t| t.iter().skip(1).filter(|r| !r.is_empty()).cloned().collect())
        .unwrap_or_default();
    Ok(ZapRequest {
        recipient: last_pubkey(tags).ok_or_else(|| missing(event, "p"))?,
        target: last_event(tags),
        amount_msat: event.tag_value("amount").and_then(|a| a.parse().ok()),
        relays,
        comment: event.content().to_string(),
    })
}

fn zap_receipt(event: &Event, tags: &[Tag]) -> Result<ZapReceipt> {
    let recipient = last_pubkey(tags).ok_or_else(|| missing(event, "p"))?;
    let description = event
        .tag_value("description")
        .ok_or_else(|| missing(event, "description"))?;
    let request = Event::from_json(description).map_err(|e| malformed(event, &e))?;
    let request_tags: Vec<Tag> = request.typed_tags().collect();

    Ok(ZapReceipt {
        recipient,
        target: last_event(tags),
        bolt11: event.tag_value("bolt11").map(str::to_string),
        sender: Some(request.pubkey()),
        request: zap_request(&request, &request_tags).ok(),
    })
}
