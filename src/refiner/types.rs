//! Refined views of events.

use crate::nostr::{Contact, Event, EventId, EventReference, Kind, Profile, PubKey};

/// A verified event together with everything derived from its tags and
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinedEvent {
    /// The event as received.
    pub event: Event,
    /// What the event is.
    pub class: EventClass,
    /// References from `e` tags in tag order. For text notes, unmarked tags
    /// carry the marker their position implies.
    pub references: Vec<EventReference>,
    /// Pubkeys from `p` tags, in tag order, without duplicates. Empty for
    /// contact lists, whose `p` tags are in [`EventClass::ContactList`].
    pub mentions: Vec<PubKey>,
    /// Lowercased `t` tag values, without duplicates.
    pub hashtags: Vec<String>,
    /// Number of tags that were skipped as malformed.
    pub skipped_tags: usize,
}

/// Classification of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// Kind 1 without a parent.
    Note,
    /// Kind 1 answering another event.
    Reply {
        /// Thread root.
        root: EventId,
        /// Direct parent. Equal to `root` for top-level replies.
        reply_to: EventId,
    },
    /// Kind 7.
    Reaction {
        /// Event reacted to.
        target: EventId,
        /// Author of the target, if tagged.
        target_author: Option<PubKey>,
        /// Reaction content, `+` for a like.
        content: String,
    },
    /// Kind 6.
    Repost {
        /// Reposted event.
        target: EventId,
        /// Embedded copy of the reposted event, if the content carries one.
        reposted: Option<Box<Event>>,
    },
    /// Kind 0.
    Metadata(Profile),
    /// Kind 3. Malformed entries are left out.
    ContactList(Vec<Contact>),
    /// Kind 5.
    Deletion {
        /// Events the author asks to delete.
        targets: Vec<EventId>,
        /// Reason, if given.
        reason: Option<String>,
    },
    /// Kind 9734.
    ZapRequest(ZapRequest),
    /// Kind 9735.
    ZapReceipt(ZapReceipt),
    /// Any kind without a dedicated class.
    Other(Kind),
}

impl EventClass {
    /// Returns true for replies.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self, Self::Reply { .. })
    }
}

/// Contents of a zap request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapRequest {
    /// Who is being zapped.
    pub recipient: PubKey,
    /// Zapped event, for zaps on a note.
    pub target: Option<EventId>,
    /// Requested amount in millisatoshis.
    pub amount_msat: Option<u64>,
    /// Relays the receipt should be published to.
    pub relays: Vec<String>,
    /// Zap comment.
    pub comment: String,
}

/// Contents of a zap receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapReceipt {
    /// Who was zapped.
    pub recipient: PubKey,
    /// Zapped event.
    pub target: Option<EventId>,
    /// The paid invoice.
    pub bolt11: Option<String>,
    /// Author of the embedded zap request. Absent for anonymous zaps
    /// without a request.
    pub sender: Option<PubKey>,
    /// The embedded zap request.
    pub request: Option<ZapRequest>,
}

impl ZapReceipt {
    /// Amount from the embedded request, in millisatoshis.
    #[must_use]
    pub fn amount_msat(&self) -> Option<u64> {
        self.request.as_ref().and_then(|r| r.amount_msat)
    }
}
