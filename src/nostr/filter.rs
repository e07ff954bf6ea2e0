//! Subscription filters.
//!
//! A filter is the JSON object sent in `REQ`:
//!
//! ```json
//! {"ids": [...], "authors": [...], "kinds": [1, 7], "#e": [...],
//!  "since": 1700000000, "until": 1700003600, "limit": 100}
//! ```
//!
//! An event matches when every present constraint holds. Empty lists are
//! treated as absent and are not serialized. `limit` only bounds what the
//! relay returns from storage; [`Filter::matches`] ignores it.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::nostr::event::Event;
use crate::nostr::pubkey::PubKey;
use crate::nostr::types::{EventId, Kind};

/// A subscription filter.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::{Filter, Kind};
///
/// let filter = Filter::new().kind(Kind::TEXT_NOTE).hashtag("nostr").limit(10);
/// assert_eq!(
///     serde_json::to_string(&filter).unwrap(),
///     r##"{"kinds":[1],"#t":["nostr"],"limit":10}"##
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Exact event ids.
    pub ids: Vec<EventId>,
    /// Authors.
    pub authors: Vec<PubKey>,
    /// Kinds.
    pub kinds: Vec<Kind>,
    /// Single-letter tag constraints, keyed by tag name (`#e` → `'e'`).
    pub tags: BTreeMap<char, Vec<String>>,
    /// Oldest `created_at` accepted, inclusive.
    pub since: Option<i64>,
    /// Newest `created_at` accepted, inclusive.
    pub until: Option<i64>,
    /// Maximum number of stored events the relay should return.
    pub limit: Option<usize>,
}

impl Filter {
    /// Empty filter matching every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event id.
    #[must_use]
    pub fn id(mut self, id: EventId) -> Self {
        self.ids.push(id);
        self
    }

    /// Adds event ids.
    #[must_use]
    pub fn ids(mut self, ids: impl IntoIterator<Item = EventId>) -> Self {
        self.ids.extend(ids);
        self
    }

    /// Adds an author.
    #[must_use]
    pub fn author(mut self, author: PubKey) -> Self {
        self.authors.push(author);
        self
    }

    /// Adds authors.
    #[must_use]
    pub fn authors(mut self, authors: impl IntoIterator<Item = PubKey>) -> Self {
        self.authors.extend(authors);
        self
    }

    /// Adds a kind.
    #[must_use]
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Adds kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    /// Adds accepted values for the single-letter tag `name`.
    #[must_use]
    pub fn tag<S: Into<String>>(mut self, name: char, values: impl IntoIterator<Item = S>) -> Self {
        self.tags
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Events referencing `id` through an `e` tag.
    #[must_use]
    pub fn event(self, id: &EventId) -> Self {
        self.tag('e', [id.to_hex()])
    }

    /// Events mentioning `pubkey` through a `p` tag.
    #[must_use]
    pub fn pubkey(self, pubkey: &PubKey) -> Self {
        self.tag('p', [pubkey.to_hex()])
    }

    /// Events carrying the hashtag (lowercased).
    #[must_use]
    pub fn hashtag(self, hashtag: &str) -> Self {
        self.tag('t', [hashtag.trim_start_matches('#').to_lowercase()])
    }

    /// Sets the lower time bound.
    #[must_use]
    pub const fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the upper time bound.
    #[must_use]
    pub const fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }

    /// Sets the relay-side result limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `event` satisfies every present constraint.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id()) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey()) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at() < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at() > until) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            values.is_empty() || event.tags().iter().any(|tag| tag_matches(tag, *name, values))
        })
    }
}

fn tag_matches(tag: &[String], name: char, values: &[String]) -> bool {
    let mut chars = match tag.first() {
        Some(first) => first.chars(),
        None => return false,
    };
    if chars.next() != Some(name) || chars.next().is_some() {
        return false;
    }
    tag.get(1).is_some_and(|value| values.contains(value))
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.ids.is_empty() {
            map.serialize_entry("ids", &self.ids)?;
        }
        if !self.authors.is_empty() {
            map.serialize_entry("authors", &self.authors)?;
        }
        if !self.kinds.is_empty() {
            map.serialize_entry("kinds", &self.kinds)?;
        }
        for (name, values) in &self.tags {
            if !values.is_empty() {
                map.serialize_entry(&format!("#{name}"), values)?;
            }
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        let mut filter = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "ids" => filter.ids = serde_json::from_value(value).map_err(D::Error::custom)?,
                "authors" => {
                    filter.authors = serde_json::from_value(value).map_err(D::Error::custom)?;
                }
                "kinds" => filter.kinds = serde_json::from_value(value).map_err(D::Error::custom)?,
                "since" => filter.since = serde_json::from_value(value).map_err(D::Error::custom)?,
                "until" => filter.until = serde_json::from_value(value).map_err(D::Error::custom)?,
                "limit" => filter.limit = serde_json::from_value(value).map_err(D::Error::custom)?,
                _ => {
                    let mut chars = key.chars();
                    if let (Some('#'), Some(name), None) = (chars.next(), chars.next(), chars.next())
                    {
                        let values: Vec<String> =
                            serde_json::from_value(value).map_err(D::Error::custom)?;
                        filter.tags.insert(name, values);
                    }
                }
            }
        }
        Ok(filter)
    }
}
