//! Relay protocol envelopes (NIP-01, NIP-42, NIP-45).
//!
//! Client to relay: `EVENT`, `REQ`, `CLOSE`, `AUTH`, `COUNT`.
//! Relay to client: `EVENT`, `OK`, `EOSE`, `CLOSED`, `NOTICE`, `AUTH`, `COUNT`.
//!
//! Envelopes are JSON arrays whose first element names the type. Decoding a
//! well-formed array of an unknown type yields [`MessageError::UnknownType`],
//! which connections log and skip.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::nostr::error::MessageError;
use crate::nostr::event::Event;
use crate::nostr::filter::Filter;
use crate::nostr::types::EventId;

/// Subscription identifier shared by every relay a subscription targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wraps an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 16-character hex id.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// The id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Box<Event>),
    /// `["REQ", <subscription_id>, <filter>...]`
    Req {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Filters, at least one.
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription_id>]`
    Close(SubscriptionId),
    /// `["AUTH", <signed kind-22242 event>]`
    Auth(Box<Event>),
    /// `["COUNT", <subscription_id>, <filter>...]`
    Count {
        /// Query id.
        subscription_id: SubscriptionId,
        /// Filters.
        filters: Vec<Filter>,
    },
}

impl ClientMessage {
    /// Envelope type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Event(_) => "EVENT",
            Self::Req { .. } => "REQ",
            Self::Close(_) => "CLOSE",
            Self::Auth(_) => "AUTH",
            Self::Count { .. } => "COUNT",
        }
    }

    /// Serializes to the wire JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Json`] if an element cannot be serialized.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let mut array = vec![Value::String(self.name().to_string())];
        match self {
            Self::Event(event) | Self::Auth(event) => array.push(serde_json::to_value(event)?),
            Self::Req {
                subscription_id,
                filters,
            }
            | Self::Count {
                subscription_id,
                filters,
            } => {
                array.push(Value::String(subscription_id.to_string()));
                for filter in filters {
                    array.push(serde_json::to_value(filter)?);
                }
            }
            Self::Close(subscription_id) => array.push(Value::String(subscription_id.to_string())),
        }
        Ok(Value::Array(array).to_string())
    }

    /// Parses a client envelope, as a relay would.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed or unknown envelopes.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let (kind, array) = split_envelope(json)?;
        match kind.as_str() {
            "EVENT" => Ok(Self::Event(Box::new(event_at(&array, 1)?))),
            "AUTH" => Ok(Self::Auth(Box::new(event_at(&array, 1)?))),
            "REQ" | "COUNT" => {
                let subscription_id = subscription_at(&array, 1)?;
                let filters = array
                    .iter()
                    .skip(2)
                    .map(|f| serde_json::from_value(f.clone()))
                    .collect::<Result<Vec<Filter>, _>>()?;
                if kind == "REQ" {
                    Ok(Self::Req {
                        subscription_id,
                        filters,
                    })
                } else {
                    Ok(Self::Count {
                        subscription_id,
                        filters,
                    })
                }
            }
            "CLOSE" => Ok(Self::Close(subscription_at(&array, 1)?)),
            _ => Err(MessageError::UnknownType(kind)),
        }
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription_id>, <event>]`
    Event {
        /// Subscription the event matched.
        subscription_id: SubscriptionId,
        /// The event, not yet verified.
        event: Box<Event>,
    },
    /// `["OK", <event_id>, <accepted>, <message>]`
    Ok {
        /// Event being acknowledged.
        event_id: EventId,
        /// Whether the relay stored the event.
        accepted: bool,
        /// Machine-readable prefix and human-readable reason.
        message: String,
    },
    /// `["EOSE", <subscription_id>]`
    Eose(SubscriptionId),
    /// `["CLOSED", <subscription_id>, <message>]`
    Closed {
        /// Subscription the relay ended.
        subscription_id: SubscriptionId,
        /// Reason.
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// `["AUTH", <challenge>]`
    Auth {
        /// Challenge string to sign.
        challenge: String,
    },
    /// `["COUNT", <subscription_id>, {"count": <n>}]`
    Count {
        /// Query id.
        subscription_id: SubscriptionId,
        /// Number of matching events.
        count: u64,
    },
}

impl RelayMessage {
    /// Parses a relay envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnknownType`] for envelope types this client
    /// does not handle, and other variants for malformed input.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let (kind, array) = split_envelope(json)?;
        match kind.as_str() {
            "EVENT" => Ok(Self::Event {
                subscription_id: subscription_at(&array, 1)?,
                event: Box::new(event_at(&array, 2)?),
            }),
            "OK" => {
                let event_id = string_at(&array, 1, "event_id")?;
                let event_id = EventId::from_hex(event_id)
                    .map_err(|e| MessageError::InvalidFormat(e.to_string()))?;
                let accepted = array
                    .get(2)
                    .ok_or(MessageError::MissingField("accepted"))?
                    .as_bool()
                    .ok_or_else(|| MessageError::InvalidFormat("accepted is not a bool".into()))?;
                let message = array.get(3).and_then(Value::as_str).unwrap_or_default();
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message: message.to_string(),
                })
            }
            "EOSE" => Ok(Self::Eose(subscription_at(&array, 1)?)),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: subscription_at(&array, 1)?,
                message: array
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "NOTICE" => Ok(Self::Notice(string_at(&array, 1, "message")?.to_string())),
            "AUTH" => Ok(Self::Auth {
                challenge: string_at(&array, 1, "challenge")?.to_string(),
            }),
            "COUNT" => {
                let subscription_id = subscription_at(&array, 1)?;
                let count = array
                    .get(2)
                    .and_then(|v| v.get("count"))
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::MissingField("count"))?;
                Ok(Self::Count {
                    subscription_id,
                    count,
                })
            }
            _ => Err(MessageError::UnknownType(kind)),
        }
    }

    /// Serializes to the wire JSON array, as a relay would.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Json`] if the event cannot be serialized.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => {
                let event = serde_json::to_value(event)?;
                serde_json::json!(["EVENT", subscription_id, event])
            }
            Self::Ok {
                event_id,
                accepted,
                message,
            } => serde_json::json!(["OK", event_id.to_hex(), accepted, message]),
            Self::Eose(subscription_id) => serde_json::json!(["EOSE", subscription_id]),
            Self::Closed {
                subscription_id,
                message,
            } => serde_json::json!(["CLOSED", subscription_id, message]),
            Self::Notice(message) => serde_json::json!(["NOTICE", message]),
            Self::Auth { challenge } => serde_json::json!(["AUTH", challenge]),
            Self::Count {
                subscription_id,
                count,
            } => serde_json::json!(["COUNT", subscription_id, {"count": count}]),
        };
        Ok(value.to_string())
    }
}

fn split_envelope(json: &str) -> Result<(String, Vec<Value>), MessageError> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(array) = value else {
        return Err(MessageError::InvalidFormat("not an array".to_string()));
    };
    let kind = array
        .first()
        .ok_or_else(|| MessageError::InvalidFormat("empty array".to_string()))?
        .as_str()
        .ok_or_else(|| MessageError::InvalidFormat("type is not a string".to_string()))?
        .to_string();
    Ok((kind, array))
}

fn string_at<'a>(
    array: &'a [Value],
    index: usize,
    field: &'static str,
) -> Result<&'a str, MessageError> {
    array
        .get(index)
        .ok_or(MessageError::MissingField(field))?
        .as_str()
        .ok_or_else(|| MessageError::InvalidFormat(format!("{field} is not a string")))
}

fn subscription_at(array: &[Value], index: usize) -> Result<SubscriptionId, MessageError> {
    string_at(array, index, "subscription_id").map(SubscriptionId::new)
}

fn event_at(array: &[Value], index: usize) -> Result<Event, MessageError> {
    let value = array.get(index).ok_or(MessageError::MissingField("event"))?;
    serde_json::from_value(value.clone()).map_err(|e| MessageError::InvalidEvent(e.to_string()))
}
