//! Profile metadata carried in kind-0 events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Profile fields from a kind-0 event's JSON content.
///
/// Every field is optional. Parsing is lenient: a known field of the wrong
/// JSON type reads as absent, and it stays in [`Profile::extra`] together
/// with fields this crate does not know about, so that re-publishing a
/// profile never drops data written by another client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Free-form bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Banner URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Personal website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// NIP-05 identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    /// LNURL for zaps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud06: Option<String>,
    /// Lightning address for zaps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    /// Fields not listed above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    /// Parses kind-0 content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid JSON or not an object.
    pub fn from_content(content: &str) -> Result<Self, serde_json::Error> {
        let mut object: Map<String, Value> = serde_json::from_str(content)?;
        let mut take = |key: &str| match object.remove(key) {
            Some(Value::String(value)) => Some(value),
            Some(other) => {
                object.insert(key.to_string(), other);
                None
            }
            None => None,
        };

        Ok(Self {
            name: take("name"),
            display_name: take("display_name"),
            about: take("about"),
            picture: take("picture"),
            banner: take("banner"),
            website: take("website"),
            nip05: take("nip05"),
            lud06: take("lud06"),
            lud16: take("lud16"),
            extra: object,
        })
    }

    /// Serializes the profile as kind-0 content.
    ///
    /// A typed field that is set wins over a raw value of the same name in
    /// [`Profile::extra`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_content(&self) -> Result<String, serde_json::Error> {
        let typed = Self {
            extra: Map::new(),
            ..self.clone()
        };
        let mut object = self.extra.clone();
        if let Value::Object(fields) = serde_json::to_value(typed)? {
            object.extend(fields);
        }
        serde_json::to_string(&object)
    }

    /// Best name to show for this profile.
    #[must_use]
    pub fn best_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.name.as_deref().filter(|n| !n.is_empty()))
    }
}
