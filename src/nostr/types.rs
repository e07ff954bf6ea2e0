//! Fixed-size hex-encoded protocol values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Implements hex parsing, formatting and serde for a `[u8; N]` newtype.
macro_rules! hex_newtype {
    ($name:ident, $len:expr, $what:literal) => {
        impl $name {
            /// Size of the value in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Parses a hex string; upper and lower case are both accepted.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not hex or has the wrong length.
            pub fn from_hex(s: &str) -> $crate::nostr::error::Result<Self> {
                let bytes = hex::decode(s)?;
                let actual = bytes.len();
                let bytes: [u8; $len] = bytes.try_into().map_err(|_| {
                    $crate::nostr::error::NostrError::InvalidEvent(format!(
                        "{} must be {} bytes, got {}",
                        $what, $len, actual
                    ))
                })?;
                Ok(Self(bytes))
            }

            /// Lowercase hex encoding.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::nostr::error::NostrError;

            fn from_str(s: &str) -> $crate::nostr::error::Result<Self> {
                Self::from_hex(s)
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(
                &self,
                serializer: S,
            ) -> ::std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(
                deserializer: D,
            ) -> ::std::result::Result<Self, D::Error> {
                let s = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(<D::Error as ::serde::de::Error>::custom)
            }
        }
    };
}

pub(crate) use hex_newtype;

/// A 32-byte event identifier: the SHA-256 of the canonical serialization.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) [u8; 32]);

hex_newtype!(EventId, 32, "event id");

/// A 64-byte BIP-340 Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub(crate) [u8; 64]);

hex_newtype!(Signature, 64, "signature");

/// Event kind number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u16);

impl Kind {
    /// Profile metadata (NIP-01).
    pub const METADATA: Self = Self(0);
    /// Short text note (NIP-01).
    pub const TEXT_NOTE: Self = Self(1);
    /// Follow list (NIP-02).
    pub const CONTACT_LIST: Self = Self(3);
    /// Event deletion request (NIP-09).
    pub const DELETION: Self = Self(5);
    /// Repost (NIP-18).
    pub const REPOST: Self = Self(6);
    /// Reaction (NIP-25).
    pub const REACTION: Self = Self(7);
    /// Zap request (NIP-57).
    pub const ZAP_REQUEST: Self = Self(9734);
    /// Zap receipt (NIP-57).
    pub const ZAP_RECEIPT: Self = Self(9735);
    /// Client authentication (NIP-42).
    pub const CLIENT_AUTH: Self = Self(22242);

    /// Returns the numeric kind.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
