//! Error types for key, codec and event operations.

use thiserror::Error;

/// Errors produced while decoding Bech32 key strings.
///
/// A checksum or character-set failure ([`Bech32Error::Malformed`]) is kept
/// apart from a well-formed string that carries the wrong payload size
/// ([`Bech32Error::InvalidLength`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Bech32Error {
    /// Invalid checksum, characters or separator.
    #[error("Malformed bech32 string: {0}")]
    Malformed(String),

    /// The human-readable prefix is not the one expected.
    #[error("Bech32 prefix mismatch: expected {expected}, found {found}")]
    PrefixMismatch {
        /// Prefix the caller asked for.
        expected: String,
        /// Prefix actually present.
        found: String,
    },

    /// Checksum is valid but the payload has the wrong size.
    #[error("Invalid bech32 payload length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required payload length.
        expected: usize,
        /// Decoded payload length.
        actual: usize,
    },

    /// The prefix itself cannot be used as a human-readable part.
    #[error("Invalid bech32 prefix: {0}")]
    InvalidPrefix(String),
}

/// Errors that can occur during key handling and event construction.
#[derive(Error, Debug)]
pub enum NostrError {
    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The operating system random source failed. Not recoverable.
    #[error("Random source unavailable: {0}")]
    EntropyUnavailable(String),

    /// Event signing failed.
    #[error("Event signing failed: {0}")]
    Signing(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid event structure or content.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Event id does not match its canonical serialization.
    #[error("Event ID mismatch")]
    IdMismatch,

    /// Event signature verification failed.
    #[error("Invalid event signature")]
    InvalidSignature,

    /// Hex encoding/decoding error.
    #[error("Hex encoding error: {0}")]
    HexError(String),

    /// Bech32 encoding/decoding error.
    #[error(transparent)]
    Bech32(#[from] Bech32Error),
}

/// Result type for Nostr operations.
pub type Result<T> = std::result::Result<T, NostrError>;

impl From<hex::FromHexError> for NostrError {
    fn from(e: hex::FromHexError) -> Self {
        Self::HexError(e.to_string())
    }
}

/// Errors decoding or encoding relay protocol envelopes.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Not a JSON array, or elements of the wrong type.
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Well-formed envelope with a type this client does not handle.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// A required element is missing.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The embedded event could not be decoded.
    #[error("Invalid event in message: {0}")]
    InvalidEvent(String),

    /// The text is not JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_key_derivation() {
        let err = NostrError::KeyDerivation("invalid key".to_string());
        assert_eq!(err.to_string(), "Key derivation failed: invalid key");
    }

    #[test]
    fn error_display_entropy() {
        let err = NostrError::EntropyUnavailable("getrandom failed".to_string());
        assert_eq!(err.to_string(), "Random source unavailable: getrandom failed");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: NostrError = json_err.into();
        assert!(matches!(err, NostrError::Serialization(_)));
    }

    #[test]
    fn error_from_hex() {
        let hex_err = hex::decode("not valid hex").unwrap_err();
        let err: NostrError = hex_err.into();
        assert!(matches!(err, NostrError::HexError(_)));
    }

    #[test]
    fn bech32_error_is_transparent() {
        let err: NostrError = Bech32Error::InvalidLength {
            expected: 32,
            actual: 31,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid bech32 payload length: expected 32 bytes, got 31"
        );
    }

    #[test]
    fn prefix_mismatch_display() {
        let err = Bech32Error::PrefixMismatch {
            expected: "npub".to_string(),
            found: "nsec".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Bech32 prefix mismatch: expected npub, found nsec"
        );
    }

    #[test]
    fn message_error_display() {
        assert_eq!(
            MessageError::UnknownType("FOO".to_string()).to_string(),
            "Unknown message type: FOO"
        );
        assert_eq!(
            MessageError::MissingField("subscription_id").to_string(),
            "Missing field: subscription_id"
        );
    }

    #[test]
    fn error_display_invalid_signature() {
        let err = NostrError::InvalidSignature;
        assert_eq!(err.to_string(), "Invalid event signature");
    }
}
