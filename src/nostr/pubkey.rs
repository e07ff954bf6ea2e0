//! Public key identifiers.
//!
//! A [`PubKey`] is the 32-byte x-only key that identifies an author. It is
//! carried as lowercase hex on the wire and as `npub1...` at the edges of
//! the system (import, export, display).

use crate::nostr::error::Result;
use crate::nostr::nip19::{self, NPUB_PREFIX};
use crate::nostr::types::hex_newtype;

/// A 32-byte x-only public key.
///
/// Construction only checks the length; whether the bytes are a point on
/// the curve is decided by signature verification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(pub(crate) [u8; 32]);

hex_newtype!(PubKey, 32, "public key");

impl PubKey {
    /// Parses an `npub1...` string.
    ///
    /// # Errors
    ///
    /// Returns a [`Bech32Error`](crate::nostr::Bech32Error) wrapped in
    /// [`NostrError::Bech32`](crate::nostr::NostrError::Bech32) for a bad
    /// checksum, the wrong prefix or the wrong payload length.
    pub fn from_npub(npub: &str) -> Result<Self> {
        Ok(Self(nip19::decode_32(NPUB_PREFIX, npub)?))
    }

    /// Parses either an `npub1...` string or 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.len() == 64 {
            Self::from_hex(input)
        } else {
            Self::from_npub(input)
        }
    }

    /// Returns the key as `npub1...`.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn npub(&self) -> Result<String> {
        Ok(nip19::encode(NPUB_PREFIX, &self.0)?)
    }

    /// Short display form: first 8 and last 8 characters of the Bech32 data
    /// part, joined by `:`.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn short(&self) -> Result<String> {
        let npub = self.npub()?;
        let payload = &npub[NPUB_PREFIX.len() + 1..];
        Ok(format!(
            "{}:{}",
            &payload[..8],
            &payload[payload.len() - 8..]
        ))
    }
}
