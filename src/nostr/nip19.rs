//! NIP-19 Bech32 encoding for keys.
//!
//! Thin layer over the `bech32` crate that maps its failures onto
//! [`Bech32Error`] so that a corrupted string and a wrong-sized payload
//! can be told apart by callers.

use ::bech32::primitives::decode::CheckedHrpstring;
use ::bech32::{Bech32, Hrp};

use crate::nostr::error::Bech32Error;

/// Human-readable prefix for public keys.
pub const NPUB_PREFIX: &str = "npub";

/// Human-readable prefix for secret keys.
pub const NSEC_PREFIX: &str = "nsec";

/// Encodes `data` as a Bech32 string with the given prefix.
///
/// # Errors
///
/// Returns [`Bech32Error::InvalidPrefix`] if `prefix` is not a valid
/// human-readable part, or [`Bech32Error::Malformed`] if the payload is too
/// long for a Bech32 string.
pub fn encode(prefix: &str, data: &[u8]) -> Result<String, Bech32Error> {
    let hrp = Hrp::parse(prefix).map_err(|e| Bech32Error::InvalidPrefix(e.to_string()))?;
    ::bech32::encode::<Bech32>(hrp, data).map_err(|e| Bech32Error::Malformed(e.to_string()))
}

/// Decodes a Bech32 string into its lowercase prefix and payload bytes.
///
/// # Errors
///
/// Returns [`Bech32Error::Malformed`] when the checksum, separator or
/// character set is invalid.
pub fn decode(encoded: &str) -> Result<(String, Vec<u8>), Bech32Error> {
    let checked = CheckedHrpstring::new::<Bech32>(encoded.trim())
        .map_err(|e| Bech32Error::Malformed(e.to_string()))?;
    Ok((checked.hrp().to_lowercase(), checked.byte_iter().collect()))
}

/// Decodes a Bech32 string that must carry `expected_prefix` and a 32-byte
/// payload.
///
/// # Errors
///
/// Returns [`Bech32Error::Malformed`] for a bad checksum,
/// [`Bech32Error::PrefixMismatch`] for the wrong prefix and
/// [`Bech32Error::InvalidLength`] when the payload is not 32 bytes.
pub fn decode_32(expected_prefix: &str, encoded: &str) -> Result<[u8; 32], Bech32Error> {
    let (prefix, data) = decode(encoded)?;
    if prefix != expected_prefix {
        return Err(Bech32Error::PrefixMismatch {
            expected: expected_prefix.to_string(),
            found: prefix,
        });
    }

    let actual = data.len();
    data.try_into()
        .map_err(|_| Bech32Error::InvalidLength {
            expected: 32,
            actual,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NPUB: &str = "npub1z2aauyjavy9kfau3jn4cq3u0uvadjhkngxzv0uzh0e3pfuexdjcql0pyy7";
    const PUBKEY_HEX: &str = "12bbde125d610b64f79194eb80478fe33ad95ed34184c7f0577e6214f3266cb0";

    #[test]
    fn decodes_known_npub() {
        let bytes = decode_32(NPUB_PREFIX, NPUB).unwrap();
        assert_eq!(hex::encode(bytes), PUBKEY_HEX);
    }

    #[test]
    fn encodes_known_npub() {
        let bytes = hex::decode(PUBKEY_HEX).unwrap();
        assert_eq!(encode(NPUB_PREFIX, &bytes).unwrap(), NPUB);
    }

    #[test]
    fn uppercase_input_is_accepted() {
        let bytes = decode_32(NPUB_PREFIX, &NPUB.to_uppercase()).unwrap();
        assert_eq!(hex::encode(bytes), PUBKEY_HEX);
    }

    #[test]
    fn corrupted_checksum_is_malformed() {
        let mut corrupted = NPUB.to_string();
        corrupted.pop();
        corrupted.push('q');
        assert!(matches!(
            decode_32(NPUB_PREFIX, &corrupted),
            Err(Bech32Error::Malformed(_))
        ));
    }

    #[test]
    fn wrong_prefix_is_reported() {
        let err = decode_32(NSEC_PREFIX, NPUB).unwrap_err();
        assert_eq!(
            err,
            Bech32Error::PrefixMismatch {
                expected: "nsec".to_string(),
                found: "npub".to_string(),
            }
        );
    }

    #[test]
    fn short_payload_is_length_error() {
        let encoded = encode(NPUB_PREFIX, &[7u8; 20]).unwrap();
        assert_eq!(
            decode_32(NPUB_PREFIX, &encoded).unwrap_err(),
            Bech32Error::InvalidLength {
                expected: 32,
                actual: 20,
            }
        );
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        assert!(matches!(
            encode("", &[1, 2, 3]),
            Err(Bech32Error::InvalidPrefix(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(decode("not bech32"), Err(Bech32Error::Malformed(_))));
        assert!(matches!(decode(""), Err(Bech32Error::Malformed(_))));
    }
}
