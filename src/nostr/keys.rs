//! Key generation and BIP-340 Schnorr signing.
//!
//! Secret keys are drawn by rejection sampling: 32 bytes from the OS random
//! source are accepted only if, read as a big-endian integer, they are
//! non-zero and strictly below [`MAX_SEC`]. Anything else is discarded and a
//! fresh candidate is drawn, which keeps the distribution uniform over the
//! valid range.

use std::sync::LazyLock;

use nostr::secp256k1::{
    schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::nostr::error::{NostrError, Result};
use crate::nostr::nip19::{self, NSEC_PREFIX};
use crate::nostr::pubkey::PubKey;
use crate::nostr::types::Signature;

/// Global secp256k1 context for cryptographic operations.
///
/// Creating a `Secp256k1` context precomputes tables for signing and
/// verification, so one shared context is initialized once and reused.
pub static SECP: LazyLock<Secp256k1<nostr::secp256k1::All>> = LazyLock::new(Secp256k1::new);

/// Exclusive upper bound for secret scalars (the secp256k1 group order).
pub const MAX_SEC: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

/// Returns true if `candidate` is a usable secret scalar.
///
/// Byte arrays compare lexicographically, which for equal-length arrays is
/// the big-endian integer order.
#[must_use]
pub fn is_valid_secret(candidate: &[u8; 32]) -> bool {
    candidate.iter().any(|&b| b != 0) && candidate < &MAX_SEC
}

/// A secp256k1 keypair used to sign events.
///
/// The secret key bytes are zeroized when dropped and never appear in
/// `Debug` output.
///
/// # Example
///
/// ```
/// use ostrich_core::nostr::KeyPair;
///
/// let keypair = KeyPair::generate().unwrap();
/// assert_eq!(keypair.public_key().to_hex().len(), 64);
/// assert!(keypair.export_nsec().unwrap().starts_with("nsec1"));
/// ```
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    /// The secret key bytes (zeroized on drop).
    secret_bytes: [u8; 32],

    /// Cached x-only public key.
    #[zeroize(skip)]
    public_key: PubKey,
}

impl KeyPair {
    /// Generates a new keypair from the operating system random source.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::EntropyUnavailable`] if the random source fails.
    /// There is no safe fallback; callers should treat this as fatal.
    pub fn generate() -> Result<Self> {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generates a keypair by rejection sampling from `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::EntropyUnavailable`] if `rng` fails.
    pub fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut candidate = Zeroizing::new([0u8; 32]);
        loop {
            rng.try_fill_bytes(&mut candidate[..])
                .map_err(|e| NostrError::EntropyUnavailable(e.to_string()))?;
            if is_valid_secret(&candidate) {
                return Self::from_secret_bytes(*candidate);
            }
        }
    }

    /// Creates a keypair from raw secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are zero or not below [`MAX_SEC`].
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Result<Self> {
        let keypair = secp_keypair(&secret_bytes)?;
        let (public_key, _parity) = keypair.x_only_public_key();

        Ok(Self {
            secret_bytes,
            public_key: PubKey(public_key.serialize()),
        })
    }

    /// Imports a keypair from an `nsec1...` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the nsec is malformed or not a valid secret.
    pub fn from_nsec(nsec: &str) -> Result<Self> {
        let secret = Zeroizing::new(nip19::decode_32(NSEC_PREFIX, nsec)?);
        Self::from_secret_bytes(*secret)
    }

    /// Exports the secret key as `nsec1...`.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn export_nsec(&self) -> Result<String> {
        Ok(nip19::encode(NSEC_PREFIX, &self.secret_bytes)?)
    }

    /// Returns the public key.
    #[must_use]
    pub const fn public_key(&self) -> PubKey {
        self.public_key
    }

    /// Returns the public key as `npub1...`.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn npub(&self) -> Result<String> {
        self.public_key.npub()
    }

    /// Signs a 32-byte message hash with BIP-340 using fresh auxiliary
    /// randomness from the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the random source fails.
    pub fn sign(&self, message_hash: &[u8; 32]) -> Result<Signature> {
        let mut aux = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut aux[..])
            .map_err(|e| NostrError::EntropyUnavailable(e.to_string()))?;
        self.with_keypair(|keypair| {
            let message = Message::from_digest(*message_hash);
            SECP.sign_schnorr_with_aux_rand(&message, keypair, &aux)
        })
    }

    /// Signs without auxiliary randomness, so the same key and hash always
    /// give the same signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored secret cannot be rebuilt.
    pub fn sign_deterministic(&self, message_hash: &[u8; 32]) -> Result<Signature> {
        self.with_keypair(|keypair| {
            let message = Message::from_digest(*message_hash);
            SECP.sign_schnorr_no_aux_rand(&message, keypair)
        })
    }

    fn with_keypair(
        &self,
        sign: impl FnOnce(&Keypair) -> schnorr::Signature,
    ) -> Result<Signature> {
        let mut secret_bytes_copy = self.secret_bytes;
        let result = secp_keypair(&secret_bytes_copy)
            .map_err(|e| NostrError::Signing(e.to_string()))
            .map(|keypair| Signature(sign(&keypair).serialize()));
        secret_bytes_copy.zeroize();
        result
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("KeyPair")
            .field("pubkey", &self.public_key.to_hex())
            .finish()
    }
}

fn secp_keypair(secret_bytes: &[u8; 32]) -> Result<Keypair> {
    if !is_valid_secret(secret_bytes) {
        return Err(NostrError::KeyDerivation(
            "secret scalar out of range".to_string(),
        ));
    }
    let secret_key = SecretKey::from_slice(secret_bytes)
        .map_err(|e| NostrError::KeyDerivation(e.to_string()))?;
    Ok(Keypair::from_secret_key(&SECP, &secret_key))
}

/// Verifies a BIP-340 signature over a 32-byte message hash.
///
/// Never fails: malformed lengths, keys that are not on the curve and bad
/// signatures all return `false`.
#[must_use]
pub fn verify(signature: &[u8], message_hash: &[u8], pubkey: &[u8]) -> bool {
    let Ok(digest) = <[u8; 32]>::try_from(message_hash) else {
        return false;
    };
    let Ok(signature) = schnorr::Signature::from_slice(signature) else {
        return false;
    };
    let Ok(pubkey) = XOnlyPublicKey::from_slice(pubkey) else {
        return false;
    };
    let message = Message::from_digest(digest);
    SECP.verify_schnorr(&signature, &message, &pubkey).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSEC: &str = "nsec16pzcl7krecytvxdj28wlzver8tuwfvfs6wytjn7plyyvp6acdkzq705x7t";
    const NPUB: &str = "npub1z2aauyjavy9kfau3jn4cq3u0uvadjhkngxzv0uzh0e3pfuexdjcql0pyy7";

    /// Replays scripted 32-byte blocks, then fails.
    struct ScriptedRng {
        blocks: Vec<[u8; 32]>,
    }

    impl RngCore for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.try_fill_bytes(dest).unwrap();
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            if self.blocks.is_empty() {
                return Err(rand::Error::new("script exhausted"));
            }
            dest.copy_from_slice(&self.blocks.remove(0));
            Ok(())
        }
    }

    #[test]
    fn known_nsec_derives_known_npub() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        assert_eq!(keypair.npub().unwrap(), NPUB);
    }

    #[test]
    fn nsec_roundtrip() {
        let original = KeyPair::generate().unwrap();
        let nsec = original.export_nsec().unwrap();
        assert!(nsec.starts_with("nsec1"));
        let imported = KeyPair::from_nsec(&nsec).unwrap();
        assert_eq!(original.public_key(), imported.public_key());
    }

    #[test]
    fn rejection_sampling_skips_out_of_range_candidates() {
        let mut one = [0u8; 32];
        one[31] = 1;
        let mut rng = ScriptedRng {
            blocks: vec![MAX_SEC, [0xFF; 32], [0u8; 32], one],
        };
        let keypair = KeyPair::generate_with_rng(&mut rng).unwrap();
        assert_eq!(
            keypair.public_key().to_hex(),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert!(rng.blocks.is_empty());
    }

    #[test]
    fn random_source_failure_is_reported() {
        let mut rng = ScriptedRng { blocks: vec![] };
        assert!(matches!(
            KeyPair::generate_with_rng(&mut rng),
            Err(NostrError::EntropyUnavailable(_))
        ));
    }

    #[test]
    fn max_sec_boundaries() {
        assert!(!is_valid_secret(&MAX_SEC));
        let mut below = MAX_SEC;
        below[31] -= 1;
        assert!(is_valid_secret(&below));
        assert!(KeyPair::from_secret_bytes(below).is_ok());
        assert!(KeyPair::from_secret_bytes(MAX_SEC).is_err());
        assert!(KeyPair::from_secret_bytes([0u8; 32]).is_err());
    }

    #[test]
    fn sign_then_verify() {
        let keypair = KeyPair::generate().unwrap();
        let hash = [0x42u8; 32];
        let sig = keypair.sign(&hash).unwrap();
        assert!(verify(sig.as_bytes(), &hash, keypair.public_key().as_bytes()));
    }

    #[test]
    fn deterministic_signatures_repeat() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let hash = [7u8; 32];
        let a = keypair.sign_deterministic(&hash).unwrap();
        let b = keypair.sign_deterministic(&hash).unwrap();
        assert_eq!(a, b);
        assert!(verify(a.as_bytes(), &hash, keypair.public_key().as_bytes()));
    }

    #[test]
    fn verify_rejects_wrong_message_and_key() {
        let keypair = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let sig = keypair.sign(&[1u8; 32]).unwrap();
        assert!(!verify(sig.as_bytes(), &[2u8; 32], keypair.public_key().as_bytes()));
        assert!(!verify(sig.as_bytes(), &[1u8; 32], other.public_key().as_bytes()));
    }

    #[test]
    fn verify_never_panics_on_malformed_input() {
        assert!(!verify(&[], &[], &[]));
        assert!(!verify(&[0u8; 64], &[0u8; 31], &[0u8; 32]));
        assert!(!verify(&[0u8; 63], &[0u8; 32], &[0u8; 32]));
        // 0xFF..FF is not a valid x coordinate
        assert!(!verify(&[1u8; 64], &[0u8; 32], &[0xFFu8; 32]));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keypair = KeyPair::from_nsec(NSEC).unwrap();
        let debug_output = format!("{keypair:?}");
        assert!(debug_output.contains(&keypair.public_key().to_hex()));
        assert!(!debug_output.contains("d0458ffac3ce08b6"));
    }

    #[test]
    fn implements_zeroize_on_drop() {
        fn assert_zeroize_on_drop<T: ZeroizeOnDrop>() {}
        assert_zeroize_on_drop::<KeyPair>();
    }
}
