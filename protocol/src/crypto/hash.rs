//! # Hashing and Key Derivation
//!
//! STREAM derives every key it uses from a 32-byte shared secret with
//! HMAC-SHA256 and a fixed label, so both endpoints can compute the same
//! encryption and fulfillment keys without exchanging anything else.
//!
//! ## Fulfillments
//!
//! A fulfillable packet's fulfillment is `HMAC(fulfillment_key, data)` where
//! `data` is the encrypted STREAM payload of the prepare. The execution
//! condition is `SHA-256(fulfillment)`. Only a party holding the shared
//! secret, and having seen the exact payload, can fulfill.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::{
    CONDITION_LENGTH, ENCRYPTION_KEY_STRING, FULFILLMENT_KEY_STRING, SECRET_LENGTH,
};

type HmacSha256 = Hmac<Sha256>;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute HMAC-SHA256 of `message` under `key`.
///
/// HMAC accepts keys of any length, so this cannot fail.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Fulfillment for a packet carrying `data`.
pub fn generate_fulfillment(fulfillment_key: &[u8; SECRET_LENGTH], data: &[u8]) -> [u8; 32] {
    hmac_sha256(fulfillment_key, data)
}

/// Execution condition for a fulfillment.
pub fn generate_condition(fulfillment: &[u8; 32]) -> [u8; CONDITION_LENGTH] {
    sha256(fulfillment)
}

/// A condition nobody can fulfill. Used for probe packets.
pub fn generate_random_condition() -> [u8; CONDITION_LENGTH] {
    let mut condition = [0u8; CONDITION_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut condition);
    condition
}

/// The pair of keys derived from one shared secret.
#[derive(Clone)]
pub struct StreamKeys {
    pub encryption_key: [u8; SECRET_LENGTH],
    pub fulfillment_key: [u8; SECRET_LENGTH],
}

impl StreamKeys {
    pub fn derive(shared_secret: &[u8; SECRET_LENGTH]) -> Self {
        Self {
            encryption_key: hmac_sha256(shared_secret, ENCRYPTION_KEY_STRING),
            fulfillment_key: hmac_sha256(shared_secret, FULFILLMENT_KEY_STRING),
        }
    }
}

impl std::fmt::Debug for StreamKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamKeys(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn condition_matches_fulfillment() {
        let keys = StreamKeys::derive(&[7u8; 32]);
        let fulfillment = generate_fulfillment(&keys.fulfillment_key, b"payload");
        let condition = generate_condition(&fulfillment);
        assert_eq!(condition, sha256(&fulfillment));
        assert_ne!(condition, generate_random_condition());
    }

    #[test]
    fn derived_keys_are_distinct() {
        let keys = StreamKeys::derive(&[1u8; 32]);
        assert_ne!(keys.encryption_key, keys.fulfillment_key);
        let same = StreamKeys::derive(&[1u8; 32]);
        assert_eq!(keys.encryption_key, same.encryption_key);
    }
}
