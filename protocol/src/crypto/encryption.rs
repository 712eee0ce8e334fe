//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for STREAM packets and receiver connection
//! tokens. Each call draws a random 96-bit nonce from the OS CSPRNG; the
//! sequence cap in [`crate::config::MAX_SAFE_PACKET_COUNT`] keeps a single
//! key far below the nonce birthday bound.
//!
//! ## Wire format
//!
//! ```text
//! +----------+----------+----------------+
//! | nonce 12 | tag 16   | ciphertext ... |
//! +----------+----------+----------------+
//! ```
//!
//! The `aes-gcm` crate appends the tag after the ciphertext; STREAM puts it
//! in front, so both directions reorder the buffers.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Decryption failures are deliberately not distinguished: a wrong key and a
/// tampered ciphertext look the same to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Encrypt `plaintext` under `key`, returning `nonce || tag || ciphertext`.
pub fn encrypt(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - AES_TAG_LENGTH);

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`].
pub fn decrypt(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(CryptoError::CiphertextTooShort);
    }

    let (nonce_bytes, rest) = data.split_at(AES_NONCE_LENGTH);
    let (tag, ciphertext) = rest.split_at(AES_TAG_LENGTH);

    let mut sealed = Vec::with_capacity(rest.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [0x42u8; 32];
        let sealed = encrypt(&key, b"stream packet").unwrap();
        assert_eq!(sealed.len(), 12 + 16 + 13);
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"stream packet");
    }

    #[test]
    fn empty_plaintext() {
        let key = [1u8; 32];
        let sealed = encrypt(&key, b"").unwrap();
        assert_eq!(sealed.len(), 28);
        assert!(decrypt(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(&[1u8; 32], b"secret").unwrap();
        assert_eq!(decrypt(&[2u8; 32], &sealed), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_tag_fails() {
        let key = [3u8; 32];
        let mut sealed = encrypt(&key, b"secret").unwrap();
        sealed[AES_NONCE_LENGTH] ^= 0x01;
        assert_eq!(decrypt(&key, &sealed), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn short_input_rejected() {
        assert_eq!(decrypt(&[0u8; 32], &[0u8; 27]), Err(CryptoError::CiphertextTooShort));
    }

    #[test]
    fn nonces_are_random() {
        let key = [9u8; 32];
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a[..AES_NONCE_LENGTH], b[..AES_NONCE_LENGTH]);
    }
}
