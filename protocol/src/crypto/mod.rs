//! # Cryptographic Primitives for STREAM
//!
//! Everything security-related in the payment engine flows through here:
//!
//! - **SHA-256** for execution conditions and connection ids.
//! - **HMAC-SHA256** for key derivation, fulfillments and receipts.
//! - **AES-256-GCM** for STREAM packet and connection-token encryption.
//!
//! All of it is a thin, type-safe wrapper around the RustCrypto crates.

pub mod encryption;
pub mod hash;

pub use encryption::{decrypt, encrypt, CryptoError};
pub use hash::{
    generate_condition, generate_fulfillment, generate_random_condition, hmac_sha256, sha256,
    StreamKeys,
};
