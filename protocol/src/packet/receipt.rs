//! STREAM receipts.
//!
//! A receipt proves to a third party, who shares the receipt secret with the
//! receiver, the total amount credited to one stream:
//!
//! ```text
//! version u8 | nonce 16 | stream id var-uint | total received u64 | hmac-sha256 32
//! ```
//!
//! The HMAC covers every byte before it. Totals only grow, so the latest
//! receipt supersedes all earlier ones.

use bytes::{BufMut, Bytes, BytesMut};

use super::oer::{var_uint_size, OerReadExt, OerWriteExt};
use super::PacketError;
use crate::config::{RECEIPT_NONCE_LENGTH, RECEIPT_SECRET_LENGTH, RECEIPT_VERSION};
use crate::crypto::hmac_sha256;

/// Decoded receipt contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub nonce: [u8; RECEIPT_NONCE_LENGTH],
    pub stream_id: u64,
    pub total_received: u64,
}

/// Signs a receipt for `total_received` on `stream_id`.
pub fn create_receipt(
    nonce: &[u8; RECEIPT_NONCE_LENGTH],
    stream_id: u64,
    total_received: u64,
    secret: &[u8; RECEIPT_SECRET_LENGTH],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + RECEIPT_NONCE_LENGTH + var_uint_size(stream_id) + 8 + 32);
    buf.put_u8(RECEIPT_VERSION);
    buf.put_slice(nonce);
    buf.put_var_uint(stream_id);
    buf.put_u64(total_received);
    let mac = hmac_sha256(secret, &buf);
    buf.put_slice(&mac);
    buf.freeze()
}

/// Parses a receipt without checking its signature.
pub fn decode_receipt(receipt: &[u8]) -> Result<Receipt, PacketError> {
    let mut reader = receipt;
    let version = reader.read_u8()?;
    if version != RECEIPT_VERSION {
        return Err(PacketError::UnsupportedVersion(version));
    }
    let nonce = reader.read_array::<RECEIPT_NONCE_LENGTH>()?;
    let stream_id = reader.read_var_uint()?;
    let total_received = reader.read_u64()?;
    let _mac = reader.read_array::<32>()?;
    if !reader.is_empty() {
        return Err(PacketError::InvalidReceipt);
    }
    Ok(Receipt {
        nonce,
        stream_id,
        total_received,
    })
}

/// Parses a receipt and checks its HMAC against `secret`.
pub fn verify_receipt(
    receipt: &[u8],
    secret: &[u8; RECEIPT_SECRET_LENGTH],
) -> Result<Receipt, PacketError> {
    let decoded = decode_receipt(receipt)?;
    let (body, mac) = receipt.split_at(receipt.len() - 32);
    if hmac_sha256(secret, body) != mac {
        return Err(PacketError::InvalidReceipt);
    }
    Ok(decoded)
}
