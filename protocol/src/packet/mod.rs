//! # Wire Codecs
//!
//! Binary encodings the payment engine speaks on the wire:
//!
//! - **oer**: the OER primitives (fixed and variable-length integers,
//!   length-prefixed octet strings) every other format is built from.
//! - **ilp**: ILP Prepare, Fulfill and Reject packets, error codes and
//!   addresses.
//! - **stream**: the encrypted STREAM packet carried in the `data` field of
//!   ILP packets, and its frames.
//! - **receipt**: STREAM receipts, signed proofs of the total amount a
//!   receiver credited to a stream.
//!
//! ```text
//!   ILP Prepare ──data──► AES-256-GCM( STREAM packet { seq, amount, frames } )
//!   ILP Fulfill ──data──► AES-256-GCM( STREAM packet { seq, amount, frames } )
//!   ILP Reject  ──data──► AES-256-GCM( STREAM packet { seq, amount, frames } )
//! ```

pub mod ilp;
pub mod oer;
pub mod receipt;
pub mod stream;

use thiserror::Error;

use crate::crypto::CryptoError;

pub use ilp::{
    AmountTooLargeData, ErrorClass, IlpAddress, IlpErrorCode, IlpFulfill, IlpPrepare, IlpReject,
    IlpReply, PacketType,
};
pub use receipt::{create_receipt, decode_receipt, verify_receipt, Receipt};
pub use stream::{Frame, StreamErrorCode, StreamPacket};

/// Errors produced while encoding or decoding wire formats.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("length prefix of {0} bytes is not supported")]
    InvalidLengthPrefix(u8),

    #[error("variable-length integer does not fit in 64 bits")]
    VarUintTooLarge,

    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("unexpected packet type: expected {expected}, got {actual}")]
    UnexpectedPacketType { expected: u8, actual: u8 },

    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid ILP address: {0}")]
    InvalidAddress(String),

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("invalid error code")]
    InvalidErrorCode,

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    #[error("field too long: {0} bytes")]
    FieldTooLong(usize),

    #[error("invalid receipt")]
    InvalidReceipt,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
