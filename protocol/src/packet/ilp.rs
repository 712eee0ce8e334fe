//! # ILP Packets
//!
//! Interledger Prepare, Fulfill and Reject packets in their OER encoding.
//! Every packet is a one-byte type followed by a length-prefixed body:
//!
//! ```text
//! Prepare (12): amount u64 | expires_at 17 digits | condition 32 | destination | data
//! Fulfill (13): fulfillment 32 | data
//! Reject  (14): code 3 chars | triggered_by | message | data
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use super::oer::{OerReadExt, OerWriteExt};
use super::PacketError;
use crate::config::{CONDITION_LENGTH, MAX_ADDRESS_LENGTH, MAX_DATA_LENGTH};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const TIMESTAMP_LENGTH: usize = 17;

// ---------------------------------------------------------------------------
// Packet Type
// ---------------------------------------------------------------------------

/// ILP packet type discriminant. STREAM packets echo it to bind the encrypted
/// payload to the ILP packet that carries it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum PacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            12 => Ok(Self::Prepare),
            13 => Ok(Self::Fulfill),
            14 => Ok(Self::Reject),
            other => Err(PacketError::UnknownPacketType(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

const ADDRESS_SCHEMES: [&str; 9] = [
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3",
];

/// A validated ILP address, e.g. `g.us-fed.ach.acmebank.alice`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IlpAddress(String);

impl IlpAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, PacketError> {
        let address = address.into();
        if is_valid_address(&address) {
            Ok(Self(address))
        } else {
            Err(PacketError::InvalidAddress(address))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends `.segment` to this address.
    pub fn with_suffix(&self, segment: &str) -> Result<Self, PacketError> {
        Self::new(format!("{}.{}", self.0, segment))
    }

    /// If `self` is a descendant of `parent`, the remainder after `parent.`.
    pub fn strip_parent(&self, parent: &IlpAddress) -> Option<&str> {
        self.0
            .strip_prefix(parent.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl fmt::Display for IlpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IlpAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_address(address: &str) -> bool {
    if address.is_empty() || address.len() > MAX_ADDRESS_LENGTH {
        return false;
    }
    let mut segments = address.split('.');
    let scheme_ok = segments
        .next()
        .map(|scheme| ADDRESS_SCHEMES.contains(&scheme) || scheme == "local")
        .unwrap_or(false);
    let mut rest = segments.peekable();
    scheme_ok
        && rest.peek().is_some()
        && rest.all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'~' | b'-'))
        })
}

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

/// Whether a reject is final, temporary or relative to the packet's terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Final,
    Temporary,
    Relative,
    Unknown,
}

/// Three-character ILP error code such as `F08` or `T04`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IlpErrorCode([u8; 3]);

impl IlpErrorCode {
    pub const F00_BAD_REQUEST: Self = Self(*b"F00");
    pub const F01_INVALID_PACKET: Self = Self(*b"F01");
    pub const F02_UNREACHABLE: Self = Self(*b"F02");
    pub const F03_INVALID_AMOUNT: Self = Self(*b"F03");
    pub const F04_INSUFFICIENT_DESTINATION_AMOUNT: Self = Self(*b"F04");
    pub const F05_WRONG_CONDITION: Self = Self(*b"F05");
    pub const F06_UNEXPECTED_PAYMENT: Self = Self(*b"F06");
    pub const F07_CANNOT_RECEIVE: Self = Self(*b"F07");
    pub const F08_AMOUNT_TOO_LARGE: Self = Self(*b"F08");
    pub const F99_APPLICATION_ERROR: Self = Self(*b"F99");
    pub const T00_INTERNAL_ERROR: Self = Self(*b"T00");
    pub const T01_PEER_UNREACHABLE: Self = Self(*b"T01");
    pub const T02_PEER_BUSY: Self = Self(*b"T02");
    pub const T03_CONNECTOR_BUSY: Self = Self(*b"T03");
    pub const T04_INSUFFICIENT_LIQUIDITY: Self = Self(*b"T04");
    pub const T05_RATE_LIMITED: Self = Self(*b"T05");
    pub const T99_APPLICATION_ERROR: Self = Self(*b"T99");
    pub const R00_TRANSFER_TIMED_OUT: Self = Self(*b"R00");
    pub const R01_INSUFFICIENT_SOURCE_AMOUNT: Self = Self(*b"R01");
    pub const R02_INSUFFICIENT_TIMEOUT: Self = Self(*b"R02");
    pub const R99_APPLICATION_ERROR: Self = Self(*b"R99");

    pub fn new(code: [u8; 3]) -> Result<Self, PacketError> {
        if code.iter().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(code))
        } else {
            Err(PacketError::InvalidErrorCode)
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.0[0] {
            b'F' => ErrorClass::Final,
            b'T' => ErrorClass::Temporary,
            b'R' => ErrorClass::Relative,
            _ => ErrorClass::Unknown,
        }
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for IlpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IlpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IlpErrorCode({})", self.as_str())
    }
}

/// Data of an F08 reject: the amount the rejecting connector received and
/// the maximum it would have forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AmountTooLargeData {
    pub received_amount: u64,
    pub maximum_amount: u64,
}

impl AmountTooLargeData {
    pub const LENGTH: usize = 16;

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LENGTH);
        buf.put_u64(self.received_amount);
        buf.put_u64(self.maximum_amount);
        buf.freeze()
    }

    /// Parses F08 data. Anything other than exactly 16 bytes is not metadata.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != Self::LENGTH {
            return None;
        }
        let mut reader = data;
        Some(Self {
            received_amount: reader.read_u64().ok()?,
            maximum_amount: reader.read_u64().ok()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// A conditional transfer offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IlpPrepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; CONDITION_LENGTH],
    pub destination: IlpAddress,
    pub data: Bytes,
}

/// Acceptance of a prepare, revealing the condition's preimage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IlpFulfill {
    pub fulfillment: [u8; 32],
    pub data: Bytes,
}

/// Refusal of a prepare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IlpReject {
    pub code: IlpErrorCode,
    pub triggered_by: String,
    pub message: String,
    pub data: Bytes,
}

/// The response to a prepare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IlpReply {
    Fulfill(IlpFulfill),
    Reject(IlpReject),
}

impl IlpPrepare {
    pub fn to_bytes(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(64 + self.destination.as_str().len() + self.data.len());
        body.put_u64(self.amount);
        body.put_slice(format_timestamp(&self.expires_at).as_bytes());
        body.put_slice(&self.execution_condition);
        body.put_var_octet_string(self.destination.as_str().as_bytes());
        body.put_var_octet_string(&self.data);
        envelope(PacketType::Prepare, &body)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut body = open_envelope(bytes, PacketType::Prepare)?;
        let amount = body.read_u64()?;
        let timestamp = body.read_bytes(TIMESTAMP_LENGTH)?;
        let expires_at = parse_timestamp(&timestamp)?;
        let execution_condition = body.read_array::<CONDITION_LENGTH>()?;
        let destination = body.read_utf8_string()?;
        let destination = IlpAddress::new(destination)?;
        let data = read_data(&mut body)?;
        Ok(Self {
            amount,
            expires_at,
            execution_condition,
            destination,
            data,
        })
    }
}

impl IlpFulfill {
    pub fn to_bytes(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(40 + self.data.len());
        body.put_slice(&self.fulfillment);
        body.put_var_octet_string(&self.data);
        envelope(PacketType::Fulfill, &body)
    }
}

impl IlpReject {
    pub fn to_bytes(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(16 + self.message.len() + self.data.len());
        body.put_slice(self.code.as_bytes());
        body.put_var_octet_string(self.triggered_by.as_bytes());
        body.put_var_octet_string(self.message.as_bytes());
        body.put_var_octet_string(&self.data);
        envelope(PacketType::Reject, &body)
    }
}

impl IlpReply {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Fulfill(fulfill) => fulfill.to_bytes(),
            Self::Reject(reject) => reject.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let packet_type = bytes.first().copied().ok_or(PacketError::UnexpectedEnd)?;
        match PacketType::try_from(packet_type)? {
            PacketType::Fulfill => {
                let mut body = open_envelope(bytes, PacketType::Fulfill)?;
                let fulfillment = body.read_array::<32>()?;
                let data = read_data(&mut body)?;
                Ok(Self::Fulfill(IlpFulfill { fulfillment, data }))
            }
            PacketType::Reject => {
                let mut body = open_envelope(bytes, PacketType::Reject)?;
                let code = IlpErrorCode::new(body.read_array::<3>()?)?;
                let triggered_by = body.read_utf8_string()?;
                let message = String::from_utf8_lossy(&body.read_var_octet_string()?).into_owned();
                let data = read_data(&mut body)?;
                Ok(Self::Reject(IlpReject {
                    code,
                    triggered_by,
                    message,
                    data,
                }))
            }
            PacketType::Prepare => Err(PacketError::UnexpectedPacketType {
                expected: PacketType::Fulfill as u8,
                actual: packet_type,
            }),
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Self::Fulfill(fulfill) => &fulfill.data,
            Self::Reject(reject) => &reject.data,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Fulfill(_) => PacketType::Fulfill,
            Self::Reject(_) => PacketType::Reject,
        }
    }
}

impl From<IlpFulfill> for IlpReply {
    fn from(fulfill: IlpFulfill) -> Self {
        Self::Fulfill(fulfill)
    }
}

impl From<IlpReject> for IlpReply {
    fn from(reject: IlpReject) -> Self {
        Self::Reject(reject)
    }
}

fn envelope(packet_type: PacketType, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len() + 4);
    out.put_u8(packet_type as u8);
    out.put_var_octet_string(body);
    out.freeze()
}

fn open_envelope(bytes: &[u8], expected: PacketType) -> Result<Bytes, PacketError> {
    let mut reader = bytes;
    let actual = reader.read_u8()?;
    if actual != expected as u8 {
        return Err(PacketError::UnexpectedPacketType {
            expected: expected as u8,
            actual,
        });
    }
    reader.read_var_octet_string()
}

fn read_data(body: &mut Bytes) -> Result<Bytes, PacketError> {
    let data = body.read_var_octet_string()?;
    if data.len() > MAX_DATA_LENGTH {
        return Err(PacketError::FieldTooLong(data.len()));
    }
    Ok(data)
}

fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &[u8]) -> Result<DateTime<Utc>, PacketError> {
    let text = std::str::from_utf8(raw).map_err(|_| PacketError::InvalidTimestamp)?;
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|_| PacketError::InvalidTimestamp)?;
    Ok(Utc.from_utc_datetime(&naive))
}
