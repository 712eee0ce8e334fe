//! # STREAM Packets and Frames
//!
//! The STREAM packet rides encrypted inside the `data` field of every ILP
//! packet of a connection:
//!
//! ```text
//! version u8 | ilp packet type u8 | sequence var-uint | prepare amount var-uint
//! | frame count var-uint | { frame type u8 | frame contents var-octets } ...
//! ```
//!
//! The prepare amount is the sender's declared minimum on a Prepare and the
//! amount the receiver actually got on a Fulfill or Reject. Frames whose type
//! is unknown are skipped, and trailing bytes inside a known frame are
//! ignored, so newer peers can add fields.

use bytes::{BufMut, Bytes, BytesMut};

use super::ilp::PacketType;
use super::oer::{OerReadExt, OerWriteExt};
use super::PacketError;
use crate::config::{AES_KEY_LENGTH, STREAM_VERSION};
use crate::crypto;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Reason carried by connection and stream close frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamErrorCode {
    NoError,
    InternalError,
    EndpointBusy,
    FlowControlError,
    StreamIdError,
    StreamStateError,
    FrameFormatError,
    ProtocolViolation,
    ApplicationError,
    Other(u8),
}

impl StreamErrorCode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::NoError => 0x01,
            Self::InternalError => 0x02,
            Self::EndpointBusy => 0x03,
            Self::FlowControlError => 0x04,
            Self::StreamIdError => 0x05,
            Self::StreamStateError => 0x06,
            Self::FrameFormatError => 0x07,
            Self::ProtocolViolation => 0x08,
            Self::ApplicationError => 0x09,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for StreamErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::NoError,
            0x02 => Self::InternalError,
            0x03 => Self::EndpointBusy,
            0x04 => Self::FlowControlError,
            0x05 => Self::StreamIdError,
            0x06 => Self::StreamStateError,
            0x07 => Self::FrameFormatError,
            0x08 => Self::ProtocolViolation,
            0x09 => Self::ApplicationError,
            other => Self::Other(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

mod frame_type {
    pub const CONNECTION_CLOSE: u8 = 0x01;
    pub const CONNECTION_NEW_ADDRESS: u8 = 0x02;
    pub const CONNECTION_MAX_DATA: u8 = 0x03;
    pub const CONNECTION_DATA_BLOCKED: u8 = 0x04;
    pub const CONNECTION_MAX_STREAM_ID: u8 = 0x05;
    pub const CONNECTION_STREAM_ID_BLOCKED: u8 = 0x06;
    pub const CONNECTION_ASSET_DETAILS: u8 = 0x07;
    pub const STREAM_CLOSE: u8 = 0x10;
    pub const STREAM_MONEY: u8 = 0x11;
    pub const STREAM_MAX_MONEY: u8 = 0x12;
    pub const STREAM_MONEY_BLOCKED: u8 = 0x13;
    pub const STREAM_DATA: u8 = 0x14;
    pub const STREAM_MAX_DATA: u8 = 0x15;
    pub const STREAM_DATA_BLOCKED: u8 = 0x16;
    pub const STREAM_RECEIPT: u8 = 0x17;
}

/// A STREAM frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    ConnectionClose {
        code: StreamErrorCode,
        message: String,
    },
    ConnectionNewAddress {
        source_account: String,
    },
    ConnectionMaxData {
        max_offset: u64,
    },
    ConnectionDataBlocked {
        max_offset: u64,
    },
    ConnectionMaxStreamId {
        max_stream_id: u64,
    },
    ConnectionStreamIdBlocked {
        max_stream_id: u64,
    },
    ConnectionAssetDetails {
        source_asset_code: String,
        source_asset_scale: u8,
    },
    StreamClose {
        stream_id: u64,
        code: StreamErrorCode,
        message: String,
    },
    StreamMoney {
        stream_id: u64,
        shares: u64,
    },
    StreamMaxMoney {
        stream_id: u64,
        receive_max: u64,
        total_received: u64,
    },
    StreamMoneyBlocked {
        stream_id: u64,
        send_max: u64,
        total_sent: u64,
    },
    StreamData {
        stream_id: u64,
        offset: u64,
        data: Bytes,
    },
    StreamMaxData {
        stream_id: u64,
        max_offset: u64,
    },
    StreamDataBlocked {
        stream_id: u64,
        max_offset: u64,
    },
    StreamReceipt {
        stream_id: u64,
        receipt: Bytes,
    },
}

impl Frame {
    fn type_id(&self) -> u8 {
        use frame_type::*;
        match self {
            Self::ConnectionClose { .. } => CONNECTION_CLOSE,
            Self::ConnectionNewAddress { .. } => CONNECTION_NEW_ADDRESS,
            Self::ConnectionMaxData { .. } => CONNECTION_MAX_DATA,
            Self::ConnectionDataBlocked { .. } => CONNECTION_DATA_BLOCKED,
            Self::ConnectionMaxStreamId { .. } => CONNECTION_MAX_STREAM_ID,
            Self::ConnectionStreamIdBlocked { .. } => CONNECTION_STREAM_ID_BLOCKED,
            Self::ConnectionAssetDetails { .. } => CONNECTION_ASSET_DETAILS,
            Self::StreamClose { .. } => STREAM_CLOSE,
            Self::StreamMoney { .. } => STREAM_MONEY,
            Self::StreamMaxMoney { .. } => STREAM_MAX_MONEY,
            Self::StreamMoneyBlocked { .. } => STREAM_MONEY_BLOCKED,
            Self::StreamData { .. } => STREAM_DATA,
            Self::StreamMaxData { .. } => STREAM_MAX_DATA,
            Self::StreamDataBlocked { .. } => STREAM_DATA_BLOCKED,
            Self::StreamReceipt { .. } => STREAM_RECEIPT,
        }
    }

    fn write_contents(&self, buf: &mut BytesMut) {
        match self {
            Self::ConnectionClose { code, message } => {
                buf.put_u8(code.as_u8());
                buf.put_var_octet_string(message.as_bytes());
            }
            Self::ConnectionNewAddress { source_account } => {
                buf.put_var_octet_string(source_account.as_bytes());
            }
            Self::ConnectionMaxData { max_offset } | Self::ConnectionDataBlocked { max_offset } => {
                buf.put_var_uint(*max_offset);
            }
            Self::ConnectionMaxStreamId { max_stream_id }
            | Self::ConnectionStreamIdBlocked { max_stream_id } => {
                buf.put_var_uint(*max_stream_id);
            }
            Self::ConnectionAssetDetails {
                source_asset_code,
                source_asset_scale,
            } => {
                buf.put_var_octet_string(source_asset_code.as_bytes());
                buf.put_u8(*source_asset_scale);
            }
            Self::StreamClose {
                stream_id,
                code,
                message,
            } => {
                buf.put_var_uint(*stream_id);
                buf.put_u8(code.as_u8());
                buf.put_var_octet_string(message.as_bytes());
            }
            Self::StreamMoney { stream_id, shares } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_uint(*shares);
            }
            Self::StreamMaxMoney {
                stream_id,
                receive_max,
                total_received,
            } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_uint(*receive_max);
                buf.put_var_uint(*total_received);
            }
            Self::StreamMoneyBlocked {
                stream_id,
                send_max,
                total_sent,
            } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_uint(*send_max);
                buf.put_var_uint(*total_sent);
            }
            Self::StreamData {
                stream_id,
                offset,
                data,
            } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_uint(*offset);
                buf.put_var_octet_string(data);
            }
            Self::StreamMaxData {
                stream_id,
                max_offset,
            }
            | Self::StreamDataBlocked {
                stream_id,
                max_offset,
            } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_uint(*max_offset);
            }
            Self::StreamReceipt { stream_id, receipt } => {
                buf.put_var_uint(*stream_id);
                buf.put_var_octet_string(receipt);
            }
        }
    }

    /// Parses one frame's contents. `Ok(None)` for frame types this crate
    /// does not know.
    fn read(type_id: u8, mut contents: Bytes) -> Result<Option<Self>, PacketError> {
        use frame_type::*;
        let c = &mut contents;
        let frame = match type_id {
            CONNECTION_CLOSE => Self::ConnectionClose {
                code: c.read_u8()?.into(),
                message: c.read_utf8_string()?,
            },
            CONNECTION_NEW_ADDRESS => Self::ConnectionNewAddress {
                source_account: c.read_utf8_string()?,
            },
            CONNECTION_MAX_DATA => Self::ConnectionMaxData {
                max_offset: c.read_var_uint()?,
            },
            CONNECTION_DATA_BLOCKED => Self::ConnectionDataBlocked {
                max_offset: c.read_var_uint()?,
            },
            CONNECTION_MAX_STREAM_ID => Self::ConnectionMaxStreamId {
                max_stream_id: c.read_var_uint()?,
            },
            CONNECTION_STREAM_ID_BLOCKED => Self::ConnectionStreamIdBlocked {
                max_stream_id: c.read_var_uint()?,
            },
            CONNECTION_ASSET_DETAILS => Self::ConnectionAssetDetails {
                source_asset_code: c.read_utf8_string()?,
                source_asset_scale: c.read_u8()?,
            },
            STREAM_CLOSE => Self::StreamClose {
                stream_id: c.read_var_uint()?,
                code: c.read_u8()?.into(),
                message: c.read_utf8_string()?,
            },
            STREAM_MONEY => Self::StreamMoney {
                stream_id: c.read_var_uint()?,
                shares: c.read_var_uint()?,
            },
            STREAM_MAX_MONEY => Self::StreamMaxMoney {
                stream_id: c.read_var_uint()?,
                receive_max: c.read_var_uint()?,
                total_received: c.read_var_uint()?,
            },
            STREAM_MONEY_BLOCKED => Self::StreamMoneyBlocked {
                stream_id: c.read_var_uint()?,
                send_max: c.read_var_uint()?,
                total_sent: c.read_var_uint()?,
            },
            STREAM_DATA => Self::StreamData {
                stream_id: c.read_var_uint()?,
                offset: c.read_var_uint()?,
                data: c.read_var_octet_string()?,
            },
            STREAM_MAX_DATA => Self::StreamMaxData {
                stream_id: c.read_var_uint()?,
                max_offset: c.read_var_uint()?,
            },
            STREAM_DATA_BLOCKED => Self::StreamDataBlocked {
                stream_id: c.read_var_uint()?,
                max_offset: c.read_var_uint()?,
            },
            STREAM_RECEIPT => Self::StreamReceipt {
                stream_id: c.read_var_uint()?,
                receipt: c.read_var_octet_string()?,
            },
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// Decrypted STREAM packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamPacket {
    pub sequence: u64,
    pub ilp_packet_type: PacketType,
    pub prepare_amount: u64,
    pub frames: Vec<Frame>,
}

impl StreamPacket {
    pub fn to_plaintext(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.frames.len() * 16);
        buf.put_u8(STREAM_VERSION);
        buf.put_u8(self.ilp_packet_type as u8);
        buf.put_var_uint(self.sequence);
        buf.put_var_uint(self.prepare_amount);
        buf.put_var_uint(self.frames.len() as u64);
        let mut contents = BytesMut::new();
        for frame in &self.frames {
            contents.clear();
            frame.write_contents(&mut contents);
            buf.put_u8(frame.type_id());
            buf.put_var_octet_string(&contents);
        }
        buf.freeze()
    }

    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, PacketError> {
        let mut reader = plaintext;
        let version = reader.read_u8()?;
        if version != STREAM_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }
        let ilp_packet_type = PacketType::try_from(reader.read_u8()?)?;
        let sequence = reader.read_var_uint()?;
        let prepare_amount = reader.read_var_uint()?;
        let frame_count = reader.read_var_uint()?;

        let mut frames = Vec::new();
        for _ in 0..frame_count {
            let type_id = reader.read_u8()?;
            let contents = reader.read_var_octet_string()?;
            if let Some(frame) = Frame::read(type_id, contents)? {
                frames.push(frame);
            }
        }

        Ok(Self {
            sequence,
            ilp_packet_type,
            prepare_amount,
            frames,
        })
    }

    /// Serializes and encrypts this packet for the `data` field of an ILP packet.
    pub fn encrypt(&self, key: &[u8; AES_KEY_LENGTH]) -> Result<Bytes, PacketError> {
        Ok(crypto::encrypt(key, &self.to_plaintext())?.into())
    }

    pub fn decrypt(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Self, PacketError> {
        let plaintext = crypto::decrypt(key, data)?;
        Self::from_plaintext(&plaintext)
    }
}
