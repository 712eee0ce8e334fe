//! ILP replies carrying an encrypted STREAM response.

use bytes::Bytes;
use tracing::warn;

use crate::config::AES_KEY_LENGTH;
use crate::packet::{
    Frame, IlpAddress, IlpErrorCode, IlpFulfill, IlpReject, IlpReply, PacketType, StreamPacket,
};

/// Accumulates the STREAM response to one prepare.
///
/// Until the prepare is authenticated there is no encryption key and replies
/// carry no data, so the sender learns nothing from them.
#[derive(Clone)]
pub(crate) struct ReplyBuilder {
    server_address: IlpAddress,
    encryption_key: Option<[u8; AES_KEY_LENGTH]>,
    sequence: u64,
    received_amount: u64,
    frames: Vec<Frame>,
}

impl ReplyBuilder {
    pub(crate) fn new(server_address: IlpAddress) -> Self {
        Self {
            server_address,
            encryption_key: None,
            sequence: 0,
            received_amount: 0,
            frames: Vec::new(),
        }
    }

    pub(crate) fn authenticated(
        &mut self,
        encryption_key: [u8; AES_KEY_LENGTH],
        sequence: u64,
        received_amount: u64,
    ) -> &mut Self {
        self.encryption_key = Some(encryption_key);
        self.sequence = sequence;
        self.received_amount = received_amount;
        self
    }

    pub(crate) fn add_frame(&mut self, frame: Frame) -> &mut Self {
        self.frames.push(frame);
        self
    }

    fn stream_data(&self, ilp_packet_type: PacketType) -> Bytes {
        let Some(key) = &self.encryption_key else {
            return Bytes::new();
        };
        let packet = StreamPacket {
            sequence: self.sequence,
            ilp_packet_type,
            prepare_amount: self.received_amount,
            frames: self.frames.clone(),
        };
        packet.encrypt(key).unwrap_or_else(|err| {
            warn!(error = %err, "failed to encrypt STREAM reply");
            Bytes::new()
        })
    }

    pub(crate) fn fulfill(&self, fulfillment: [u8; 32]) -> IlpReply {
        IlpReply::Fulfill(IlpFulfill {
            fulfillment,
            data: self.stream_data(PacketType::Fulfill),
        })
    }

    pub(crate) fn reject(&self, code: IlpErrorCode) -> IlpReply {
        IlpReply::Reject(IlpReject {
            code,
            triggered_by: self.server_address.to_string(),
            message: String::new(),
            data: self.stream_data(PacketType::Reject),
        })
    }
}
