//! Connection establishment.
//!
//! Until the receiver proves it has seen a packet, every request repeats the
//! handshake frames: a receive-only source address and zero stream and data
//! credit, so the receiver never tries to send money or data back.

use tracing::debug;

use super::{RequestState, StreamController};
use crate::config::RECEIVE_ONLY_ADDRESS;
use crate::error::PaymentError;
use crate::packet::{Frame, IlpAddress};
use crate::request::{RequestBuilder, StreamReply, StreamRequest};

pub struct EstablishmentController {
    destination_address: IlpAddress,
    is_connected: bool,
}

impl EstablishmentController {
    pub fn new(destination_address: IlpAddress) -> Self {
        Self {
            destination_address,
            is_connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    fn handshake_frames() -> [Frame; 3] {
        [
            Frame::ConnectionNewAddress {
                source_account: RECEIVE_ONLY_ADDRESS.to_owned(),
            },
            Frame::ConnectionMaxStreamId { max_stream_id: 1 },
            Frame::ConnectionMaxData { max_offset: 0 },
        ]
    }
}

impl StreamController for EstablishmentController {
    fn build_request(&mut self, request: &mut RequestBuilder) -> RequestState {
        request.set_destination_address(self.destination_address.clone());
        if !self.is_connected {
            request.add_frames(Self::handshake_frames());
        }
        RequestState::Ready
    }

    fn apply_reply(
        &mut self,
        _request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        if !self.is_connected && reply.is_authentic() {
            debug!("connection established");
            self.is_connected = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{address, builder, fulfill, reject};
    use crate::packet::IlpErrorCode;

    #[test]
    fn sends_handshake_until_authentic_reply() {
        let mut controller = EstablishmentController::new(address());

        let mut draft = builder();
        controller.build_request(&mut draft);
        assert_eq!(draft.frames().len(), 3);
        let request = draft.build();
        assert_eq!(request.destination_address, address());

        // Unauthenticated rejects prove nothing.
        controller
            .apply_reply(&request, &reject(IlpErrorCode::T04_INSUFFICIENT_LIQUIDITY, bytes::Bytes::new()))
            .unwrap();
        assert!(!controller.is_connected());

        controller.apply_reply(&request, &fulfill(Some(0), vec![])).unwrap();
        assert!(controller.is_connected());

        let mut draft = builder();
        controller.build_request(&mut draft);
        assert!(draft.frames().is_empty());
    }
}
