//! Best-effort connection close.

use super::{ReplyState, SendState, StreamSender};
use crate::controllers::{
    EstablishmentController, ExpiryController, PacingController, SequenceController,
    StreamController,
};
use crate::packet::{Frame, StreamErrorCode};
use crate::request::{RequestBuilder, StreamConnection, StreamReply, StreamRequest};

/// Sends a single `ConnectionClose(NoError)` packet and finishes on its
/// reply, whatever that reply is.
pub struct ConnectionCloser {
    sequence: SequenceController,
    establishment: EstablishmentController,
    expiry: ExpiryController,
    pacer: PacingController,
    sent: bool,
}

impl ConnectionCloser {
    pub fn new(connection: &StreamConnection) -> Self {
        Self {
            sequence: SequenceController::new(connection.counter().clone()),
            establishment: EstablishmentController::new(connection.destination_address().clone()),
            expiry: ExpiryController::new(),
            pacer: PacingController::new(),
            sent: false,
        }
    }
}

impl StreamSender for ConnectionCloser {
    type Output = ();
    type Pending = ();
    const NAME: &'static str = "close_connection";

    fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
        vec![
            &mut self.sequence,
            &mut self.establishment,
            &mut self.expiry,
            &mut self.pacer,
        ]
    }

    fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<(), ()> {
        if self.sent {
            return SendState::Yield;
        }
        self.sent = true;
        request.add_frames([Frame::ConnectionClose {
            code: StreamErrorCode::NoError,
            message: String::new(),
        }]);
        SendState::Send(())
    }

    fn apply_reply(&mut self, _pending: (), _request: &StreamRequest, _reply: &StreamReply) -> ReplyState<()> {
        ReplyState::Done(())
    }
}
