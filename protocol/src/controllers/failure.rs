//! Ends the send loop on terminal failures: the receiver closing the
//! connection or the default stream, and final rejects that retrying cannot
//! fix.

use tracing::error;

use super::StreamController;
use crate::config::DEFAULT_STREAM_ID;
use crate::error::PaymentError;
use crate::packet::{ErrorClass, Frame, IlpErrorCode};
use crate::request::{StreamReply, StreamRequest};

#[derive(Debug, Default)]
pub struct FailureController;

impl FailureController {
    pub fn new() -> Self {
        Self
    }

    /// Codes worth retrying: every temporary and relative error, amount too
    /// large, insufficient destination amount, and application errors.
    fn is_retriable(code: IlpErrorCode) -> bool {
        matches!(code.class(), ErrorClass::Temporary | ErrorClass::Relative)
            || code == IlpErrorCode::F08_AMOUNT_TOO_LARGE
            || code == IlpErrorCode::F99_APPLICATION_ERROR
            || code == IlpErrorCode::F04_INSUFFICIENT_DESTINATION_AMOUNT
    }
}

impl StreamController for FailureController {
    fn apply_reply(
        &mut self,
        _request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        for frame in reply.frames() {
            match frame {
                Frame::ConnectionClose { code, message } => {
                    error!(?code, %message, "ending payment: receiver closed the connection");
                    return Err(PaymentError::ClosedByReceiver);
                }
                Frame::StreamClose {
                    stream_id,
                    code,
                    message,
                } if *stream_id == DEFAULT_STREAM_ID => {
                    error!(?code, %message, "ending payment: receiver closed the stream");
                    return Err(PaymentError::ClosedByReceiver);
                }
                _ => {}
            }
        }

        if let Some(reject) = reply.reject() {
            if !Self::is_retriable(reject.code) {
                error!(
                    code = reject.code.as_str(),
                    triggered_by = %reject.triggered_by,
                    message = %reject.message,
                    "ending payment: unexpected final error"
                );
                return Err(PaymentError::ConnectorError);
            }
        }
        Ok(())
    }
}
