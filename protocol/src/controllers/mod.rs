//! # Stream Controllers
//!
//! A controller owns one concern of a connection: sequencing, expiry,
//! pacing, path capacity, exchange rate, and so on. Every send attempt walks
//! the sender's controllers in a fixed order:
//!
//! 1. [`StreamController::build_request`] may edit the draft, or veto the
//!    attempt by returning anything other than [`RequestState::Ready`]. The
//!    first veto wins and later controllers are not consulted.
//! 2. Once every controller and the sender agree, the request is committed
//!    and [`StreamController::apply_request`] runs on each controller.
//! 3. When the reply arrives, [`StreamController::apply_reply`] runs on each
//!    controller. All of them run; the first error returned ends the send
//!    loop.
//!
//! Controllers that care about a particular request look at the committed
//! [`StreamRequest`] handed back with its reply, so per-request state needs
//! no shared mutability.

use std::time::Duration;

use crate::error::PaymentError;
use crate::request::{RequestBuilder, StreamReply, StreamRequest};

pub mod app_data;
pub mod asset_details;
pub mod establishment;
pub mod exchange_rate;
pub mod expiry;
pub mod failure;
pub mod max_packet;
pub mod pacer;
pub mod sequence;
pub mod timeout;

pub use app_data::AppDataController;
pub use asset_details::{AssetDetails, AssetDetailsController};
pub use establishment::EstablishmentController;
pub use exchange_rate::{ExchangeRateController, RateBounds};
pub use expiry::ExpiryController;
pub use failure::FailureController;
pub use max_packet::MaxPacketAmountController;
pub use pacer::PacingController;
pub use sequence::SequenceController;
pub use timeout::TimeoutController;

/// Verdict of a controller on the next send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Go ahead.
    Ready,
    /// End the send loop.
    Error(PaymentError),
    /// Try again after the delay.
    Schedule(Duration),
    /// Try again once an in-flight request resolves.
    Yield,
}

/// One concern of a STREAM connection, consulted on every send attempt.
pub trait StreamController: Send {
    fn build_request(&mut self, _request: &mut RequestBuilder) -> RequestState {
        RequestState::Ready
    }

    fn apply_request(&mut self, _request: &StreamRequest) {}

    fn apply_reply(
        &mut self,
        _request: &StreamRequest,
        _reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::Bytes;

    use crate::amount::Int;
    use crate::packet::{Frame, IlpAddress, IlpErrorCode, IlpReject};
    use crate::request::{ReplyOutcome, RequestBuilder, StreamReply, StreamRequest};

    pub fn address() -> IlpAddress {
        IlpAddress::new("test.receiver.abc").unwrap()
    }

    pub fn builder() -> RequestBuilder {
        RequestBuilder::new(address())
    }

    pub fn request(source_amount: u64) -> StreamRequest {
        let mut builder = builder();
        builder.set_source_amount(Int::new(source_amount));
        builder.build()
    }

    pub fn fulfill(destination_amount: Option<u64>, frames: Vec<Frame>) -> StreamReply {
        StreamReply {
            outcome: ReplyOutcome::Fulfill,
            frames: destination_amount.map(|_| frames),
            destination_amount: destination_amount.map(Int::new),
        }
    }

    pub fn reject(code: IlpErrorCode, data: Bytes) -> StreamReply {
        StreamReply {
            outcome: ReplyOutcome::Reject(IlpReject {
                code,
                triggered_by: "test.connector".into(),
                message: String::new(),
                data,
            }),
            frames: None,
            destination_amount: None,
        }
    }

    pub fn authentic_reject(
        code: IlpErrorCode,
        destination_amount: u64,
        frames: Vec<Frame>,
    ) -> StreamReply {
        StreamReply {
            frames: Some(frames),
            destination_amount: Some(Int::new(destination_amount)),
            ..reject(code, Bytes::new())
        }
    }
}
