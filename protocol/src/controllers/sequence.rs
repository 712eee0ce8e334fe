//! Assigns each packet the next sequence number of the connection.

use tracing::error;

use super::{RequestState, StreamController};
use crate::config::MAX_SAFE_PACKET_COUNT;
use crate::error::PaymentError;
use crate::request::{Counter, RequestBuilder, StreamRequest};

/// Stamps the shared connection counter onto each request and refuses to
/// go past [`MAX_SAFE_PACKET_COUNT`] packets under one key.
pub struct SequenceController {
    counter: Counter,
}

impl SequenceController {
    pub fn new(counter: Counter) -> Self {
        Self { counter }
    }
}

impl StreamController for SequenceController {
    fn build_request(&mut self, request: &mut RequestBuilder) -> RequestState {
        let sequence = self.counter.get();
        if sequence >= MAX_SAFE_PACKET_COUNT {
            error!(sequence, "ending payment: cannot exceed max safe sequence number");
            return RequestState::Error(PaymentError::MaxSafeEncryptionLimit);
        }
        request.set_sequence(sequence);
        RequestState::Ready
    }

    fn apply_request(&mut self, _request: &StreamRequest) {
        self.counter.increment();
    }
}
