//! Idle timeout: give up if nothing has been fulfilled for
//! [`MAX_DURATION_SINCE_LAST_FULFILL`].

use tokio::time::Instant;
use tracing::error;

use super::{RequestState, StreamController};
use crate::config::MAX_DURATION_SINCE_LAST_FULFILL;
use crate::error::PaymentError;
use crate::request::{RequestBuilder, StreamReply, StreamRequest};

pub struct TimeoutController {
    last_fulfill: Instant,
}

impl TimeoutController {
    /// The idle clock starts when the controller is created.
    pub fn new() -> Self {
        Self {
            last_fulfill: Instant::now(),
        }
    }
}

impl Default for TimeoutController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController for TimeoutController {
    fn build_request(&mut self, _request: &mut RequestBuilder) -> RequestState {
        let idle = Instant::now().saturating_duration_since(self.last_fulfill);
        if idle > MAX_DURATION_SINCE_LAST_FULFILL {
            error!(idle_ms = idle.as_millis() as u64, "ending payment: no fulfill received before idle deadline");
            return RequestState::Error(PaymentError::IdleTimeout);
        }
        RequestState::Ready
    }

    fn apply_reply(
        &mut self,
        _request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        if reply.is_fulfill() {
            self.last_fulfill = Instant::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{builder, fulfill, request};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn times_out_after_ten_idle_seconds() {
        let mut controller = TimeoutController::new();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.build_request(&mut builder()), RequestState::Ready);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            controller.build_request(&mut builder()),
            RequestState::Error(PaymentError::IdleTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fulfills_reset_the_clock() {
        let mut controller = TimeoutController::new();
        tokio::time::sleep(Duration::from_secs(9)).await;
        controller.apply_reply(&request(1), &fulfill(None, vec![])).unwrap();
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(controller.build_request(&mut builder()), RequestState::Ready);
    }
}
