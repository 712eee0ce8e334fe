//! Sets each packet to expire [`crate::config::PACKET_EXPIRY`] after it is
//! built.

use chrono::Utc;

use super::{RequestState, StreamController};
use crate::request::{expiry_delta, RequestBuilder};

#[derive(Debug, Default)]
pub struct ExpiryController;

impl ExpiryController {
    pub fn new() -> Self {
        Self
    }
}

impl StreamController for ExpiryController {
    fn build_request(&mut self, request: &mut RequestBuilder) -> RequestState {
        request.set_expiry(Utc::now() + expiry_delta());
        RequestState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::builder;

    #[test]
    fn expiry_is_twenty_seconds_out() {
        let mut controller = ExpiryController::new();
        let mut draft = builder();
        let before = Utc::now();
        controller.build_request(&mut draft);
        let request = draft.build();
        let delta = request.expires_at - before;
        assert!(delta >= chrono::Duration::seconds(20));
        assert!(delta < chrono::Duration::seconds(21));
    }
}
