//! Sends application data to the receiver once, on the default stream.

use bytes::Bytes;

use super::{RequestState, StreamController};
use crate::config::DEFAULT_STREAM_ID;
use crate::packet::Frame;
use crate::request::{RequestBuilder, StreamRequest};

pub struct AppDataController {
    data: Bytes,
    stream_id: u64,
    sent: bool,
}

impl AppDataController {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            stream_id: DEFAULT_STREAM_ID,
            sent: false,
        }
    }
}

impl StreamController for AppDataController {
    fn build_request(&mut self, request: &mut RequestBuilder) -> RequestState {
        if !self.sent {
            request.add_frames([Frame::StreamData {
                stream_id: self.stream_id,
                offset: 0,
                data: self.data.clone(),
            }]);
        }
        RequestState::Ready
    }

    fn apply_request(&mut self, request: &StreamRequest) {
        let carried = request
            .frames
            .iter()
            .any(|frame| matches!(frame, Frame::StreamData { stream_id, .. } if *stream_id == self.stream_id));
        if carried {
            self.sent = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::builder;

    #[test]
    fn data_is_attached_to_first_request_only() {
        let mut controller = AppDataController::new(Bytes::from_static(b"invoice-7"));
        let mut draft = builder();
        controller.build_request(&mut draft);
        assert_eq!(
            draft.frames(),
            &[Frame::StreamData {
                stream_id: 1,
                offset: 0,
                data: Bytes::from_static(b"invoice-7"),
            }]
        );
        controller.apply_request(&draft.build());

        let mut draft = builder();
        controller.build_request(&mut draft);
        assert!(draft.frames().is_empty());
    }
}
