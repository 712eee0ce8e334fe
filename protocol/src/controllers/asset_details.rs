//! Learns the destination asset from the receiver's `ConnectionAssetDetails`
//! frames and holds it fixed for the rest of the connection.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{RequestState, StreamController};
use crate::error::PaymentError;
use crate::packet::Frame;
use crate::request::{RequestBuilder, StreamReply, StreamRequest};

/// Asset code and scale of an account, e.g. `USD` at scale 2 for cents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetDetails {
    pub code: String,
    pub scale: u8,
}

impl AssetDetails {
    pub fn new(code: impl Into<String>, scale: u8) -> Self {
        Self {
            code: code.into(),
            scale,
        }
    }
}

pub struct AssetDetailsController {
    asset: Option<AssetDetails>,
    conflict: bool,
}

impl AssetDetailsController {
    pub fn new(asset: Option<AssetDetails>) -> Self {
        Self {
            asset,
            conflict: false,
        }
    }

    pub fn destination_asset(&self) -> Option<&AssetDetails> {
        self.asset.as_ref()
    }
}

impl StreamController for AssetDetailsController {
    fn build_request(&mut self, _request: &mut RequestBuilder) -> RequestState {
        if self.conflict {
            return RequestState::Error(PaymentError::DestinationAssetConflict);
        }
        RequestState::Ready
    }

    fn apply_reply(
        &mut self,
        _request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        for frame in reply.frames() {
            let Frame::ConnectionAssetDetails {
                source_asset_code,
                source_asset_scale,
            } = frame
            else {
                continue;
            };
            let received = AssetDetails::new(source_asset_code.clone(), *source_asset_scale);
            match &self.asset {
                None => {
                    debug!(code = %received.code, scale = received.scale, "got destination asset details");
                    self.asset = Some(received);
                }
                Some(known) if *known != received => {
                    error!(
                        known_code = %known.code,
                        known_scale = known.scale,
                        received_code = %received.code,
                        received_scale = received.scale,
                        "ending payment: remote unexpectedly changed destination asset"
                    );
                    self.conflict = true;
                    return Err(PaymentError::DestinationAssetConflict);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
