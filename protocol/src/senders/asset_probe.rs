//! Asks the receiver for its asset with zero-amount packets.

use tokio::time::Instant;
use tracing::{debug, error};

use super::{ReplyState, SendState, StreamSender};
use crate::config::ASSET_PROBE_TIMEOUT;
use crate::controllers::{
    AssetDetails, AssetDetailsController, EstablishmentController, ExpiryController,
    FailureController, PacingController, SequenceController, StreamController,
};
use crate::error::PaymentError;
use crate::request::{RequestBuilder, StreamConnection, StreamReply, StreamRequest};

/// Resolves to the destination asset, learned from `ConnectionAssetDetails`.
///
/// One packet is in flight at a time. The probe fails with
/// [`PaymentError::UnknownDestinationAsset`] if the receiver answers
/// authentically without disclosing its asset, and with
/// [`PaymentError::EstablishmentFailed`] if nothing authentic comes back
/// within [`ASSET_PROBE_TIMEOUT`].
pub struct AssetProbe {
    sequence: SequenceController,
    establishment: EstablishmentController,
    expiry: ExpiryController,
    failure: FailureController,
    asset_details: AssetDetailsController,
    pacer: PacingController,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl AssetProbe {
    pub fn new(connection: &StreamConnection, known_asset: Option<AssetDetails>) -> Self {
        Self {
            sequence: SequenceController::new(connection.counter().clone()),
            establishment: EstablishmentController::new(connection.destination_address().clone()),
            expiry: ExpiryController::new(),
            failure: FailureController::new(),
            asset_details: AssetDetailsController::new(known_asset),
            pacer: PacingController::new(),
            deadline: None,
            in_flight: false,
        }
    }

    fn known_asset(&self) -> Option<AssetDetails> {
        self.asset_details.destination_asset().cloned()
    }
}

impl StreamSender for AssetProbe {
    type Output = AssetDetails;
    type Pending = ();
    const NAME: &'static str = "asset_probe";

    fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
        vec![
            &mut self.sequence,
            &mut self.establishment,
            &mut self.expiry,
            &mut self.failure,
            &mut self.asset_details,
            &mut self.pacer,
        ]
    }

    fn next_state(&mut self, _request: &mut RequestBuilder) -> SendState<AssetDetails, ()> {
        if let Some(asset) = self.known_asset() {
            return SendState::Done(asset);
        }

        let now = Instant::now();
        match self.deadline {
            None => self.deadline = Some(now + ASSET_PROBE_TIMEOUT),
            Some(deadline) if now > deadline => {
                error!("asset probe failed: no authentic reply before deadline");
                return SendState::Error(PaymentError::EstablishmentFailed);
            }
            Some(_) => {}
        }

        if self.in_flight {
            return SendState::Yield;
        }
        self.in_flight = true;
        SendState::Send(())
    }

    fn apply_reply(
        &mut self,
        _pending: (),
        _request: &StreamRequest,
        reply: &StreamReply,
    ) -> ReplyState<AssetDetails> {
        self.in_flight = false;
        if let Some(asset) = self.known_asset() {
            debug!(code = %asset.code, scale = asset.scale, "asset probe complete");
            return ReplyState::Done(asset);
        }
        if reply.is_authentic() {
            error!("receiver replied without disclosing its asset");
            return ReplyState::Error(PaymentError::UnknownDestinationAsset);
        }
        ReplyState::Schedule
    }
}
