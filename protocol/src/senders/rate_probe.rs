//! # Rate Probe
//!
//! Discovers the path's maximum packet amount and bounds its exchange rate
//! with unfulfillable packets, so no money moves.
//!
//! The probe starts with a fixed ladder of amounts, `0` then `10^12` down to
//! `10^3`, sent as fast as pacing allows. Each reply either reveals a rate
//! sample (authentic reject from the receiver) or narrows the max packet
//! amount (F08 from a connector). After every reply the next candidate is
//! the max packet controller's binary-search midpoint, or the same amount
//! again while no cap is known. The probe succeeds once the cap is verified
//! and fails after [`RATE_PROBE_TIMEOUT`].

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error};

use super::{ReplyState, SendState, StreamSender};
use crate::amount::{Int, PositiveInt, PositiveRatio, Ratio};
use crate::config::{INITIAL_PROBE_AMOUNTS, RATE_PROBE_TIMEOUT};
use crate::controllers::{
    AssetDetails, AssetDetailsController, EstablishmentController, ExchangeRateController,
    ExpiryController, FailureController, MaxPacketAmountController, PacingController,
    SequenceController, StreamController,
};
use crate::error::PaymentError;
use crate::request::{RequestBuilder, StreamConnection, StreamReply, StreamRequest};

/// Path parameters learned by a rate probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub max_packet_amount: PositiveInt,
    pub low_estimated_exchange_rate: Ratio,
    pub high_estimated_exchange_rate: PositiveRatio,
}

pub struct RateProbe {
    sequence: SequenceController,
    establishment: EstablishmentController,
    expiry: ExpiryController,
    failure: FailureController,
    max_packet: MaxPacketAmountController,
    asset_details: AssetDetailsController,
    pacer: PacingController,
    exchange_rate: ExchangeRateController,
    remaining_amounts: VecDeque<Int>,
    in_flight_amounts: HashSet<Int>,
    deadline: Option<Instant>,
}

impl RateProbe {
    pub fn new(connection: &StreamConnection, destination_asset: AssetDetails) -> Self {
        Self {
            sequence: SequenceController::new(connection.counter().clone()),
            establishment: EstablishmentController::new(connection.destination_address().clone()),
            expiry: ExpiryController::new(),
            failure: FailureController::new(),
            max_packet: MaxPacketAmountController::new(),
            asset_details: AssetDetailsController::new(Some(destination_asset)),
            pacer: PacingController::new(),
            exchange_rate: ExchangeRateController::new(),
            remaining_amounts: INITIAL_PROBE_AMOUNTS.iter().copied().map(Int::new).collect(),
            in_flight_amounts: HashSet::new(),
            deadline: None,
        }
    }
}

impl StreamSender for RateProbe {
    type Output = ProbeResult;
    type Pending = Int;
    const NAME: &'static str = "rate_probe";

    fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
        vec![
            &mut self.sequence,
            &mut self.establishment,
            &mut self.expiry,
            &mut self.failure,
            &mut self.max_packet,
            &mut self.asset_details,
            &mut self.pacer,
            &mut self.exchange_rate,
        ]
    }

    fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<ProbeResult, Int> {
        let now = Instant::now();
        match self.deadline {
            None => self.deadline = Some(now + RATE_PROBE_TIMEOUT),
            Some(deadline) if now > deadline => {
                error!("rate probe failed: did not establish rate and path capacity");
                return SendState::Error(PaymentError::RateProbeFailed);
            }
            Some(_) => {}
        }

        // An amount already in flight will reschedule itself on reply.
        let Some(amount) = std::iter::from_fn(|| self.remaining_amounts.pop_front())
            .find(|amount| !self.in_flight_amounts.contains(amount))
        else {
            return SendState::Yield;
        };
        self.in_flight_amounts.insert(amount);

        debug!(amount = amount.value(), "sending probe packet");
        request.set_source_amount(amount);
        SendState::Send(amount)
    }

    fn apply_reply(
        &mut self,
        amount: Int,
        _request: &StreamRequest,
        _reply: &StreamReply,
    ) -> ReplyState<ProbeResult> {
        self.in_flight_amounts.remove(&amount);

        // Narrowed cap: try the midpoint next. No cap: retry this amount.
        let next = self
            .max_packet
            .next_max_packet_amount()
            .map(PositiveInt::as_int)
            .unwrap_or(amount);
        if !self.remaining_amounts.contains(&next) {
            self.remaining_amounts.push_back(next);
        }

        if !self.max_packet.is_probe_complete() {
            return ReplyState::Schedule;
        }

        let Some(bounds) = self.exchange_rate.rate_bounds() else {
            error!("rate probe failed: path capacity verified without a rate sample");
            return ReplyState::Error(PaymentError::RateProbeFailed);
        };
        let result = ProbeResult {
            max_packet_amount: self.max_packet.max_packet_amount_limit(),
            low_estimated_exchange_rate: bounds.lower,
            high_estimated_exchange_rate: bounds.upper,
        };
        debug!(
            max_packet_amount = result.max_packet_amount.value(),
            low_rate = %result.low_estimated_exchange_rate,
            high_rate = %result.high_estimated_exchange_rate,
            "rate probe complete"
        );
        ReplyState::Done(result)
    }
}
