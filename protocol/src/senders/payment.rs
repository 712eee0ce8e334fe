//! # Payment Executor
//!
//! Sends a quoted payment packet by packet until the target is met.
//!
//! ## Sizing
//!
//! Each packet carries `min(available budget, max packet amount)`. For
//! fixed-delivery the amount is further capped to the source amount that,
//! at the worst observed rate, delivers no more than what is still owed.
//!
//! ## Minimum rate
//!
//! Every packet asks the receiver to reject unless it receives at least
//! `ceil(source * min_rate)`. The one packet expected to complete the
//! payment may lose a single source unit to rounding: its minimum is
//! computed from `source - 1`. If that packet is rejected the allowance is
//! returned so the retry may use it.
//!
//! ## Accounting
//!
//! A fulfill credits `max(declared minimum, reported amount)`. A fulfill
//! that reports less than the declared minimum, or carries no authentic
//! reply at all, is still credited and then ends the payment with
//! [`PaymentError::ReceiverProtocolViolation`].

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tracing::{debug, error, warn};

use super::{ReplyState, SendState, StreamSender};
use crate::amount::{Int, PositiveInt, Ratio};
use crate::config::DEFAULT_STREAM_ID;
use crate::controllers::{
    AppDataController, AssetDetails, AssetDetailsController, EstablishmentController,
    ExchangeRateController, ExpiryController, FailureController, MaxPacketAmountController,
    PacingController, RateBounds, SequenceController, StreamController, TimeoutController,
};
use crate::error::PaymentError;
use crate::packet::{decode_receipt, Frame};
use crate::request::{RequestBuilder, StreamConnection, StreamReply, StreamRequest};

/// Whether the payment targets a source or a destination amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PaymentType {
    FixedSend,
    FixedDelivery,
}

/// Most recent STREAM receipt seen from the receiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamReceipt {
    pub total_received: Int,
    #[serde(serialize_with = "serialize_hex")]
    pub receipt: Bytes,
}

fn serialize_hex<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// Running totals of a payment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PaymentProgress {
    /// Why the payment stopped early, if it did.
    pub error: Option<PaymentError>,
    pub amount_sent: Int,
    pub amount_delivered: Int,
    pub source_amount_in_flight: Int,
    pub destination_amount_in_flight: Int,
    pub stream_receipt: Option<StreamReceipt>,
}

/// Called with fresh totals whenever they change.
pub type ProgressHandler = Box<dyn FnMut(&PaymentProgress) + Send>;

/// Parameters fixed by a quote.
#[derive(Clone, Copy, Debug)]
pub struct PaymentTarget {
    pub payment_type: PaymentType,
    pub max_source_amount: Int,
    pub min_delivery_amount: Int,
    pub min_exchange_rate: Ratio,
    pub max_packet_amount: PositiveInt,
    pub rate_bounds: RateBounds,
}

/// Bookkeeping for one in-flight packet.
pub struct PacketAttempt {
    source_amount: Int,
    min_destination_amount: Int,
    high_end_destination_amount: Int,
    applied_correction: bool,
}

pub struct PaymentSender {
    sequence: SequenceController,
    establishment: EstablishmentController,
    expiry: ExpiryController,
    app_data: Option<AppDataController>,
    failure: FailureController,
    timeout: TimeoutController,
    max_packet: MaxPacketAmountController,
    asset_details: AssetDetailsController,
    pacer: PacingController,
    exchange_rate: ExchangeRateController,

    target: PaymentTarget,
    amount_sent: Int,
    amount_delivered: Int,
    source_amount_in_flight: Int,
    destination_amount_in_flight: Int,
    applied_rounding_correction: bool,
    latest_receipt: Option<StreamReceipt>,
    remote_receive_max: Option<Int>,
    progress_handler: Option<ProgressHandler>,
}

impl PaymentSender {
    pub fn new(
        connection: &StreamConnection,
        target: PaymentTarget,
        destination_asset: AssetDetails,
        app_data: Option<Bytes>,
        progress_handler: Option<ProgressHandler>,
    ) -> Self {
        Self {
            sequence: SequenceController::new(connection.counter().clone()),
            establishment: EstablishmentController::new(connection.destination_address().clone()),
            expiry: ExpiryController::new(),
            app_data: app_data.map(AppDataController::new),
            failure: FailureController::new(),
            timeout: TimeoutController::new(),
            max_packet: MaxPacketAmountController::with_precise_max(target.max_packet_amount),
            asset_details: AssetDetailsController::new(Some(destination_asset)),
            pacer: PacingController::new(),
            exchange_rate: ExchangeRateController::with_bounds(target.rate_bounds),
            target,
            amount_sent: Int::ZERO,
            amount_delivered: Int::ZERO,
            source_amount_in_flight: Int::ZERO,
            destination_amount_in_flight: Int::ZERO,
            applied_rounding_correction: false,
            latest_receipt: None,
            remote_receive_max: None,
            progress_handler,
        }
    }

    pub fn progress(&self) -> PaymentProgress {
        PaymentProgress {
            error: None,
            amount_sent: self.amount_sent,
            amount_delivered: self.amount_delivered,
            source_amount_in_flight: self.source_amount_in_flight,
            destination_amount_in_flight: self.destination_amount_in_flight,
            stream_receipt: self.latest_receipt.clone(),
        }
    }

    fn report_progress(&mut self) {
        let progress = self.progress();
        if let Some(handler) = self.progress_handler.as_mut() {
            handler(&progress);
        }
    }

    fn update_receipt(&mut self, reply: &StreamReply) {
        for frame in reply.frames() {
            let Frame::StreamReceipt { stream_id, receipt } = frame else {
                continue;
            };
            if *stream_id != DEFAULT_STREAM_ID {
                continue;
            }
            match decode_receipt(receipt) {
                Ok(decoded) => {
                    let total_received = Int::new(decoded.total_received);
                    let is_newer = self
                        .latest_receipt
                        .as_ref()
                        .map_or(true, |latest| total_received > latest.total_received);
                    if is_newer {
                        self.latest_receipt = Some(StreamReceipt {
                            total_received,
                            receipt: receipt.clone(),
                        });
                    }
                }
                Err(err) => debug!(error = %err, "ignoring invalid receipt"),
            }
        }
    }

    /// Tracks the largest `receive_max` the receiver advertised and fails
    /// if it cannot cover the minimum delivery amount.
    fn check_receive_max(&mut self, reply: &StreamReply) -> Result<(), PaymentError> {
        let advertised = reply.frames().iter().find_map(|frame| match frame {
            Frame::StreamMaxMoney {
                stream_id,
                receive_max,
                ..
            } if *stream_id == DEFAULT_STREAM_ID => Some(Int::new(*receive_max)),
            _ => None,
        });
        if let Some(advertised) = advertised {
            self.remote_receive_max = Some(
                self.remote_receive_max
                    .map_or(advertised, |known| known.max(advertised)),
            );
        }
        match self.remote_receive_max {
            Some(receive_max) if receive_max < self.target.min_delivery_amount => {
                error!(
                    receive_max = receive_max.value(),
                    min_delivery_amount = self.target.min_delivery_amount.value(),
                    "ending payment: minimum delivery amount is too much for recipient"
                );
                Err(PaymentError::IncompatibleReceiveMax)
            }
            _ => Ok(()),
        }
    }
}

impl StreamSender for PaymentSender {
    type Output = ();
    type Pending = PacketAttempt;
    const NAME: &'static str = "pay";

    fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
        let mut controllers: Vec<&mut dyn StreamController> =
            vec![&mut self.sequence, &mut self.establishment, &mut self.expiry];
        if let Some(app_data) = self.app_data.as_mut() {
            controllers.push(app_data);
        }
        controllers.push(&mut self.failure);
        controllers.push(&mut self.timeout);
        controllers.push(&mut self.max_packet);
        controllers.push(&mut self.asset_details);
        controllers.push(&mut self.pacer);
        controllers.push(&mut self.exchange_rate);
        controllers
    }

    fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<(), PacketAttempt> {
        let target = self.target;
        let available = target
            .max_source_amount
            .saturating_sub(self.amount_sent)
            .saturating_sub(self.source_amount_in_flight);
        if !available.is_positive() {
            let stranded = target.payment_type == PaymentType::FixedDelivery
                && self.source_amount_in_flight.is_zero()
                && self.amount_delivered < target.min_delivery_amount;
            if stranded {
                error!(
                    delivered = self.amount_delivered.value(),
                    min_delivery_amount = target.min_delivery_amount.value(),
                    "ending payment: source budget exhausted before delivery target"
                );
                return SendState::Error(PaymentError::InsufficientExchangeRate);
            }
            return SendState::Yield;
        }

        let max_packet = self
            .max_packet
            .next_max_packet_amount()
            .map_or(Int::MAX_U64, PositiveInt::as_int);
        let mut source_amount = available.min(max_packet);

        let completes_payment = match target.payment_type {
            PaymentType::FixedSend => source_amount == available,
            PaymentType::FixedDelivery => {
                let remaining = target
                    .min_delivery_amount
                    .saturating_sub(self.amount_delivered)
                    .saturating_sub(self.destination_amount_in_flight);
                let Some(remaining) = remaining.to_positive() else {
                    return SendState::Yield;
                };
                let Some((_, delivery_limit)) = self.exchange_rate.estimate_source_amount(remaining)
                else {
                    warn!("ending payment: exchange rate dropped to zero");
                    return SendState::Error(PaymentError::InsufficientExchangeRate);
                };
                source_amount = source_amount.min(delivery_limit);
                source_amount == delivery_limit
            }
        };

        let applied_correction = completes_payment && !self.applied_rounding_correction;
        let min_destination_amount = if applied_correction {
            source_amount
                .saturating_sub(Int::ONE)
                .multiply_ceil(target.min_exchange_rate)
        } else {
            source_amount.multiply_ceil(target.min_exchange_rate)
        };

        let Some((low_end_destination, high_end_destination)) =
            self.exchange_rate.estimate_destination_amount(source_amount)
        else {
            return SendState::Error(PaymentError::InsufficientExchangeRate);
        };
        if low_end_destination < min_destination_amount {
            error!(
                source_amount = source_amount.value(),
                projected = low_end_destination.value(),
                min_destination_amount = min_destination_amount.value(),
                "ending payment: projected delivery is below the minimum exchange rate"
            );
            return SendState::Error(PaymentError::InsufficientExchangeRate);
        }

        self.source_amount_in_flight = self.source_amount_in_flight.saturating_add(source_amount);
        self.destination_amount_in_flight = self
            .destination_amount_in_flight
            .saturating_add(high_end_destination);
        self.applied_rounding_correction = applied_correction;
        self.report_progress();

        request
            .set_source_amount(source_amount)
            .set_min_destination_amount(min_destination_amount)
            .enable_fulfillment()
            .add_frames([Frame::StreamMoney {
                stream_id: DEFAULT_STREAM_ID,
                shares: 1,
            }]);

        SendState::Send(PacketAttempt {
            source_amount,
            min_destination_amount,
            high_end_destination_amount: high_end_destination,
            applied_correction,
        })
    }

    fn apply_reply(
        &mut self,
        attempt: PacketAttempt,
        request: &StreamRequest,
        reply: &StreamReply,
    ) -> ReplyState<()> {
        let PacketAttempt {
            source_amount,
            min_destination_amount,
            high_end_destination_amount,
            applied_correction,
        } = attempt;

        let destination_amount = reply
            .destination_amount
            .map_or(min_destination_amount, |claimed| claimed.max(min_destination_amount));

        if reply.is_fulfill() {
            self.amount_sent = self.amount_sent.saturating_add(source_amount);
            self.amount_delivered = self.amount_delivered.saturating_add(destination_amount);
            debug!(
                sequence = request.sequence,
                sent = self.amount_sent.value(),
                delivered = self.amount_delivered.value(),
                min_destination_amount = min_destination_amount.value(),
                "accounted for fulfill"
            );
        } else if let Some(received) = reply.destination_amount {
            if received < min_destination_amount {
                debug!(
                    sequence = request.sequence,
                    received = received.value(),
                    min_destination_amount = min_destination_amount.value(),
                    "packet rejected for insufficient rate"
                );
            }
        }

        self.source_amount_in_flight = self.source_amount_in_flight.saturating_sub(source_amount);
        self.destination_amount_in_flight = self
            .destination_amount_in_flight
            .saturating_sub(high_end_destination_amount);

        if reply.is_reject() && applied_correction {
            self.applied_rounding_correction = false;
        }

        self.update_receipt(reply);
        self.report_progress();

        if reply.is_fulfill() {
            match reply.destination_amount {
                None => {
                    error!(sequence = request.sequence, "ending payment: packet fulfilled without authentic STREAM data");
                    return ReplyState::Error(PaymentError::ReceiverProtocolViolation);
                }
                Some(reported) if reported < min_destination_amount => {
                    error!(
                        sequence = request.sequence,
                        delivered = reported.value(),
                        min_destination_amount = min_destination_amount.value(),
                        "ending payment: packet fulfilled below the minimum destination amount"
                    );
                    return ReplyState::Error(PaymentError::ReceiverProtocolViolation);
                }
                Some(_) => {}
            }
        }

        let target = self.target;
        match target.payment_type {
            PaymentType::FixedSend if self.amount_sent == target.max_source_amount => {
                debug!(sent = self.amount_sent.value(), "payment complete: paid fixed source amount");
                return ReplyState::Done(());
            }
            PaymentType::FixedDelivery
                if self.amount_delivered >= target.min_delivery_amount
                    && self.source_amount_in_flight.is_zero() =>
            {
                debug!(
                    delivered = self.amount_delivered.value(),
                    sent = self.amount_sent.value(),
                    "payment complete: paid fixed destination amount"
                );
                return ReplyState::Done(());
            }
            _ => {}
        }

        match self.check_receive_max(reply) {
            Err(err) => ReplyState::Error(err),
            Ok(()) => ReplyState::Schedule,
        }
    }
}
