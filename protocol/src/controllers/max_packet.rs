//! # Max Packet Amount Discovery
//!
//! Connectors cap the amount of a single packet and reject anything larger
//! with `F08 Amount Too Large`. This controller tracks what is known about
//! that cap along the path:
//!
//! - **Unknown**: no F08 seen yet.
//! - **Imprecise(max)**: an F08 without usable metadata. The cap is below
//!   the rejected amount, which is all we learn.
//! - **Precise(max)**: an F08 reported the connector's received and maximum
//!   amounts, so the cap can be converted into source units exactly.
//!
//! Separately it tracks the *verified path capacity*, the largest amount
//! that actually reached the receiver. Capacity only grows, and never past
//! the current cap. When an imprecise cap is met by verified capacity it
//! becomes precise.
//!
//! Binary search between the two is what the rate probe drives:
//! the next probe amount is `verified + ceil((max - verified) / 2)`.

use tracing::{debug, error};

use super::StreamController;
use crate::amount::{Int, PositiveInt};
use crate::config::MAX_PROBE_AMOUNT;
use crate::error::PaymentError;
use crate::packet::{AmountTooLargeData, IlpErrorCode, IlpReject};
use crate::request::{StreamReply, StreamRequest};

/// What is known about the path's maximum packet amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaxPacketState {
    Unknown,
    Imprecise(PositiveInt),
    Precise(PositiveInt),
}

pub struct MaxPacketAmountController {
    state: MaxPacketState,
    verified_path_capacity: Int,
}

impl MaxPacketAmountController {
    pub fn new() -> Self {
        Self {
            state: MaxPacketState::Unknown,
            verified_path_capacity: Int::ZERO,
        }
    }

    /// Starts from a cap already discovered by a rate probe.
    pub fn with_precise_max(max_packet_amount: PositiveInt) -> Self {
        Self {
            state: MaxPacketState::Precise(max_packet_amount),
            verified_path_capacity: Int::ZERO,
        }
    }

    pub fn state(&self) -> MaxPacketState {
        self.state
    }

    pub fn verified_path_capacity(&self) -> Int {
        self.verified_path_capacity
    }

    /// Amount to try next, or `None` while no cap is known.
    pub fn next_max_packet_amount(&self) -> Option<PositiveInt> {
        match self.state {
            MaxPacketState::Unknown => None,
            MaxPacketState::Precise(max) => Some(max),
            MaxPacketState::Imprecise(max) => {
                let verified = self.verified_path_capacity;
                let gap = max
                    .as_int()
                    .saturating_sub(verified)
                    .divide_ceil(PositiveInt::new(2)?);
                gap.saturating_add(verified).to_positive()
            }
        }
    }

    /// Largest amount a packet may carry: the cap, or `u64::MAX` if unknown.
    pub fn max_packet_amount_limit(&self) -> PositiveInt {
        match self.state {
            MaxPacketState::Unknown => PositiveInt::MAX_U64,
            MaxPacketState::Imprecise(max) | MaxPacketState::Precise(max) => max,
        }
    }

    /// The probe is complete once a precise cap has been verified, or enough
    /// capacity has been verified that the cap no longer matters.
    pub fn is_probe_complete(&self) -> bool {
        match self.state {
            MaxPacketState::Precise(max) => self.verified_path_capacity == max.as_int(),
            MaxPacketState::Unknown => {
                self.verified_path_capacity.value() >= MAX_PROBE_AMOUNT
            }
            MaxPacketState::Imprecise(_) => false,
        }
    }

    fn reduce_max_packet_amount(
        &mut self,
        source_amount: Int,
        reject: &IlpReject,
    ) -> Result<(), PaymentError> {
        let (new_max, is_precise) = match AmountTooLargeData::from_bytes(&reject.data) {
            Some(data) => {
                debug!(
                    received = data.received_amount,
                    maximum = data.maximum_amount,
                    "handling F08"
                );
                // An F08 for less than the connector's own maximum is bogus.
                // Past this check received is positive.
                let Some(received) = PositiveInt::new(data.received_amount)
                    .filter(|_| data.received_amount > data.maximum_amount)
                else {
                    return Ok(());
                };
                let new_max = Int::new(data.maximum_amount)
                    .multiply_floor(crate::amount::Ratio::new(source_amount, received));
                (new_max, true)
            }
            None => {
                debug!("handling F08 without metadata");
                (source_amount.saturating_sub(Int::ONE), false)
            }
        };

        let Some(new_max) = new_max.to_positive() else {
            error!("ending payment: max packet amount is 0, cannot send over path");
            return Err(PaymentError::ConnectorError);
        };

        let lowers_cap = match self.state {
            MaxPacketState::Unknown => true,
            MaxPacketState::Imprecise(max) | MaxPacketState::Precise(max) => new_max < max,
        };
        if lowers_cap {
            debug!(max_packet_amount = new_max.value(), precise = is_precise, "reducing max packet amount");
            self.state = if is_precise {
                MaxPacketState::Precise(new_max)
            } else {
                MaxPacketState::Imprecise(new_max)
            };
            self.adjust_path_capacity(self.verified_path_capacity);
        }
        Ok(())
    }

    fn adjust_path_capacity(&mut self, ack_amount: Int) {
        let limit = self.max_packet_amount_limit().as_int();
        let capacity = self.verified_path_capacity.max(ack_amount).min(limit);
        if capacity > self.verified_path_capacity {
            debug!(capacity = capacity.value(), "increasing verified path capacity");
        }
        self.verified_path_capacity = capacity;

        if let MaxPacketState::Imprecise(max) = self.state {
            if capacity == max.as_int() {
                self.state = MaxPacketState::Precise(max);
            }
        }
    }
}

impl Default for MaxPacketAmountController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController for MaxPacketAmountController {
    fn apply_reply(
        &mut self,
        request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        match reply.reject() {
            Some(reject) if reject.code == IlpErrorCode::F08_AMOUNT_TOO_LARGE => {
                self.reduce_max_packet_amount(request.source_amount, reject)
            }
            _ => {
                if reply.is_authentic() {
                    self.adjust_path_capacity(request.source_amount);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{authentic_reject, fulfill, reject, request};
    use bytes::Bytes;

    fn f08(received: u64, maximum: u64) -> StreamReply {
        reject(
            IlpErrorCode::F08_AMOUNT_TOO_LARGE,
            AmountTooLargeData {
                received_amount: received,
                maximum_amount: maximum,
            }
            .to_bytes(),
        )
    }

    #[test]
    fn precise_max_from_metadata() {
        let mut controller = MaxPacketAmountController::new();
        // Sent 1000, connector received 500 (rate 0.5), max 100 -> 200 source.
        controller.apply_reply(&request(1000), &f08(500, 100)).unwrap();
        assert_eq!(controller.state(), MaxPacketState::Precise(PositiveInt::new(200).unwrap()));
        assert_eq!(controller.next_max_packet_amount(), PositiveInt::new(200));
        assert!(!controller.is_probe_complete());

        controller
            .apply_reply(&request(200), &authentic_reject(IlpErrorCode::F99_APPLICATION_ERROR, 100, vec![]))
            .unwrap();
        assert_eq!(controller.verified_path_capacity(), Int::new(200));
        assert!(controller.is_probe_complete());
    }

    #[test]
    fn imprecise_max_binary_searches() {
        let mut controller = MaxPacketAmountController::new();
        controller
            .apply_reply(&request(1000), &reject(IlpErrorCode::F08_AMOUNT_TOO_LARGE, Bytes::new()))
            .unwrap();
        assert_eq!(controller.state(), MaxPacketState::Imprecise(PositiveInt::new(999).unwrap()));
        assert_eq!(controller.next_max_packet_amount(), PositiveInt::new(500));

        controller.apply_reply(&request(500), &fulfill(Some(1), vec![])).unwrap();
        assert_eq!(controller.verified_path_capacity(), Int::new(500));
        // 500 + ceil(499 / 2)
        assert_eq!(controller.next_max_packet_amount(), PositiveInt::new(750));
    }

    #[test]
    fn imprecise_becomes_precise_when_verified() {
        let mut controller = MaxPacketAmountController::new();
        controller
            .apply_reply(&request(11), &reject(IlpErrorCode::F08_AMOUNT_TOO_LARGE, Bytes::new()))
            .unwrap();
        controller.apply_reply(&request(10), &fulfill(Some(1), vec![])).unwrap();
        assert_eq!(controller.state(), MaxPacketState::Precise(PositiveInt::new(10).unwrap()));
        assert!(controller.is_probe_complete());
    }

    #[test]
    fn metadata_with_received_not_above_max_is_ignored() {
        let mut controller = MaxPacketAmountController::new();
        controller.apply_reply(&request(100), &f08(50, 60)).unwrap();
        assert_eq!(controller.state(), MaxPacketState::Unknown);
        controller.apply_reply(&request(100), &f08(0, 0)).unwrap();
        assert_eq!(controller.state(), MaxPacketState::Unknown);
    }

    #[test]
    fn lowering_the_cap_clamps_verified_capacity() {
        let mut controller = MaxPacketAmountController::new();
        controller.apply_reply(&request(500), &fulfill(Some(1), vec![])).unwrap();
        assert_eq!(controller.verified_path_capacity(), Int::new(500));

        controller
            .apply_reply(&request(400), &reject(IlpErrorCode::F08_AMOUNT_TOO_LARGE, Bytes::new()))
            .unwrap();
        let limit = controller.max_packet_amount_limit();
        assert_eq!(limit, PositiveInt::new(399).unwrap());
        assert!(controller.verified_path_capacity() <= limit.as_int());
        // Verified capacity reached the new cap, so it is now known exactly.
        assert_eq!(controller.state(), MaxPacketState::Precise(limit));
        assert_eq!(controller.next_max_packet_amount(), Some(limit));
        assert!(controller.is_probe_complete());
    }

    #[test]
    fn cap_never_increases() {
        let mut controller = MaxPacketAmountController::new();
        controller.apply_reply(&request(1000), &f08(1000, 100)).unwrap();
        controller.apply_reply(&request(1000), &f08(1000, 500)).unwrap();
        assert_eq!(controller.max_packet_amount_limit(), PositiveInt::new(100).unwrap());
    }

    #[test]
    fn capacity_is_capped_by_max() {
        let mut controller = MaxPacketAmountController::new();
        controller.apply_reply(&request(1000), &f08(1000, 100)).unwrap();
        controller.apply_reply(&request(400), &fulfill(Some(1), vec![])).unwrap();
        assert_eq!(controller.verified_path_capacity(), Int::new(100));
    }

    #[test]
    fn zero_max_is_a_connector_error() {
        let mut controller = MaxPacketAmountController::new();
        assert_eq!(
            controller.apply_reply(&request(1), &reject(IlpErrorCode::F08_AMOUNT_TOO_LARGE, Bytes::new())),
            Err(PaymentError::ConnectorError)
        );
    }

    #[test]
    fn unknown_cap_completes_with_large_capacity() {
        let mut controller = MaxPacketAmountController::new();
        assert_eq!(controller.next_max_packet_amount(), None);
        assert_eq!(controller.max_packet_amount_limit(), PositiveInt::MAX_U64);
        controller
            .apply_reply(&request(MAX_PROBE_AMOUNT), &authentic_reject(IlpErrorCode::F99_APPLICATION_ERROR, 1, vec![]))
            .unwrap();
        assert!(controller.is_probe_complete());
    }
}
