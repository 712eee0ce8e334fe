//! # Exchange Rate Discovery
//!
//! Every authentic reply to a packet with a positive source amount reveals
//! how much arrived. Since the receiver only reports whole units, a packet
//! of `s` source units that delivered `d` bounds the real rate to
//! `[d / s, (d + 1) / s)`. The controller intersects those intervals across
//! packets. A sample that falls outside the current interval means the rate
//! moved, and the bounds are reset to that sample.

use serde::Serialize;
use tracing::debug;

use super::StreamController;
use crate::amount::{Int, PositiveInt, PositiveRatio, Ratio};
use crate::error::PaymentError;
use crate::request::{StreamReply, StreamRequest};

/// Interval `[lower, upper)` containing the path's exchange rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateBounds {
    pub lower: Ratio,
    pub upper: PositiveRatio,
}

#[derive(Default)]
pub struct ExchangeRateController {
    bounds: Option<RateBounds>,
}

impl ExchangeRateController {
    pub fn new() -> Self {
        Self { bounds: None }
    }

    pub fn with_bounds(bounds: RateBounds) -> Self {
        Self {
            bounds: Some(bounds),
        }
    }

    pub fn rate_bounds(&self) -> Option<RateBounds> {
        self.bounds
    }

    /// Range of amounts `source_amount` could deliver:
    /// `[floor(s * lower), ceil(s * upper) - 1]`.
    pub fn estimate_destination_amount(&self, source_amount: Int) -> Option<(Int, Int)> {
        let bounds = self.bounds?;
        let low = source_amount.multiply_floor(bounds.lower);
        let high = source_amount
            .multiply_ceil(bounds.upper.as_ratio())
            .saturating_sub(Int::ONE)
            .max(low);
        Some((low, high))
    }

    /// Range of source amounts needed to deliver `destination_amount`:
    /// `[floor(d / upper) + 1, ceil(d / lower)]`. `None` if the lower bound
    /// is zero, since then no source amount is guaranteed to deliver.
    pub fn estimate_source_amount(&self, destination_amount: PositiveInt) -> Option<(Int, Int)> {
        let bounds = self.bounds?;
        let inverse_lower = bounds.lower.reciprocal()?;
        let destination = destination_amount.as_int();
        let low = destination
            .multiply_floor(bounds.upper.reciprocal().as_ratio())
            .saturating_add(Int::ONE);
        let high = destination.multiply_ceil(inverse_lower);
        Some((low, high))
    }

    fn update_rate(&mut self, source_amount: PositiveInt, destination_amount: Int) {
        let packet_lower = Ratio::new(destination_amount, source_amount);
        let packet_upper =
            PositiveRatio::new(PositiveInt::ONE.saturating_add(destination_amount), source_amount);

        let next = match self.bounds {
            Some(bounds)
                if packet_lower < bounds.upper.as_ratio()
                    && packet_upper.as_ratio() > bounds.lower =>
            {
                RateBounds {
                    lower: bounds.lower.max(packet_lower),
                    upper: bounds.upper.min(packet_upper),
                }
            }
            Some(_) => {
                debug!(
                    lower = %packet_lower,
                    upper = %packet_upper,
                    "exchange rate changed, resetting bounds"
                );
                RateBounds {
                    lower: packet_lower,
                    upper: packet_upper,
                }
            }
            None => {
                debug!(lower = %packet_lower, upper = %packet_upper, "setting initial rate bounds");
                RateBounds {
                    lower: packet_lower,
                    upper: packet_upper,
                }
            }
        };
        self.bounds = Some(next);
    }
}

impl StreamController for ExchangeRateController {
    fn apply_reply(
        &mut self,
        request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        let (Some(source_amount), Some(destination_amount)) =
            (request.source_amount.to_positive(), reply.destination_amount)
        else {
            return Ok(());
        };
        self.update_rate(source_amount, destination_amount);
        Ok(())
    }
}
