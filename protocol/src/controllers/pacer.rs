//! # Packet Pacing
//!
//! Limits how fast packets leave and how many are in flight.
//!
//! The next packet may leave `max(1 / rate, average_rtt / MAX_INFLIGHT)`
//! after the previous one. The rate grows additively on every authentic
//! reply and halves on every temporary reject, within
//! `[MIN_PACKETS_PER_SECOND, MAX_PACKETS_PER_SECOND]`. Round trips are only
//! sampled from authentic replies, so synthetic timeouts do not skew the
//! average.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use super::{RequestState, StreamController};
use crate::config::{
    DEFAULT_PACKETS_PER_SECOND, DEFAULT_ROUND_TRIP_TIME_MS, MAX_INFLIGHT_PACKETS,
    MAX_PACKETS_PER_SECOND, MIN_PACKETS_PER_SECOND, PACKETS_PER_SECOND_DECREASE_FACTOR,
    PACKETS_PER_SECOND_INCREASE, ROUND_TRIP_AVERAGE_WEIGHT,
};
use crate::error::PaymentError;
use crate::packet::ErrorClass;
use crate::request::{RequestBuilder, StreamReply, StreamRequest};

pub struct PacingController {
    last_packet_sent_at: Option<Instant>,
    in_flight: usize,
    packets_per_second: f64,
    average_round_trip_ms: f64,
}

impl PacingController {
    pub fn new() -> Self {
        Self {
            last_packet_sent_at: None,
            in_flight: 0,
            packets_per_second: DEFAULT_PACKETS_PER_SECOND,
            average_round_trip_ms: DEFAULT_ROUND_TRIP_TIME_MS,
        }
    }

    pub fn packets_per_second(&self) -> f64 {
        self.packets_per_second
    }

    pub fn average_round_trip_ms(&self) -> f64 {
        self.average_round_trip_ms
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn packet_interval(&self) -> Duration {
        let frequency_ms = 1000.0 / self.packets_per_second;
        let window_ms = self.average_round_trip_ms / MAX_INFLIGHT_PACKETS as f64;
        Duration::from_nanos((frequency_ms.max(window_ms) * 1_000_000.0).round() as u64)
    }

    /// When the next packet may be sent.
    pub fn next_packet_send_time(&self) -> Option<Instant> {
        self.last_packet_sent_at
            .map(|sent_at| sent_at + self.packet_interval())
    }
}

impl Default for PacingController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController for PacingController {
    fn build_request(&mut self, _request: &mut RequestBuilder) -> RequestState {
        if let Some(next) = self.next_packet_send_time() {
            let wait = next.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                return RequestState::Schedule(wait);
            }
        }
        if self.in_flight >= MAX_INFLIGHT_PACKETS {
            return RequestState::Yield;
        }
        RequestState::Ready
    }

    fn apply_request(&mut self, request: &StreamRequest) {
        self.last_packet_sent_at = Some(request.sent_at);
        self.in_flight += 1;
    }

    fn apply_reply(
        &mut self,
        request: &StreamRequest,
        reply: &StreamReply,
    ) -> Result<(), PaymentError> {
        self.in_flight = self.in_flight.saturating_sub(1);

        if reply.is_authentic() {
            let rtt_ms = Instant::now()
                .saturating_duration_since(request.sent_at)
                .as_secs_f64()
                * 1000.0;
            self.average_round_trip_ms = self.average_round_trip_ms * ROUND_TRIP_AVERAGE_WEIGHT
                + rtt_ms * (1.0 - ROUND_TRIP_AVERAGE_WEIGHT);
        }

        let temporary = reply
            .reject_code()
            .is_some_and(|code| code.class() == ErrorClass::Temporary);
        if temporary {
            self.packets_per_second = (self.packets_per_second
                * PACKETS_PER_SECOND_DECREASE_FACTOR)
                .max(MIN_PACKETS_PER_SECOND);
        } else if reply.is_authentic() {
            self.packets_per_second = (self.packets_per_second + PACKETS_PER_SECOND_INCREASE)
                .min(MAX_PACKETS_PER_SECOND);
        }

        trace!(
            packets_per_second = self.packets_per_second,
            average_round_trip_ms = self.average_round_trip_ms,
            in_flight = self.in_flight,
            "updated pacing"
        );
        Ok(())
    }
}
