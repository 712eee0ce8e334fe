//! # Send Loop
//!
//! Every operation on a connection (asset probe, rate probe, payment, close)
//! is a [`StreamSender`] driven by [`send_loop`]. The loop owns two task
//! registries:
//!
//! - **attempts**: timers that, when they fire, trigger one more attempt to
//!   build and send a packet.
//! - **replies**: in-flight packets, each resolving to its reply.
//!
//! Each iteration races both registries and handles whichever task finishes
//! first. Tasks pushed into a registry while a race is pending are picked up
//! on the next poll, since `FuturesUnordered` is re-polled on every
//! iteration rather than snapshotted.
//!
//! ```text
//!            ┌──────────────── Schedule(delay) ───────────────┐
//!            ▼                                                │
//!   attempts ──fire──► controllers.build_request ──► sender.next_state
//!                                                     │ Send
//!                                                     ▼
//!                    controllers.apply_request ──► replies ──resolve──┐
//!                                                                     ▼
//!            controllers.apply_reply (all run) ──► sender.apply_reply
//! ```
//!
//! On `Done` or `Error` the loop stops building attempts, drains every
//! in-flight reply through the controllers and the sender, and only then
//! returns, so money already on the wire is always accounted for.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info_span, Instrument};

use crate::config::STALLED_LOOP_RECHECK;
use crate::controllers::{RequestState, StreamController};
use crate::error::PaymentError;
use crate::request::{RequestBuilder, StreamConnection, StreamReply, StreamRequest};

pub mod asset_probe;
pub mod connection_closer;
pub mod payment;
pub mod rate_probe;

pub use asset_probe::AssetProbe;
pub use connection_closer::ConnectionCloser;
pub use payment::{PaymentSender, PaymentType};
pub use rate_probe::{ProbeResult, RateProbe};

/// Decision of a sender on the next attempt, once every controller is ready.
pub enum SendState<T, P> {
    /// Commit and send the drafted request. `P` is handed back with its reply.
    Send(P),
    Done(T),
    Error(PaymentError),
    Schedule(Duration),
    Yield,
}

/// Decision of a sender after applying a reply.
pub enum ReplyState<T> {
    Done(T),
    Error(PaymentError),
    /// Attempt another packet right away.
    Schedule,
    /// Wait for another reply or timer.
    Yield,
}

/// One operation on a connection.
pub trait StreamSender: Send {
    type Output: Send;
    /// Per-request state carried from [`StreamSender::next_state`] to
    /// [`StreamSender::apply_reply`].
    type Pending: Send + 'static;

    /// Operation name used in logs.
    const NAME: &'static str;

    /// Controllers in the order they are consulted.
    fn controllers(&mut self) -> Vec<&mut dyn StreamController>;

    fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<Self::Output, Self::Pending>;

    fn apply_reply(
        &mut self,
        pending: Self::Pending,
        request: &StreamRequest,
        reply: &StreamReply,
    ) -> ReplyState<Self::Output>;
}

struct InFlight<P> {
    request: StreamRequest,
    pending: P,
    reply: StreamReply,
}

enum Step<T> {
    Done(T),
    Error(PaymentError),
    Schedule(Duration),
    Yield,
}

enum Event<P> {
    Reply(InFlight<P>),
    Attempt,
    Stalled,
}

/// Runs `sender` on `connection` until it finishes or fails.
pub async fn send_loop<S: StreamSender>(
    sender: &mut S,
    connection: &Arc<StreamConnection>,
) -> Result<S::Output, PaymentError> {
    let span = info_span!("send_loop", operation = S::NAME, connection = %connection.id());
    run(sender, connection).instrument(span).await
}

async fn run<S: StreamSender>(
    sender: &mut S,
    connection: &Arc<StreamConnection>,
) -> Result<S::Output, PaymentError> {
    let mut attempts: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
    let mut replies: FuturesUnordered<BoxFuture<'static, InFlight<S::Pending>>> =
        FuturesUnordered::new();
    attempts.push(future::ready(()).boxed());

    let outcome = loop {
        let event = tokio::select! {
            biased;
            Some(in_flight) = replies.next(), if !replies.is_empty() => Event::Reply(in_flight),
            Some(()) = attempts.next(), if !attempts.is_empty() => Event::Attempt,
            else => Event::Stalled,
        };

        let step = match event {
            Event::Reply(in_flight) => apply_reply(sender, in_flight),
            Event::Attempt => try_send(sender, connection, &mut replies),
            // Nothing in flight and nothing scheduled: recheck later so
            // time-based exits still fire.
            Event::Stalled => Step::Schedule(STALLED_LOOP_RECHECK),
        };

        match step {
            Step::Done(output) => break Ok(output),
            Step::Error(err) => break Err(err),
            Step::Schedule(delay) => attempts.push(wait(delay)),
            Step::Yield => {}
        }
    };

    if !replies.is_empty() {
        debug!(in_flight = replies.len(), "draining in-flight replies");
    }
    while let Some(in_flight) = replies.next().await {
        let _ = apply_reply(sender, in_flight);
    }
    outcome
}

fn wait(delay: Duration) -> BoxFuture<'static, ()> {
    if delay.is_zero() {
        future::ready(()).boxed()
    } else {
        tokio::time::sleep(delay).boxed()
    }
}

fn try_send<S: StreamSender>(
    sender: &mut S,
    connection: &Arc<StreamConnection>,
    replies: &mut FuturesUnordered<BoxFuture<'static, InFlight<S::Pending>>>,
) -> Step<S::Output> {
    let mut draft = RequestBuilder::new(connection.destination_address().clone());
    for controller in sender.controllers() {
        match controller.build_request(&mut draft) {
            RequestState::Ready => {}
            RequestState::Error(err) => return Step::Error(err),
            RequestState::Schedule(delay) => return Step::Schedule(delay),
            RequestState::Yield => return Step::Yield,
        }
    }

    match sender.next_state(&mut draft) {
        SendState::Send(pending) => {
            let request = draft.build();
            for controller in sender.controllers() {
                controller.apply_request(&request);
            }
            let connection = Arc::clone(connection);
            replies.push(
                async move {
                    let reply = connection.send(&request).await;
                    InFlight {
                        request,
                        pending,
                        reply,
                    }
                }
                .boxed(),
            );
            Step::Schedule(Duration::ZERO)
        }
        SendState::Done(output) => Step::Done(output),
        SendState::Error(err) => Step::Error(err),
        SendState::Schedule(delay) => Step::Schedule(delay),
        SendState::Yield => Step::Yield,
    }
}

fn apply_reply<S: StreamSender>(sender: &mut S, in_flight: InFlight<S::Pending>) -> Step<S::Output> {
    let InFlight {
        request,
        pending,
        reply,
    } = in_flight;

    let mut first_error = None;
    for controller in sender.controllers() {
        if let Err(err) = controller.apply_reply(&request, &reply) {
            first_error.get_or_insert(err);
        }
    }
    let state = sender.apply_reply(pending, &request, &reply);

    if let Some(err) = first_error {
        return Step::Error(err);
    }
    match state {
        ReplyState::Done(output) => Step::Done(output),
        ReplyState::Error(err) => Step::Error(err),
        ReplyState::Schedule => Step::Schedule(Duration::ZERO),
        ReplyState::Yield => Step::Yield,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Int;
    use crate::controllers::{ExpiryController, PacingController, SequenceController};
    use crate::packet::{IlpAddress, IlpErrorCode, IlpPrepare, IlpReject, IlpReply};
    use crate::request::{Plugin, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    /// Rejects everything with T04 after `latency`, recording amounts.
    struct Recorder {
        latency: Duration,
        sent: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        async fn send_data(&self, prepare: Bytes) -> Result<Bytes, TransportError> {
            let prepare = IlpPrepare::from_bytes(&prepare).expect("valid prepare");
            self.sent.lock().push(prepare.amount);
            tokio::time::sleep(self.latency).await;
            Ok(IlpReply::from(IlpReject {
                code: IlpErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                triggered_by: String::new(),
                message: String::new(),
                data: Bytes::new(),
            })
            .to_bytes())
        }
    }

    /// Sends `count` packets, finishing once all have replied.
    struct Burst {
        sequence: SequenceController,
        expiry: ExpiryController,
        pacer: PacingController,
        remaining: u64,
        outstanding: u64,
        replies: u64,
    }

    impl StreamSender for Burst {
        type Output = u64;
        type Pending = u64;
        const NAME: &'static str = "burst";

        fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
            vec![&mut self.sequence, &mut self.expiry, &mut self.pacer]
        }

        fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<u64, u64> {
            if self.remaining == 0 {
                return SendState::Yield;
            }
            self.remaining -= 1;
            self.outstanding += 1;
            request.set_source_amount(Int::new(self.remaining));
            SendState::Send(self.remaining)
        }

        fn apply_reply(&mut self, _pending: u64, _request: &StreamRequest, _reply: &StreamReply) -> ReplyState<u64> {
            self.outstanding -= 1;
            self.replies += 1;
            if self.remaining == 0 && self.outstanding == 0 {
                ReplyState::Done(self.replies)
            } else {
                ReplyState::Schedule
            }
        }
    }

    fn burst(connection: &StreamConnection, count: u64) -> Burst {
        Burst {
            sequence: SequenceController::new(connection.counter().clone()),
            expiry: ExpiryController::new(),
            pacer: PacingController::new(),
            remaining: count,
            outstanding: 0,
            replies: 0,
        }
    }

    fn connection(plugin: Arc<Recorder>) -> Arc<StreamConnection> {
        Arc::new(StreamConnection::new(
            plugin,
            &[1u8; 32],
            IlpAddress::new("test.receiver").unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn sends_concurrently_and_waits_for_every_reply() {
        let plugin = Arc::new(Recorder {
            latency: Duration::from_millis(500),
            sent: Mutex::new(Vec::new()),
        });
        let connection = connection(Arc::clone(&plugin));
        let mut sender = burst(&connection, 5);

        let started = tokio::time::Instant::now();
        let replies = send_loop(&mut sender, &connection).await.unwrap();
        assert_eq!(replies, 5);
        assert_eq!(plugin.sent.lock().len(), 5);
        assert_eq!(connection.counter().get(), 5);
        // Packets overlap: far less than 5 x 500ms.
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    /// Fails on the first reply while other packets are still in flight.
    struct FailFast {
        inner: Burst,
        applied: u64,
    }

    impl StreamSender for FailFast {
        type Output = ();
        type Pending = u64;
        const NAME: &'static str = "fail_fast";

        fn controllers(&mut self) -> Vec<&mut dyn StreamController> {
            self.inner.controllers()
        }

        fn next_state(&mut self, request: &mut RequestBuilder) -> SendState<(), u64> {
            match self.inner.next_state(request) {
                SendState::Send(pending) => SendState::Send(pending),
                _ => SendState::Yield,
            }
        }

        fn apply_reply(&mut self, _pending: u64, _request: &StreamRequest, _reply: &StreamReply) -> ReplyState<()> {
            self.applied += 1;
            ReplyState::Error(PaymentError::ConnectorError)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drains_in_flight_replies_on_error() {
        let plugin = Arc::new(Recorder {
            latency: Duration::from_millis(500),
            sent: Mutex::new(Vec::new()),
        });
        let connection = connection(Arc::clone(&plugin));
        let mut sender = FailFast {
            inner: burst(&connection, 3),
            applied: 0,
        };
        let result = send_loop(&mut sender, &connection).await;
        assert_eq!(result, Err(PaymentError::ConnectorError));
        assert_eq!(sender.applied, plugin.sent.lock().len() as u64);
        assert_eq!(sender.inner.pacer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_veto_stops_before_sending() {
        let plugin = Arc::new(Recorder {
            latency: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        });
        let connection = connection(Arc::clone(&plugin));
        let mut sender = burst(&connection, 3);
        sender.sequence = SequenceController::new(crate::request::Counter::starting_at(
            crate::config::MAX_SAFE_PACKET_COUNT,
        ));
        assert_eq!(
            send_loop(&mut sender, &connection).await,
            Err(PaymentError::MaxSafeEncryptionLimit)
        );
        assert!(plugin.sent.lock().is_empty());
    }
}
