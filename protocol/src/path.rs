//! # Simulated Interledger Path
//!
//! An in-process stand-in for the network between a sender and a receiver.
//! A [`PathPlugin`] decodes each prepare and runs it through a chain of
//! [`Middleware`], each of which may forward it (possibly modified), delay
//! it, or answer it. The last middleware is normally a [`ReceiverEndpoint`].
//!
//! ```text
//! sender ─▶ MaxPacketAmount ─▶ ExchangeRate ─▶ Latency ─▶ ReceiverEndpoint
//! ```
//!
//! The node's `simulate` command and the integration tests build payments
//! over these paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::amount::{Int, Ratio};
use crate::packet::{AmountTooLargeData, IlpErrorCode, IlpPrepare, IlpReject, IlpReply};
use crate::receiver::{PrepareOutcome, StreamReceiver};
use crate::request::{Plugin, TransportError};

/// Address connectors on the simulated path reject as.
pub const CONNECTOR_ADDRESS: &str = "test.connector";

fn connector_reject(code: IlpErrorCode, message: &str, data: Bytes) -> IlpReply {
    IlpReply::Reject(IlpReject {
        code,
        triggered_by: CONNECTOR_ADDRESS.to_string(),
        message: message.to_string(),
        data,
    })
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// One hop of the simulated path.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, prepare: IlpPrepare, next: Next<'_>) -> IlpReply;
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Forwards `prepare` to the next hop. Falling off the end of the chain
    /// is an unreachable destination.
    pub async fn run(self, prepare: IlpPrepare) -> IlpReply {
        match self.chain.split_first() {
            Some((hop, rest)) => hop.handle(prepare, Next { chain: rest }).await,
            None => connector_reject(IlpErrorCode::F02_UNREACHABLE, "no route", Bytes::new()),
        }
    }
}

/// A [`Plugin`] that delivers packets through a middleware chain.
#[derive(Clone, Default)]
pub struct PathPlugin {
    chain: Vec<Arc<dyn Middleware>>,
}

impl PathPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hop.
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.chain.push(Arc::new(middleware));
        self
    }

    /// Appends a hop the caller keeps a handle to.
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.push(middleware);
        self
    }

    pub async fn handle(&self, prepare: IlpPrepare) -> IlpReply {
        Next { chain: &self.chain }.run(prepare).await
    }
}

#[async_trait]
impl Plugin for PathPlugin {
    async fn send_data(&self, prepare: Bytes) -> Result<Bytes, TransportError> {
        let prepare =
            IlpPrepare::from_bytes(&prepare).map_err(|err| TransportError(err.to_string()))?;
        Ok(self.handle(prepare).await.to_bytes())
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Rejects packets above `maximum` with F08.
pub struct MaxPacketAmount {
    maximum: u64,
    with_metadata: bool,
}

impl MaxPacketAmount {
    /// F08 rejects carry the received and maximum amounts.
    pub fn new(maximum: u64) -> Self {
        Self {
            maximum,
            with_metadata: true,
        }
    }

    /// F08 rejects carry no data, so the sender must search for the limit.
    pub fn without_metadata(maximum: u64) -> Self {
        Self {
            maximum,
            with_metadata: false,
        }
    }
}

#[async_trait]
impl Middleware for MaxPacketAmount {
    async fn handle(&self, prepare: IlpPrepare, next: Next<'_>) -> IlpReply {
        if prepare.amount <= self.maximum {
            return next.run(prepare).await;
        }
        trace!(amount = prepare.amount, maximum = self.maximum, "packet too large");
        let data = if self.with_metadata {
            AmountTooLargeData {
                received_amount: prepare.amount,
                maximum_amount: self.maximum,
            }
            .to_bytes()
        } else {
            Bytes::new()
        };
        connector_reject(IlpErrorCode::F08_AMOUNT_TOO_LARGE, "amount too large", data)
    }
}

/// Converts amounts at a fixed rate, rounding down.
pub struct ExchangeRate {
    rate: Ratio,
}

impl ExchangeRate {
    pub fn new(rate: Ratio) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl Middleware for ExchangeRate {
    async fn handle(&self, mut prepare: IlpPrepare, next: Next<'_>) -> IlpReply {
        prepare.amount = Int::new(prepare.amount).multiply_floor(self.rate).value();
        next.run(prepare).await
    }
}

/// Delays each packet before forwarding it.
pub struct Latency {
    delay: Duration,
}

impl Latency {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Middleware for Latency {
    async fn handle(&self, prepare: IlpPrepare, next: Next<'_>) -> IlpReply {
        tokio::time::sleep(self.delay).await;
        next.run(prepare).await
    }
}

/// Sums the amounts of fulfilled packets passing this hop.
#[derive(Default)]
pub struct BalanceTracker {
    fulfilled: Mutex<u64>,
}

impl BalanceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total_fulfilled(&self) -> u64 {
        *self.fulfilled.lock()
    }
}

#[async_trait]
impl Middleware for BalanceTracker {
    async fn handle(&self, prepare: IlpPrepare, next: Next<'_>) -> IlpReply {
        let amount = prepare.amount;
        let reply = next.run(prepare).await;
        if let IlpReply::Fulfill(_) = reply {
            let mut fulfilled = self.fulfilled.lock();
            *fulfilled = fulfilled.saturating_add(amount);
        }
        reply
    }
}

/// Answers every packet with `code`.
pub struct RejectAll {
    code: IlpErrorCode,
}

impl RejectAll {
    pub fn new(code: IlpErrorCode) -> Self {
        Self { code }
    }
}

#[async_trait]
impl Middleware for RejectAll {
    async fn handle(&self, _prepare: IlpPrepare, _next: Next<'_>) -> IlpReply {
        connector_reject(self.code, "", Bytes::new())
    }
}

/// Never answers.
pub struct Blackhole;

#[async_trait]
impl Middleware for Blackhole {
    async fn handle(&self, _prepare: IlpPrepare, _next: Next<'_>) -> IlpReply {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Terminates the path in a [`StreamReceiver`] that accepts all money and
/// signs receipts for the running total of each connection.
pub struct ReceiverEndpoint {
    receiver: StreamReceiver,
    totals: Mutex<HashMap<String, u64>>,
}

impl ReceiverEndpoint {
    pub fn new(receiver: StreamReceiver) -> Arc<Self> {
        Arc::new(Self {
            receiver,
            totals: Mutex::new(HashMap::new()),
        })
    }

    pub fn receiver(&self) -> &StreamReceiver {
        &self.receiver
    }

    /// Total accepted on the connection with this id.
    pub fn total_received(&self, connection_id: &str) -> u64 {
        self.totals.lock().get(connection_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Middleware for ReceiverEndpoint {
    async fn handle(&self, prepare: IlpPrepare, _next: Next<'_>) -> IlpReply {
        match self.receiver.create_reply(&prepare) {
            PrepareOutcome::Reply(reply) => reply,
            PrepareOutcome::Incoming(mut money) => {
                let total = {
                    let mut totals = self.totals.lock();
                    let total = totals.entry(money.connection_id().to_string()).or_insert(0);
                    *total = total.saturating_add(money.amount());
                    *total
                };
                money.set_total_received(total);
                money.accept()
            }
        }
    }
}
