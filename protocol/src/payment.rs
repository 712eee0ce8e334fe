//! # Payment Operations
//!
//! The four public steps of a payment:
//!
//! 1. [`setup_payment`] resolves the destination and learns its asset.
//! 2. [`start_quote`] validates the target, computes the minimum exchange
//!    rate from external prices, and probes the path.
//! 3. [`pay`] executes the quote.
//! 4. [`close_connection`] tells the receiver we are done.
//!
//! All four share one [`StreamConnection`] through [`ResolvedPayment`], so
//! sequence numbers never repeat under the same key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};

use crate::amount::{Int, PositiveInt, PositiveRatio, Ratio};
use crate::config::{DEFAULT_SLIPPAGE, SECRET_LENGTH};
use crate::controllers::{AssetDetails, RateBounds};
use crate::error::PaymentError;
use crate::packet::IlpAddress;
use crate::request::{Plugin, StreamConnection};
use crate::senders::payment::{PaymentTarget, ProgressHandler};
use crate::senders::{self, AssetProbe, ConnectionCloser, PaymentSender, RateProbe};

pub use crate::senders::payment::{PaymentProgress, PaymentType, StreamReceipt};

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Incoming payment metadata published by the receiver's wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IncomingPayment {
    pub completed: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Amount the receiver expects in total, if fixed.
    pub incoming_amount: Option<Int>,
    pub received_amount: Int,
}

/// STREAM credentials of the destination and what is known about it.
#[derive(Clone)]
pub struct PaymentDestination {
    pub shared_secret: [u8; SECRET_LENGTH],
    pub destination_address: IlpAddress,
    pub destination_asset: Option<AssetDetails>,
    pub incoming_payment: Option<IncomingPayment>,
}

impl PaymentDestination {
    /// Builds a destination from raw credentials, as handed out by a
    /// receiver.
    pub fn from_credentials(shared_secret: &[u8], destination_address: &str) -> Result<Self, PaymentError> {
        let shared_secret: [u8; SECRET_LENGTH] = shared_secret
            .try_into()
            .map_err(|_| PaymentError::InvalidCredentials)?;
        let destination_address =
            IlpAddress::new(destination_address).map_err(|_| PaymentError::InvalidCredentials)?;
        Ok(Self {
            shared_secret,
            destination_address,
            destination_asset: None,
            incoming_payment: None,
        })
    }

    pub fn with_asset(mut self, asset: AssetDetails) -> Self {
        self.destination_asset = Some(asset);
        self
    }

    pub fn with_incoming_payment(mut self, incoming_payment: IncomingPayment) -> Self {
        self.incoming_payment = Some(incoming_payment);
        self
    }
}

impl std::fmt::Debug for PaymentDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentDestination")
            .field("destination_address", &self.destination_address)
            .field("destination_asset", &self.destination_asset)
            .field("incoming_payment", &self.incoming_payment)
            .finish_non_exhaustive()
    }
}

/// Resolves a payment destination, e.g. by querying the receiver's wallet.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    async fn resolve(&self) -> Result<PaymentDestination, PaymentError>;
}

/// Credentials passed directly resolve to themselves.
#[async_trait]
impl DestinationResolver for PaymentDestination {
    async fn resolve(&self) -> Result<PaymentDestination, PaymentError> {
        Ok(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

pub struct SetupOptions {
    pub plugin: Arc<dyn Plugin>,
    pub destination: Arc<dyn DestinationResolver>,
}

/// A destination with a known asset and an open connection.
#[derive(Clone)]
pub struct ResolvedPayment {
    pub destination_address: IlpAddress,
    pub destination_asset: AssetDetails,
    pub incoming_payment: Option<IncomingPayment>,
    connection: Arc<StreamConnection>,
}

impl ResolvedPayment {
    pub fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }

    /// Number of packets sent on this connection so far.
    pub fn request_count(&self) -> u64 {
        self.connection.counter().get()
    }
}

/// Resolves the destination and, unless already known, asks the receiver
/// for its asset.
pub async fn setup_payment(options: SetupOptions) -> Result<ResolvedPayment, PaymentError> {
    let destination = options.destination.resolve().await?;
    let connection = Arc::new(StreamConnection::new(
        options.plugin,
        &destination.shared_secret,
        destination.destination_address.clone(),
    ));

    let mut probe = AssetProbe::new(&connection, destination.destination_asset.clone());
    let destination_asset = senders::send_loop(&mut probe, &connection).await?;

    info!(
        connection = %connection.id(),
        asset_code = %destination_asset.code,
        asset_scale = destination_asset.scale,
        "resolved payment destination"
    );

    Ok(ResolvedPayment {
        destination_address: destination.destination_address,
        destination_asset,
        incoming_payment: destination.incoming_payment,
        connection,
    })
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

pub struct QuoteOptions<'a> {
    pub destination: &'a ResolvedPayment,
    pub source_asset: Option<AssetDetails>,
    /// Fixed source amount, in base units of the source asset.
    pub amount_to_send: Option<u64>,
    /// Fixed destination amount, in base units of the destination asset.
    pub amount_to_deliver: Option<u64>,
    /// Fraction subtracted from the external rate. Defaults to 1%.
    pub slippage: Option<f64>,
    /// Asset code to price in a common base asset.
    pub prices: HashMap<String, f64>,
}

impl<'a> QuoteOptions<'a> {
    pub fn new(destination: &'a ResolvedPayment) -> Self {
        Self {
            destination,
            source_asset: None,
            amount_to_send: None,
            amount_to_deliver: None,
            slippage: None,
            prices: HashMap::new(),
        }
    }
}

/// Parameters of one payment, fixed before any money moves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub payment_type: PaymentType,
    pub max_source_amount: Int,
    pub min_delivery_amount: Int,
    pub max_packet_amount: Int,
    /// Inclusive lower bound of the probed rate.
    pub low_estimated_exchange_rate: Ratio,
    /// Exclusive upper bound of the probed rate.
    pub high_estimated_exchange_rate: PositiveRatio,
    pub min_exchange_rate: Ratio,
}

fn is_non_negative_finite(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Validates the target and computes the minimum acceptable rate, before
/// any packet is sent.
fn payment_target(options: &QuoteOptions<'_>) -> Result<(PaymentType, PositiveInt), PaymentError> {
    if let Some(incoming) = &options.destination.incoming_payment {
        if incoming.completed {
            debug!("quote failed: incoming payment is already completed");
            return Err(PaymentError::IncomingPaymentCompleted);
        }
        if incoming.expires_at.is_some_and(|expires_at| expires_at <= Utc::now()) {
            debug!("quote failed: incoming payment is expired");
            return Err(PaymentError::IncomingPaymentExpired);
        }
        if let Some(incoming_amount) = incoming.incoming_amount {
            let remaining = incoming_amount.saturating_sub(incoming.received_amount);
            let Some(remaining) = remaining.to_positive() else {
                debug!(
                    incoming_amount = incoming_amount.value(),
                    received_amount = incoming.received_amount.value(),
                    "quote failed: incoming payment was already paid"
                );
                return Err(PaymentError::IncomingPaymentCompleted);
            };
            return Ok((PaymentType::FixedDelivery, remaining));
        }
    }

    if let Some(amount) = options.amount_to_deliver {
        let amount = PositiveInt::new(amount).ok_or(PaymentError::InvalidDestinationAmount)?;
        return Ok((PaymentType::FixedDelivery, amount));
    }
    if let Some(amount) = options.amount_to_send {
        let amount = PositiveInt::new(amount).ok_or(PaymentError::InvalidSourceAmount)?;
        return Ok((PaymentType::FixedSend, amount));
    }
    debug!("invalid config: no incoming amount, amount to send, or amount to deliver");
    Err(PaymentError::UnknownPaymentTarget)
}

fn min_exchange_rate(options: &QuoteOptions<'_>, slippage: f64) -> Result<Ratio, PaymentError> {
    if slippage == 1.0 {
        return Ok(Ratio::ZERO);
    }
    let source_asset = options
        .source_asset
        .as_ref()
        .ok_or(PaymentError::UnknownSourceAsset)?;
    let destination_asset = &options.destination.destination_asset;

    let external_rate = if source_asset.code == destination_asset.code {
        1.0
    } else {
        let source_price = options.prices.get(&source_asset.code).copied();
        let destination_price = options.prices.get(&destination_asset.code).copied();
        match (source_price, destination_price) {
            (Some(source), Some(destination))
                if is_non_negative_finite(source)
                    && is_non_negative_finite(destination)
                    && destination > 0.0 =>
            {
                source / destination
            }
            _ => {
                debug!(
                    source = %source_asset.code,
                    destination = %destination_asset.code,
                    "quote failed: no external rate available"
                );
                return Err(PaymentError::ExternalRateUnavailable);
            }
        }
    };

    let scale_shift = i32::from(destination_asset.scale) - i32::from(source_asset.scale);
    let rate = external_rate * (1.0 - slippage) * 10f64.powi(scale_shift);
    Ratio::from_f64(rate).ok_or(PaymentError::ExternalRateUnavailable)
}

/// Probes the path and fixes the parameters of the payment.
pub async fn start_quote(options: QuoteOptions<'_>) -> Result<Quote, PaymentError> {
    let (payment_type, amount) = payment_target(&options)?;

    let slippage = options.slippage.unwrap_or(DEFAULT_SLIPPAGE);
    if !is_non_negative_finite(slippage) || slippage > 1.0 {
        debug!(slippage, "invalid config: slippage is not between 0 and 1");
        return Err(PaymentError::InvalidSlippage);
    }
    let min_exchange_rate = min_exchange_rate(&options, slippage)?;
    debug!(min_exchange_rate = %min_exchange_rate, "calculated min exchange rate");

    let destination = options.destination;
    let connection = destination.connection();
    let mut probe = RateProbe::new(connection, destination.destination_asset.clone());
    let probed = senders::send_loop(&mut probe, connection).await?;

    if probed.low_estimated_exchange_rate < min_exchange_rate {
        debug!(
            probed = %probed.low_estimated_exchange_rate,
            minimum = %min_exchange_rate,
            "quote failed: probed exchange rate is below the minimum"
        );
        return Err(PaymentError::InsufficientExchangeRate);
    }

    let (max_source_amount, min_delivery_amount) = match payment_type {
        PaymentType::FixedSend => (
            amount.as_int(),
            amount
                .as_int()
                .saturating_sub(Int::ONE)
                .multiply_ceil(min_exchange_rate),
        ),
        PaymentType::FixedDelivery => {
            let Some(inverse_rate) = min_exchange_rate.reciprocal() else {
                debug!("quote failed: unenforceable delivery, min exchange rate is 0");
                return Err(PaymentError::UnenforceableDelivery);
            };
            (
                amount
                    .as_int()
                    .multiply_floor(inverse_rate)
                    .saturating_add(Int::ONE),
                amount.as_int(),
            )
        }
    };

    let quote = Quote {
        payment_type,
        max_source_amount,
        min_delivery_amount,
        max_packet_amount: probed.max_packet_amount.as_int(),
        low_estimated_exchange_rate: probed.low_estimated_exchange_rate,
        high_estimated_exchange_rate: probed.high_estimated_exchange_rate,
        min_exchange_rate,
    };
    info!(
        payment_type = ?quote.payment_type,
        max_source_amount = quote.max_source_amount.value(),
        min_delivery_amount = quote.min_delivery_amount.value(),
        max_packet_amount = quote.max_packet_amount.value(),
        "quote complete"
    );
    Ok(quote)
}

// ---------------------------------------------------------------------------
// Pay
// ---------------------------------------------------------------------------

pub struct PayOptions<'a> {
    pub destination: &'a ResolvedPayment,
    pub quote: &'a Quote,
    /// Application data delivered once on the default stream.
    pub app_data: Option<Bytes>,
    pub progress_handler: Option<ProgressHandler>,
}

impl<'a> PayOptions<'a> {
    pub fn new(destination: &'a ResolvedPayment, quote: &'a Quote) -> Self {
        Self {
            destination,
            quote,
            app_data: None,
            progress_handler: None,
        }
    }
}

fn payment_target_from_quote(quote: &Quote) -> Result<PaymentTarget, PaymentError> {
    let max_packet_amount = quote
        .max_packet_amount
        .to_positive()
        .ok_or(PaymentError::InvalidQuote)?;
    if !quote.max_source_amount.is_positive() {
        return Err(PaymentError::InvalidQuote);
    }
    if quote.payment_type == PaymentType::FixedDelivery && !quote.min_exchange_rate.is_positive() {
        return Err(PaymentError::InvalidQuote);
    }
    if quote.low_estimated_exchange_rate >= quote.high_estimated_exchange_rate.as_ratio() {
        return Err(PaymentError::InvalidQuote);
    }
    Ok(PaymentTarget {
        payment_type: quote.payment_type,
        max_source_amount: quote.max_source_amount,
        min_delivery_amount: quote.min_delivery_amount,
        min_exchange_rate: quote.min_exchange_rate,
        max_packet_amount,
        rate_bounds: RateBounds {
            lower: quote.low_estimated_exchange_rate,
            upper: quote.high_estimated_exchange_rate,
        },
    })
}

/// Executes a quote. Only an invalid quote is an `Err`; a payment that
/// stops early returns its progress with `error` set.
pub async fn pay(options: PayOptions<'_>) -> Result<PaymentProgress, PaymentError> {
    let target = payment_target_from_quote(options.quote)?;
    let destination = options.destination;
    let connection = destination.connection();

    let mut sender = PaymentSender::new(
        connection,
        target,
        destination.destination_asset.clone(),
        options.app_data,
        options.progress_handler,
    );
    let outcome = senders::send_loop(&mut sender, connection).await;

    let mut progress = sender.progress();
    progress.error = outcome.err();
    info!(
        amount_sent = progress.amount_sent.value(),
        amount_delivered = progress.amount_delivered.value(),
        error = ?progress.error,
        "payment finished"
    );
    Ok(progress)
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Notifies the receiver that the connection is closed. Best effort.
pub async fn close_connection(destination: &ResolvedPayment) {
    let connection = destination.connection();
    let mut closer = ConnectionCloser::new(connection);
    let span = info_span!("close", connection = %connection.id());
    if let Err(err) = senders::send_loop(&mut closer, connection)
        .instrument(span)
        .await
    {
        debug!(error = %err, "failed to close connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_validated() {
        assert_eq!(
            PaymentDestination::from_credentials(&[0u8; 31], "test.receiver").unwrap_err(),
            PaymentError::InvalidCredentials
        );
        assert_eq!(
            PaymentDestination::from_credentials(&[0u8; 32], "not an address").unwrap_err(),
            PaymentError::InvalidCredentials
        );
        let destination = PaymentDestination::from_credentials(&[7u8; 32], "test.receiver.abc")
            .unwrap()
            .with_asset(AssetDetails::new("USD", 2));
        assert_eq!(destination.destination_address.as_str(), "test.receiver.abc");
        assert!(!format!("{destination:?}").contains("shared_secret"));
    }

    fn quote() -> Quote {
        Quote {
            payment_type: PaymentType::FixedSend,
            max_source_amount: Int::new(100),
            min_delivery_amount: Int::new(99),
            max_packet_amount: Int::new(10),
            low_estimated_exchange_rate: Ratio::ONE,
            high_estimated_exchange_rate: Ratio::from_parts(2, 1).unwrap().to_positive().unwrap(),
            min_exchange_rate: Ratio::ONE,
        }
    }

    #[test]
    fn inconsistent_quotes_are_rejected() {
        assert!(payment_target_from_quote(&quote()).is_ok());

        let zero_packet = Quote {
            max_packet_amount: Int::ZERO,
            ..quote()
        };
        assert_eq!(payment_target_from_quote(&zero_packet).unwrap_err(), PaymentError::InvalidQuote);

        let zero_source = Quote {
            max_source_amount: Int::ZERO,
            ..quote()
        };
        assert_eq!(payment_target_from_quote(&zero_source).unwrap_err(), PaymentError::InvalidQuote);

        let unenforceable = Quote {
            payment_type: PaymentType::FixedDelivery,
            min_exchange_rate: Ratio::ZERO,
            ..quote()
        };
        assert_eq!(payment_target_from_quote(&unenforceable).unwrap_err(), PaymentError::InvalidQuote);

        let inverted = Quote {
            low_estimated_exchange_rate: Ratio::from_parts(3, 1).unwrap(),
            ..quote()
        };
        assert_eq!(payment_target_from_quote(&inverted).unwrap_err(), PaymentError::InvalidQuote);
    }

    #[test]
    fn quote_serializes_for_operators() {
        let json = serde_json::to_value(quote()).unwrap();
        assert_eq!(json["payment_type"], "FixedSend");
        assert!(json.get("max_source_amount").is_some());
    }
}
