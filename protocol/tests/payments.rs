//! End-to-end payments over the simulated path.
//!
//! Each test wires a sender to an in-process [`StreamReceiver`] through a
//! chain of path middleware, then runs setup, quote and pay exactly as an
//! application would. Time is paused so timeouts run instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use stream_pay::amount::{Int, Ratio};
use stream_pay::config::MAX_SAFE_PACKET_COUNT;
use stream_pay::controllers::{AssetDetails, RateBounds};
use stream_pay::crypto::sha256;
use stream_pay::packet::IlpErrorCode;
use stream_pay::path::{
    BalanceTracker, Blackhole, ExchangeRate, Latency, MaxPacketAmount, PathPlugin, ReceiverEndpoint,
    RejectAll,
};
use stream_pay::payment::{
    close_connection, pay, setup_payment, start_quote, IncomingPayment, PayOptions,
    PaymentDestination, PaymentProgress, PaymentType, Quote, QuoteOptions, ResolvedPayment,
    SetupOptions,
};
use stream_pay::receiver::{ConnectionDetails, ReceiptSetup, StreamCredentials};
use stream_pay::request::{Counter, Plugin, StreamConnection};
use stream_pay::senders::payment::{PaymentSender, PaymentTarget};
use stream_pay::senders::send_loop;
use stream_pay::{PaymentError, StreamReceiver};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn receiver() -> StreamReceiver {
    StreamReceiver::new(&[7u8; 32], "test.receiver").unwrap()
}

fn credentials(receiver: &StreamReceiver, asset: AssetDetails) -> StreamCredentials {
    let details = ConnectionDetails {
        asset: Some(asset),
        receipt_setup: Some(ReceiptSetup {
            nonce: [1u8; 16],
            secret: [2u8; 32],
        }),
        ..Default::default()
    };
    receiver.generate_credentials(&details).unwrap()
}

fn destination(credentials: &StreamCredentials) -> PaymentDestination {
    PaymentDestination::from_credentials(
        &credentials.shared_secret,
        credentials.destination_address.as_str(),
    )
    .unwrap()
}

async fn resolve(plugin: PathPlugin, destination: PaymentDestination) -> ResolvedPayment {
    setup_payment(SetupOptions {
        plugin: Arc::new(plugin),
        destination: Arc::new(destination),
    })
    .await
    .unwrap()
}

fn connection_id(credentials: &StreamCredentials) -> String {
    hex::encode(sha256(credentials.destination_address.as_str().as_bytes()))
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn setup_learns_destination_asset() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("XRP", 9));
    let path = PathPlugin::new().with_shared(endpoint.clone());

    let resolved = resolve(path, destination(&credentials)).await;
    assert_eq!(resolved.destination_asset, AssetDetails::new("XRP", 9));
    assert_eq!(resolved.destination_address, credentials.destination_address);
    assert!(resolved.request_count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn setup_fails_when_receiver_withholds_asset() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = endpoint
        .receiver()
        .generate_credentials(&ConnectionDetails::default())
        .unwrap();
    let result = setup_payment(SetupOptions {
        plugin: Arc::new(PathPlugin::new().with_shared(endpoint.clone())),
        destination: Arc::new(destination(&credentials)),
    })
    .await;
    assert_eq!(result.err(), Some(PaymentError::UnknownDestinationAsset));
}

#[tokio::test(start_paused = true)]
async fn setup_fails_when_nothing_authentic_comes_back() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let result = setup_payment(SetupOptions {
        plugin: Arc::new(PathPlugin::new().with(RejectAll::new(IlpErrorCode::T01_PEER_UNREACHABLE))),
        destination: Arc::new(destination(&credentials)),
    })
    .await;
    assert_eq!(result.err(), Some(PaymentError::EstablishmentFailed));
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fixed_delivery_across_scales() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("ABC", 5));
    let sender_side = BalanceTracker::new();
    let path = PathPlugin::new()
        .with_shared(sender_side.clone())
        .with(MaxPacketAmount::new(320))
        .with(ExchangeRate::new(Ratio::from_parts(99, 1000).unwrap()))
        .with_shared(endpoint.clone());
    let resolved = resolve(path, destination(&credentials)).await;

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_deliver = Some(63);
    options.source_asset = Some(AssetDetails::new("ABC", 6));
    options.slippage = Some(0.03125);
    let quote = start_quote(options).await.unwrap();

    assert_eq!(quote.payment_type, PaymentType::FixedDelivery);
    assert_eq!(quote.max_packet_amount, Int::new(320));
    assert_eq!(quote.min_exchange_rate, Ratio::from_parts(31, 320).unwrap());
    assert_eq!(quote.min_delivery_amount, Int::new(63));
    assert_eq!(quote.max_source_amount, Int::new(651));

    let progress = pay(PayOptions::new(&resolved, &quote)).await.unwrap();
    assert_eq!(progress.error, None);
    assert_eq!(progress.amount_delivered, Int::new(63));
    assert_eq!(progress.amount_sent, quote.max_source_amount);
    assert!(progress.source_amount_in_flight.is_zero());
    assert_eq!(sender_side.total_fulfilled(), 651);
    assert_eq!(endpoint.total_received(&connection_id(&credentials)), 63);

    let receipt = progress.stream_receipt.expect("receiver signs receipts");
    assert_eq!(receipt.total_received, Int::new(63));

    close_connection(&resolved).await;
}

#[tokio::test(start_paused = true)]
async fn fixed_send_between_equally_priced_assets() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("EUR", 6));
    let path = PathPlugin::new()
        .with(MaxPacketAmount::new(5454))
        .with(ExchangeRate::new(Ratio::from_parts(995, 1000).unwrap()))
        .with_shared(endpoint.clone());
    let resolved = resolve(path, destination(&credentials)).await;

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(100_427);
    options.source_asset = Some(AssetDetails::new("USD", 6));
    options.slippage = Some(0.015);
    options.prices = HashMap::from([("USD".to_string(), 1.0), ("EUR".to_string(), 1.0)]);
    let quote = start_quote(options).await.unwrap();

    assert_eq!(quote.payment_type, PaymentType::FixedSend);
    assert_eq!(quote.max_packet_amount, Int::new(5454));
    assert_eq!(quote.max_source_amount, Int::new(100_427));
    assert!(quote.low_estimated_exchange_rate >= quote.min_exchange_rate);

    let updates = Arc::new(Mutex::new(Vec::<PaymentProgress>::new()));
    let recorded = updates.clone();
    let mut options = PayOptions::new(&resolved, &quote);
    options.progress_handler = Some(Box::new(move |progress: &PaymentProgress| {
        recorded.lock().push(progress.clone());
    }));
    let progress = pay(options).await.unwrap();

    assert_eq!(progress.error, None);
    assert_eq!(progress.amount_sent, Int::new(100_427));
    assert!(progress.amount_delivered >= quote.min_delivery_amount);
    assert_eq!(
        progress.amount_delivered,
        Int::new(endpoint.total_received(&connection_id(&credentials)))
    );

    let updates = updates.lock();
    assert!(!updates.is_empty());
    assert!(updates
        .windows(2)
        .all(|pair| pair[0].amount_sent <= pair[1].amount_sent));
}

#[tokio::test(start_paused = true)]
async fn max_packet_is_found_without_f08_metadata() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("EUR", 6));
    let path = PathPlugin::new()
        .with(MaxPacketAmount::without_metadata(5454))
        .with(ExchangeRate::new(Ratio::from_parts(995, 1000).unwrap()))
        .with_shared(endpoint.clone());
    let resolved = resolve(path, destination(&credentials)).await;

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(100_427);
    options.source_asset = Some(AssetDetails::new("USD", 6));
    options.slippage = Some(0.015);
    options.prices = HashMap::from([("USD".to_string(), 1.0), ("EUR".to_string(), 1.0)]);
    let quote = start_quote(options).await.unwrap();

    // Binary search converges on the exact cap.
    assert_eq!(quote.max_packet_amount, Int::new(5454));

    let progress = pay(PayOptions::new(&resolved, &quote)).await.unwrap();
    assert_eq!(progress.error, None);
    assert_eq!(progress.amount_sent, Int::new(100_427));
    assert!(progress.amount_delivered >= quote.min_delivery_amount);
    assert_eq!(
        progress.amount_delivered,
        Int::new(endpoint.total_received(&connection_id(&credentials)))
    );
}

#[tokio::test(start_paused = true)]
async fn insufficient_path_rate_fails_the_quote() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("USD", 2));
    let path = PathPlugin::new()
        .with(ExchangeRate::new(Ratio::from_parts(1, 2).unwrap()))
        .with_shared(endpoint.clone());
    let resolved = resolve(path, destination(&credentials)).await;

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(1_000);
    options.source_asset = Some(AssetDetails::new("USD", 2));
    assert_eq!(
        start_quote(options).await.unwrap_err(),
        PaymentError::InsufficientExchangeRate
    );
}

#[tokio::test(start_paused = true)]
async fn idle_path_times_out_without_sending_money() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let path = PathPlugin::new()
        .with(Latency::new(Duration::from_secs(1)))
        .with(RejectAll::new(IlpErrorCode::F99_APPLICATION_ERROR));
    let resolved = resolve(
        path,
        destination(&credentials).with_asset(AssetDetails::new("USD", 2)),
    )
    .await;

    let quote = Quote {
        payment_type: PaymentType::FixedSend,
        max_source_amount: Int::new(1_000),
        min_delivery_amount: Int::new(999),
        max_packet_amount: Int::new(1_000),
        low_estimated_exchange_rate: Ratio::ONE,
        high_estimated_exchange_rate: Ratio::from_parts(2, 1).unwrap().to_positive().unwrap(),
        min_exchange_rate: Ratio::ONE,
    };
    let progress = pay(PayOptions::new(&resolved, &quote)).await.unwrap();
    assert_eq!(progress.error, Some(PaymentError::IdleTimeout));
    assert_eq!(progress.amount_sent, Int::ZERO);
    assert!(progress.source_amount_in_flight.is_zero());
}

#[tokio::test(start_paused = true)]
async fn blackholed_path_times_out_without_sending_money() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let path = PathPlugin::new().with(Blackhole);
    let resolved = resolve(
        path,
        destination(&credentials).with_asset(AssetDetails::new("USD", 2)),
    )
    .await;

    let quote = Quote {
        payment_type: PaymentType::FixedSend,
        max_source_amount: Int::new(1_000),
        min_delivery_amount: Int::new(999),
        max_packet_amount: Int::new(1_000),
        low_estimated_exchange_rate: Ratio::ONE,
        high_estimated_exchange_rate: Ratio::from_parts(2, 1).unwrap().to_positive().unwrap(),
        min_exchange_rate: Ratio::ONE,
    };
    let progress = pay(PayOptions::new(&resolved, &quote)).await.unwrap();
    assert_eq!(progress.error, Some(PaymentError::IdleTimeout));
    assert_eq!(progress.amount_sent, Int::ZERO);
    assert_eq!(progress.amount_delivered, Int::ZERO);
    // Expired packets are drained before the payment ends.
    assert!(progress.source_amount_in_flight.is_zero());
}

#[tokio::test(start_paused = true)]
async fn connector_errors_end_the_payment() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let path = PathPlugin::new().with(RejectAll::new(IlpErrorCode::F02_UNREACHABLE));
    let resolved = resolve(
        path,
        destination(&credentials).with_asset(AssetDetails::new("USD", 2)),
    )
    .await;

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(10);
    options.source_asset = Some(AssetDetails::new("USD", 2));
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::ConnectorError);
}

#[tokio::test(start_paused = true)]
async fn sequence_exhaustion_sends_nothing() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("USD", 2));
    let tracker = BalanceTracker::new();
    let plugin: Arc<dyn Plugin> = Arc::new(
        PathPlugin::new()
            .with_shared(tracker.clone())
            .with_shared(endpoint.clone()),
    );
    let connection = Arc::new(
        StreamConnection::new(plugin, &credentials.shared_secret, credentials.destination_address.clone())
            .with_counter(Counter::starting_at(MAX_SAFE_PACKET_COUNT)),
    );

    let target = PaymentTarget {
        payment_type: PaymentType::FixedSend,
        max_source_amount: Int::new(100),
        min_delivery_amount: Int::ZERO,
        min_exchange_rate: Ratio::ZERO,
        max_packet_amount: Int::new(100).to_positive().unwrap(),
        rate_bounds: RateBounds {
            lower: Ratio::ONE,
            upper: Ratio::from_parts(2, 1).unwrap().to_positive().unwrap(),
        },
    };
    let mut sender = PaymentSender::new(&connection, target, AssetDetails::new("USD", 2), None, None);
    let result = send_loop(&mut sender, &connection).await;

    assert_eq!(result, Err(PaymentError::MaxSafeEncryptionLimit));
    assert_eq!(sender.progress().amount_sent, Int::ZERO);
    assert_eq!(tracker.total_fulfilled(), 0);
    assert_eq!(connection.counter().get(), MAX_SAFE_PACKET_COUNT);
}

// ---------------------------------------------------------------------------
// Quote validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn incoming_payment_sets_the_delivery_target() {
    let endpoint = ReceiverEndpoint::new(receiver());
    let credentials = credentials(endpoint.receiver(), AssetDetails::new("USD", 2));
    let incoming = IncomingPayment {
        completed: false,
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        incoming_amount: Some(Int::new(100)),
        received_amount: Int::new(40),
    };
    let path = PathPlugin::new().with_shared(endpoint.clone());
    let resolved = resolve(path, destination(&credentials).with_incoming_payment(incoming)).await;

    let mut options = QuoteOptions::new(&resolved);
    options.source_asset = Some(AssetDetails::new("USD", 2));
    options.amount_to_send = Some(5);
    let quote = start_quote(options).await.unwrap();
    assert_eq!(quote.payment_type, PaymentType::FixedDelivery);
    assert_eq!(quote.min_delivery_amount, Int::new(60));
}

#[tokio::test(start_paused = true)]
async fn finished_incoming_payments_cannot_be_quoted() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let cases = [
        (
            IncomingPayment {
                completed: true,
                expires_at: None,
                incoming_amount: None,
                received_amount: Int::ZERO,
            },
            PaymentError::IncomingPaymentCompleted,
        ),
        (
            IncomingPayment {
                completed: false,
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                incoming_amount: None,
                received_amount: Int::ZERO,
            },
            PaymentError::IncomingPaymentExpired,
        ),
        (
            IncomingPayment {
                completed: false,
                expires_at: None,
                incoming_amount: Some(Int::new(50)),
                received_amount: Int::new(50),
            },
            PaymentError::IncomingPaymentCompleted,
        ),
    ];

    for (incoming, expected) in cases {
        let resolved = resolve(
            PathPlugin::new(),
            destination(&credentials)
                .with_asset(AssetDetails::new("USD", 2))
                .with_incoming_payment(incoming),
        )
        .await;
        let mut options = QuoteOptions::new(&resolved);
        options.source_asset = Some(AssetDetails::new("USD", 2));
        assert_eq!(start_quote(options).await.unwrap_err(), expected);
        assert_eq!(resolved.request_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn quote_configuration_errors_send_nothing() {
    let credentials = credentials(&receiver(), AssetDetails::new("USD", 2));
    let resolved = resolve(
        PathPlugin::new(),
        destination(&credentials).with_asset(AssetDetails::new("EUR", 2)),
    )
    .await;

    let options = QuoteOptions::new(&resolved);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::UnknownPaymentTarget);

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(0);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::InvalidSourceAmount);

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_deliver = Some(0);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::InvalidDestinationAmount);

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(10);
    options.slippage = Some(1.5);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::InvalidSlippage);

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(10);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::UnknownSourceAsset);

    let mut options = QuoteOptions::new(&resolved);
    options.amount_to_send = Some(10);
    options.source_asset = Some(AssetDetails::new("USD", 2));
    options.prices = HashMap::from([("USD".to_string(), 1.0)]);
    assert_eq!(start_quote(options).await.unwrap_err(), PaymentError::ExternalRateUnavailable);

    assert_eq!(resolved.request_count(), 0);
}
