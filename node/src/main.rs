// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # STREAM Pay Node
//!
//! Entry point for the `stream-pay-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and dispatches to a subcommand:
//!
//! - `credentials` issue one set of receiver credentials
//! - `serve`       run the receiver over ILP-over-HTTP
//! - `simulate`    quote and pay across an in-process Interledger path
//! - `version`     print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::RngCore;
use tokio::signal;

use stream_pay::amount::Ratio;
use stream_pay::config::{PROTOCOL_VERSION, SECRET_LENGTH};
use stream_pay::controllers::AssetDetails;
use stream_pay::path::{ExchangeRate, Latency, MaxPacketAmount, PathPlugin, ReceiverEndpoint};
use stream_pay::payment::{
    close_connection, pay, setup_payment, start_quote, PayOptions, PaymentDestination,
    PaymentProgress, QuoteOptions, SetupOptions,
};
use stream_pay::receiver::ConnectionDetails;
use stream_pay::StreamReceiver;

use cli::{Commands, ReceiverArgs, StreamPayCli};
use metrics::NodeMetrics;

/// Address of the receiver at the end of a simulated path.
const SIMULATED_RECEIVER_ADDRESS: &str = "test.simulated-receiver";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StreamPayCli::parse();
    logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.log_format);

    match cli.command {
        Commands::Credentials(args) => issue_credentials(args),
        Commands::Serve(args) => serve(args).await,
        Commands::Simulate(args) => simulate(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn version_string() -> String {
    format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION)
}

/// Builds the receiver described by `args`.
fn build_receiver(args: &ReceiverArgs) -> Result<(StreamReceiver, Option<AssetDetails>)> {
    let server_secret =
        hex::decode(args.server_secret.trim()).context("server secret must be hex-encoded")?;
    let receiver = StreamReceiver::new(&server_secret, &args.server_address)?;
    let asset = args
        .asset_code
        .as_ref()
        .map(|code| AssetDetails::new(code.clone(), args.asset_scale));
    Ok((receiver, asset))
}

/// Prints one set of credentials as JSON.
fn issue_credentials(args: cli::CredentialsArgs) -> Result<()> {
    let (receiver, asset) = build_receiver(&args.receiver)?;
    let details = ConnectionDetails {
        payment_tag: args.payment_tag,
        receipt_setup: args.receipts.then(api::random_receipt_setup),
        asset,
    };
    let credentials = api::issue_credentials(&receiver, &details)?;
    tracing::info!(
        destination_address = %credentials.destination_address,
        "credentials issued"
    );
    println!("{}", serde_json::to_string_pretty(&credentials)?);
    Ok(())
}

/// Serves the receiver until SIGINT or SIGTERM.
async fn serve(args: cli::ServeArgs) -> Result<()> {
    let (receiver, asset) = build_receiver(&args.receiver)?;
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    tracing::info!(
        server_address = %receiver.server_address(),
        asset = ?asset,
        port = args.port,
        "starting stream-pay-node"
    );

    let state = api::AppState::new(version_string(), receiver, asset, node_metrics);
    let router = api::create_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", addr))?;
    tracing::info!("ILP-over-HTTP receiver listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("stream-pay-node stopped");
    Ok(())
}

/// Parses `CODE=PRICE` pairs.
fn parse_prices(pairs: &[String]) -> Result<HashMap<String, f64>> {
    pairs
        .iter()
        .map(|pair| {
            let (code, price) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("price `{}` is not CODE=PRICE", pair))?;
            let price: f64 = price
                .parse()
                .with_context(|| format!("invalid price for {}", code))?;
            Ok((code.to_string(), price))
        })
        .collect()
}

/// Runs one payment against a fresh receiver over an in-process path that
/// limits packet size, converts at `path_rate` and adds latency.
async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    let prices = parse_prices(&args.prices)?;
    let path_rate = Ratio::from_f64(args.path_rate)
        .ok_or_else(|| anyhow!("path rate must be a finite, non-negative number"))?;
    let source_asset = AssetDetails::new(args.source_code, args.source_scale);
    let destination_asset = AssetDetails::new(args.destination_code, args.destination_scale);

    let mut server_secret = [0u8; SECRET_LENGTH];
    rand::thread_rng().fill_bytes(&mut server_secret);
    let receiver = StreamReceiver::new(&server_secret, SIMULATED_RECEIVER_ADDRESS)?;
    let credentials = receiver.generate_credentials(&ConnectionDetails {
        payment_tag: None,
        receipt_setup: Some(api::random_receipt_setup()),
        asset: Some(destination_asset),
    })?;

    let plugin = PathPlugin::new()
        .with(MaxPacketAmount::new(args.max_packet_amount))
        .with(ExchangeRate::new(path_rate))
        .with(Latency::new(Duration::from_millis(args.latency_ms)))
        .with_shared(ReceiverEndpoint::new(receiver));

    let destination = PaymentDestination::from_credentials(
        &credentials.shared_secret,
        credentials.destination_address.as_str(),
    )?;
    let resolved = setup_payment(SetupOptions {
        plugin: Arc::new(plugin),
        destination: Arc::new(destination),
    })
    .await?;

    let mut quote_options = QuoteOptions::new(&resolved);
    quote_options.source_asset = Some(source_asset);
    quote_options.amount_to_send = args.amount_to_send;
    quote_options.amount_to_deliver = args.amount_to_deliver;
    quote_options.slippage = Some(args.slippage);
    quote_options.prices = prices;
    let quote = start_quote(quote_options).await?;
    tracing::info!(
        max_source_amount = quote.max_source_amount.value(),
        min_delivery_amount = quote.min_delivery_amount.value(),
        max_packet_amount = quote.max_packet_amount.value(),
        "quote ready"
    );

    let mut pay_options = PayOptions::new(&resolved, &quote);
    pay_options.progress_handler = Some(Box::new(|progress: &PaymentProgress| {
        tracing::debug!(
            amount_sent = progress.amount_sent.value(),
            amount_delivered = progress.amount_delivered.value(),
            "payment progress"
        );
    }));
    let progress = pay(pay_options).await?;
    close_connection(&resolved).await;

    let report = serde_json::json!({
        "quote": quote,
        "progress": progress,
        "packets_sent": resolved.request_count(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("stream-pay-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol        {}", PROTOCOL_VERSION);
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that fails to
/// install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_parse_from_pairs() {
        let prices = parse_prices(&["USD=1".into(), "EUR=1.08".into()]).unwrap();
        assert_eq!(prices.get("EUR"), Some(&1.08));
        assert!(parse_prices(&["USD".into()]).is_err());
        assert!(parse_prices(&["USD=abc".into()]).is_err());
    }

    #[test]
    fn receiver_args_require_hex_secret() {
        let mut args = ReceiverArgs {
            server_secret: "zz".into(),
            server_address: "test.node".into(),
            asset_code: Some("USD".into()),
            asset_scale: 2,
        };
        assert!(build_receiver(&args).is_err());

        args.server_secret = hex::encode([1u8; 32]);
        let (receiver, asset) = build_receiver(&args).unwrap();
        assert_eq!(receiver.server_address().as_str(), "test.node");
        assert_eq!(asset, Some(AssetDetails::new("USD", 2)));
    }
}
