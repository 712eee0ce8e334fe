//! # CLI Interface
//!
//! Defines the command-line argument structure for `stream-pay-node` using
//! `clap` derive. Supports four subcommands: `credentials`, `serve`,
//! `simulate`, and `version`.

use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

/// STREAM receiver service and payment simulator.
///
/// Issues receiver credentials, answers ILP-over-HTTP packets with a
/// stateless STREAM receiver, and runs end-to-end payments over a simulated
/// Interledger path.
#[derive(Parser, Debug)]
#[command(
    name = "stream-pay-node",
    about = "STREAM receiver service and payment simulator",
    version,
    propagate_version = true
)]
pub struct StreamPayCli {
    /// Log output format.
    #[arg(
        long,
        global = true,
        env = "STREAM_PAY_LOG_FORMAT",
        value_enum,
        default_value = "pretty"
    )]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Issue one set of connection credentials and print them as JSON.
    Credentials(CredentialsArgs),
    /// Serve the receiver over HTTP.
    Serve(ServeArgs),
    /// Quote and pay over an in-process path, then print the outcome.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Receiver identity shared by `credentials` and `serve`.
#[derive(Args, Debug, Clone)]
pub struct ReceiverArgs {
    /// Hex-encoded 32-byte server secret.
    ///
    /// Credentials are only valid for a receiver holding the same secret.
    #[arg(long, env = "STREAM_PAY_SERVER_SECRET")]
    pub server_secret: String,

    /// ILP address under which credentials are issued.
    #[arg(long, env = "STREAM_PAY_SERVER_ADDRESS", default_value = "test.stream-pay")]
    pub server_address: String,

    /// Asset code advertised to senders.
    #[arg(long, env = "STREAM_PAY_ASSET_CODE")]
    pub asset_code: Option<String>,

    /// Asset scale advertised to senders.
    #[arg(long, env = "STREAM_PAY_ASSET_SCALE", default_value_t = 9)]
    pub asset_scale: u8,
}

/// Arguments for the `credentials` subcommand.
#[derive(Args, Debug)]
pub struct CredentialsArgs {
    #[command(flatten)]
    pub receiver: ReceiverArgs,

    /// Payment tag bound into the credentials.
    #[arg(long)]
    pub payment_tag: Option<String>,

    /// Enable STREAM receipts with a freshly generated receipt secret.
    #[arg(long)]
    pub receipts: bool,
}

/// Arguments for the `serve` subcommand.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub receiver: ReceiverArgs,

    /// Address to bind the HTTP listener on.
    #[arg(long, env = "STREAM_PAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for ILP-over-HTTP, the credentials API, health and metrics.
    #[arg(long, env = "STREAM_PAY_PORT", default_value_t = 7768)]
    pub port: u16,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Fixed source amount to send, in base units of the source asset.
    #[arg(long, conflicts_with = "amount_to_deliver")]
    pub amount_to_send: Option<u64>,

    /// Fixed amount to deliver, in base units of the destination asset.
    #[arg(long)]
    pub amount_to_deliver: Option<u64>,

    #[arg(long, default_value = "USD")]
    pub source_code: String,

    #[arg(long, default_value_t = 6)]
    pub source_scale: u8,

    #[arg(long, default_value = "USD")]
    pub destination_code: String,

    #[arg(long, default_value_t = 6)]
    pub destination_scale: u8,

    /// Exchange rate applied by the simulated connector.
    #[arg(long, default_value_t = 1.0)]
    pub path_rate: f64,

    /// Largest packet the simulated connector forwards.
    #[arg(long, default_value_t = 100_000)]
    pub max_packet_amount: u64,

    /// One-way latency of the simulated path, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub latency_ms: u64,

    /// Fraction subtracted from the external rate.
    #[arg(long, default_value_t = 0.01)]
    pub slippage: f64,

    /// Asset prices in a common base asset, e.g. `--price USD=1 --price EUR=1.08`.
    #[arg(long = "price", value_name = "CODE=PRICE")]
    pub prices: Vec<String>,
}
