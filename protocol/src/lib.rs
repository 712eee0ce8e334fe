// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # stream-pay: STREAM Payment Engine
//!
//! A sender and a stateless receiver for Interledger STREAM payments. A
//! payment is split into many small encrypted packets, each individually
//! fulfillable, and the sender keeps sending until a fixed source amount is
//! spent or a fixed destination amount is delivered.
//!
//! ## Architecture
//!
//! - **amount**: exact integer and rational arithmetic. All accounting goes
//!   through it.
//! - **packet**: OER, ILP packets and the STREAM packet format.
//! - **crypto**: key derivation, fulfillments and AES-256-GCM.
//! - **request**: one packet round trip over a [`request::Plugin`].
//! - **controllers**: one concern of a connection each (sequence, expiry,
//!   pacing, max packet amount, exchange rate...).
//! - **senders**: the send loop and the operations built on it.
//! - **payment**: the public setup, quote, pay and close operations.
//! - **receiver**: issues credentials and answers packets without state.
//! - **path**: an in-process network for tests and simulations.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run(plugin: std::sync::Arc<dyn stream_pay::request::Plugin>) -> Result<(), stream_pay::PaymentError> {
//! use std::sync::Arc;
//! use stream_pay::payment::*;
//! use stream_pay::controllers::AssetDetails;
//!
//! let destination = PaymentDestination::from_credentials(&[0u8; 32], "test.receiver.token")?;
//! let resolved = setup_payment(SetupOptions {
//!     plugin,
//!     destination: Arc::new(destination),
//! })
//! .await?;
//!
//! let mut options = QuoteOptions::new(&resolved);
//! options.amount_to_send = Some(1_000);
//! options.source_asset = Some(AssetDetails::new("USD", 2));
//! let quote = start_quote(options).await?;
//!
//! let progress = pay(PayOptions::new(&resolved, &quote)).await?;
//! close_connection(&resolved).await;
//! println!("delivered {}", progress.amount_delivered);
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod config;
pub mod controllers;
pub mod crypto;
pub mod error;
pub mod packet;
pub mod path;
pub mod payment;
pub mod receiver;
pub mod request;
pub mod senders;

pub use error::PaymentError;
pub use payment::{
    close_connection, pay, setup_payment, start_quote, PaymentProgress, Quote, ResolvedPayment,
};
pub use receiver::StreamReceiver;
