//! Payment error taxonomy.
//!
//! Every way a payment can fail without the engine itself being broken is a
//! [`PaymentError`] value. Variants fall into four groups:
//!
//! - caller configuration, detected before any packet is sent
//! - destination or counterparty misbehavior
//! - path failures
//! - safety limits

use serde::Serialize;
use thiserror::Error;

/// Reason a setup, quote or payment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum PaymentError {
    // -- Caller configuration -------------------------------------------------
    /// Payment pointer or destination URL is malformed.
    #[error("invalid payment pointer")]
    InvalidPaymentPointer,

    /// Shared secret or destination address is malformed.
    #[error("invalid STREAM credentials")]
    InvalidCredentials,

    /// Slippage is not a finite number within [0, 1].
    #[error("invalid slippage")]
    InvalidSlippage,

    /// Source asset details were not provided.
    #[error("unknown source asset")]
    UnknownSourceAsset,

    /// Neither an incoming payment nor a send/delivery amount was given.
    #[error("unknown payment target")]
    UnknownPaymentTarget,

    /// Amount to send is zero.
    #[error("invalid source amount")]
    InvalidSourceAmount,

    /// Amount to deliver is zero.
    #[error("invalid destination amount")]
    InvalidDestinationAmount,

    /// Minimum exchange rate of zero cannot guarantee any delivery.
    #[error("minimum exchange rate is too low to enforce delivery")]
    UnenforceableDelivery,

    /// Quote fields are inconsistent.
    #[error("invalid quote")]
    InvalidQuote,

    /// Destination was not resolved (setup did not complete).
    #[error("invalid destination")]
    InvalidDestination,

    // -- Destination & counterparty -------------------------------------------
    /// Querying the destination failed.
    #[error("destination query failed")]
    QueryFailed,

    /// The incoming payment was already completed or fully paid.
    #[error("incoming payment is already completed")]
    IncomingPaymentCompleted,

    /// The incoming payment has expired.
    #[error("incoming payment has expired")]
    IncomingPaymentExpired,

    /// The receiver never disclosed its asset.
    #[error("unknown destination asset")]
    UnknownDestinationAsset,

    /// The receiver changed its asset mid-connection.
    #[error("destination asset changed")]
    DestinationAssetConflict,

    /// The receiver closed the connection or stream.
    #[error("receiver closed the connection")]
    ClosedByReceiver,

    /// The receiver cannot accept the minimum delivery amount.
    #[error("receive max is incompatible with the payment")]
    IncompatibleReceiveMax,

    /// The receiver fulfilled a packet without meeting its terms.
    #[error("receiver violated the STREAM protocol")]
    ReceiverProtocolViolation,

    // -- Path -----------------------------------------------------------------
    /// A connector rejected a packet with a final error.
    #[error("connector rejected a packet with a final error")]
    ConnectorError,

    /// No authentic reply was received to establish the connection.
    #[error("failed to establish connection")]
    EstablishmentFailed,

    /// No external price is available for the asset pair.
    #[error("external exchange rate unavailable")]
    ExternalRateUnavailable,

    /// The rate probe could not bound the exchange rate in time.
    #[error("rate probe failed")]
    RateProbeFailed,

    /// The path's exchange rate is below the minimum.
    #[error("insufficient exchange rate")]
    InsufficientExchangeRate,

    /// No packet was fulfilled within the idle window.
    #[error("payment timed out: no packets fulfilled")]
    IdleTimeout,

    // -- Safety limits --------------------------------------------------------
    /// The sequence counter reached the limit for one encryption key.
    #[error("exceeded maximum safe packet count for one key")]
    MaxSafeEncryptionLimit,
}

impl PaymentError {
    /// Whether the error was caused by the caller's input rather than the
    /// network or counterparty.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPaymentPointer
                | Self::InvalidCredentials
                | Self::InvalidSlippage
                | Self::UnknownSourceAsset
                | Self::UnknownPaymentTarget
                | Self::InvalidSourceAmount
                | Self::InvalidDestinationAmount
                | Self::UnenforceableDelivery
                | Self::InvalidQuote
                | Self::InvalidDestination
        )
    }
}
