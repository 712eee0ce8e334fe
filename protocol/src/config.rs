//! # Protocol Configuration & Constants
//!
//! Every magic number in the payment engine lives here: packet timing,
//! congestion-control bounds, probe amounts, key-derivation labels and
//! safety limits.
//!
//! Several of these are observable by counterparties (the key-derivation
//! strings, the expiry budget, the establishment frames), so changing them
//! breaks interoperability with other STREAM implementations.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate version string, reported by the node binary.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// STREAM packet format version. Every encrypted STREAM packet starts with it.
pub const STREAM_VERSION: u8 = 1;

/// STREAM receipt format version.
pub const RECEIPT_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length. 96 bits is the only nonce size STREAM accepts.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length.
pub const AES_TAG_LENGTH: usize = 16;

/// Shared secrets, server secrets and fulfillments are all 32 bytes.
pub const SECRET_LENGTH: usize = 32;

/// Length of an ILP execution condition (a SHA-256 digest).
pub const CONDITION_LENGTH: usize = 32;

/// Label for deriving the STREAM encryption key from a shared secret.
pub const ENCRYPTION_KEY_STRING: &[u8] = b"ilp_stream_encryption";

/// Label for deriving the STREAM fulfillment key from a shared secret.
pub const FULFILLMENT_KEY_STRING: &[u8] = b"ilp_stream_fulfillment";

/// Label for deriving the receiver's connection-token key from its server secret.
pub const CONNECTION_TOKEN_KEY_STRING: &[u8] = b"ilp_stream_connection_token";

/// Label for the key that turns a connection token into a shared secret.
pub const SHARED_SECRET_KEY_STRING: &[u8] = b"ilp_stream_shared_secret";

/// Receipt nonces are 16 random bytes.
pub const RECEIPT_NONCE_LENGTH: usize = 16;

/// Receipt secrets are 32 random bytes.
pub const RECEIPT_SECRET_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Packet Limits
// ---------------------------------------------------------------------------

/// Every packet of a connection is encrypted under the same key with a random
/// nonce, so the sequence number is capped well below the GCM birthday bound.
pub const MAX_SAFE_PACKET_COUNT: u64 = 1 << 31;

/// Maximum length of an ILP address in bytes.
pub const MAX_ADDRESS_LENGTH: usize = 1023;

/// Maximum length of the data field of an ILP packet.
pub const MAX_DATA_LENGTH: usize = 32_767;

/// The only stream the sender opens. Clients open odd-numbered streams.
pub const DEFAULT_STREAM_ID: u64 = 1;

/// Source address announced by a send-only client. Receivers cannot pay it.
pub const RECEIVE_ONLY_ADDRESS: &str = "private.RECEIVE_ONLY_CLIENT";

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Each prepare expires this far in the future.
pub const PACKET_EXPIRY: Duration = Duration::from_secs(20);

/// A payment fails if no packet is fulfilled for this long.
pub const MAX_DURATION_SINCE_LAST_FULFILL: Duration = Duration::from_secs(10);

/// Deadline for the rate probe to establish rate bounds and max packet.
pub const RATE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the receiver to disclose its asset details.
pub const ASSET_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// When a loop has nothing in flight and nothing scheduled, it re-checks its
/// state at this interval so deadlines and idle timeouts still fire.
pub const STALLED_LOOP_RECHECK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Congestion Control
// ---------------------------------------------------------------------------

/// Initial packets-per-second target.
pub const DEFAULT_PACKETS_PER_SECOND: f64 = 40.0;

/// Lower bound of the packets-per-second target.
pub const MIN_PACKETS_PER_SECOND: f64 = 1.0;

/// Upper bound of the packets-per-second target.
pub const MAX_PACKETS_PER_SECOND: f64 = 200.0;

/// Additive increase applied after each authentic reply.
pub const PACKETS_PER_SECOND_INCREASE: f64 = 0.5;

/// Multiplicative decrease applied after a temporary (T-class) reject.
pub const PACKETS_PER_SECOND_DECREASE_FACTOR: f64 = 0.5;

/// Initial round-trip time estimate, in milliseconds.
pub const DEFAULT_ROUND_TRIP_TIME_MS: f64 = 200.0;

/// Weight of the previous average in the RTT moving average.
pub const ROUND_TRIP_AVERAGE_WEIGHT: f64 = 0.9;

/// Maximum number of packets in flight at once.
pub const MAX_INFLIGHT_PACKETS: usize = 20;

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Largest amount the rate probe tries. Paths that accept this are treated as
/// having no max packet amount.
pub const MAX_PROBE_AMOUNT: u64 = 1_000_000_000_000;

/// Probe amounts sent initially, descending by powers of ten. The leading zero
/// establishes the connection and learns the destination asset.
pub const INITIAL_PROBE_AMOUNTS: [u64; 11] = [
    0,
    1_000_000_000_000,
    100_000_000_000,
    10_000_000_000,
    1_000_000_000,
    100_000_000,
    10_000_000,
    1_000_000,
    100_000,
    10_000,
    1_000,
];

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Slippage applied to the external rate when the caller does not set one.
pub const DEFAULT_SLIPPAGE: f64 = 0.01;
