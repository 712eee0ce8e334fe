//! # Packet Round Trips
//!
//! A [`RequestBuilder`] is the draft that controllers fill in and veto; once
//! committed it becomes an immutable [`StreamRequest`]. A
//! [`StreamConnection`] turns that request into an encrypted ILP Prepare,
//! hands the bytes to the [`Plugin`], and folds whatever comes back (or does
//! not) into a [`StreamReply`].
//!
//! The round trip never fails with a Rust error. Transport errors, timeouts,
//! undecodable replies and bogus fulfillments all become synthetic rejects,
//! which are never authentic:
//!
//! | Condition | Synthetic code |
//! |-----------|----------------|
//! | transport error | `T00` |
//! | reply not an ILP Fulfill/Reject | `F01` |
//! | fulfillment does not hash to the condition | `F05` |
//! | expiry elapsed | `R00` |

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::amount::Int;
use crate::config::{CONDITION_LENGTH, PACKET_EXPIRY, SECRET_LENGTH};
use crate::crypto::{
    self, generate_condition, generate_fulfillment, generate_random_condition, StreamKeys,
};
use crate::packet::{
    Frame, IlpAddress, IlpErrorCode, IlpPrepare, IlpReject, IlpReply, PacketType, StreamPacket,
};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport failure reported by a [`Plugin`].
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Byte-level link to the Interledger network: send one serialized ILP
/// Prepare, get back one serialized Fulfill or Reject.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn send_data(&self, prepare: Bytes) -> Result<Bytes, TransportError>;
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One committed packet attempt.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub destination_address: IlpAddress,
    pub expires_at: DateTime<Utc>,
    pub sequence: u64,
    pub source_amount: Int,
    pub min_destination_amount: Int,
    pub frames: Vec<Frame>,
    pub is_fulfillable: bool,
    /// When the request was committed. Pacing measures round trips from here.
    pub sent_at: Instant,
}

/// Draft of the next packet, mutated by controllers and the sender.
#[derive(Debug)]
pub struct RequestBuilder {
    destination_address: IlpAddress,
    expires_at: Option<DateTime<Utc>>,
    sequence: u64,
    source_amount: Int,
    min_destination_amount: Int,
    frames: Vec<Frame>,
    is_fulfillable: bool,
}

impl RequestBuilder {
    pub fn new(destination_address: IlpAddress) -> Self {
        Self {
            destination_address,
            expires_at: None,
            sequence: 0,
            source_amount: Int::ZERO,
            min_destination_amount: Int::ZERO,
            frames: Vec::new(),
            is_fulfillable: false,
        }
    }

    pub fn set_destination_address(&mut self, address: IlpAddress) -> &mut Self {
        self.destination_address = address;
        self
    }

    pub fn set_expiry(&mut self, expires_at: DateTime<Utc>) -> &mut Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn set_sequence(&mut self, sequence: u64) -> &mut Self {
        self.sequence = sequence;
        self
    }

    pub fn set_source_amount(&mut self, amount: Int) -> &mut Self {
        self.source_amount = amount;
        self
    }

    pub fn set_min_destination_amount(&mut self, amount: Int) -> &mut Self {
        self.min_destination_amount = amount;
        self
    }

    pub fn enable_fulfillment(&mut self) -> &mut Self {
        self.is_fulfillable = true;
        self
    }

    pub fn add_frames(&mut self, frames: impl IntoIterator<Item = Frame>) -> &mut Self {
        self.frames.extend(frames);
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Commits the draft.
    pub fn build(self) -> StreamRequest {
        StreamRequest {
            destination_address: self.destination_address,
            expires_at: self
                .expires_at
                .unwrap_or_else(|| Utc::now() + expiry_delta()),
            sequence: self.sequence,
            source_amount: self.source_amount,
            min_destination_amount: self.min_destination_amount,
            frames: self.frames,
            is_fulfillable: self.is_fulfillable,
            sent_at: Instant::now(),
        }
    }
}

pub(crate) fn expiry_delta() -> chrono::Duration {
    chrono::Duration::from_std(PACKET_EXPIRY).unwrap_or_else(|_| chrono::Duration::seconds(20))
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// ILP-level result of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Fulfill,
    Reject(IlpReject),
}

/// Reply to a [`StreamRequest`].
///
/// `frames` and `destination_amount` are present only if the reply data
/// decrypted under the connection key and matched the request's sequence.
#[derive(Clone, Debug)]
pub struct StreamReply {
    pub outcome: ReplyOutcome,
    pub frames: Option<Vec<Frame>>,
    pub destination_amount: Option<Int>,
}

impl StreamReply {
    pub fn is_fulfill(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Fulfill)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Reject(_))
    }

    pub fn reject(&self) -> Option<&IlpReject> {
        match &self.outcome {
            ReplyOutcome::Reject(reject) => Some(reject),
            ReplyOutcome::Fulfill => None,
        }
    }

    /// Error code, if rejected.
    pub fn reject_code(&self) -> Option<IlpErrorCode> {
        self.reject().map(|reject| reject.code)
    }

    /// A fulfill proves the receiver saw the packet. A reject proves it only
    /// when it carried a decryptable STREAM reply.
    pub fn is_authentic(&self) -> bool {
        match self.outcome {
            ReplyOutcome::Fulfill => true,
            ReplyOutcome::Reject(_) => self.frames.is_some() && self.destination_amount.is_some(),
        }
    }

    /// Authenticated frames, or none.
    pub fn frames(&self) -> &[Frame] {
        self.frames.as_deref().unwrap_or(&[])
    }

    /// An unauthenticated reject created locally.
    pub fn synthetic_reject(code: IlpErrorCode, message: impl Into<String>) -> Self {
        Self {
            outcome: ReplyOutcome::Reject(IlpReject {
                code,
                triggered_by: String::new(),
                message: message.into(),
                data: Bytes::new(),
            }),
            frames: None,
            destination_amount: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Monotonic packet counter of a connection. Clones share the same count, so
/// every sender on the connection draws from one sequence.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<std::sync::atomic::AtomicU64>);

impl Counter {
    pub fn starting_at(count: u64) -> Self {
        Self(Arc::new(std::sync::atomic::AtomicU64::new(count)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// An established sender-side view of one STREAM connection.
pub struct StreamConnection {
    plugin: Arc<dyn Plugin>,
    keys: StreamKeys,
    destination_address: IlpAddress,
    counter: Counter,
    id: String,
}

impl StreamConnection {
    pub fn new(
        plugin: Arc<dyn Plugin>,
        shared_secret: &[u8; SECRET_LENGTH],
        destination_address: IlpAddress,
    ) -> Self {
        let id = connection_id(&destination_address);
        Self {
            plugin,
            keys: StreamKeys::derive(shared_secret),
            destination_address,
            counter: Counter::default(),
            id,
        }
    }

    /// Resumes the sequence of an earlier connection under the same key.
    pub fn with_counter(mut self, counter: Counter) -> Self {
        self.counter = counter;
        self
    }

    pub fn destination_address(&self) -> &IlpAddress {
        &self.destination_address
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    /// Short identifier for logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends one request and waits for its reply or expiry.
    pub async fn send(&self, request: &StreamRequest) -> StreamReply {
        let stream_packet = StreamPacket {
            sequence: request.sequence,
            ilp_packet_type: PacketType::Prepare,
            prepare_amount: request.min_destination_amount.value(),
            frames: request.frames.clone(),
        };
        let data = match stream_packet.encrypt(&self.keys.encryption_key) {
            Ok(data) => data,
            Err(err) => {
                warn!(sequence = request.sequence, error = %err, "failed to encrypt STREAM packet");
                return StreamReply::synthetic_reject(
                    IlpErrorCode::T00_INTERNAL_ERROR,
                    "failed to encrypt packet",
                );
            }
        };

        let (execution_condition, fulfillment) = if request.is_fulfillable {
            let fulfillment = generate_fulfillment(&self.keys.fulfillment_key, &data);
            (generate_condition(&fulfillment), Some(fulfillment))
        } else {
            (generate_random_condition(), None)
        };

        let prepare = IlpPrepare {
            amount: request.source_amount.value(),
            expires_at: request.expires_at,
            execution_condition,
            destination: request.destination_address.clone(),
            data,
        };

        debug!(
            sequence = request.sequence,
            amount = prepare.amount,
            min_destination_amount = stream_packet.prepare_amount,
            fulfillable = request.is_fulfillable,
            "sending prepare"
        );

        let timeout = (request.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();
        let raw = match tokio::time::timeout(timeout, self.plugin.send_data(prepare.to_bytes())).await
        {
            Err(_) => {
                debug!(sequence = request.sequence, "packet expired without a reply");
                return StreamReply::synthetic_reject(
                    IlpErrorCode::R00_TRANSFER_TIMED_OUT,
                    "packet expired",
                );
            }
            Ok(Err(err)) => {
                debug!(sequence = request.sequence, error = %err, "transport failed");
                return StreamReply::synthetic_reject(
                    IlpErrorCode::T00_INTERNAL_ERROR,
                    "failed to send packet",
                );
            }
            Ok(Ok(raw)) => raw,
        };

        let reply = match IlpReply::from_bytes(&raw) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(sequence = request.sequence, error = %err, "received invalid ILP reply");
                return StreamReply::synthetic_reject(
                    IlpErrorCode::F01_INVALID_PACKET,
                    "invalid reply packet",
                );
            }
        };

        if let IlpReply::Fulfill(fulfill) = &reply {
            if !fulfillment_matches(&fulfill.fulfillment, &execution_condition) {
                debug!(sequence = request.sequence, "fulfillment does not match condition");
                return StreamReply::synthetic_reject(
                    IlpErrorCode::F05_WRONG_CONDITION,
                    "fulfillment did not match condition",
                );
            }
            if fulfillment.is_none() {
                warn!(sequence = request.sequence, "unfulfillable packet was fulfilled");
            }
        }

        let outcome = match &reply {
            IlpReply::Fulfill(_) => ReplyOutcome::Fulfill,
            IlpReply::Reject(reject) => ReplyOutcome::Reject(reject.clone()),
        };
        let stream_reply = self.decrypt_reply(request.sequence, &reply);

        match &stream_reply {
            Some(packet) => {
                debug!(
                    sequence = request.sequence,
                    reply = ?reply.packet_type(),
                    destination_amount = packet.prepare_amount,
                    frames = packet.frames.len(),
                    "received authentic reply"
                );
            }
            None => {
                debug!(
                    sequence = request.sequence,
                    reply = ?reply.packet_type(),
                    code = ?outcome_code(&outcome),
                    "received reply without STREAM data"
                );
            }
        }

        let (frames, destination_amount) = match stream_reply {
            Some(packet) => (Some(packet.frames), Some(Int::new(packet.prepare_amount))),
            None => (None, None),
        };
        StreamReply {
            outcome,
            frames,
            destination_amount,
        }
    }

    fn decrypt_reply(&self, sequence: u64, reply: &IlpReply) -> Option<StreamPacket> {
        let data = reply.data();
        if data.is_empty() {
            return None;
        }
        let packet = StreamPacket::decrypt(&self.keys.encryption_key, data).ok()?;
        if packet.sequence != sequence {
            debug!(sequence, reply_sequence = packet.sequence, "discarding reply for a different sequence");
            return None;
        }
        if packet.ilp_packet_type == PacketType::Reject && matches!(reply, IlpReply::Fulfill(_)) {
            debug!(sequence, "discarding STREAM reject carried by an ILP fulfill");
            return None;
        }
        Some(packet)
    }
}

fn outcome_code(outcome: &ReplyOutcome) -> Option<IlpErrorCode> {
    match outcome {
        ReplyOutcome::Reject(reject) => Some(reject.code),
        ReplyOutcome::Fulfill => None,
    }
}

fn fulfillment_matches(fulfillment: &[u8; 32], condition: &[u8; CONDITION_LENGTH]) -> bool {
    crypto::sha256(fulfillment) == *condition
}

/// Connection id used in logs: the first six hex characters of the SHA-256
/// digest of the destination address.
pub fn connection_id(destination: &IlpAddress) -> String {
    let digest = crypto::sha256(destination.as_str().as_bytes());
    hex::encode(&digest[..3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{IlpFulfill, StreamErrorCode};
    use parking_lot::Mutex;

    /// Replies with whatever the closure returns for the decoded prepare.
    struct FnPlugin<F>(F);

    #[async_trait]
    impl<F> Plugin for FnPlugin<F>
    where
        F: Fn(IlpPrepare) -> Result<Bytes, TransportError> + Send + Sync,
    {
        async fn send_data(&self, prepare: Bytes) -> Result<Bytes, TransportError> {
            (self.0)(IlpPrepare::from_bytes(&prepare).expect("valid prepare"))
        }
    }

    struct Blackhole;

    #[async_trait]
    impl Plugin for Blackhole {
        async fn send_data(&self, _prepare: Bytes) -> Result<Bytes, TransportError> {
            std::future::pending().await
        }
    }

    const SECRET: [u8; 32] = [9u8; 32];

    fn connection(plugin: Arc<dyn Plugin>) -> StreamConnection {
        StreamConnection::new(plugin, &SECRET, IlpAddress::new("test.receiver.abc").unwrap())
    }

    fn request(sequence: u64, fulfillable: bool) -> StreamRequest {
        let mut builder = RequestBuilder::new(IlpAddress::new("test.receiver.abc").unwrap());
        builder
            .set_sequence(sequence)
            .set_source_amount(Int::new(100))
            .set_min_destination_amount(Int::new(90));
        if fulfillable {
            builder.enable_fulfillment();
        }
        builder.build()
    }

    fn stream_reply_data(sequence: u64, packet_type: PacketType, amount: u64) -> Bytes {
        let keys = StreamKeys::derive(&SECRET);
        StreamPacket {
            sequence,
            ilp_packet_type: packet_type,
            prepare_amount: amount,
            frames: vec![Frame::ConnectionClose {
                code: StreamErrorCode::NoError,
                message: String::new(),
            }],
        }
        .encrypt(&keys.encryption_key)
        .unwrap()
    }

    #[tokio::test]
    async fn fulfill_with_valid_stream_reply_is_authentic() {
        let plugin = FnPlugin(|prepare: IlpPrepare| {
            let keys = StreamKeys::derive(&SECRET);
            let fulfillment = generate_fulfillment(&keys.fulfillment_key, &prepare.data);
            let seen = StreamPacket::decrypt(&keys.encryption_key, &prepare.data).unwrap();
            assert_eq!(seen.prepare_amount, 90);
            Ok(IlpReply::from(IlpFulfill {
                fulfillment,
                data: stream_reply_data(seen.sequence, PacketType::Fulfill, 95),
            })
            .to_bytes())
        });
        let reply = connection(Arc::new(plugin)).send(&request(3, true)).await;
        assert!(reply.is_fulfill());
        assert!(reply.is_authentic());
        assert_eq!(reply.destination_amount, Some(Int::new(95)));
        assert_eq!(reply.frames().len(), 1);
    }

    #[tokio::test]
    async fn wrong_fulfillment_becomes_f05() {
        let plugin = FnPlugin(|_| {
            Ok(IlpReply::from(IlpFulfill {
                fulfillment: [0u8; 32],
                data: Bytes::new(),
            })
            .to_bytes())
        });
        let reply = connection(Arc::new(plugin)).send(&request(1, true)).await;
        assert_eq!(reply.reject_code(), Some(IlpErrorCode::F05_WRONG_CONDITION));
        assert!(!reply.is_authentic());
    }

    #[tokio::test]
    async fn transport_error_becomes_t00() {
        let plugin = FnPlugin(|_| Err(TransportError("link down".into())));
        let reply = connection(Arc::new(plugin)).send(&request(1, false)).await;
        assert_eq!(reply.reject_code(), Some(IlpErrorCode::T00_INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn garbage_reply_becomes_f01() {
        let plugin = FnPlugin(|_| Ok(Bytes::from_static(b"\x0dgarbage")));
        let reply = connection(Arc::new(plugin)).send(&request(1, false)).await;
        assert_eq!(reply.reject_code(), Some(IlpErrorCode::F01_INVALID_PACKET));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_becomes_r00() {
        let reply = connection(Arc::new(Blackhole)).send(&request(1, false)).await;
        assert_eq!(reply.reject_code(), Some(IlpErrorCode::R00_TRANSFER_TIMED_OUT));
        assert!(!reply.is_authentic());
    }

    #[tokio::test]
    async fn reply_for_other_sequence_is_not_authentic() {
        let plugin = FnPlugin(|_| {
            Ok(IlpReply::from(IlpReject {
                code: IlpErrorCode::F99_APPLICATION_ERROR,
                triggered_by: "test.receiver".into(),
                message: String::new(),
                data: stream_reply_data(8, PacketType::Reject, 10),
            })
            .to_bytes())
        });
        let reply = connection(Arc::new(plugin)).send(&request(7, false)).await;
        assert!(reply.is_reject());
        assert!(!reply.is_authentic());
        assert!(reply.frames().is_empty());
    }

    #[tokio::test]
    async fn authentic_reject_carries_destination_amount() {
        let plugin = FnPlugin(|_| {
            Ok(IlpReply::from(IlpReject {
                code: IlpErrorCode::F99_APPLICATION_ERROR,
                triggered_by: "test.receiver".into(),
                message: String::new(),
                data: stream_reply_data(7, PacketType::Reject, 10),
            })
            .to_bytes())
        });
        let reply = connection(Arc::new(plugin)).send(&request(7, false)).await;
        assert!(reply.is_authentic());
        assert_eq!(reply.destination_amount, Some(Int::new(10)));
    }

    #[tokio::test]
    async fn unfulfillable_packets_use_random_conditions() {
        let conditions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&conditions);
        let plugin = FnPlugin(move |prepare: IlpPrepare| {
            seen.lock().push(prepare.execution_condition);
            Err(TransportError("drop".into()))
        });
        let conn = connection(Arc::new(plugin));
        conn.send(&request(1, false)).await;
        conn.send(&request(1, false)).await;
        let conditions = conditions.lock();
        assert_ne!(conditions[0], conditions[1]);
    }

    #[test]
    fn counter_is_shared_between_clones() {
        let counter = Counter::default();
        let clone = counter.clone();
        clone.increment();
        clone.increment();
        assert_eq!(counter.get(), 2);
        assert_eq!(Counter::starting_at(5).get(), 5);
    }

    #[test]
    fn connection_id_is_six_hex_chars() {
        let id = connection_id(&IlpAddress::new("test.receiver.abc").unwrap());
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
