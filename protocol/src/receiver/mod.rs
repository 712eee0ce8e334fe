//! # Stateless STREAM Receiver
//!
//! [`StreamReceiver`] issues connection credentials and answers incoming
//! ILP Prepares without storing anything per connection. The destination
//! address of every credential is
//!
//! ```text
//! server_address "." base64url(AES-256-GCM(token_key, connection token))
//! ```
//!
//! so each packet carries what the receiver needs to re-derive the shared
//! secret, decrypt the STREAM request and compute the fulfillment.
//!
//! Money is never credited here. [`StreamReceiver::create_reply`] hands an
//! authenticated, fulfillable packet back as [`IncomingMoney`] and the
//! application decides whether to accept it.

mod reply;
mod token;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, trace, warn};

use self::reply::ReplyBuilder;
use crate::config::{
    CONNECTION_TOKEN_KEY_STRING, DEFAULT_STREAM_ID, SECRET_LENGTH, SHARED_SECRET_KEY_STRING,
};
use crate::crypto::{self, generate_condition, generate_fulfillment, hmac_sha256, sha256, StreamKeys};
use crate::packet::{
    create_receipt, Frame, IlpAddress, IlpErrorCode, IlpPrepare, IlpReply, PacketType, StreamErrorCode,
    StreamPacket,
};

pub use self::token::{ConnectionDetails, ReceiptSetup};

/// Failure to configure a receiver or issue credentials.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("server secret must be {SECRET_LENGTH} bytes")]
    InvalidServerSecret,

    #[error("invalid server address: {0}")]
    InvalidServerAddress(String),

    #[error("too much data to encode within an ILP address")]
    CredentialsTooLarge,

    #[error("failed to encrypt connection token")]
    TokenEncryption,
}

/// What a sender needs to open a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamCredentials {
    pub destination_address: IlpAddress,
    pub shared_secret: [u8; SECRET_LENGTH],
}

impl std::fmt::Debug for StreamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCredentials")
            .field("destination_address", &self.destination_address)
            .finish_non_exhaustive()
    }
}

/// Result of handling one prepare.
#[derive(Debug)]
pub enum PrepareOutcome {
    /// Authentic, fulfillable money awaiting a decision.
    Incoming(IncomingMoney),
    /// The prepare was answered without involving the application.
    Reply(IlpReply),
}

/// An authenticated prepare that the application may fulfill or decline.
pub struct IncomingMoney {
    connection_id: String,
    payment_tag: Option<String>,
    data_frames: Vec<Frame>,
    receipt_setup: Option<ReceiptSetup>,
    fulfillment: [u8; 32],
    amount: u64,
    reply: ReplyBuilder,
}

impl IncomingMoney {
    /// Hex SHA-256 of the destination address.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn payment_tag(&self) -> Option<&str> {
        self.payment_tag.as_deref()
    }

    /// `StreamData` frames carried by the prepare.
    pub fn data_frames(&self) -> &[Frame] {
        &self.data_frames
    }

    /// Amount of the prepare, in the receiver's units.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Attaches a receipt for `total_received` on the default stream, if
    /// the credentials enabled receipts. The total should include this
    /// packet's amount.
    pub fn set_total_received(&mut self, total_received: u64) {
        if let Some(setup) = &self.receipt_setup {
            let receipt = create_receipt(&setup.nonce, DEFAULT_STREAM_ID, total_received, &setup.secret);
            self.reply.add_frame(Frame::StreamReceipt {
                stream_id: DEFAULT_STREAM_ID,
                receipt,
            });
        }
    }

    pub fn accept(self) -> IlpReply {
        self.reply.fulfill(self.fulfillment)
    }

    /// Asks the sender to back off and retry.
    pub fn temporary_decline(self) -> IlpReply {
        self.reply.reject(IlpErrorCode::T00_INTERNAL_ERROR)
    }

    /// Asks the sender to close the connection.
    pub fn final_decline(mut self) -> IlpReply {
        self.reply.add_frame(Frame::ConnectionClose {
            code: StreamErrorCode::NoError,
            message: String::new(),
        });
        self.reply.reject(IlpErrorCode::F99_APPLICATION_ERROR)
    }
}

impl std::fmt::Debug for IncomingMoney {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMoney")
            .field("connection_id", &self.connection_id)
            .field("payment_tag", &self.payment_tag)
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// Issues credentials and answers packets for one server address.
pub struct StreamReceiver {
    server_address: IlpAddress,
    token_key: [u8; 32],
    shared_secret_key: [u8; 32],
}

impl StreamReceiver {
    pub fn new(server_secret: &[u8], server_address: &str) -> Result<Self, ReceiverError> {
        if server_secret.len() != SECRET_LENGTH {
            return Err(ReceiverError::InvalidServerSecret);
        }
        let server_address = IlpAddress::new(server_address)
            .map_err(|_| ReceiverError::InvalidServerAddress(server_address.to_string()))?;
        Ok(Self {
            server_address,
            token_key: hmac_sha256(server_secret, CONNECTION_TOKEN_KEY_STRING),
            shared_secret_key: hmac_sha256(server_secret, SHARED_SECRET_KEY_STRING),
        })
    }

    pub fn server_address(&self) -> &IlpAddress {
        &self.server_address
    }

    /// Issues a fresh set of credentials. Tokens use a random nonce, so two
    /// calls with the same details never yield the same address.
    pub fn generate_credentials(
        &self,
        details: &ConnectionDetails,
    ) -> Result<StreamCredentials, ReceiverError> {
        let token = crypto::encrypt(&self.token_key, &details.to_bytes())
            .map_err(|_| ReceiverError::TokenEncryption)?;
        let shared_secret = hmac_sha256(&self.shared_secret_key, &token);
        let destination_address = self
            .server_address
            .with_suffix(&URL_SAFE_NO_PAD.encode(&token))
            .map_err(|_| ReceiverError::CredentialsTooLarge)?;
        Ok(StreamCredentials {
            destination_address,
            shared_secret,
        })
    }

    /// Recovers the payment tag bound into `destination_address`, if the
    /// token is authentic and carries one.
    pub fn decode_payment_tag(&self, destination_address: &IlpAddress) -> Option<String> {
        let token = self.local_token(destination_address)?;
        self.decrypt_token(&token)?.payment_tag
    }

    fn local_token(&self, destination_address: &IlpAddress) -> Option<Vec<u8>> {
        let segment = destination_address
            .strip_parent(&self.server_address)?
            .split('.')
            .next()
            .filter(|segment| !segment.is_empty())?;
        URL_SAFE_NO_PAD.decode(segment).ok()
    }

    fn decrypt_token(&self, token: &[u8]) -> Option<ConnectionDetails> {
        let plaintext = crypto::decrypt(&self.token_key, token).ok()?;
        ConnectionDetails::from_bytes(&plaintext).ok()
    }

    /// Authenticates `prepare` and builds its reply, or hands fulfillable
    /// money to the caller.
    pub fn create_reply(&self, prepare: &IlpPrepare) -> PrepareOutcome {
        let connection_id = hex::encode(sha256(prepare.destination.as_str().as_bytes()));
        let log_id = &connection_id[..6];
        let mut reply = ReplyBuilder::new(self.server_address.clone());

        let Some(token) = self.local_token(&prepare.destination) else {
            trace!(connection = log_id, destination = %prepare.destination, "packet not addressed to this receiver");
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F02_UNREACHABLE));
        };
        let Some(details) = self.decrypt_token(&token) else {
            trace!(connection = log_id, "invalid connection token");
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F06_UNEXPECTED_PAYMENT));
        };

        debug!(connection = log_id, amount = prepare.amount, "got incoming prepare");

        let shared_secret = hmac_sha256(&self.shared_secret_key, &token);
        let keys = StreamKeys::derive(&shared_secret);
        let request = match StreamPacket::decrypt(&keys.encryption_key, &prepare.data) {
            Ok(request) => request,
            Err(_) => {
                trace!(connection = log_id, "failed to decrypt STREAM data");
                return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F06_UNEXPECTED_PAYMENT));
            }
        };
        if request.ilp_packet_type != PacketType::Prepare {
            warn!(connection = log_id, "invalid STREAM packet type");
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F00_BAD_REQUEST));
        }

        debug!(
            connection = log_id,
            sequence = request.sequence,
            min_destination_amount = request.prepare_amount,
            "got authentic STREAM request"
        );
        reply.authenticated(keys.encryption_key, request.sequence, prepare.amount);

        if let Some(Frame::ConnectionClose { code, message }) = request
            .frames
            .iter()
            .find(|frame| matches!(frame, Frame::ConnectionClose { .. }))
        {
            trace!(connection = log_id, ?code, message = %message, "sender closed connection");
            reply.add_frame(Frame::ConnectionClose {
                code: StreamErrorCode::NoError,
                message: String::new(),
            });
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F99_APPLICATION_ERROR));
        }

        let is_new_connection = request
            .frames
            .iter()
            .any(|frame| matches!(frame, Frame::ConnectionNewAddress { .. }));
        if let (true, Some(asset)) = (is_new_connection, &details.asset) {
            trace!(connection = log_id, code = %asset.code, scale = asset.scale, "replying with asset details");
            reply.add_frame(Frame::ConnectionAssetDetails {
                source_asset_code: asset.code.clone(),
                source_asset_scale: asset.scale,
            });
        }

        if prepare.amount < request.prepare_amount {
            debug!(
                connection = log_id,
                amount = prepare.amount,
                minimum = request.prepare_amount,
                "received less than the minimum"
            );
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F99_APPLICATION_ERROR));
        }

        let fulfillment = generate_fulfillment(&keys.fulfillment_key, &prepare.data);
        if generate_condition(&fulfillment) != prepare.execution_condition {
            return PrepareOutcome::Reply(reply.reject(IlpErrorCode::F99_APPLICATION_ERROR));
        }
        // Zero-amount packets carry no money to decide on.
        if prepare.amount == 0 {
            return PrepareOutcome::Reply(reply.fulfill(fulfillment));
        }

        let data_frames = request
            .frames
            .into_iter()
            .filter(|frame| matches!(frame, Frame::StreamData { .. }))
            .collect();

        PrepareOutcome::Incoming(IncomingMoney {
            connection_id,
            payment_tag: details.payment_tag,
            data_frames,
            receipt_setup: details.receipt_setup,
            fulfillment,
            amount: prepare.amount,
            reply,
        })
    }
}
