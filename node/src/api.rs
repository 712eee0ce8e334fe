//! # Receiver HTTP API
//!
//! Builds the axum router that exposes a [`StreamReceiver`] over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path           | Description                                   |
//! |--------|----------------|-----------------------------------------------|
//! | GET    | `/health`      | Liveness probe                                |
//! | POST   | `/ilp`         | ILP-over-HTTP: OER Prepare in, Fulfill/Reject out |
//! | POST   | `/credentials` | Issue connection credentials                  |
//! | GET    | `/metrics`     | Prometheus text exposition                    |
//!
//! Every authentic packet is accepted. The receiver keeps a running total per
//! connection so receipts always cover everything received so far.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRef, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use stream_pay::config::{RECEIPT_NONCE_LENGTH, RECEIPT_SECRET_LENGTH};
use stream_pay::controllers::AssetDetails;
use stream_pay::packet::{IlpPrepare, IlpReply};
use stream_pay::receiver::{ConnectionDetails, PrepareOutcome, ReceiptSetup};
use stream_pay::StreamReceiver;

use crate::metrics::{self, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub receiver: Arc<StreamReceiver>,
    /// Asset advertised in every issued credential, if configured.
    pub asset: Option<AssetDetails>,
    pub metrics: SharedMetrics,
    /// Total received per connection id.
    totals: Arc<Mutex<HashMap<String, u64>>>,
}

impl AppState {
    pub fn new(
        version: String,
        receiver: StreamReceiver,
        asset: Option<AssetDetails>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            version,
            receiver: Arc::new(receiver),
            asset,
            metrics,
            totals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds `amount` to the connection's total and returns the new total.
    fn credit(&self, connection_id: &str, amount: u64) -> u64 {
        let mut totals = self.totals.lock();
        if !totals.contains_key(connection_id) {
            self.metrics.connections_seen_total.inc();
        }
        let total = totals.entry(connection_id.to_string()).or_insert(0);
        *total = total.saturating_add(amount);
        *total
    }
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.metrics)
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ilp", post(ilp_handler))
        .route("/credentials", post(credentials_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub server_address: String,
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
        server_address: state.receiver.server_address().to_string(),
    })
}

/// `POST /ilp`
///
/// Bodies that are not an OER-encoded Prepare get a 400. Anything that parses
/// is answered with an ILP reply and a 200, including rejects.
async fn ilp_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let prepare = match IlpPrepare::from_bytes(&body) {
        Ok(prepare) => prepare,
        Err(err) => {
            debug!(error = %err, "malformed ILP prepare");
            return (StatusCode::BAD_REQUEST, format!("invalid ILP prepare: {err}")).into_response();
        }
    };
    state.metrics.packets_received_total.inc();

    let timer = state.metrics.reply_latency_seconds.start_timer();
    let reply = match state.receiver.create_reply(&prepare) {
        PrepareOutcome::Reply(reply) => reply,
        PrepareOutcome::Incoming(mut money) => {
            let total = state.credit(money.connection_id(), money.amount());
            state.metrics.amount_received_total.inc_by(money.amount());
            info!(
                connection = %money.connection_id(),
                payment_tag = money.payment_tag().unwrap_or_default(),
                amount = money.amount(),
                total_received = total,
                "received money"
            );
            money.set_total_received(total);
            money.accept()
        }
    };
    timer.observe_duration();

    match &reply {
        IlpReply::Fulfill(_) => state.metrics.packets_fulfilled_total.inc(),
        IlpReply::Reject(reject) => state
            .metrics
            .packets_rejected_total
            .with_label_values(&[reject.code.as_str()])
            .inc(),
    }

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        reply.to_bytes(),
    )
        .into_response()
}

/// Body of `POST /credentials`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub payment_tag: Option<String>,
    /// Generate a receipt secret and sign receipts on this connection.
    #[serde(default)]
    pub receipts: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub destination_address: String,
    /// Base64-encoded shared secret.
    pub shared_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_nonce: Option<String>,
    /// Base64-encoded key that verifies this connection's receipts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_secret: Option<String>,
}

/// Issues credentials for `details` and renders them for a client.
pub fn issue_credentials(
    receiver: &StreamReceiver,
    details: &ConnectionDetails,
) -> Result<CredentialsResponse, stream_pay::receiver::ReceiverError> {
    let credentials = receiver.generate_credentials(details)?;
    Ok(CredentialsResponse {
        destination_address: credentials.destination_address.to_string(),
        shared_secret: STANDARD.encode(credentials.shared_secret),
        receipt_nonce: details
            .receipt_setup
            .as_ref()
            .map(|setup| STANDARD.encode(setup.nonce)),
        receipt_secret: details
            .receipt_setup
            .as_ref()
            .map(|setup| STANDARD.encode(setup.secret)),
    })
}

/// Fresh random receipt parameters.
pub fn random_receipt_setup() -> ReceiptSetup {
    let mut rng = rand::thread_rng();
    let mut nonce = [0u8; RECEIPT_NONCE_LENGTH];
    let mut secret = [0u8; RECEIPT_SECRET_LENGTH];
    rng.fill_bytes(&mut nonce);
    rng.fill_bytes(&mut secret);
    ReceiptSetup { nonce, secret }
}

/// `POST /credentials`
async fn credentials_handler(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Response {
    let details = ConnectionDetails {
        payment_tag: request.payment_tag,
        receipt_setup: request.receipts.then(random_receipt_setup),
        asset: state.asset.clone(),
    };
    match issue_credentials(&state.receiver, &details) {
        Ok(response) => {
            state.metrics.credentials_issued_total.inc();
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to issue credentials");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}
