//! # Prometheus Metrics
//!
//! Operational metrics for the receiver service, scraped at `/metrics`.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the receiver.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// ILP Prepare packets addressed to this receiver.
    pub packets_received_total: IntCounter,
    /// Prepares answered with a Fulfill.
    pub packets_fulfilled_total: IntCounter,
    /// Prepares answered with a Reject, labelled by ILP error code.
    pub packets_rejected_total: IntCounterVec,
    /// Sum of fulfilled Prepare amounts, in receiver units.
    pub amount_received_total: IntCounter,
    /// Credentials issued through the API.
    pub credentials_issued_total: IntCounter,
    /// Distinct connections that have received money since startup. The
    /// receiver is stateless, so connections are never observed to close.
    pub connections_seen_total: IntCounter,
    /// Time spent building a reply to one Prepare.
    pub reply_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("stream_pay".into()), None)?;

        let packets_received_total = IntCounter::new(
            "packets_received_total",
            "Total number of ILP Prepare packets received",
        )?;
        registry.register(Box::new(packets_received_total.clone()))?;

        let packets_fulfilled_total = IntCounter::new(
            "packets_fulfilled_total",
            "Total number of Prepare packets fulfilled",
        )?;
        registry.register(Box::new(packets_fulfilled_total.clone()))?;

        let packets_rejected_total = IntCounterVec::new(
            Opts::new(
                "packets_rejected_total",
                "Total number of Prepare packets rejected, by ILP error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(packets_rejected_total.clone()))?;

        let amount_received_total = IntCounter::new(
            "amount_received_total",
            "Sum of fulfilled amounts in the receiver's units",
        )?;
        registry.register(Box::new(amount_received_total.clone()))?;

        let credentials_issued_total = IntCounter::new(
            "credentials_issued_total",
            "Total number of connection credentials issued",
        )?;
        registry.register(Box::new(credentials_issued_total.clone()))?;

        let connections_seen_total = IntCounter::new(
            "connections_seen_total",
            "Distinct connections that have received money since startup",
        )?;
        registry.register(Box::new(connections_seen_total.clone()))?;

        let reply_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reply_latency_seconds",
                "Time to decrypt a Prepare and build its reply, in seconds",
            )
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )?;
        registry.register(Box::new(reply_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            packets_received_total,
            packets_fulfilled_total,
            packets_rejected_total,
            amount_received_total,
            credentials_issued_total,
            connections_seen_total,
            reply_latency_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
