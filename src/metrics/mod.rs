//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swap outcomes
//! - Transaction submissions per chain
//! - Watcher polling

use crate::error::{RelayerResult, SwapError};
use crate::swap::SwapState;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

lazy_static! {
    // Swap metrics
    pub static ref SWAPS_STARTED: CounterVec = register_counter_vec!(
        "htlc_swaps_started_total",
        "Total swaps started",
        &[]
    ).unwrap();

    pub static ref SWAPS_FINISHED: CounterVec = register_counter_vec!(
        "htlc_swaps_finished_total",
        "Total swaps finished by terminal state",
        &["state"]
    ).unwrap();

    pub static ref SWAPS_IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "htlc_swaps_in_flight",
        "Swaps not yet in a terminal state",
        &[]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "htlc_transactions_submitted_total",
        "Total transactions submitted by kind and outcome",
        &["chain_id", "kind", "status"]
    ).unwrap();

    // Watcher metrics
    pub static ref WATCHER_POLLS: CounterVec = register_counter_vec!(
        "htlc_watcher_polls_total",
        "Total receipt polls while waiting for escrow events",
        &["chain_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Serve `/metrics` until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SwapError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| SwapError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| SwapError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| SwapError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_swap_started() {
    SWAPS_STARTED.with_label_values(&[]).inc();
    SWAPS_IN_FLIGHT.with_label_values(&[]).inc();
}

pub fn record_swap_finished(state: SwapState) {
    SWAPS_FINISHED
        .with_label_values(&[&state.to_string()])
        .inc();
    SWAPS_IN_FLIGHT.with_label_values(&[]).dec();
}

pub fn record_tx_submitted(chain_id: u64, kind: &str, ok: bool) {
    let status = if ok { "included" } else { "failed" };
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), kind, status])
        .inc();
}

pub fn record_watcher_poll(chain_id: u64) {
    WATCHER_POLLS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}
