//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submission and resubmission volume
//! - Confirmation outcomes
//! - Escalation stalls and exhausted retry budgets

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Submission metrics
    pub static ref TX_SENT: CounterVec = register_counter_vec!(
        "steward_transactions_sent_total",
        "Total transactions broadcast for new send requests",
        &["service"]
    ).unwrap();

    pub static ref TX_RESUBMITTED: CounterVec = register_counter_vec!(
        "steward_transactions_resubmitted_total",
        "Total escalated replacement transactions broadcast",
        &["service"]
    ).unwrap();

    // Outcome metrics
    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "steward_transactions_confirmed_total",
        "Total contexts finalized, by receipt outcome",
        &["service", "outcome"]
    ).unwrap();

    // Escalation metrics
    pub static ref ESCALATION_STALLED: CounterVec = register_counter_vec!(
        "steward_escalation_stalled_total",
        "Escalations that could not proceed, by reason",
        &["service", "reason"]
    ).unwrap();

    pub static ref RETRIES_EXHAUSTED: CounterVec = register_counter_vec!(
        "steward_check_retries_exhausted_total",
        "Contexts whose resubmission budget ran out",
        &["service"]
    ).unwrap();

    // Backlog metrics
    pub static ref PENDING_ATTEMPTS: GaugeVec = register_gauge_vec!(
        "steward_pending_attempts",
        "Outstanding pending-or-replaced attempts seen by the last check pass",
        &["service"]
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

    pub async fn run(&self) -> std::io::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_tx_sent(service: &str) {
    TX_SENT.with_label_values(&[service]).inc();
}

pub fn record_tx_resubmitted(service: &str) {
    TX_RESUBMITTED.with_label_values(&[service]).inc();
}

pub fn record_tx_confirmed(service: &str, success: bool) {
    let outcome = if success { "success" } else { "failed" };
    TX_CONFIRMED.with_label_values(&[service, outcome]).inc();
}

pub fn record_escalation_stalled(service: &str, reason: &str) {
    ESCALATION_STALLED.with_label_values(&[service, reason]).inc();
}

pub fn record_retries_exhausted(service: &str) {
    RETRIES_EXHAUSTED.with_label_values(&[service]).inc();
}

pub fn record_pending_attempts(service: &str, count: usize) {
    PENDING_ATTEMPTS
        .with_label_values(&[service])
        .set(count as f64);
}
