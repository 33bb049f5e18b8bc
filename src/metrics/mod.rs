//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Provider call outcomes and rate limiting
//! - Transaction dispatch, creation and status transitions
//! - In-flight processors and batch sweeps
//! - Store health

use crate::error::{EngineError, EngineResult, ProviderError};
use crate::providers::ProviderKind;
use crate::transaction::{StatusCode, TransactionStatus};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Provider metrics
    pub static ref PROVIDER_REQUESTS: CounterVec = register_counter_vec!(
        "swap_broker_provider_requests_total",
        "Provider call attempts by outcome",
        &["provider", "operation", "outcome"]
    ).unwrap();

    pub static ref PROVIDER_RATE_LIMIT_RETRIES: CounterVec = register_counter_vec!(
        "swap_broker_provider_rate_limit_retries_total",
        "Retries scheduled after a rate-limit signal",
        &["provider"]
    ).unwrap();

    pub static ref UNKNOWN_STATUSES: CounterVec = register_counter_vec!(
        "swap_broker_unknown_provider_status_total",
        "Reconciliation cycles skipped on an unmapped native status",
        &["provider"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_DISPATCHED: CounterVec = register_counter_vec!(
        "swap_broker_transactions_dispatched_total",
        "Transactions handed to a processor",
        &["provider"]
    ).unwrap();

    pub static ref TX_CREATED: CounterVec = register_counter_vec!(
        "swap_broker_orders_created_total",
        "Provider orders created",
        &["provider"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "swap_broker_transactions_failed_total",
        "Transactions moved to ERROR by status code",
        &["provider", "status_code"]
    ).unwrap();

    pub static ref TX_TRANSITIONS: CounterVec = register_counter_vec!(
        "swap_broker_status_transitions_total",
        "Canonical status changes written by reconciliation",
        &["provider", "status"]
    ).unwrap();

    pub static ref TX_COMPLETION: HistogramVec = register_histogram_vec!(
        "swap_broker_transaction_completion_seconds",
        "Time from creation to a terminal status",
        &["provider"],
        vec![60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0, 21600.0, 86400.0]
    ).unwrap();

    // Rate selection
    pub static ref BEST_RATE_SELECTIONS: CounterVec = register_counter_vec!(
        "swap_broker_best_rate_selections_total",
        "Providers chosen by best-rate selection (provider=none when no quote)",
        &["provider"]
    ).unwrap();

    // Task metrics
    pub static ref IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "swap_broker_in_flight_tasks",
        "Supervised tasks currently running",
        &["kind"]
    ).unwrap();

    pub static ref TASK_PANICS: CounterVec = register_counter_vec!(
        "swap_broker_task_panics_total",
        "Supervised tasks that ended in a panic",
        &["kind"]
    ).unwrap();

    pub static ref SWEEP_BATCHES: CounterVec = register_counter_vec!(
        "swap_broker_sweep_batches_total",
        "Batched status lookups issued by sweepers",
        &["provider"]
    ).unwrap();

    // Health metrics
    pub static ref STORE_HEALTHY: GaugeVec = register_gauge_vec!(
        "swap_broker_store_healthy",
        "Transaction store reachability (1=healthy, 0=unreachable)",
        &[]
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

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| EngineError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| EngineError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# metrics encoding failed: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_provider_request(provider: ProviderKind, operation: &str, error: Option<&ProviderError>) {
    let outcome = error.map(|e| e.kind()).unwrap_or("ok");
    PROVIDER_REQUESTS
        .with_label_values(&[provider.as_str(), operation, outcome])
        .inc();
}

pub fn record_rate_limit_retry(provider: ProviderKind) {
    PROVIDER_RATE_LIMIT_RETRIES
        .with_label_values(&[provider.as_str()])
        .inc();
}

pub fn record_unknown_status(provider: ProviderKind) {
    UNKNOWN_STATUSES.with_label_values(&[provider.as_str()]).inc();
}

pub fn record_dispatched(provider: ProviderKind) {
    TX_DISPATCHED.with_label_values(&[provider.as_str()]).inc();
}

pub fn record_order_created(provider: ProviderKind) {
    TX_CREATED.with_label_values(&[provider.as_str()]).inc();
}

pub fn record_transaction_failed(provider: Option<ProviderKind>, code: StatusCode) {
    let provider = provider.map(|p| p.as_str()).unwrap_or("none");
    TX_FAILED
        .with_label_values(&[provider, code.as_str()])
        .inc();
}

pub fn record_status_transition(provider: ProviderKind, status: TransactionStatus) {
    TX_TRANSITIONS
        .with_label_values(&[provider.as_str(), status.as_str()])
        .inc();
}

pub fn record_completion(provider: ProviderKind, elapsed_secs: f64) {
    TX_COMPLETION
        .with_label_values(&[provider.as_str()])
        .observe(elapsed_secs);
}

pub fn record_best_rate(provider: Option<ProviderKind>) {
    let provider = provider.map(|p| p.as_str()).unwrap_or("none");
    BEST_RATE_SELECTIONS.with_label_values(&[provider]).inc();
}

pub fn record_task_started(kind: &str) {
    IN_FLIGHT.with_label_values(&[kind]).inc();
}

pub fn record_task_finished(kind: &str, panicked: bool) {
    IN_FLIGHT.with_label_values(&[kind]).dec();
    if panicked {
        TASK_PANICS.with_label_values(&[kind]).inc();
    }
}

pub fn record_sweep_batch(provider: ProviderKind) {
    SWEEP_BATCHES.with_label_values(&[provider.as_str()]).inc();
}

pub fn record_store_health(healthy: bool) {
    STORE_HEALTHY
        .with_label_values(&[])
        .set(if healthy { 1.0 } else { 0.0 });
}
