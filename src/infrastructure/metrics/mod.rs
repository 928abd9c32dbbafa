//! Prometheus Metrics Module
//!
//! Application-wide metrics exposed on `/metrics`.
//!
//! # Metrics Collected
//! - HTTP request counts and latency
//! - Active WebSocket connections
//! - Emitted real-time events by name
//! - Backplane publish failures and inbound envelopes
//! - Persistence failures by operation
//! - Delivery receipt transitions by status
//! - Database pool statistics

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

const NAMESPACE: &str = "chat_relay";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request latency in seconds")
            .namespace(NAMESPACE)
            .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Active WebSocket connections on this instance
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("websocket_connections_active", "Number of active WebSocket connections")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Events emitted by this instance, by event name
pub static EVENTS_EMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_emitted_total", "Real-time events emitted").namespace(NAMESPACE),
        &["event"],
    )
    .expect("Failed to create EVENTS_EMITTED_TOTAL metric")
});

pub static BACKPLANE_PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("backplane_publish_failures_total", "Failed backplane publishes")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create BACKPLANE_PUBLISH_FAILURES_TOTAL metric")
});

pub static BACKPLANE_ENVELOPES_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "backplane_envelopes_received_total",
            "Envelopes received from other instances",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create BACKPLANE_ENVELOPES_RECEIVED_TOTAL metric")
});

/// Storage failures by operation
pub static PERSISTENCE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("persistence_failures_total", "Failed storage operations").namespace(NAMESPACE),
        &["operation"],
    )
    .expect("Failed to create PERSISTENCE_FAILURES_TOTAL metric")
});

/// Accepted delivery receipt transitions by target status
pub static RECEIPT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("receipt_transitions_total", "Accepted delivery status transitions")
            .namespace(NAMESPACE),
        &["status"],
    )
    .expect("Failed to create RECEIPT_TRANSITIONS_TOTAL metric")
});

/// Database connection pool stats
pub static DB_POOL_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("db_pool_connections", "Database connection pool statistics").namespace(NAMESPACE),
        &["state"], // "idle", "active", "max"
    )
    .expect("Failed to create DB_POOL_CONNECTIONS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()),
        Box::new(EVENTS_EMITTED_TOTAL.clone()),
        Box::new(BACKPLANE_PUBLISH_FAILURES_TOTAL.clone()),
        Box::new(BACKPLANE_ENVELOPES_RECEIVED_TOTAL.clone()),
        Box::new(PERSISTENCE_FAILURES_TOTAL.clone()),
        Box::new(RECEIPT_TRANSITIONS_TOTAL.clone()),
        Box::new(DB_POOL_CONNECTIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::error!(error = %e, "Failed to register metric");
        }
    }
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn set_websocket_connections(active: usize) {
    WEBSOCKET_CONNECTIONS_ACTIVE.set(active as i64);
}

pub fn record_event_emitted(event: &str) {
    EVENTS_EMITTED_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_backplane_publish_failure() {
    BACKPLANE_PUBLISH_FAILURES_TOTAL.inc();
}

pub fn record_backplane_envelope_received() {
    BACKPLANE_ENVELOPES_RECEIVED_TOTAL.inc();
}

pub fn record_persistence_failure(operation: &str) {
    PERSISTENCE_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_receipt_transition(status: &str) {
    RECEIPT_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Helper to update database pool stats
pub fn update_db_pool_stats(idle: u32, active: u32, max: u32) {
    DB_POOL_CONNECTIONS.with_label_values(&["idle"]).set(idle as f64);
    DB_POOL_CONNECTIONS.with_label_values(&["active"]).set(active as f64);
    DB_POOL_CONNECTIONS.with_label_values(&["max"]).set(max as f64);
}
