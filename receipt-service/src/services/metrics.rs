//! Prometheus metrics for receipt-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receipt_db_query_duration_seconds",
        "Database query duration in seconds",
        &["query"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

pub static OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receipt_operations_total",
        "Receipt pipeline operations by outcome",
        &["operation", "status"]
    )
    .expect("Failed to register OPERATIONS")
});

pub static MATCH_CONFIDENCE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receipt_match_confidence_total",
        "Match candidates produced, by confidence tier",
        &["confidence"]
    )
    .expect("Failed to register MATCH_CONFIDENCE")
});

pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receipt_errors_total",
        "Errors by kind",
        &["kind"]
    )
    .expect("Failed to register ERRORS")
});

/// Force registration of all metric families at startup so they appear on
/// /metrics before first use.
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&OPERATIONS);
    Lazy::force(&MATCH_CONFIDENCE);
    Lazy::force(&ERRORS);
}

pub fn record_operation(operation: &str, status: &str) {
    OPERATIONS.with_label_values(&[operation, status]).inc();
}

pub fn record_error(kind: &str) {
    ERRORS.with_label_values(&[kind]).inc();
}

/// Render the full registry in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}
