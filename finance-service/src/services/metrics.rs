//! Prometheus metrics for finance-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec,
    HistogramVec, IntCounter, TextEncoder,
};

/// Entry write counter by operation and outcome.
pub static ENTRY_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_entry_operations_total",
        "Total number of financial entry writes",
        &["operation", "status"]
    )
    .expect("Failed to register entry_operations_total")
});

/// Batch lifecycle and membership changes by outcome.
pub static BATCH_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_batch_transitions_total",
        "Total number of payment batch transitions",
        &["transition", "status"]
    )
    .expect("Failed to register batch_transitions_total")
});

/// Entries moved to overdue by the sweep.
pub static OVERDUE_SWEPT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "finance_overdue_swept_total",
        "Total number of entries marked overdue by the sweep"
    )
    .expect("Failed to register overdue_swept_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_errors_total",
        "Total number of errors by type",
        &["error_type"]  // db_error, conflict, audit_write, etc.
    )
    .expect("Failed to register errors_total")
});

/// Database operation duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "finance_db_query_duration_seconds",
        "Database operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&ENTRY_OPERATIONS_TOTAL);
    Lazy::force(&BATCH_TRANSITIONS_TOTAL);
    Lazy::force(&OVERDUE_SWEPT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_entry_operation(operation: &str, ok: bool) {
    ENTRY_OPERATIONS_TOTAL
        .with_label_values(&[operation, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_batch_transition(transition: &str, ok: bool) {
    BATCH_TRANSITIONS_TOTAL
        .with_label_values(&[transition, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
