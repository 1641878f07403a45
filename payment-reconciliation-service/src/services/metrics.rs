//! Prometheus metrics for payment-reconciliation-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder behind the `metrics` facade (HTTP middleware, worker counters).
static RECORDER_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_reconciliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for reconciliation decisions by decision kind and trigger.
pub static DECISIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_reconciliation_decisions_total",
        "Total number of reconciliation decisions",
        &["decision", "trigger"]
    )
    .expect("Failed to register DECISIONS")
});

/// Histogram for end-to-end reconciliation duration of one event.
pub static RECONCILE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_reconciliation_reconcile_duration_seconds",
        "Reconciliation duration per payment event in seconds",
        &["trigger"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register RECONCILE_DURATION")
});

/// Counter for times the alternate scorer failed and the deterministic one answered.
pub static SCORER_FALLBACKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_reconciliation_scorer_fallbacks_total",
        "Total number of scorer fallbacks",
        &["scorer", "reason"]
    )
    .expect("Failed to register SCORER_FALLBACKS")
});

/// Counter for batch sweep items by bucket.
pub static BATCH_ITEMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_reconciliation_batch_items_total",
        "Total number of payment events processed by batch sweeps",
        &["bucket"]
    )
    .expect("Failed to register BATCH_ITEMS")
});

/// Counter for review items resolved by outcome.
pub static REVIEW_RESOLUTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_reconciliation_review_resolutions_total",
        "Total number of review item resolutions",
        &["outcome"]
    )
    .expect("Failed to register REVIEW_RESOLUTIONS")
});

/// Payment events waiting in the worker queue.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "payment_reconciliation_queue_depth",
        "Payment events waiting for a reconciliation worker"
    )
    .expect("Failed to register QUEUE_DEPTH")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization) and install the
/// facade recorder. Safe to call more than once.
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&DECISIONS);
    Lazy::force(&RECONCILE_DURATION);
    Lazy::force(&SCORER_FALLBACKS);
    Lazy::force(&BATCH_ITEMS);
    Lazy::force(&REVIEW_RESOLUTIONS);
    Lazy::force(&QUEUE_DEPTH);
    Lazy::force(&ERRORS);

    RECORDER_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install metrics recorder");
            None
        }
    });
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();

    if let Some(handle) = RECORDER_HANDLE.get().and_then(Option::as_ref) {
        output.push_str(&handle.render());
    }
    output
}

pub fn record_decision(decision: &str, trigger: &str) {
    DECISIONS.with_label_values(&[decision, trigger]).inc();
}

pub fn record_scorer_fallback(scorer: &str, reason: &str) {
    SCORER_FALLBACKS.with_label_values(&[scorer, reason]).inc();
}

pub fn record_batch_item(bucket: &str) {
    BATCH_ITEMS.with_label_values(&[bucket]).inc();
}

pub fn record_review_resolution(outcome: &str) {
    REVIEW_RESOLUTIONS.with_label_values(&[outcome]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
