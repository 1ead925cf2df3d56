//! Prometheus metrics for the gateway service

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

// ── Ingest metrics ───────────────────────────────────────────────────────────

pub static INGEST_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "vantage_ingest_total",
        "Ingest requests received",
        &["status"]
    )
    .unwrap()
});

pub static INGEST_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "vantage_ingest_duration_seconds",
        "Ingest request latency",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

pub static DROPPED_POINTS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_dropped_points_total",
        "Metric points dropped for unsupported kinds"
    )
    .unwrap()
});

// ── Store metrics ────────────────────────────────────────────────────────────

pub static RECORDS_STORED: Lazy<Counter> = Lazy::new(|| {
    register_counter!("vantage_records_stored_total", "Records persisted").unwrap()
});

pub static RECORDS_FAILED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_records_failed_total",
        "Records that failed persistence after retry"
    )
    .unwrap()
});

pub static STORE_CHUNK_RETRIES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_store_chunk_retries_total",
        "Chunk write attempts that needed a retry"
    )
    .unwrap()
});

// ── Detection & alerting metrics ─────────────────────────────────────────────

pub static ANOMALIES_DETECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!("vantage_anomalies_total", "Samples classified anomalous").unwrap()
});

pub static SERIES_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_series_skipped_total",
        "Evaluations skipped for insufficient baseline"
    )
    .unwrap()
});

pub static ALERTS_DELIVERED: Lazy<Counter> = Lazy::new(|| {
    register_counter!("vantage_alerts_delivered_total", "Notifications delivered").unwrap()
});

pub static ALERTS_SUPPRESSED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_alerts_suppressed_total",
        "Anomaly events suppressed by cooldown"
    )
    .unwrap()
});

pub static ALERTS_FAILED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "vantage_alerts_failed_total",
        "Notifications that failed after retry"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
