//! Telemetry record definitions
//!
//! These types are the normalized in-memory form of everything a collector
//! can push: metric samples, log records and trace spans. The decoder
//! produces them; the store, detector and dispatcher consume them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch
pub type TimestampMs = i64;

/// Opaque identifier for one metric name + label set
pub type SeriesKey = String;

/// Identifier of the cluster a collector reports for
pub type ClusterId = String;

/// How a metric series accumulates over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Point-in-time reading; evaluated directly.
    Gauge,
    /// Cumulative counter; evaluated as a rate of positive first differences.
    Counter,
}

/// One normalized metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name + sorted label set, joined into one opaque key
    pub series_key: SeriesKey,

    /// Sample timestamp, milliseconds since epoch
    pub timestamp_ms: TimestampMs,

    /// Observed value
    pub value: f64,

    /// Gauge or cumulative counter
    pub kind: MetricKind,

    /// Cluster the sample was scraped from
    pub cluster_id: ClusterId,
}

/// One normalized log record.
///
/// Attributes use a `BTreeMap` so iteration order is deterministic; the
/// storage fingerprint hashes them in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub cluster_id: ClusterId,
    pub timestamp_ms: TimestampMs,
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// One normalized trace span. Decoded and counted, not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub cluster_id: ClusterId,
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    pub start_ms: TimestampMs,
    pub end_ms: TimestampMs,
}

/// Everything one envelope decoded into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub cluster_id: ClusterId,
    pub metrics: Vec<MetricSample>,
    pub logs: Vec<LogRecord>,
    pub traces: Vec<TraceSpan>,
    /// Metric points dropped because their kind is not gauge/counter.
    pub dropped_points: u64,
}

impl NormalizedBatch {
    /// Total records retained across all telemetry kinds.
    pub fn record_count(&self) -> usize {
        self.metrics.len() + self.logs.len() + self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Severity attached to a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// A sample the detector classified as anomalous. Owned by the dispatcher
/// for one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub series_key: SeriesKey,
    pub cluster_id: ClusterId,
    pub timestamp_ms: TimestampMs,
    pub observed_value: f64,
    pub baseline_median: f64,
    pub baseline_deviation: f64,
    pub severity: Severity,
}

/// Per-cluster notification target, looked up read-only by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannelConfig {
    pub cluster_id: ClusterId,
    /// Chat identifier the notification channel delivers to.
    pub channel_target: String,
}
