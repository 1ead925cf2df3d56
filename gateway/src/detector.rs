//! Robust-statistics anomaly detection
//!
//! Each sample is classified against the median and MAD (median absolute
//! deviation) of its series' history window. MAD is outlier-resistant, so
//! one bad historical point does not widen the baseline the way a standard
//! deviation would. Counter series are first converted to rates by
//! first-differencing in timestamp order; negative differences (counter
//! resets, out-of-order delivery) are discarded as noise rather than fed in
//! as rate observations.
//!
//! The detector itself is stateless: `evaluate` is a deterministic function
//! of (sample, history, config). Per-series history caching for one batch
//! lives in the ingest pipeline.

use vantage_shared::types::telemetry::{AnomalyEvent, MetricKind, MetricSample, Severity};

/// Historical points required before a series is considered baselined.
pub const MIN_BASELINE_SAMPLES: usize = 3;

/// Consistency factor relating MAD to the standard deviation of a normal
/// distribution.
const MAD_SCALE: f64 = 1.4826;

/// Flat-series guard: with MAD = 0, deviations at or below this absolute
/// epsilon are treated as jitter, not anomalies.
const FLAT_EPSILON: f64 = 1e-6;

/// Minimum scaled deviation; avoids division by a near-zero MAD and
/// excludes zero-variance counter windows from evaluation.
const MIN_DEVIATION_FLOOR: f64 = 1e-9;

/// How one sample was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    /// Fewer than [`MIN_BASELINE_SAMPLES`] usable history points; detection
    /// skipped, expected steady state for new series.
    InsufficientData,
    Normal,
    Anomalous,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Anomaly threshold as a multiple of the scaled MAD.
    pub threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { threshold: 3.0 }
    }
}

pub struct Detector {
    config: DetectorConfig,
}

/// Median of an unsorted slice. Averages the middle pair for even lengths.
fn median(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN in series values"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around the given center.
fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Positive first differences of counter samples in timestamp order.
/// Negative differences are discarded: a counter reset or out-of-order
/// delivery, not a valid rate observation.
pub fn counter_rates(samples: &[MetricSample]) -> Vec<f64> {
    let mut ordered: Vec<&MetricSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp_ms);
    ordered
        .windows(2)
        .map(|pair| pair[1].value - pair[0].value)
        .filter(|diff| *diff >= 0.0)
        .collect()
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Classify one sample against its history and build the anomaly event
    /// if it falls outside the baseline.
    pub fn evaluate(
        &self,
        sample: &MetricSample,
        history: &[MetricSample],
    ) -> Option<AnomalyEvent> {
        let (state, event) = self.classify(sample, history);
        debug_assert_eq!(state == SeriesState::Anomalous, event.is_some());
        event
    }

    /// Full classification, exposing the series state for observability.
    pub fn classify(
        &self,
        sample: &MetricSample,
        history: &[MetricSample],
    ) -> (SeriesState, Option<AnomalyEvent>) {
        match sample.kind {
            MetricKind::Gauge => {
                if history.len() < MIN_BASELINE_SAMPLES {
                    return (SeriesState::InsufficientData, None);
                }
                let values: Vec<f64> = history.iter().map(|s| s.value).collect();
                self.score(sample, sample.value, &values)
            }
            MetricKind::Counter => {
                // The observation under test is the rate formed by the
                // sample and the newest historical point.
                let mut sequence: Vec<MetricSample> = history.to_vec();
                sequence.push(sample.clone());
                let rates = counter_rates(&sequence);
                let baseline_rates = counter_rates(history);

                if baseline_rates.len() < MIN_BASELINE_SAMPLES {
                    return (SeriesState::InsufficientData, None);
                }
                // Sample-to-history diff was negative: a reset, never an
                // anomaly observation.
                if rates.len() == baseline_rates.len() {
                    return (SeriesState::Normal, None);
                }
                let observed_rate = *rates.last().expect("non-empty rates");

                // Zero variance across the window: the floor would turn any
                // scheduling jitter into an alert, so exclude the series.
                if mad(&baseline_rates, median(&baseline_rates)) <= MIN_DEVIATION_FLOOR {
                    return (SeriesState::Normal, None);
                }
                self.score(sample, observed_rate, &baseline_rates)
            }
        }
    }

    /// Shared median/MAD scoring for an observation against its baseline.
    fn score(
        &self,
        sample: &MetricSample,
        observed: f64,
        baseline: &[f64],
    ) -> (SeriesState, Option<AnomalyEvent>) {
        let center = median(baseline);
        let raw_mad = mad(baseline, center);
        let deviation = (observed - center).abs();

        if raw_mad <= MIN_DEVIATION_FLOOR {
            // All-identical history. Anything beyond epsilon is maximal
            // anomaly; anything within it is a perfectly flat idle series.
            if deviation > FLAT_EPSILON {
                return (
                    SeriesState::Anomalous,
                    Some(self.event(sample, observed, center, deviation, Severity::Critical)),
                );
            }
            return (SeriesState::Normal, None);
        }

        let scaled_mad = MAD_SCALE * raw_mad;
        let limit = self.config.threshold * scaled_mad;
        if deviation > limit {
            let severity = if deviation >= 2.0 * limit {
                Severity::Critical
            } else {
                Severity::Warning
            };
            return (
                SeriesState::Anomalous,
                Some(self.event(sample, observed, center, deviation, severity)),
            );
        }
        (SeriesState::Normal, None)
    }

    fn event(
        &self,
        sample: &MetricSample,
        observed: f64,
        baseline_median: f64,
        baseline_deviation: f64,
        severity: Severity,
    ) -> AnomalyEvent {
        AnomalyEvent {
            series_key: sample.series_key.clone(),
            cluster_id: sample.cluster_id.clone(),
            timestamp_ms: sample.timestamp_ms,
            observed_value: observed,
            baseline_median,
            baseline_deviation,
            severity,
        }
    }
}
