//! Ingest pipeline: store → detect → dispatch
//!
//! One decoded envelope flows through here. Records are persisted first;
//! detection then runs over the successfully written subset only, using one
//! history query per series per batch (the short-lived baseline cache), and
//! anomalies go to the dispatcher. Storage and dispatch failures degrade to
//! counts in the summary; nothing here aborts the request.

use crate::audit;
use crate::detector::{Detector, SeriesState};
use crate::dispatch::{AlertDispatcher, DispatchResult};
use crate::metrics;
use crate::store::{Record, RecordStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vantage_shared::error::StorageError;
use vantage_shared::types::key::StorageKey;
use vantage_shared::types::telemetry::{AnomalyEvent, MetricSample, NormalizedBatch};

/// Concurrent per-series history queries within one batch.
const DETECT_CONCURRENCY: usize = 4;

/// What one envelope amounted to.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub cluster_id: String,
    pub stored: usize,
    pub store_failed: usize,
    pub dropped_points: u64,
    pub anomalies: usize,
    pub dispatch: DispatchResult,
    /// Detection/dispatch stages skipped because the request deadline
    /// passed after the store stage.
    pub deadline_exceeded: bool,
}

impl IngestSummary {
    /// Some records were written but not all.
    pub fn is_partial(&self) -> bool {
        self.store_failed > 0
    }
}

pub struct IngestPipeline {
    store: Arc<RecordStore>,
    detector: Detector,
    dispatcher: AlertDispatcher,
    history_window_ms: i64,
    request_deadline: Duration,
    detect_permits: Arc<Semaphore>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as i64
}

impl IngestPipeline {
    pub fn new(
        store: Arc<RecordStore>,
        detector: Detector,
        dispatcher: AlertDispatcher,
        history_window_ms: i64,
        request_deadline: Duration,
    ) -> Self {
        Self {
            store,
            detector,
            dispatcher,
            history_window_ms,
            request_deadline,
            detect_permits: Arc::new(Semaphore::new(DETECT_CONCURRENCY)),
        }
    }

    /// Run one decoded envelope through store, detection and dispatch.
    ///
    /// The request deadline is checked at stage boundaries only: a chunk
    /// write in flight when the deadline passes runs to completion so the
    /// store never holds unresolved partial writes.
    pub async fn ingest(&self, batch: NormalizedBatch) -> IngestSummary {
        let started = Instant::now();
        let mut summary = IngestSummary {
            cluster_id: batch.cluster_id.clone(),
            dropped_points: batch.dropped_points,
            ..Default::default()
        };
        if batch.dropped_points > 0 {
            metrics::DROPPED_POINTS.inc_by(batch.dropped_points as f64);
        }

        let records: Vec<Record> = batch
            .metrics
            .iter()
            .cloned()
            .map(Record::Metric)
            .chain(batch.logs.iter().cloned().map(Record::Log))
            .collect();

        let write = self.store.write_batch(records).await;
        summary.stored = write.written;
        summary.store_failed = write.failed.len();
        metrics::RECORDS_STORED.inc_by(write.written as f64);
        metrics::RECORDS_FAILED.inc_by(write.failed.len() as f64);

        if started.elapsed() >= self.request_deadline {
            tracing::warn!(
                "request deadline passed after store stage for cluster {}; \
                 skipping detection and dispatch",
                summary.cluster_id
            );
            summary.deadline_exceeded = true;
            audit::ingest_processed(&summary.cluster_id, summary.stored, summary.store_failed, 0);
            return summary;
        }

        // Detection proceeds over the successfully written subset only.
        let failed_keys: HashSet<StorageKey> =
            write.failed.iter().map(|f| f.record.key()).collect();
        let written_metrics: Vec<&MetricSample> = batch
            .metrics
            .iter()
            .filter(|m| !failed_keys.contains(&StorageKey::for_metric(m)))
            .collect();

        let events = self.detect(&written_metrics).await;
        summary.anomalies = events.len();
        metrics::ANOMALIES_DETECTED.inc_by(events.len() as f64);

        summary.dispatch = self.dispatcher.dispatch(&events).await;

        audit::ingest_processed(
            &summary.cluster_id,
            summary.stored,
            summary.store_failed,
            summary.anomalies,
        );
        summary
    }

    /// Evaluate a batch's metric samples. One history query per distinct
    /// series (fetched with bounded concurrency); each sample is then scored
    /// against the slice of that history strictly before its own timestamp.
    async fn detect(&self, samples: &[&MetricSample]) -> Vec<AnomalyEvent> {
        // (cluster, series) → latest timestamp in this batch.
        let mut series_latest: HashMap<(String, String), i64> = HashMap::new();
        for sample in samples {
            let entry = series_latest
                .entry((sample.cluster_id.clone(), sample.series_key.clone()))
                .or_insert(i64::MIN);
            *entry = (*entry).max(sample.timestamp_ms);
        }

        // Baseline cache for this batch: one query per series.
        let mut tasks: JoinSet<((String, String), Result<Vec<MetricSample>, StorageError>)> =
            JoinSet::new();
        for ((cluster, series), latest_ms) in series_latest {
            let store = self.store.clone();
            let permits = self.detect_permits.clone();
            let window = self.history_window_ms;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore closed");
                let history = store
                    .query_history(&cluster, &series, window, latest_ms)
                    .await;
                ((cluster, series), history)
            });
        }

        let mut histories: HashMap<(String, String), Vec<MetricSample>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(history))) => {
                    histories.insert(key, history);
                }
                Ok(((cluster, series), Err(e))) => {
                    // Detection is best-effort: a failed history query skips
                    // the series, it does not fail the request.
                    tracing::warn!(
                        "history query failed for {}/{}: {}; skipping detection",
                        cluster,
                        series,
                        e
                    );
                }
                Err(e) => tracing::error!("history query task failed: {}", e),
            }
        }

        let mut events = Vec::new();
        for sample in samples {
            let key = (sample.cluster_id.clone(), sample.series_key.clone());
            let Some(history) = histories.get(&key) else {
                continue;
            };
            let view: Vec<MetricSample> = history
                .iter()
                .filter(|h| h.timestamp_ms < sample.timestamp_ms)
                .cloned()
                .collect();
            let (state, event) = self.detector.classify(sample, &view);
            match state {
                SeriesState::InsufficientData => metrics::SERIES_SKIPPED.inc(),
                SeriesState::Anomalous => {
                    if let Some(event) = event {
                        events.push(event);
                    }
                }
                SeriesState::Normal => {}
            }
        }
        events
    }

    /// Read path: ascending samples for one series over the last `window_ms`.
    pub async fn query(
        &self,
        cluster_id: &str,
        series_key: &str,
        window_ms: i64,
    ) -> Result<Vec<MetricSample>, StorageError> {
        self.store
            .query_history(cluster_id, series_key, window_ms, now_ms())
            .await
    }
}
