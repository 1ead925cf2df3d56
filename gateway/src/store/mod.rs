//! Record store: durable keyed persistence with idempotent batched writes
//!
//! Writes go through a `TableStore` backend behind chunking and bounded
//! retry. The backend enforces DynamoDB-class ceilings: at most
//! [`MAX_BATCH_ITEMS`] items per batched put and [`MAX_ITEM_BYTES`] per
//! serialized item. Keys are content fingerprints, so re-delivering a batch
//! overwrites identical items instead of duplicating them.

pub mod memory;

use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vantage_shared::error::StorageError;
use vantage_shared::types::key::StorageKey;
use vantage_shared::types::telemetry::{AlertChannelConfig, LogRecord, MetricSample};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-request item-count ceiling of the underlying store.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Per-item serialized byte ceiling of the underlying store.
pub const MAX_ITEM_BYTES: usize = 400 * 1024;

/// Attempts per chunk before surfacing partial failure.
const MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Initial backoff between chunk attempts; doubles per attempt.
const CHUNK_BACKOFF: Duration = Duration::from_millis(50);

/// A persistable record: a metric sample or a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Metric(MetricSample),
    Log(LogRecord),
}

impl Record {
    /// Content-fingerprint storage key; pure function of the record.
    pub fn key(&self) -> StorageKey {
        match self {
            Record::Metric(m) => StorageKey::for_metric(m),
            Record::Log(l) => StorageKey::for_log(l),
        }
    }

    pub fn cluster_id(&self) -> &str {
        match self {
            Record::Metric(m) => &m.cluster_id,
            Record::Log(l) => &l.cluster_id,
        }
    }

    /// Serialized size as stored, checked against [`MAX_ITEM_BYTES`].
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// One record that could not be persisted, with its final error.
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub record: Record,
    pub error: StorageError,
}

/// Outcome of one `write_batch` call.
#[derive(Debug, Default)]
pub struct WriteResult {
    pub written: usize,
    pub failed: Vec<FailedRecord>,
}

impl WriteResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Keyed table backend. Implementations report per-item results for a
/// batched put so the store can retry only what failed.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Put a group of items (at most [`MAX_BATCH_ITEMS`]). The result vec
    /// is aligned with the input order.
    async fn batch_put(&self, items: &[(StorageKey, Record)]) -> Vec<Result<(), StorageError>>;

    /// Metric samples for one series in `[from_ms, to_ms)`, ascending by
    /// timestamp.
    async fn query_series(
        &self,
        cluster_id: &str,
        series_key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<MetricSample>, StorageError>;

    /// Notification channel configured for a cluster, if any.
    async fn get_channel(
        &self,
        cluster_id: &str,
    ) -> Result<Option<AlertChannelConfig>, StorageError>;

    /// Upsert a cluster's notification channel.
    async fn put_channel(&self, config: AlertChannelConfig) -> Result<(), StorageError>;
}

/// Chunking, retry and fan-out layer over a [`TableStore`].
pub struct RecordStore {
    table: Arc<dyn TableStore>,
    writer_permits: Arc<Semaphore>,
}

impl RecordStore {
    pub fn new(table: Arc<dyn TableStore>, chunk_writers: usize) -> Self {
        Self {
            table,
            writer_permits: Arc::new(Semaphore::new(chunk_writers.max(1))),
        }
    }

    pub fn table(&self) -> Arc<dyn TableStore> {
        self.table.clone()
    }

    /// Persist a batch of records.
    ///
    /// Oversized items fail up front without retry. The rest is split into
    /// chunks of at most [`MAX_BATCH_ITEMS`]; chunks are disjoint and keys
    /// idempotent, so they are written concurrently (bounded by the writer
    /// pool) and each chunk independently retries its failed items up to
    /// [`MAX_CHUNK_ATTEMPTS`] times before surfacing partial failure.
    pub async fn write_batch(&self, records: Vec<Record>) -> WriteResult {
        let mut result = WriteResult::default();

        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            if record.encoded_len() > MAX_ITEM_BYTES {
                result.failed.push(FailedRecord {
                    record,
                    error: StorageError::ItemTooLarge(MAX_ITEM_BYTES),
                });
            } else {
                accepted.push(record);
            }
        }

        let mut tasks: JoinSet<(usize, Vec<FailedRecord>)> = JoinSet::new();
        let mut chunks: Vec<Vec<Record>> = Vec::new();
        while accepted.len() > MAX_BATCH_ITEMS {
            let rest = accepted.split_off(MAX_BATCH_ITEMS);
            chunks.push(std::mem::replace(&mut accepted, rest));
        }
        if !accepted.is_empty() {
            chunks.push(accepted);
        }

        for chunk in chunks {
            let table = self.table.clone();
            let permits = self.writer_permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore closed");
                write_chunk(table.as_ref(), chunk).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((written, failed)) => {
                    result.written += written;
                    result.failed.extend(failed);
                }
                Err(e) => {
                    // A panicked writer task loses its chunk; log it rather
                    // than poisoning the whole request.
                    tracing::error!("chunk writer task failed: {}", e);
                }
            }
        }

        result
    }

    /// Ascending history for one series within the look-back window ending
    /// just before `before_ms` (the sample under evaluation is excluded).
    pub async fn query_history(
        &self,
        cluster_id: &str,
        series_key: &str,
        window_ms: i64,
        before_ms: i64,
    ) -> Result<Vec<MetricSample>, StorageError> {
        self.table
            .query_series(
                cluster_id,
                series_key,
                before_ms.saturating_sub(window_ms),
                before_ms,
            )
            .await
    }
}

/// Write one chunk, retrying failed items with exponential backoff.
async fn write_chunk(table: &dyn TableStore, chunk: Vec<Record>) -> (usize, Vec<FailedRecord>) {
    let mut pending: Vec<(StorageKey, Record)> =
        chunk.into_iter().map(|r| (r.key(), r)).collect();
    let mut written = 0usize;
    let mut failed = Vec::new();
    let mut delay = CHUNK_BACKOFF;

    for attempt in 1..=MAX_CHUNK_ATTEMPTS {
        let results = table.batch_put(&pending).await;
        debug_assert_eq!(results.len(), pending.len());

        let mut retryable = Vec::new();
        for ((key, record), outcome) in pending.into_iter().zip(results) {
            match outcome {
                Ok(()) => written += 1,
                Err(error) if error.is_retryable() && attempt < MAX_CHUNK_ATTEMPTS => {
                    retryable.push((key, record, error));
                }
                Err(error) => failed.push(FailedRecord { record, error }),
            }
        }

        if retryable.is_empty() {
            return (written, failed);
        }

        metrics::STORE_CHUNK_RETRIES.inc();
        tracing::warn!(
            "chunk write attempt {}/{}: {} item(s) to retry",
            attempt,
            MAX_CHUNK_ATTEMPTS,
            retryable.len()
        );
        pending = retryable.into_iter().map(|(k, r, _)| (k, r)).collect();
        tokio::time::sleep(delay).await;
        delay *= 2;
    }

    // Unreachable: the final attempt routes every item to written/failed.
    (written, failed)
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTable;
    use super::*;
    use vantage_shared::types::telemetry::MetricKind;

    fn metric(series: &str, ts: i64, value: f64) -> Record {
        Record::Metric(MetricSample {
            series_key: series.to_string(),
            timestamp_ms: ts,
            value,
            kind: MetricKind::Gauge,
            cluster_id: "c1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_large_batch_is_chunked() {
        let table = Arc::new(MemoryTable::new());
        let store = RecordStore::new(table.clone(), 4);

        let records: Vec<Record> = (0..1000).map(|i| metric("s", i, i as f64)).collect();
        let result = store.write_batch(records).await;

        assert_eq!(result.written, 1000);
        assert!(result.is_complete());
        // 1000 items / 25 per chunk = 40 batched puts
        assert_eq!(table.put_calls(), 40);
        assert_eq!(table.len(), 1000);
    }

    #[tokio::test]
    async fn test_writes_are_idempotent() {
        let table = Arc::new(MemoryTable::new());
        let store = RecordStore::new(table.clone(), 4);

        let records = vec![metric("s", 1, 1.0), metric("s", 2, 2.0)];
        let first = store.write_batch(records.clone()).await;
        let second = store.write_batch(records).await;

        assert_eq!(first.written, 2);
        assert_eq!(second.written, 2);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_throttled_items_are_retried() {
        let table = Arc::new(MemoryTable::new());
        // Throttle the first 3 item puts; retries must absorb them.
        table.throttle_next(3);
        let store = RecordStore::new(table.clone(), 1);

        let records: Vec<Record> = (0..10).map(|i| metric("s", i, i as f64)).collect();
        let result = store.write_batch(records).await;

        assert_eq!(result.written, 10);
        assert!(result.is_complete());
        assert_eq!(table.len(), 10);
    }

    #[tokio::test]
    async fn test_persistent_throttle_surfaces_partial_failure() {
        let table = Arc::new(MemoryTable::new());
        // More throttled puts than 25 items * 3 attempts can absorb.
        table.throttle_next(1000);
        let store = RecordStore::new(table.clone(), 1);

        let records: Vec<Record> = (0..5).map(|i| metric("s", i, i as f64)).collect();
        let result = store.write_batch(records).await;

        assert_eq!(result.written, 0);
        assert_eq!(result.failed.len(), 5);
        assert!(result
            .failed
            .iter()
            .all(|f| f.error == StorageError::Throttled));
    }

    #[tokio::test]
    async fn test_oversized_item_fails_without_retry() {
        let table = Arc::new(MemoryTable::new());
        let store = RecordStore::new(table.clone(), 4);

        let big = Record::Log(LogRecord {
            cluster_id: "c1".to_string(),
            timestamp_ms: 1,
            body: "x".repeat(MAX_ITEM_BYTES + 1),
            attributes: Default::default(),
        });
        let result = store.write_batch(vec![big, metric("s", 1, 1.0)]).await;

        assert_eq!(result.written, 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(
            result.failed[0].error,
            StorageError::ItemTooLarge(MAX_ITEM_BYTES)
        );
        // The oversized item never reached the backend.
        assert_eq!(table.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_history_window_and_ordering() {
        let table = Arc::new(MemoryTable::new());
        let store = RecordStore::new(table.clone(), 4);

        // Written out of order; query must come back ascending.
        let records = vec![
            metric("s", 5_000, 5.0),
            metric("s", 1_000, 1.0),
            metric("s", 3_000, 3.0),
            metric("other", 2_000, 99.0),
        ];
        store.write_batch(records).await;

        let history = store.query_history("c1", "s", 10_000, 5_000).await.unwrap();
        let times: Vec<i64> = history.iter().map(|s| s.timestamp_ms).collect();
        // [from, before) excludes the 5_000 sample itself.
        assert_eq!(times, vec![1_000, 3_000]);

        let windowed = store.query_history("c1", "s", 2_500, 5_000).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].timestamp_ms, 3_000);
    }
}
