//! In-memory table backend
//!
//! Default backend for local runs and tests. Mirrors the persisted layout:
//! metric samples keyed by (cluster, fingerprint) with a series index for
//! history queries, log records keyed the same way, and one notification
//! channel per cluster. Thread-safe; fault injection hooks let tests
//! exercise the retry path.

use super::{Record, TableStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use vantage_shared::error::StorageError;
use vantage_shared::types::key::StorageKey;
use vantage_shared::types::telemetry::{AlertChannelConfig, MetricSample};

#[derive(Default)]
struct Inner {
    /// (partition, sort) → record, both telemetry kinds.
    items: HashMap<(String, String), Record>,
    /// Secondary index: (cluster, series) → (timestamp, sort) → sort key.
    series_index: HashMap<(String, String), BTreeMap<(i64, String), (String, String)>>,
    channels: HashMap<String, AlertChannelConfig>,
}

/// Thread-safe in-memory [`TableStore`].
#[derive(Default)]
pub struct MemoryTable {
    inner: RwLock<Inner>,
    put_calls: AtomicUsize,
    /// Remaining item puts to reject with `Throttled` (test fault hook).
    throttle_budget: AtomicUsize,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` item puts fail with [`StorageError::Throttled`].
    pub fn throttle_next(&self, n: usize) {
        self.throttle_budget.store(n, Ordering::SeqCst);
    }

    /// Number of `batch_put` calls served so far.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of stored items across both record kinds.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_throttle(&self) -> bool {
        self.throttle_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TableStore for MemoryTable {
    async fn batch_put(&self, items: &[(StorageKey, Record)]) -> Vec<Result<(), StorageError>> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().expect("lock poisoned");

        items
            .iter()
            .map(|(key, record)| {
                if self.take_throttle() {
                    return Err(StorageError::Throttled);
                }
                let addr = (key.partition.clone(), key.sort.clone());
                if let Record::Metric(sample) = record {
                    inner
                        .series_index
                        .entry((sample.cluster_id.clone(), sample.series_key.clone()))
                        .or_default()
                        .insert((sample.timestamp_ms, key.sort.clone()), addr.clone());
                }
                // Overwrite on identical key: idempotent re-delivery.
                inner.items.insert(addr, record.clone());
                Ok(())
            })
            .collect()
    }

    async fn query_series(
        &self,
        cluster_id: &str,
        series_key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<MetricSample>, StorageError> {
        let inner = self.inner.read().expect("lock poisoned");
        let Some(index) = inner
            .series_index
            .get(&(cluster_id.to_string(), series_key.to_string()))
        else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (_, addr) in index.range((from_ms, String::new())..(to_ms, String::new())) {
            if let Some(Record::Metric(sample)) = inner.items.get(addr) {
                out.push(sample.clone());
            }
        }
        Ok(out)
    }

    async fn get_channel(
        &self,
        cluster_id: &str,
    ) -> Result<Option<AlertChannelConfig>, StorageError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.channels.get(cluster_id).cloned())
    }

    async fn put_channel(&self, config: AlertChannelConfig) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.channels.insert(config.cluster_id.clone(), config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_shared::types::telemetry::MetricKind;

    fn sample(ts: i64, value: f64) -> Record {
        Record::Metric(MetricSample {
            series_key: "up".to_string(),
            timestamp_ms: ts,
            value,
            kind: MetricKind::Gauge,
            cluster_id: "c1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_put_and_query() {
        let table = MemoryTable::new();
        let items: Vec<_> = [sample(1, 1.0), sample(2, 2.0)]
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        let results = table.batch_put(&items).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let history = table.query_series("c1", "up", 0, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp_ms < history[1].timestamp_ms);
    }

    #[tokio::test]
    async fn test_duplicate_key_overwrites() {
        let table = MemoryTable::new();
        let record = sample(1, 1.0);
        let items = vec![(record.key(), record.clone()), (record.key(), record)];
        table.batch_put(&items).await;
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_throttle_budget_applies_per_item() {
        let table = MemoryTable::new();
        table.throttle_next(1);
        let items: Vec<_> = [sample(1, 1.0), sample(2, 2.0)]
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        let results = table.batch_put(&items).await;
        assert_eq!(results[0], Err(StorageError::Throttled));
        assert_eq!(results[1], Ok(()));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_roundtrip() {
        let table = MemoryTable::new();
        assert!(table.get_channel("c1").await.unwrap().is_none());
        table
            .put_channel(AlertChannelConfig {
                cluster_id: "c1".to_string(),
                channel_target: "-100123".to_string(),
            })
            .await
            .unwrap();
        let channel = table.get_channel("c1").await.unwrap().unwrap();
        assert_eq!(channel.channel_target, "-100123");
    }
}
