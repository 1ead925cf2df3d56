//! Content-fingerprint storage keys
//!
//! Every persisted record is addressed by (partition, sort) where the sort
//! key is a SHA-256 fingerprint of the record's identifying fields. The key
//! is a pure function of content: re-ingesting the same record produces the
//! same key, so at-least-once delivery overwrites instead of duplicating.
//! The hex digest is always 64 bytes, well under key-size ceilings of
//! DynamoDB-class stores.

use crate::types::telemetry::{LogRecord, MetricSample};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length in bytes of the hex-encoded sort fingerprint.
pub const SORT_KEY_LEN: usize = 64;

/// Field separator inside the hashed preimage. Record fields are
/// length-free strings, so an explicit separator keeps ("ab","c") and
/// ("a","bc") from colliding.
const SEP: u8 = 0x1f;

/// Derived storage address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    /// Partition key: the cluster the record belongs to.
    pub partition: String,
    /// Sort key: fixed-length content fingerprint.
    pub sort: String,
}

fn finish(hasher: Sha256) -> String {
    hex::encode(hasher.finalize())
}

impl StorageKey {
    /// Key for a metric sample: hashes timestamp, series key and value.
    ///
    /// The series key already encodes the metric name and the full sorted
    /// label set, so it doubles as the label-set hash input.
    pub fn for_metric(sample: &MetricSample) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sample.timestamp_ms.to_be_bytes());
        hasher.update([SEP]);
        hasher.update(sample.series_key.as_bytes());
        hasher.update([SEP]);
        hasher.update(sample.value.to_bits().to_be_bytes());
        Self {
            partition: sample.cluster_id.clone(),
            sort: finish(hasher),
        }
    }

    /// Key for a log record: timestamp plus a content fingerprint of body
    /// and attributes, so identical-timestamp bursts stay unique.
    pub fn for_log(record: &LogRecord) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(record.timestamp_ms.to_be_bytes());
        hasher.update([SEP]);
        hasher.update(record.body.as_bytes());
        for (k, v) in &record.attributes {
            hasher.update([SEP]);
            hasher.update(k.as_bytes());
            hasher.update([SEP]);
            hasher.update(v.as_bytes());
        }
        Self {
            partition: record.cluster_id.clone(),
            sort: finish(hasher),
        }
    }
}
