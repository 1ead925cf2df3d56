//! Ingestion envelope codec
//!
//! One envelope is a gzip-or-identity compressed JSON document carrying a
//! cluster id and any combination of metrics, logs and traces. Telemetry
//! kinds are explicit discriminators (tagged enums), never inferred from
//! shape. Decoding is a pure function of the input bytes: no side effects,
//! same bytes in, same `NormalizedBatch` out.
//!
//! Failure policy is whole-envelope-atomic: a corrupt compressed stream or
//! any malformed inner structure rejects the entire envelope. The one
//! exception is metric points of unsupported kinds (histograms etc.), which
//! are valid wire data and are dropped with a count rather than an error.

use crate::error::DecodeError;
use crate::types::telemetry::{
    LogRecord, MetricKind, MetricSample, NormalizedBatch, TraceSpan,
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Envelope schema version this decoder understands.
pub const ENVELOPE_VERSION: u32 = 1;

/// How the envelope body is compressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value. Absent means identity;
    /// anything other than gzip/identity is unsupported.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("identity") => Some(Self::Identity),
            Some("gzip") => Some(Self::Gzip),
            Some(_) => None,
        }
    }
}

fn default_version() -> u32 {
    ENVELOPE_VERSION
}

/// Wire form of one metric point. The `kind` tag is the discriminator;
/// kinds this pipeline does not evaluate (histogram, summary, ...) fall
/// into `Unsupported` and are counted, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WirePoint {
    Gauge {
        name: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        timestamp_ms: i64,
        value: f64,
    },
    Counter {
        name: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        timestamp_ms: i64,
        value: f64,
    },
    #[serde(other)]
    Unsupported,
}

/// Wire form of one log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLog {
    pub timestamp_ms: i64,
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Wire form of one trace span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSpan {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Top-level envelope document. Sections are independent; an envelope may
/// carry zero, one, or all telemetry kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(default = "default_version")]
    pub version: u32,
    pub cluster_id: String,
    #[serde(default)]
    pub metrics: Vec<WirePoint>,
    #[serde(default)]
    pub logs: Vec<WireLog>,
    #[serde(default)]
    pub traces: Vec<WireSpan>,
}

impl WireEnvelope {
    /// Serialize to gzip-compressed JSON, the collector-side wire form.
    pub fn to_gzip_bytes(&self) -> anyhow::Result<Vec<u8>> {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;
        let json = serde_json::to_vec(self)?;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&json)?;
        Ok(enc.finish()?)
    }
}

/// Join a metric name and its label set into one opaque series key.
/// Labels arrive in a `BTreeMap`, so the rendering is already sorted and
/// deterministic for a given label set.
fn series_key(name: &str, labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

/// Decompress and parse one envelope into normalized records.
pub fn decode(raw: &[u8], encoding: ContentEncoding) -> Result<NormalizedBatch, DecodeError> {
    let body = match encoding {
        ContentEncoding::Identity => raw.to_vec(),
        ContentEncoding::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(DecodeError::Compression)?;
            out
        }
    };

    let envelope: WireEnvelope =
        serde_json::from_slice(&body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(DecodeError::Malformed(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if envelope.cluster_id.is_empty() {
        return Err(DecodeError::Malformed("empty cluster_id".to_string()));
    }

    let cluster_id = envelope.cluster_id;
    let mut batch = NormalizedBatch {
        cluster_id: cluster_id.clone(),
        ..Default::default()
    };

    for point in envelope.metrics {
        match point {
            WirePoint::Gauge {
                name,
                labels,
                timestamp_ms,
                value,
            } => batch.metrics.push(MetricSample {
                series_key: series_key(&name, &labels),
                timestamp_ms,
                value,
                kind: MetricKind::Gauge,
                cluster_id: cluster_id.clone(),
            }),
            WirePoint::Counter {
                name,
                labels,
                timestamp_ms,
                value,
            } => batch.metrics.push(MetricSample {
                series_key: series_key(&name, &labels),
                timestamp_ms,
                value,
                kind: MetricKind::Counter,
                cluster_id: cluster_id.clone(),
            }),
            WirePoint::Unsupported => batch.dropped_points += 1,
        }
    }

    for log in envelope.logs {
        batch.logs.push(LogRecord {
            cluster_id: cluster_id.clone(),
            timestamp_ms: log.timestamp_ms,
            body: log.body,
            attributes: log.attributes,
        });
    }

    for span in envelope.traces {
        batch.traces.push(TraceSpan {
            cluster_id: cluster_id.clone(),
            trace_id: span.trace_id,
            span_id: span.span_id,
            name: span.name,
            start_ms: span.start_ms,
            end_ms: span.end_ms,
        });
    }

    Ok(batch)
}
