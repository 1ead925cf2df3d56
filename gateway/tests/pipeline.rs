//! End-to-end pipeline tests: HTTP routing → decode → store → detect →
//! dispatch, over the in-memory table and a recording notifier.

use async_trait::async_trait;
use hyper::{Body, Method, Request, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vantage_gateway::config::GatewayConfig;
use vantage_gateway::detector::{Detector, DetectorConfig};
use vantage_gateway::dispatch::{AlertDispatcher, Notifier};
use vantage_gateway::ingest::IngestPipeline;
use vantage_gateway::server::http::{route, AppState};
use vantage_gateway::store::{memory::MemoryTable, RecordStore, TableStore};
use vantage_shared::envelope::WireEnvelope;
use vantage_shared::error::DispatchError;
use vantage_shared::types::telemetry::AlertChannelConfig;

const TEST_KEY: &str = "test-key-123";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, target: &str, message: &str) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), message.to_string()));
        Ok(())
    }
}

fn test_state(
    table: Arc<MemoryTable>,
    notifier: Arc<RecordingNotifier>,
    cooldown: Duration,
) -> AppState {
    let config = GatewayConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        api_key: TEST_KEY.to_string(),
        history_window_ms: 300_000,
        mad_threshold: 3.0,
        cooldown_secs: cooldown.as_secs(),
        notify_url: None,
        chunk_writers: 4,
        request_deadline_ms: 10_000,
    };
    let store = Arc::new(RecordStore::new(table.clone(), config.chunk_writers));
    let dispatcher = AlertDispatcher::new(table, notifier, cooldown);
    let detector = Detector::new(DetectorConfig {
        threshold: config.mad_threshold,
    });
    let pipeline = Arc::new(IngestPipeline::new(
        store,
        detector,
        dispatcher,
        config.history_window_ms,
        Duration::from_millis(config.request_deadline_ms),
    ));
    AppState { config, pipeline }
}

fn gauge_envelope(cluster: &str, series: &str, points: &[(i64, f64)]) -> WireEnvelope {
    let metrics = points
        .iter()
        .map(|(ts, v)| {
            serde_json::from_value(serde_json::json!({
                "kind": "gauge",
                "name": series,
                "timestamp_ms": ts,
                "value": v,
            }))
            .unwrap()
        })
        .collect();
    WireEnvelope {
        version: 1,
        cluster_id: cluster.to_string(),
        metrics,
        logs: vec![],
        traces: vec![],
    }
}

fn ingest_request(envelope: &WireEnvelope, api_key: &str) -> Request<Body> {
    let body = envelope.to_gzip_bytes().unwrap();
    Request::builder()
        .method(Method::POST)
        .uri("/v1/ingest")
        .header("x-api-key", api_key)
        .header("content-encoding", "gzip")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(res: hyper::Response<Body>) -> serde_json::Value {
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_ingest_then_query_roundtrip() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table, notifier, Duration::from_secs(900));

    let envelope = gauge_envelope(
        "prod-eu",
        "node_load1",
        &[(3_000, 0.3), (1_000, 3.141592653589793), (2_000, 0.2)],
    );
    let res = route(ingest_request(&envelope, TEST_KEY), &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stored"], 3);
    assert_eq!(body["failed"], 0);

    // Query window ends at "now": stored timestamps are far in the past, so
    // widen the window to cover them.
    let req = Request::builder()
        .method(Method::GET)
        .uri("/v1/query?cluster_id=prod-eu&series_key=node_load1&window_ms=99999999999999")
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap();
    let res = route(req, &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    let samples = body_json(res).await;
    let samples = samples.as_array().unwrap();
    assert_eq!(samples.len(), 3);
    // Ascending by timestamp, values preserved exactly.
    assert_eq!(samples[0]["timestamp_ms"], 1_000);
    assert_eq!(samples[0]["value"], 3.141592653589793);
    assert_eq!(samples[2]["timestamp_ms"], 3_000);
}

#[tokio::test]
async fn test_labeled_series_query_roundtrip() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let envelope: WireEnvelope = serde_json::from_value(serde_json::json!({
        "cluster_id": "prod-eu",
        "metrics": [
            {"kind": "gauge", "name": "up", "labels": {"job": "node"},
             "timestamp_ms": 1_000, "value": 1.0}
        ]
    }))
    .unwrap();
    let res = route(ingest_request(&envelope, TEST_KEY), &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(table.len(), 1);

    // The decoder renders the key as `up{job="node"}`; clients must
    // percent-encode the braces, quotes and equals sign on the wire.
    let req = Request::builder()
        .method(Method::GET)
        .uri("/v1/query?cluster_id=prod-eu&series_key=up%7Bjob%3D%22node%22%7D&window_ms=99999999999999")
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap();
    let res = route(req, &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    let samples = body_json(res).await;
    let samples = samples.as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["series_key"], "up{job=\"node\"}");
    assert_eq!(samples[0]["value"], 1.0);
}

#[tokio::test]
async fn test_bad_credential_has_no_side_effects() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let envelope = gauge_envelope("prod-eu", "up", &[(1_000, 1.0)]);
    let res = route(ingest_request(&envelope, "wrong-key"), &state).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = route(
        Request::builder()
            .method(Method::POST)
            .uri("/v1/ingest")
            .body(Body::from(envelope.to_gzip_bytes().unwrap()))
            .unwrap(),
        &state,
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Nothing was decoded or stored.
    assert!(table.is_empty());
    assert_eq!(table.put_calls(), 0);
}

#[tokio::test]
async fn test_malformed_envelope_is_rejected_atomically() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/ingest")
        .header("x-api-key", TEST_KEY)
        .body(Body::from(r#"{"cluster_id": "c", "metrics": [{"name": "no-kind"}]}"#))
        .unwrap();
    let res = route(req, &state).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_corrupt_gzip_is_rejected() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table, notifier, Duration::from_secs(900));

    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/ingest")
        .header("x-api-key", TEST_KEY)
        .header("content-encoding", "gzip")
        .body(Body::from(vec![0x1f, 0x8b, 0xff, 0x00]))
        .unwrap();
    let res = route(req, &state).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_anomaly_alert_with_cooldown() {
    let table = Arc::new(MemoryTable::new());
    table
        .put_channel(AlertChannelConfig {
            cluster_id: "prod-eu".to_string(),
            channel_target: "-1001".to_string(),
        })
        .await
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table, notifier.clone(), Duration::from_secs(900));

    // Baseline: ten noisy points around 50.
    let baseline: Vec<(i64, f64)> = [
        49.0, 50.0, 51.0, 50.0, 49.0, 51.0, 50.0, 50.0, 49.0, 51.0,
    ]
    .iter()
    .enumerate()
    .map(|(i, v)| ((i as i64 + 1) * 1_000, *v))
    .collect();
    let res = route(
        ingest_request(&gauge_envelope("prod-eu", "latency_p99", &baseline), TEST_KEY),
        &state,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(notifier.sent().is_empty(), "baseline must not alert");

    // Spike: far outside the MAD band.
    let res = route(
        ingest_request(
            &gauge_envelope("prod-eu", "latency_p99", &[(11_000, 500.0)]),
            TEST_KEY,
        ),
        &state,
    )
    .await;
    let body = body_json(res).await;
    assert_eq!(body["anomalies"], 1);
    assert_eq!(body["alerts_delivered"], 1);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "-1001");
    assert!(sent[0].1.contains("latency_p99"));
    assert!(sent[0].1.contains("prod-eu"));

    // Second spike inside the cooldown window: suppressed.
    let res = route(
        ingest_request(
            &gauge_envelope("prod-eu", "latency_p99", &[(12_000, 510.0)]),
            TEST_KEY,
        ),
        &state,
    )
    .await;
    let body = body_json(res).await;
    assert_eq!(body["anomalies"], 1);
    assert_eq!(body["alerts_delivered"], 0);
    assert_eq!(body["alerts_suppressed"], 1);
    assert_eq!(notifier.sent().len(), 1, "exactly one notification");
}

#[tokio::test]
async fn test_deadline_skips_detection_but_not_storage() {
    let table = Arc::new(MemoryTable::new());
    table
        .put_channel(AlertChannelConfig {
            cluster_id: "prod-eu".to_string(),
            channel_target: "-1001".to_string(),
        })
        .await
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier.clone(), Duration::from_secs(900));

    // Baseline through the normally configured pipeline.
    let baseline: Vec<(i64, f64)> = (1..=10).map(|i| (i * 1_000, 50.0)).collect();
    route(
        ingest_request(&gauge_envelope("prod-eu", "latency_p99", &baseline), TEST_KEY),
        &state,
    )
    .await;

    // Same table, zero deadline: the spike is stored but never evaluated.
    let store = Arc::new(RecordStore::new(table.clone(), 4));
    let dispatcher = AlertDispatcher::new(table.clone(), notifier.clone(), Duration::from_secs(900));
    let expired = AppState {
        config: state.config.clone(),
        pipeline: Arc::new(IngestPipeline::new(
            store,
            Detector::new(DetectorConfig { threshold: 3.0 }),
            dispatcher,
            300_000,
            Duration::ZERO,
        )),
    };
    let res = route(
        ingest_request(
            &gauge_envelope("prod-eu", "latency_p99", &[(11_000, 500.0)]),
            TEST_KEY,
        ),
        &expired,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["stored"], 1);
    assert_eq!(body["anomalies"], 0);
    assert!(notifier.sent().is_empty());
    assert_eq!(table.len(), 11);
}

#[tokio::test]
async fn test_partial_storage_failure_returns_207() {
    let table = Arc::new(MemoryTable::new());
    // Exhaust all retry attempts for every item.
    table.throttle_next(1_000_000);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table, notifier, Duration::from_secs(900));

    let envelope = gauge_envelope("prod-eu", "up", &[(1_000, 1.0), (2_000, 1.0)]);
    let res = route(ingest_request(&envelope, TEST_KEY), &state).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_json(res).await;
    assert_eq!(body["status"], "partial");
    assert_eq!(body["stored"], 0);
    assert_eq!(body["failed"], 2);
}

#[tokio::test]
async fn test_unsupported_points_counted_not_fatal() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let raw = serde_json::json!({
        "cluster_id": "prod-eu",
        "metrics": [
            {"kind": "gauge", "name": "up", "timestamp_ms": 1000, "value": 1.0},
            {"kind": "summary", "name": "latency", "timestamp_ms": 1000}
        ]
    });
    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/ingest")
        .header("x-api-key", TEST_KEY)
        .body(Body::from(raw.to_string()))
        .unwrap();
    let res = route(req, &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["stored"], 1);
    assert_eq!(body["dropped_points"], 1);
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_reingesting_same_envelope_is_idempotent() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let envelope = gauge_envelope("prod-eu", "up", &[(1_000, 1.0), (2_000, 0.0)]);
    let first = route(ingest_request(&envelope, TEST_KEY), &state).await;
    let second = route(ingest_request(&envelope, TEST_KEY), &state).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    // Same content fingerprints: overwrites, not duplicates.
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn test_large_batch_chunked_and_fully_written() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table.clone(), notifier, Duration::from_secs(900));

    let points: Vec<(i64, f64)> = (0..1_000).map(|i| (i as i64, i as f64)).collect();
    let envelope = gauge_envelope("prod-eu", "bulk_series", &points);
    let res = route(ingest_request(&envelope, TEST_KEY), &state).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["stored"], 1_000);
    assert_eq!(table.len(), 1_000);
    // 1000 items at 25 per batched put.
    assert_eq!(table.put_calls(), 40);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let table = Arc::new(MemoryTable::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_state(table, notifier, Duration::from_secs(900));

    let res = route(
        Request::builder()
            .method(Method::GET)
            .uri("/healthz")
            .body(Body::empty())
            .unwrap(),
        &state,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = route(
        Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap(),
        &state,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}
