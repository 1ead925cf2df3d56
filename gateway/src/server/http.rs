//! HTTP server: ingestion, query, health and metrics
//!
//! Request state machine: received → authenticated → decoded → stored →
//! detected → dispatched → responded, with early exit at the first failing
//! stage. Partial storage failure does not abort the request; it proceeds
//! through detection over the written subset and responds `207`.

use crate::audit;
use crate::config::GatewayConfig;
use crate::ingest::{IngestPipeline, IngestSummary};
use crate::metrics;
use crate::server::auth;
use hyper::service::{make_service_fn, service_fn};
use hyper::{body::to_bytes, Body, Method, Request, Response, Server, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use vantage_shared::envelope::{self, ContentEncoding};
use vantage_shared::error::DecodeError;

/// Shared per-process server state.
pub struct AppState {
    pub config: GatewayConfig,
    pub pipeline: Arc<IngestPipeline>,
}

fn json_response(body: String, status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .expect("response build")
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(
        serde_json::json!({ "error": message }).to_string(),
        status,
    )
}

fn summary_body(summary: &IngestSummary, status: &str) -> String {
    serde_json::json!({
        "status": status,
        "cluster_id": summary.cluster_id,
        "stored": summary.stored,
        "failed": summary.store_failed,
        "dropped_points": summary.dropped_points,
        "anomalies": summary.anomalies,
        "alerts_delivered": summary.dispatch.delivered,
        "alerts_suppressed": summary.dispatch.suppressed,
    })
    .to_string()
}

/// Decode one percent-encoded query component; `+` means space. Invalid
/// escapes are kept literally rather than rejected.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a URI query string into a key → value map. Series keys carry
/// `{`, `"` and `=`, so both sides are percent-decoded.
fn query_params(uri: &hyper::Uri) -> HashMap<String, String> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((percent_decode(k), percent_decode(v)))
        })
        .collect()
}

/// Route one request. Public so integration tests can exercise the full
/// surface without binding a socket.
pub async fn route(req: Request<Body>, state: &AppState) -> Response<Body> {
    let path = req.uri().path().to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::POST, "/v1/ingest") => handle_ingest(req, state).await,
        (Method::GET, "/v1/query") => handle_query(req, state).await,

        (Method::GET, "/healthz") => {
            audit::admin_http_request(&path, 200);
            Response::new(Body::from("ok\n"))
        }

        (Method::GET, "/metrics") => {
            audit::admin_http_request(&path, 200);
            Response::builder()
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Body::from(metrics::encode_metrics()))
                .expect("response build")
        }

        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle_ingest(req: Request<Body>, state: &AppState) -> Response<Body> {
    let started = Instant::now();

    if auth::authenticate(req.headers(), &state.config.api_key, "/v1/ingest").is_err() {
        metrics::INGEST_TOTAL.with_label_values(&["unauthorized"]).inc();
        return error_response(StatusCode::UNAUTHORIZED, "invalid or missing api key");
    }

    let encoding = req
        .headers()
        .get(hyper::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let Some(encoding) = ContentEncoding::from_header(encoding.as_deref()) else {
        metrics::INGEST_TOTAL.with_label_values(&["decode_error"]).inc();
        return error_response(StatusCode::BAD_REQUEST, "unsupported content encoding");
    };

    let body = match to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics::INGEST_TOTAL.with_label_values(&["decode_error"]).inc();
            return error_response(StatusCode::BAD_REQUEST, &format!("body read: {}", e));
        }
    };

    let batch = match envelope::decode(&body, encoding) {
        Ok(batch) => batch,
        Err(e @ DecodeError::Compression(_)) | Err(e @ DecodeError::Malformed(_)) => {
            metrics::INGEST_TOTAL.with_label_values(&["decode_error"]).inc();
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let summary = state.pipeline.ingest(batch).await;
    metrics::INGEST_DURATION.observe(started.elapsed().as_secs_f64());

    if summary.is_partial() {
        metrics::INGEST_TOTAL.with_label_values(&["partial"]).inc();
        json_response(summary_body(&summary, "partial"), StatusCode::MULTI_STATUS)
    } else {
        metrics::INGEST_TOTAL.with_label_values(&["ok"]).inc();
        json_response(summary_body(&summary, "ok"), StatusCode::OK)
    }
}

async fn handle_query(req: Request<Body>, state: &AppState) -> Response<Body> {
    if auth::authenticate(req.headers(), &state.config.api_key, "/v1/query").is_err() {
        return error_response(StatusCode::UNAUTHORIZED, "invalid or missing api key");
    }

    let params = query_params(req.uri());
    let (Some(cluster_id), Some(series_key)) =
        (params.get("cluster_id"), params.get("series_key"))
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "cluster_id and series_key are required",
        );
    };
    let window_ms = params
        .get("window_ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.history_window_ms);

    match state.pipeline.query(cluster_id, series_key, window_ms).await {
        Ok(samples) => {
            // serde_json renders f64 with shortest-round-trip precision, so
            // stored values survive the read path exactly.
            let body = serde_json::to_string(&samples).expect("serialize samples");
            json_response(body, StatusCode::OK)
        }
        Err(e) => {
            tracing::warn!("query failed: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
    }
}

/// Start the HTTP server.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(route(req, &state).await) }
            }))
        }
    });

    tracing::info!("Gateway HTTP server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await
}
