//! Audit logging for security and operational events.
//!
//! All events are emitted via `tracing` with a dedicated target so they can
//! be filtered and formatted (e.g. JSON) for audit pipelines.

use tracing::{info, warn};

const AUDIT_TARGET: &str = "vantage::audit";

/// Log a request that presented the correct shared credential.
pub fn auth_success(path: &str) {
    info!(
        target: AUDIT_TARGET,
        event = "auth_success",
        result = "ok",
        path = %path,
    );
}

/// Log a request rejected for a missing or wrong credential.
pub fn auth_failure(path: &str, reason: &str) {
    warn!(
        target: AUDIT_TARGET,
        event = "auth_failure",
        result = "denied",
        path = %path,
        reason = %reason,
    );
}

/// Log admin HTTP requests (metrics, health).
pub fn admin_http_request(path: &str, status: u16) {
    info!(
        target: AUDIT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}

/// Log one processed ingest envelope.
pub fn ingest_processed(cluster_id: &str, stored: usize, failed: usize, anomalies: usize) {
    info!(
        target: AUDIT_TARGET,
        event = "ingest_processed",
        cluster_id = %cluster_id,
        stored = stored,
        failed = failed,
        anomalies = anomalies,
    );
}
