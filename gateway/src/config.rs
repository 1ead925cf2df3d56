//! Gateway configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address for the HTTP server
    pub listen_addr: String,

    /// Shared credential ingesting clients must present in `x-api-key`
    pub api_key: String,

    /// Detector look-back window for history queries, in milliseconds
    pub history_window_ms: i64,

    /// Anomaly threshold as a multiple of the scaled MAD
    pub mad_threshold: f64,

    /// Per-(cluster, series) alert cooldown, in seconds
    pub cooldown_secs: u64,

    /// Chat-bot API endpoint for notifications; unset disables delivery
    pub notify_url: Option<String>,

    /// Concurrent chunk writers per ingest request
    pub chunk_writers: usize,

    /// Ingest deadline in milliseconds, checked at stage boundaries only;
    /// in-flight chunk writes always run to completion
    pub request_deadline_ms: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: std::env::var("VANTAGE_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            api_key: std::env::var("VANTAGE_API_KEY")
                .unwrap_or_else(|_| "dev-test-key-123".to_string()),
            history_window_ms: env_parse("VANTAGE_HISTORY_WINDOW_SECS", 300i64) * 1_000,
            mad_threshold: env_parse("VANTAGE_MAD_THRESHOLD", 3.0f64),
            cooldown_secs: env_parse("VANTAGE_COOLDOWN_SECS", 900u64),
            notify_url: std::env::var("VANTAGE_NOTIFY_URL").ok(),
            chunk_writers: env_parse("VANTAGE_CHUNK_WRITERS", 4usize),
            request_deadline_ms: env_parse("VANTAGE_REQUEST_DEADLINE_MS", 10_000u64),
        }
    }
}
