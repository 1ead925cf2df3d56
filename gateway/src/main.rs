//! Vantage gateway service
//!
//! Receives telemetry envelopes pushed by cluster collectors, persists them
//! with content-fingerprint keys, runs anomaly detection over per-series
//! history, and dispatches grouped alerts to the configured chat channel.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vantage_gateway::{
    config::GatewayConfig,
    detector::{Detector, DetectorConfig},
    dispatch::{AlertDispatcher, ChatNotifier, Notifier},
    ingest::IngestPipeline,
    server::http::{self, AppState},
    store::{memory::MemoryTable, RecordStore},
};
use vantage_shared::error::DispatchError;

/// Fallback notifier when no chat endpoint is configured: logs the alert
/// instead of delivering it, mirroring an unconfigured deployment.
struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, target: &str, message: &str) -> Result<(), DispatchError> {
        tracing::warn!("no notify URL configured; alert for {}:\n{}", target, message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = GatewayConfig::default();
    info!("Starting Vantage gateway on {}", config.listen_addr);

    let table = Arc::new(MemoryTable::new());
    let store = Arc::new(RecordStore::new(table.clone(), config.chunk_writers));

    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => {
            info!("alert notifications enabled via {}", url);
            Arc::new(ChatNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };
    let dispatcher = AlertDispatcher::new(
        table,
        notifier,
        Duration::from_secs(config.cooldown_secs),
    );
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

    let addr = config
        .listen_addr
        .parse()
        .context("Invalid listen address")?;
    let state = Arc::new(AppState { config, pipeline });

    http::serve(addr, state).await.context("HTTP server error")?;

    Ok(())
}
