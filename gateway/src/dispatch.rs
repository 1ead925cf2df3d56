//! Alert grouping, cooldown and delivery
//!
//! Anomaly events are grouped into one composite message per cluster so a
//! correlated incident produces one notification, not one per series. A
//! per-(cluster, series) cooldown suppresses repeats; the check-and-arm is
//! atomic under one lock so two concurrent anomalies on the same series
//! cannot both pass. Delivery goes through a pluggable [`Notifier`] with
//! bounded retry; permanent failures are logged and surfaced in the result,
//! never raised to the caller.

use crate::metrics;
use crate::retry::retry_with_backoff;
use crate::store::TableStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use vantage_shared::error::DispatchError;
use vantage_shared::types::telemetry::{AnomalyEvent, ClusterId, SeriesKey};

/// Delivery attempts per cluster message.
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Initial backoff between delivery attempts.
const DELIVERY_BACKOFF: Duration = Duration::from_millis(200);

/// Outcome of one dispatch cycle.
#[derive(Debug, Default, PartialEq)]
pub struct DispatchResult {
    /// Events that went out in a delivered notification.
    pub delivered: usize,
    /// Events suppressed by the cooldown window.
    pub suppressed: usize,
    /// Events for clusters with no configured channel.
    pub unconfigured: usize,
    /// Clusters whose notification could not be delivered.
    pub failed: Vec<(ClusterId, DispatchError)>,
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one pre-formatted message to a channel target.
    async fn send(&self, target: &str, message: &str) -> Result<(), DispatchError>;
}

/// Chat-bot HTTP notifier. Posts the composite message as JSON to a
/// sendMessage-style endpoint.
pub struct ChatNotifier {
    client: hyper::Client<hyper::client::HttpConnector>,
    api_url: String,
}

impl ChatNotifier {
    pub fn new(api_url: String) -> Self {
        Self {
            client: hyper::Client::new(),
            api_url,
        }
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn send(&self, target: &str, message: &str) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "chat_id": target,
            "text": message,
            "parse_mode": "Markdown",
        });
        let req = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(&self.api_url)
            .header("Content-Type", "application/json")
            .body(hyper::Body::from(payload.to_string()))
            .map_err(|e| DispatchError::ChannelUnavailable(e.to_string()))?;

        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| DispatchError::ChannelUnavailable(e.to_string()))?;

        match res.status() {
            s if s.is_success() => Ok(()),
            s if s.is_client_error() => Err(DispatchError::InvalidTarget(format!(
                "channel API returned {}",
                s
            ))),
            s => Err(DispatchError::ChannelUnavailable(format!(
                "channel API returned {}",
                s
            ))),
        }
    }
}

/// Per-(cluster, series) cooldown tracking. Armed entries stay armed even
/// if the subsequent delivery fails; re-arming on failure would reopen the
/// race the lock exists to close.
pub struct CooldownMap {
    window: Duration,
    last_fired: Mutex<HashMap<(ClusterId, SeriesKey), Instant>>,
}

impl CooldownMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check whether a series may fire and arm it if so.
    /// Returns false while the series is inside the cooldown window.
    pub fn check_and_arm(&self, cluster_id: &str, series_key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_fired.lock().expect("lock poisoned");
        match map.get(&(cluster_id.to_string(), series_key.to_string())) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                map.insert((cluster_id.to_string(), series_key.to_string()), now);
                true
            }
        }
    }
}

/// Groups, de-duplicates and delivers anomaly events.
pub struct AlertDispatcher {
    table: Arc<dyn TableStore>,
    notifier: Arc<dyn Notifier>,
    cooldowns: CooldownMap,
}

/// Render one composite message for a cluster's anomalies.
fn format_message(cluster_id: &str, events: &[&AnomalyEvent]) -> String {
    let mut out = format!(
        "\u{1f6a8} Anomaly alert for cluster `{}` ({} series)\n",
        cluster_id,
        events.len()
    );
    for event in events {
        out.push_str(&format!(
            "\n[{}] `{}`\n  observed {:.4}, baseline median {:.4} (deviation {:.4})",
            event.severity.label(),
            event.series_key,
            event.observed_value,
            event.baseline_median,
            event.baseline_deviation,
        ));
    }
    out
}

impl AlertDispatcher {
    pub fn new(
        table: Arc<dyn TableStore>,
        notifier: Arc<dyn Notifier>,
        cooldown_window: Duration,
    ) -> Self {
        Self {
            table,
            notifier,
            cooldowns: CooldownMap::new(cooldown_window),
        }
    }

    /// Deliver one dispatch cycle's events. Never returns an error: every
    /// failure mode is folded into the [`DispatchResult`].
    pub async fn dispatch(&self, events: &[AnomalyEvent]) -> DispatchResult {
        let mut result = DispatchResult::default();
        if events.is_empty() {
            return result;
        }

        // BTreeMap so dispatch order across clusters is deterministic.
        let mut by_cluster: BTreeMap<&str, Vec<&AnomalyEvent>> = BTreeMap::new();
        for event in events {
            by_cluster.entry(&event.cluster_id).or_default().push(event);
        }

        for (cluster_id, cluster_events) in by_cluster {
            // Channel lookup comes before the cooldown check: an
            // unconfigured cluster must not arm its series, or the first
            // notification after configuration would be suppressed.
            let channel = match self.table.get_channel(cluster_id).await {
                Ok(Some(channel)) => channel,
                Ok(None) => {
                    // No alert configuration for this cluster: a no-op.
                    tracing::debug!("no alert channel configured for cluster {}", cluster_id);
                    result.unconfigured += cluster_events.len();
                    continue;
                }
                Err(e) => {
                    tracing::warn!("alert channel lookup failed for {}: {}", cluster_id, e);
                    result.failed.push((
                        cluster_id.to_string(),
                        DispatchError::ChannelUnavailable(e.to_string()),
                    ));
                    continue;
                }
            };

            let mut firing = Vec::new();
            for event in cluster_events {
                if self.cooldowns.check_and_arm(cluster_id, &event.series_key) {
                    firing.push(event);
                } else {
                    result.suppressed += 1;
                    metrics::ALERTS_SUPPRESSED.inc();
                }
            }
            if firing.is_empty() {
                continue;
            }

            let message = format_message(cluster_id, &firing);
            let delivery = retry_with_backoff(
                "alert delivery",
                MAX_DELIVERY_ATTEMPTS,
                DELIVERY_BACKOFF,
                DispatchError::is_retryable,
                || self.notifier.send(&channel.channel_target, &message),
            )
            .await;

            match delivery {
                Ok(()) => {
                    result.delivered += firing.len();
                    metrics::ALERTS_DELIVERED.inc();
                    tracing::info!(
                        "alert delivered for cluster {} covering {} series",
                        cluster_id,
                        firing.len()
                    );
                }
                Err(error) => {
                    metrics::ALERTS_FAILED.inc();
                    tracing::error!("alert delivery failed for cluster {}: {}", cluster_id, error);
                    result.failed.push((cluster_id.to_string(), error));
                }
            }
        }

        result
    }
}
