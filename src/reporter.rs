use crate::error::{TrackerError, TrackerResult};
use crate::iso_timestamp;
use crate::lifecycle::LifecycleState;
use crate::sampler::DistanceReport;
use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Default collector endpoint
pub const DEFAULT_COLLECTOR_URL: &str = "https://fivestaraccess.com.au/FiveStar_App/locationdb.php";

/// Network capability: POST a JSON body, success or failure only
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> TrackerResult<()>;
}

/// reqwest-backed transport. No request timeout is set.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("distance_tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpTransport { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> TrackerResult<()> {
        // .json() sets Content-Type: application/json
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TrackerError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Delivery(format!("HTTP error: {}", status.as_u16())));
        }
        debug!("Collector responded {}", status);
        Ok(())
    }
}

/// Body sent to the collector
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistancePayload {
    pub distance: String,
}

impl DistancePayload {
    pub fn new(timestamp: &str, distance_meters: f64) -> Self {
        DistancePayload {
            distance: format!("{}: Total distance is {} meters", timestamp, distance_meters),
        }
    }
}

/// Delivery outcomes since process start
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Delivers distance reports to the remote collector.
///
/// Every report gets exactly one attempt. Failures are logged and dropped.
#[derive(Clone)]
pub struct Reporter {
    transport: Arc<dyn Transport>,
    collector_url: String,
    counters: Arc<Counters>,
}

impl Reporter {
    pub fn new(transport: Arc<dyn Transport>, collector_url: impl Into<String>) -> Self {
        Reporter {
            transport,
            collector_url: collector_url.into(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }

    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Send one report and log the outcome. Returns whether it was delivered.
    pub async fn report(
        &self,
        distance_meters: f64,
        lifecycle_state: LifecycleState,
        timestamp: &str,
    ) -> bool {
        let payload = DistancePayload::new(timestamp, distance_meters);
        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!("[{}] Error: {}", timestamp, e);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        match self.transport.post_json(&self.collector_url, &body).await {
            Ok(()) => {
                info!("[{}] AppState sent: {}", timestamp, lifecycle_state);
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                error!("[{}] Error: {}", timestamp, e);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Fire-and-forget delivery. The report is consumed; the handle is only
    /// useful to callers that want to observe the outcome.
    pub fn dispatch(&self, report: DistanceReport) -> JoinHandle<bool> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let timestamp = iso_timestamp(report.timestamp);
            reporter
                .report(report.distance_meters, report.lifecycle_state, &timestamp)
                .await
        })
    }
}
