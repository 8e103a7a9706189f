use crate::config::{LocationSource, TrackerConfig};
use crate::iso_timestamp;
use crate::lifecycle::{LifecycleState, LifecycleTracker};
use crate::location::{LocationProvider, SimulatedLocationProvider, TermuxLocationProvider};
use crate::permission::{PermissionGate, PermissionState};
use crate::reporter::{HttpTransport, Reporter};
use crate::sampler::PositionSampler;
use crate::status::LiveStatus;
use chrono::Utc;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Sample → distance → report pipeline shared by every trigger
#[derive(Clone)]
pub struct DistanceTracker {
    sampler: PositionSampler,
    reporter: Reporter,
    status_file: Option<PathBuf>,
}

impl DistanceTracker {
    pub fn new(sampler: PositionSampler, reporter: Reporter) -> Self {
        DistanceTracker {
            sampler,
            reporter,
            status_file: None,
        }
    }

    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status_file = Some(path);
        self
    }

    /// Wire the production capabilities selected by `config`
    pub fn from_config(config: &TrackerConfig, lifecycle: LifecycleTracker) -> Self {
        let location: Arc<dyn LocationProvider> = match config.location_source {
            LocationSource::Termux => Arc::new(TermuxLocationProvider::new()),
            LocationSource::Simulated => Arc::new(SimulatedLocationProvider::new(config.reference)),
        };
        let gate = PermissionGate::new(Arc::new(config.permission.provider()));
        let sampler = PositionSampler::new(
            gate,
            location,
            config.reference,
            config.position.clone(),
            lifecycle,
        );
        let reporter = Reporter::new(Arc::new(HttpTransport::new()), config.collector_url.clone());

        let tracker = DistanceTracker::new(sampler, reporter);
        match &config.status_file {
            Some(path) => tracker.with_status_file(path.clone()),
            None => tracker,
        }
    }

    pub fn sampler(&self) -> &PositionSampler {
        &self.sampler
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        self.sampler.lifecycle()
    }

    pub async fn ensure_permission(&self) -> PermissionState {
        self.sampler.ensure_permission().await
    }

    /// Run one sampling cycle and hand any report to the reporter.
    ///
    /// Delivery is not awaited; the returned handle resolves to whether it
    /// succeeded, after the status snapshot reflects the outcome. `None`
    /// means no report was produced.
    pub async fn sample_now(&self) -> Option<JoinHandle<bool>> {
        let report = match self.sampler.sample().await {
            Some(report) => report,
            None => {
                self.write_status().await;
                return None;
            }
        };

        let delivery = self.reporter.dispatch(report);
        let tracker = self.clone();
        Some(tokio::spawn(async move {
            let delivered = delivery.await.unwrap_or(false);
            tracker.write_status().await;
            delivered
        }))
    }

    pub fn status(&self) -> LiveStatus {
        LiveStatus::new(
            iso_timestamp(Utc::now()),
            self.sampler.reference(),
            self.sampler.last_distance(),
            self.lifecycle().current(),
            self.sampler.counts(),
            self.reporter.counts(),
        )
    }

    async fn write_status(&self) {
        if let Some(path) = &self.status_file {
            if let Err(e) = self.status().save(path).await {
                warn!("Failed to write status file {}: {}", path.display(), e);
            }
        }
    }
}

/// Entry point for a background run launched without the foreground session.
///
/// Builds only what one cycle needs and resolves permission in this process
/// first, since nothing from a previous session is available. Waits for
/// delivery so the process can exit afterwards, and signals completion
/// unconditionally. Returns whether a report was delivered.
pub async fn run_headless_task(config: &TrackerConfig, task_id: &str) -> bool {
    info!("[BackgroundFetch] Headless taskId: {}", task_id);
    let tracker = DistanceTracker::from_config(config, LifecycleTracker::new(LifecycleState::Background));

    let delivered = if tracker.ensure_permission().await == PermissionState::Granted {
        match tracker.sample_now().await {
            Some(delivery) => delivery.await.unwrap_or(false),
            None => false,
        }
    } else {
        warn!("[BackgroundFetch] Location permission not granted for task {}", task_id);
        false
    };

    info!("[BackgroundFetch] finish taskId: {}", task_id);
    delivered
}
