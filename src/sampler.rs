use crate::error::TrackerError;
use crate::geo::{distance, Coordinate};
use crate::iso_timestamp;
use crate::lifecycle::{LifecycleState, LifecycleTracker};
use crate::location::{LocationProvider, PositionOptions};
use crate::permission::{PermissionGate, PermissionState};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Distance computed from one successful fix, handed to the reporter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceReport {
    pub distance_meters: f64,
    /// When sampling was initiated
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state at report construction
    pub lifecycle_state: LifecycleState,
}

/// Sampling counters since process start
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub fixes: u64,
    pub failures: u64,
    pub skipped_no_permission: u64,
}

#[derive(Default)]
struct Counters {
    fixes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

/// Requests single position fixes and turns them into distance reports.
///
/// Each call to `sample` is independent; overlapping calls are fine. The
/// only state written here is the latest distance (kept for display) and
/// the counters.
#[derive(Clone)]
pub struct PositionSampler {
    gate: PermissionGate,
    location: Arc<dyn LocationProvider>,
    reference: Coordinate,
    options: PositionOptions,
    lifecycle: LifecycleTracker,
    latest: Arc<RwLock<Option<f64>>>,
    counters: Arc<Counters>,
}

impl PositionSampler {
    pub fn new(
        gate: PermissionGate,
        location: Arc<dyn LocationProvider>,
        reference: Coordinate,
        options: PositionOptions,
        lifecycle: LifecycleTracker,
    ) -> Self {
        PositionSampler {
            gate,
            location,
            reference,
            options,
            lifecycle,
            latest: Arc::new(RwLock::new(None)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn reference(&self) -> Coordinate {
        self.reference
    }

    pub fn options(&self) -> &PositionOptions {
        &self.options
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    /// Ask for location access up front; see `PermissionGate`
    pub async fn ensure_permission(&self) -> PermissionState {
        self.gate.ensure_location_permission().await
    }

    /// Take one fix and compute its distance to the reference point.
    ///
    /// Returns `None` when permission is missing or the fix fails or times
    /// out; the failure is logged with the time sampling started.
    pub async fn sample(&self) -> Option<DistanceReport> {
        let started = Utc::now();
        let timestamp = iso_timestamp(started);

        let permission = self.gate.current().await;
        if permission != PermissionState::Granted {
            info!(
                "[{}] Location permission {:?}, skipping sample",
                timestamp, permission
            );
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let timeout = Duration::from_millis(self.options.timeout_ms);
        let outcome = tokio::time::timeout(timeout, self.location.current_position(&self.options))
            .await
            .unwrap_or(Err(TrackerError::Timeout(self.options.timeout_ms)));

        let fix = match outcome {
            Ok(fix) => fix,
            Err(e) => {
                error!("[{}] Error: {}", timestamp, e);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        info!(
            "[{}] Latitude: {}, Longitude: {}",
            timestamp, fix.coordinate.latitude, fix.coordinate.longitude
        );

        let distance_meters = distance(fix.coordinate, self.reference);
        self.set_latest(distance_meters);
        self.counters.fixes.fetch_add(1, Ordering::Relaxed);
        info!("[{}] Calculated Distance: {} meters", timestamp, distance_meters);

        Some(DistanceReport {
            distance_meters,
            timestamp: started,
            lifecycle_state: self.lifecycle.current(),
        })
    }

    fn set_latest(&self, meters: f64) {
        match self.latest.write() {
            Ok(mut guard) => *guard = Some(meters),
            Err(poisoned) => *poisoned.into_inner() = Some(meters),
        }
    }

    /// Most recent computed distance, if any fix succeeded yet
    pub fn last_distance(&self) -> Option<f64> {
        match self.latest.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Last distance rounded to centimeters for display
    pub fn display_distance(&self) -> Option<String> {
        self.last_distance().map(|d| format!("{:.2}", d))
    }

    pub fn counts(&self) -> SampleCounts {
        SampleCounts {
            fixes: self.counters.fixes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            skipped_no_permission: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}
