use crate::geo::Coordinate;
use crate::lifecycle::LifecycleState;
use crate::reporter::DeliveryCounts;
use crate::sampler::SampleCounts;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the tracker for display. Overwritten on every cycle, never
/// accumulated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: String,
    pub reference: Coordinate,
    pub distance_meters: Option<f64>,
    /// Distance rounded to two decimals
    pub distance_display: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub fixes: u64,
    pub failures: u64,
    pub skipped_no_permission: u64,
    pub reports_delivered: u64,
    pub reports_failed: u64,
}

impl LiveStatus {
    pub fn new(
        timestamp: String,
        reference: Coordinate,
        distance_meters: Option<f64>,
        lifecycle_state: LifecycleState,
        samples: SampleCounts,
        deliveries: DeliveryCounts,
    ) -> Self {
        Self {
            timestamp,
            reference,
            distance_meters,
            distance_display: distance_meters.map(|d| format!("{:.2}", d)),
            lifecycle_state,
            fixes: samples.fixes,
            failures: samples.failures,
            skipped_no_permission: samples.skipped_no_permission,
            reports_delivered: deliveries.delivered,
            reports_failed: deliveries.failed,
        }
    }

    /// Replace the file at `path` in one step. Concurrent writers each use
    /// their own temp file, so readers see either the old or the new snapshot.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("status"));
    name.push(format!(".tmp-{}-{}", std::process::id(), seq));
    path.with_file_name(name)
}
