// Distance tracker
// Samples device position on a schedule, measures distance to a fixed
// reference point and reports it to a remote collector.

pub mod background;
pub mod config;
pub mod control;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod location;
pub mod permission;
pub mod reporter;
pub mod sampler;
pub mod scheduler;
pub mod status;
pub mod tracker;

use chrono::{DateTime, SecondsFormat, Utc};

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use geo::{distance, Coordinate, REFERENCE_POINT};
pub use lifecycle::{LifecycleState, LifecycleTracker};
pub use permission::PermissionState;
pub use sampler::{DistanceReport, PositionSampler};
pub use scheduler::{Scheduler, SchedulerState};
pub use tracker::DistanceTracker;

/// ISO-8601 UTC timestamp with millisecond precision, e.g. `2024-05-01T10:00:00.000Z`
pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
