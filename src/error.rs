use thiserror::Error;

/// Distance tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Position fix timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("Background task error: {0}")]
    BackgroundTask(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
