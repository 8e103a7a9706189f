use crate::background::{BackgroundTaskConfig, MINIMUM_FETCH_INTERVAL_MINUTES};
use crate::error::{TrackerError, TrackerResult};
use crate::geo::{Coordinate, REFERENCE_POINT};
use crate::location::PositionOptions;
use crate::permission::PolicyPermissions;
use crate::reporter::DEFAULT_COLLECTOR_URL;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where position fixes come from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// Termux:API `termux-location`
    Termux,
    /// Deterministic drifting fix around the reference point
    Simulated,
}

/// How the permission capability answers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    Granted,
    Denied,
    /// Undetermined until the first request, which is approved
    Prompt,
}

impl PermissionPolicy {
    pub fn provider(self) -> PolicyPermissions {
        match self {
            PermissionPolicy::Granted => PolicyPermissions::granted(),
            PermissionPolicy::Denied => PolicyPermissions::denied(),
            PermissionPolicy::Prompt => PolicyPermissions::prompt(),
        }
    }
}

/// Runtime configuration, fixed for the life of the process
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub collector_url: String,
    pub reference: Coordinate,
    /// Foreground timer period
    pub interval_ms: u64,
    pub background: BackgroundTaskConfig,
    pub position: PositionOptions,
    pub location_source: LocationSource,
    pub permission: PermissionPolicy,
    pub status_file: Option<PathBuf>,
    pub control_port: Option<u16>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            reference: REFERENCE_POINT,
            interval_ms: 10_000,
            background: BackgroundTaskConfig::default(),
            position: PositionOptions::default(),
            location_source: LocationSource::Termux,
            permission: PermissionPolicy::Prompt,
            status_file: None,
            control_port: None,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        Coordinate::new(self.reference.latitude, self.reference.longitude)?;

        if !(self.collector_url.starts_with("http://") || self.collector_url.starts_with("https://")) {
            return Err(TrackerError::Config(format!(
                "collector URL must be http(s): {}",
                self.collector_url
            )));
        }
        if self.interval_ms == 0 {
            return Err(TrackerError::Config("interval must be non-zero".to_string()));
        }
        if self.position.timeout_ms == 0 {
            return Err(TrackerError::Config("position timeout must be non-zero".to_string()));
        }
        if self.background.minimum_interval_minutes < MINIMUM_FETCH_INTERVAL_MINUTES {
            return Err(TrackerError::Config(format!(
                "background interval must be at least {} minutes",
                MINIMUM_FETCH_INTERVAL_MINUTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval_ms, 10_000);
        assert_eq!(config.position.timeout_ms, 15_000);
        assert_eq!(config.position.maximum_age_ms, 10_000);
        assert!(config.position.enable_high_accuracy);
        assert_eq!(config.background.minimum_interval_minutes, 15);
        assert!(!config.background.stop_on_terminate);
        assert!(config.collector_url.ends_with("/locationdb.php"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_url = TrackerConfig {
            collector_url: "ftp://example.com".to_string(),
            ..TrackerConfig::default()
        };
        assert!(matches!(bad_url.validate(), Err(TrackerError::Config(_))));

        let bad_reference = TrackerConfig {
            reference: Coordinate {
                latitude: 123.0,
                longitude: 0.0,
            },
            ..TrackerConfig::default()
        };
        assert!(matches!(
            bad_reference.validate(),
            Err(TrackerError::InvalidCoordinate { .. })
        ));

        let mut short_background = TrackerConfig::default();
        short_background.background.minimum_interval_minutes = 1;
        assert!(short_background.validate().is_err());
    }
}
