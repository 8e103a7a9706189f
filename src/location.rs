use crate::error::{TrackerError, TrackerResult};
use crate::geo::Coordinate;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;

/// Options passed with every position request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionOptions {
    /// Prefer GPS over coarse network positioning
    pub enable_high_accuracy: bool,
    /// Give up if no fix arrives within this window
    pub timeout_ms: u64,
    /// Accept a cached fix no older than this
    pub maximum_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        PositionOptions {
            enable_high_accuracy: true,
            timeout_ms: 15_000,
            maximum_age_ms: 10_000,
        }
    }
}

/// One position reported by the location service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub captured_at: DateTime<Utc>,
    /// Horizontal accuracy radius in meters, when the provider reports one
    pub accuracy: Option<f64>,
}

/// Platform location capability: one fix per call
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, options: &PositionOptions) -> TrackerResult<PositionFix>;
}

/// Raw `termux-location` JSON output
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermuxReading {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub provider: Option<String>,
    /// Age of the fix in milliseconds
    pub elapsed_ms: Option<u64>,
    #[serde(rename = "API_ERROR")]
    pub api_error: Option<String>,
}

impl TermuxReading {
    pub fn into_fix(self, now: DateTime<Utc>) -> TrackerResult<PositionFix> {
        if let Some(err) = self.api_error {
            return Err(TrackerError::PositionUnavailable(err));
        }
        let (lat, lon) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(TrackerError::PositionUnavailable(
                    "no coordinates in location output".to_string(),
                ))
            }
        };
        let coordinate = Coordinate::new(lat, lon)
            .map_err(|e| TrackerError::PositionUnavailable(e.to_string()))?;
        let age = ChronoDuration::milliseconds(self.elapsed_ms.unwrap_or(0) as i64);

        Ok(PositionFix {
            coordinate,
            captured_at: now - age,
            accuracy: self.accuracy,
        })
    }
}

pub fn parse_termux_location(output: &str) -> TrackerResult<TermuxReading> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::PositionUnavailable(
            "empty location output".to_string(),
        ));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| TrackerError::PositionUnavailable(format!("Parse error: {}", e)))
}

/// Location provider backed by Termux:API (`termux-location`).
///
/// High accuracy selects the `gps` provider, otherwise `network`. A non-zero
/// maximum age first asks for the last known fix and only falls back to a
/// fresh request when that fix is missing or too old.
pub struct TermuxLocationProvider {
    command: String,
}

impl TermuxLocationProvider {
    pub fn new() -> Self {
        Self::with_command("termux-location")
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        TermuxLocationProvider {
            command: command.into(),
        }
    }

    async fn query(&self, provider: &str, request: &str) -> TrackerResult<TermuxReading> {
        let output = Command::new(&self.command)
            .arg("-p")
            .arg(provider)
            .arg("-r")
            .arg(request)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TrackerError::PositionUnavailable(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrackerError::PositionUnavailable(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        parse_termux_location(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for TermuxLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationProvider for TermuxLocationProvider {
    async fn current_position(&self, options: &PositionOptions) -> TrackerResult<PositionFix> {
        let provider = if options.enable_high_accuracy {
            "gps"
        } else {
            "network"
        };

        if options.maximum_age_ms > 0 {
            if let Ok(cached) = self.query(provider, "last").await {
                let fresh = cached
                    .elapsed_ms
                    .map(|age| age <= options.maximum_age_ms)
                    .unwrap_or(false);
                if fresh {
                    if let Ok(fix) = cached.into_fix(Utc::now()) {
                        return Ok(fix);
                    }
                }
            }
        }

        self.query(provider, "once").await?.into_fix(Utc::now())
    }
}

/// Deterministic drifting fix for demos and hosts without a location service
pub struct SimulatedLocationProvider {
    origin: Coordinate,
    step_deg: f64,
    counter: AtomicU64,
}

impl SimulatedLocationProvider {
    pub fn new(origin: Coordinate) -> Self {
        SimulatedLocationProvider {
            origin,
            step_deg: 0.00001,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn current_position(&self, options: &PositionOptions) -> TrackerResult<PositionFix> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) as f64;
        let coordinate = Coordinate::new(
            (self.origin.latitude + seq * self.step_deg).clamp(-90.0, 90.0),
            (self.origin.longitude + seq * self.step_deg).clamp(-180.0, 180.0),
        )?;
        let accuracy = if options.enable_high_accuracy {
            5.0 + (seq * 0.1).sin() * 2.0
        } else {
            50.0
        };

        Ok(PositionFix {
            coordinate,
            captured_at: Utc::now(),
            accuracy: Some(accuracy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_termux_output() {
        let output = r#"{
  "latitude": -33.86785,
  "longitude": 151.20732,
  "altitude": 42.0,
  "accuracy": 12.5,
  "vertical_accuracy": 3.0,
  "bearing": 0.0,
  "speed": 0.0,
  "elapsedMs": 1500,
  "provider": "gps"
}"#;
        let reading = parse_termux_location(output).unwrap();
        assert_eq!(reading.provider.as_deref(), Some("gps"));
        assert_eq!(reading.elapsed_ms, Some(1500));

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let fix = reading.into_fix(now).unwrap();
        assert_eq!(fix.coordinate.latitude, -33.86785);
        assert_eq!(fix.accuracy, Some(12.5));
        assert_eq!(now - fix.captured_at, ChronoDuration::milliseconds(1500));
    }

    #[test]
    fn test_api_error_is_unavailable() {
        let reading = parse_termux_location(r#"{"API_ERROR": "Location service disabled"}"#).unwrap();
        let err = reading.into_fix(Utc::now()).unwrap_err();
        assert_eq!(
            err,
            TrackerError::PositionUnavailable("Location service disabled".to_string())
        );
    }

    #[test]
    fn test_empty_and_garbage_output() {
        assert!(parse_termux_location("").is_err());
        assert!(parse_termux_location("not json").is_err());
        let reading = parse_termux_location("{}").unwrap();
        assert!(reading.into_fix(Utc::now()).is_err());
    }

    #[test]
    fn test_out_of_range_fix_rejected() {
        let reading = parse_termux_location(r#"{"latitude": 95.0, "longitude": 10.0}"#).unwrap();
        assert!(matches!(
            reading.into_fix(Utc::now()),
            Err(TrackerError::PositionUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let provider = TermuxLocationProvider::with_command("definitely-not-a-location-binary");
        let options = PositionOptions {
            maximum_age_ms: 0,
            ..PositionOptions::default()
        };
        let err = provider.current_position(&options).await.unwrap_err();
        assert!(matches!(err, TrackerError::PositionUnavailable(_)));
    }

    #[tokio::test]
    async fn test_simulated_provider_drifts() {
        let origin = Coordinate::new(-33.86785, 151.20732).unwrap();
        let provider = SimulatedLocationProvider::new(origin);
        let options = PositionOptions::default();

        let first = provider.current_position(&options).await.unwrap();
        let second = provider.current_position(&options).await.unwrap();
        assert_eq!(first.coordinate, origin);
        assert!(second.coordinate.latitude > first.coordinate.latitude);
    }
}
