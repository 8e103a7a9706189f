use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the spherical haversine model (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Point every distance is measured against
pub const REFERENCE_POINT: Coordinate = Coordinate {
    latitude: -33.84418410668397,
    longitude: 150.93719605234367,
};

/// WGS84 position in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting values outside [-90, 90] / [-180, 180]
    pub fn new(latitude: f64, longitude: f64) -> TrackerResult<Self> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !lat_ok || !lon_ok {
            return Err(TrackerError::InvalidCoordinate {
                lat: latitude,
                lon: longitude,
            });
        }
        Ok(Coordinate {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance(*self, *other)
    }
}

/// Haversine great-circle distance in meters on a sphere of radius `EARTH_RADIUS_M`.
///
/// Total over valid coordinates: non-negative, symmetric, and exactly zero for
/// identical inputs.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}
