//! Geographic math: Haversine distance and constant-speed travel estimates.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average speed assumption for travel-time estimates, in km/h.
pub const AVERAGE_SPEED_KMH: f64 = 50.0;

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Great-circle distance between two locations via the Haversine formula.
///
/// Returns 0 for identical coordinates. Fails with `InvalidInput` if any
/// coordinate is not a finite number.
pub fn distance_km(a: Location, b: Location) -> DispatchResult<f64> {
    if !a.is_finite() || !b.is_finite() {
        return Err(DispatchError::InvalidInput(
            "coordinates must be finite numbers".to_string(),
        ));
    }
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    Ok(EARTH_RADIUS_KM * c)
}

/// Estimated travel time in hours at [`AVERAGE_SPEED_KMH`].
///
/// Returns 0 for zero distance. Fails with `InvalidInput` for negative or
/// non-finite distances.
pub fn estimate_travel_time_hours(distance_km: f64) -> DispatchResult<f64> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(DispatchError::InvalidInput(
            "distance must be a non-negative number".to_string(),
        ));
    }
    Ok(distance_km / AVERAGE_SPEED_KMH)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let berlin = Location::new(52.52, 13.405);
        assert_eq!(distance_km(berlin, berlin).expect("distance"), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Location::new(52.52, 13.405);
        let b = Location::new(48.137, 11.575);
        let ab = distance_km(a, b).expect("a->b");
        let ba = distance_km(b, a).expect("b->a");
        assert_relative_eq!(ab, ba, max_relative = 1e-12);
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let d = distance_km(Location::new(0.0, 0.0), Location::new(0.0, 1.0)).expect("distance");
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let ok = Location::new(0.0, 0.0);
        for bad in [
            Location::new(f64::NAN, 0.0),
            Location::new(0.0, f64::INFINITY),
            Location::new(f64::NEG_INFINITY, 0.0),
        ] {
            assert!(matches!(
                distance_km(ok, bad),
                Err(DispatchError::InvalidInput(_))
            ));
            assert!(matches!(
                distance_km(bad, ok),
                Err(DispatchError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn travel_time_uses_average_speed() {
        assert_eq!(estimate_travel_time_hours(100.0).expect("eta"), 2.0);
        assert_eq!(estimate_travel_time_hours(0.0).expect("eta"), 0.0);
    }

    #[test]
    fn negative_distance_is_rejected() {
        assert!(matches!(
            estimate_travel_time_hours(-1.0),
            Err(DispatchError::InvalidInput(_))
        ));
        assert!(matches!(
            estimate_travel_time_hours(f64::NAN),
            Err(DispatchError::InvalidInput(_))
        ));
    }
}
