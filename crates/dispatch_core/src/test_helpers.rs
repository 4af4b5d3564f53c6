//! Test helpers for common setup and coordinates.
//!
//! Shared across module tests to keep fixtures consistent.

use crate::geo::{Location, EARTH_RADIUS_KM};

/// Kilometers per degree of latitude on the great circle.
const KM_PER_LAT_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// A standard pickup point used across test files (central Berlin).
pub fn test_pickup() -> Location {
    Location::new(52.52, 13.405)
}

/// A destination a few kilometers from [`test_pickup`].
pub fn test_destination() -> Location {
    location_km_north(test_pickup(), 4.0)
}

/// A point exactly `km` kilometers due north of `origin`.
///
/// Moving along a meridian keeps the Haversine distance an exact function
/// of the latitude delta, which makes distance assertions precise.
pub fn location_km_north(origin: Location, km: f64) -> Location {
    Location::new(origin.lat + km / KM_PER_LAT_DEGREE, origin.lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_km;

    #[test]
    fn km_north_moves_the_requested_distance() {
        let origin = test_pickup();
        let moved = location_km_north(origin, 3.0);
        let d = distance_km(origin, moved).expect("distance");
        assert!((d - 3.0).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn destination_differs_from_pickup() {
        assert_ne!(test_pickup(), test_destination());
    }
}
