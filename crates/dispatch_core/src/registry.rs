//! In-memory driver index: availability, location, and nearest-driver queries.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};
use crate::geo::Location;
use crate::matching::{MatchResult, NearestDriver, SelectionPolicy};
use crate::ride::RideId;

/// Driver identifier, assigned by the excluded account layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub String);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DriverId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A registered driver's dispatch-relevant state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub location: Location,
    pub available: bool,
    /// The ride this driver is currently serving, if any.
    pub active_ride: Option<RideId>,
}

impl Driver {
    /// Eligible for matching: available and not serving a ride.
    pub fn is_matchable(&self) -> bool {
        self.available && self.active_ride.is_none()
    }
}

/// Concurrent-safe index of drivers by id.
///
/// One registry-wide lock serializes mutation; a matching pass's
/// find-and-claim runs under a single write-lock acquisition so two
/// concurrent passes can never select the same driver.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DriverId, Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a location ping, creating the driver if unknown.
    ///
    /// Late-arriving pings from drivers the registry has not seen yet are
    /// tolerated: the record is auto-created, but starts unavailable until
    /// an explicit [`set_availability`](Self::set_availability).
    pub fn upsert_location(
        &self,
        driver_id: DriverId,
        location: Location,
    ) -> DispatchResult<Driver> {
        if !location.is_finite() {
            return Err(DispatchError::InvalidInput(
                "driver location must be finite coordinates".to_string(),
            ));
        }
        let mut drivers = self.drivers.write();
        let driver = drivers
            .entry(driver_id.clone())
            .and_modify(|d| d.location = location)
            .or_insert_with(|| {
                debug!(driver_id = %driver_id, "auto-registering driver from location ping");
                Driver {
                    id: driver_id.clone(),
                    location,
                    available: false,
                    active_ride: None,
                }
            });
        Ok(driver.clone())
    }

    /// Toggle a driver's availability.
    ///
    /// Fails with `NotFound` for unknown drivers. Turning a driver with an
    /// active ride unavailable is permitted and does not touch the ride.
    pub fn set_availability(
        &self,
        driver_id: &DriverId,
        available: bool,
    ) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write();
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
        driver.available = available;
        info!(driver_id = %driver_id, available, "driver availability updated");
        Ok(driver.clone())
    }

    pub fn get(&self, driver_id: &DriverId) -> Option<Driver> {
        self.drivers.read().get(driver_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }

    fn matchable_candidates(
        drivers: &HashMap<DriverId, Driver>,
        exclude: &HashSet<DriverId>,
    ) -> Vec<Driver> {
        drivers
            .values()
            .filter(|d| d.is_matchable() && !exclude.contains(&d.id))
            .cloned()
            .collect()
    }

    /// Nearest matchable driver to `origin`, skipping the exclusion set.
    ///
    /// Linear scan over all drivers; adequate at this scale, and the
    /// selection policy rather than asymptotics is the property that
    /// matters here. A spatial index is a deliberate non-goal.
    pub fn find_nearest_available(
        &self,
        origin: Location,
        exclude: &HashSet<DriverId>,
    ) -> DispatchResult<Option<MatchResult>> {
        if !origin.is_finite() {
            return Err(DispatchError::InvalidInput(
                "origin must be finite coordinates".to_string(),
            ));
        }
        let drivers = self.drivers.read();
        let candidates = Self::matchable_candidates(&drivers, exclude);
        NearestDriver.select(origin, &candidates)
    }

    /// Atomic find-and-claim half of a matching pass.
    ///
    /// Selects a candidate via `policy` and marks it as serving `ride_id`
    /// under one write-lock acquisition, so concurrent passes and
    /// availability toggles cannot double-assign the driver.
    pub fn claim_nearest_available(
        &self,
        origin: Location,
        exclude: &HashSet<DriverId>,
        ride_id: RideId,
        policy: &dyn SelectionPolicy,
    ) -> DispatchResult<Option<MatchResult>> {
        if !origin.is_finite() {
            return Err(DispatchError::InvalidInput(
                "origin must be finite coordinates".to_string(),
            ));
        }
        let mut drivers = self.drivers.write();
        let candidates = Self::matchable_candidates(&drivers, exclude);
        let Some(mut result) = policy.select(origin, &candidates)? else {
            return Ok(None);
        };
        let driver = drivers
            .get_mut(&result.driver.id)
            .ok_or_else(|| DispatchError::driver_not_found(&result.driver.id))?;
        driver.active_ride = Some(ride_id);
        result.driver = driver.clone();
        Ok(Some(result))
    }

    /// Clear a driver's active-ride slot, only if it still holds `ride_id`.
    pub fn release_active_ride(&self, driver_id: &DriverId, ride_id: RideId) {
        let mut drivers = self.drivers.write();
        if let Some(driver) = drivers.get_mut(driver_id) {
            if driver.active_ride == Some(ride_id) {
                driver.active_ride = None;
                debug!(driver_id = %driver_id, ride_id = %ride_id, "driver released");
            }
        }
    }
}
