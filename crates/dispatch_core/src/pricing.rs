//! Simple pricing: distance + duration fare for completed rides.

use serde::{Deserialize, Serialize};

use crate::registry::DriverId;
use crate::ride::{RideId, RiderId};

/// Base fare in currency units.
pub const BASE_FARE: f64 = 5.0;

/// Per-kilometer rate in currency units.
pub const PER_KM_RATE: f64 = 2.0;

/// Per-minute rate in currency units.
pub const PER_MINUTE_RATE: f64 = 0.5;

/// Calculate the fare for a trip.
///
/// Formula: `fare = BASE_FARE + PER_KM_RATE * distance_km + PER_MINUTE_RATE * duration_minutes`
///
/// Inputs are not validated: negative distance or duration flow straight
/// through the formula and can produce a negative fare. Callers that cannot
/// accept that must validate upstream.
pub fn calculate_fare(distance_km: f64, duration_minutes: f64) -> f64 {
    BASE_FARE + PER_KM_RATE * distance_km + PER_MINUTE_RATE * duration_minutes
}

/// Quote handed to the payment collaborator when a ride completes.
///
/// The payment module charges the rider and credits the driver from this,
/// applying its own service-fee split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub ride_id: RideId,
    pub rider_id: RiderId,
    pub driver_id: DriverId,
    pub amount: f64,
}
