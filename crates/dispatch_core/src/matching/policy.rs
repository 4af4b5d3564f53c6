use std::cmp::Ordering;

use crate::error::DispatchResult;
use crate::geo::{self, Location};
use crate::registry::Driver;

/// Result of one matching pass: the selected driver plus the pickup
/// distance and travel-time estimate that drove the selection. Transient,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub driver: Driver,
    pub distance_km: f64,
    pub eta_hours: f64,
}

/// Trait for driver selection policies.
///
/// A policy ranks the eligible candidates for one pickup location and
/// returns the winner, or `None` when no candidate qualifies. Candidates
/// handed to the policy are already filtered for availability; the policy
/// only decides which of them wins.
pub trait SelectionPolicy: Send + Sync {
    fn select(
        &self,
        origin: Location,
        candidates: &[Driver],
    ) -> DispatchResult<Option<MatchResult>>;
}

/// Baseline policy: minimum Haversine distance wins, ties broken by lowest
/// driver id so selection is deterministic.
///
/// Deliberately ignores rating, vehicle type, and surge; those belong in
/// alternative `SelectionPolicy` implementations.
#[derive(Debug, Default)]
pub struct NearestDriver;

impl SelectionPolicy for NearestDriver {
    fn select(
        &self,
        origin: Location,
        candidates: &[Driver],
    ) -> DispatchResult<Option<MatchResult>> {
        let mut best: Option<(f64, &Driver)> = None;
        for driver in candidates {
            let distance = geo::distance_km(origin, driver.location)?;
            let closer = match &best {
                None => true,
                Some((best_distance, best_driver)) => {
                    distance
                        .partial_cmp(best_distance)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| driver.id.cmp(&best_driver.id))
                        == Ordering::Less
                }
            };
            if closer {
                best = Some((distance, driver));
            }
        }
        match best {
            None => Ok(None),
            Some((distance_km, driver)) => Ok(Some(MatchResult {
                driver: driver.clone(),
                distance_km,
                eta_hours: geo::estimate_travel_time_hours(distance_km)?,
            })),
        }
    }
}
