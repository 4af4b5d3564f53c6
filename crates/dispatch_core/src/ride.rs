//! Ride lifecycle: status state machine and the board owning all ride records.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::Location;
use crate::registry::DriverId;

/// Rider identifier, assigned by the excluded account layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub String);

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RiderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ride identifier, allocated by the board on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub Uuid);

impl RideId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RideId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ride lifecycle status.
///
/// Legal transitions:
/// `Requested -> Matched -> Ongoing -> Completed`, with `Cancelled`
/// reachable from `Requested` and `Matched`. `Completed` and `Cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matched,
    Ongoing,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Whether `self -> to` is in the legal transition table.
    pub fn can_transition(self, to: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, to),
            (Requested, Matched)
                | (Matched, Ongoing)
                | (Ongoing, Completed)
                | (Requested, Cancelled)
                | (Matched, Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Matched => "MATCHED",
            RideStatus::Ongoing => "ONGOING",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// A single trip record, from request to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub rider_id: RiderId,
    pub pickup: Location,
    pub destination: Location,
    pub status: RideStatus,
    /// Assigned driver; set when the ride reaches `Matched`.
    pub driver_id: Option<DriverId>,
    pub requested_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ride {
    /// Minutes between trip start and completion, when both are recorded.
    pub fn trip_duration_minutes(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 60_000.0)
    }
}

/// Context attached to a transition, currently only the driver assignment
/// committed by a `Matched` transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionCtx {
    pub assigned_driver: Option<DriverId>,
}

impl TransitionCtx {
    pub fn assign(driver_id: DriverId) -> Self {
        Self {
            assigned_driver: Some(driver_id),
        }
    }
}

/// Owner of all ride records for the lifetime of the process.
///
/// Transitions on a single ride are serialized by the board's write lock;
/// transitions targeting an already-terminal ride are idempotent no-ops so
/// duplicate delivery from upstream retries stays harmless.
#[derive(Debug, Default)]
pub struct RideBoard {
    rides: RwLock<HashMap<RideId, Ride>>,
}

impl RideBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new ride in `Requested` state.
    pub fn create(
        &self,
        rider_id: RiderId,
        pickup: Location,
        destination: Location,
    ) -> DispatchResult<Ride> {
        if !pickup.is_finite() || !destination.is_finite() {
            return Err(DispatchError::InvalidInput(
                "pickup and destination must be finite coordinates".to_string(),
            ));
        }
        let ride = Ride {
            id: RideId::new(),
            rider_id,
            pickup,
            destination,
            status: RideStatus::Requested,
            driver_id: None,
            requested_at: Utc::now(),
            matched_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        info!(ride_id = %ride.id, rider_id = %ride.rider_id, "ride requested");
        self.rides.write().insert(ride.id, ride.clone());
        Ok(ride)
    }

    /// Apply a transition, reporting whether it changed the ride.
    ///
    /// Returns `(ride, false)` untouched when the current state is terminal.
    pub(crate) fn apply_transition(
        &self,
        ride_id: RideId,
        target: RideStatus,
        ctx: TransitionCtx,
    ) -> DispatchResult<(Ride, bool)> {
        let mut rides = self.rides.write();
        let ride = rides
            .get_mut(&ride_id)
            .ok_or_else(|| DispatchError::ride_not_found(ride_id))?;

        if ride.status.is_terminal() {
            debug!(ride_id = %ride_id, status = %ride.status, target = %target,
                "transition on terminal ride ignored");
            return Ok((ride.clone(), false));
        }
        if !ride.status.can_transition(target) {
            return Err(DispatchError::IllegalTransition {
                from: ride.status,
                to: target,
            });
        }

        let now = Utc::now();
        ride.status = target;
        match target {
            RideStatus::Matched => {
                ride.driver_id = ctx.assigned_driver;
                ride.matched_at = Some(now);
            }
            RideStatus::Ongoing => ride.started_at = Some(now),
            RideStatus::Completed => ride.completed_at = Some(now),
            RideStatus::Cancelled => ride.cancelled_at = Some(now),
            RideStatus::Requested => {}
        }
        info!(ride_id = %ride_id, status = %ride.status, "ride transitioned");
        Ok((ride.clone(), true))
    }

    /// Transition a ride to `target`.
    ///
    /// Fails with `NotFound` for unknown rides and `IllegalTransition` for
    /// pairs outside the legal table. A ride already in a terminal state is
    /// returned unchanged.
    pub fn transition(
        &self,
        ride_id: RideId,
        target: RideStatus,
        ctx: TransitionCtx,
    ) -> DispatchResult<Ride> {
        self.apply_transition(ride_id, target, ctx)
            .map(|(ride, _)| ride)
    }

    pub fn get(&self, ride_id: RideId) -> Option<Ride> {
        self.rides.read().get(&ride_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rides.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.read().is_empty()
    }
}
