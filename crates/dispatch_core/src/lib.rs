pub mod broadcast;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matching;
pub mod pricing;
pub mod registry;
pub mod ride;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use broadcast::{BroadcastEvent, EventBroadcaster, Subscription, Topic};
pub use engine::MatchingEngine;
pub use error::{DispatchError, DispatchResult};
pub use geo::Location;
pub use pricing::FareQuote;
pub use registry::{Driver, DriverId, DriverRegistry};
pub use ride::{Ride, RideBoard, RideId, RideStatus, RiderId};
