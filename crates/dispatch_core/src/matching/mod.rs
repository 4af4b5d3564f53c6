pub mod policy;

pub use policy::{MatchResult, NearestDriver, SelectionPolicy};
