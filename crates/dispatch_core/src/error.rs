use thiserror::Error;

use crate::ride::RideStatus;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors reported synchronously by dispatch operations.
///
/// A matching pass that finds no eligible driver is not an error: the ride
/// simply stays in `Requested` and the caller decides retry policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("illegal ride transition from {from} to {to}")]
    IllegalTransition { from: RideStatus, to: RideStatus },
}

impl DispatchError {
    pub fn driver_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "driver",
            id: id.to_string(),
        }
    }

    pub fn ride_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "ride",
            id: id.to_string(),
        }
    }
}
