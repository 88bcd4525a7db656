//! Error taxonomy surfaced to callers of the engine.
//!
//! Every variant except [`CreditsError::Store`] and
//! [`CreditsError::UnexpectedOutput`] is a caller-recoverable rejection: the
//! command was refused and no state changed.

use crate::types::Credits;
use studio_credits_runtime::StoreError;
use thiserror::Error;

/// Errors returned by engine commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditsError {
    /// Zero amount, or an amount whose sign contradicts the transaction type
    #[error("Invalid credit amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: Credits,
    },

    /// Balance does not cover the price of the booking
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        /// Credits the booking costs
        required: Credits,
        /// Credits currently available to the user
        available: Credits,
    },

    /// Every seat is taken
    #[error("Class is full (capacity {capacity})")]
    ClassFull {
        /// Seat capacity of the class instance
        capacity: u32,
    },

    /// Per-user ceiling of active bookings reached
    #[error("Maximum of {limit} active bookings reached")]
    MaxActiveBookingsExceeded {
        /// Configured ceiling
        limit: usize,
    },

    /// Transition not permitted from the current status
    #[error("Cannot transition from {current} to {attempted}")]
    InvalidStatusTransition {
        /// Status the entity is in
        current: String,
        /// Status the command tried to reach
        attempted: String,
    },

    /// Actor does not own the booking or class being mutated
    #[error("Not authorized to modify this {entity}")]
    Unauthorized {
        /// Kind of entity the actor tried to mutate
        entity: &'static str,
    },

    /// Referenced entity does not exist (or is soft-deleted)
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Class exists but cannot accept bookings
    #[error("Class cannot be booked: {reason}")]
    ClassNotBookable {
        /// Why the class is closed
        reason: String,
    },

    /// Attendance was confirmed before the class started
    #[error("Class has not started yet")]
    ClassNotStarted,

    /// Discount rule cannot be evaluated
    #[error("Invalid discount rule '{rule}': {reason}")]
    InvalidDiscountRule {
        /// Rule name
        rule: String,
        /// What is wrong with it
        reason: String,
    },

    /// The store refused the command (shutdown)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reducer answered a command with an output of the wrong shape
    #[error("Unexpected reducer output: {0}")]
    UnexpectedOutput(String),

    /// State snapshot could not be (de)serialized
    #[error("Snapshot serialization failed: {0}")]
    Snapshot(String),
}

impl CreditsError {
    /// Shorthand for [`CreditsError::NotFound`]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`CreditsError::InvalidStatusTransition`]
    pub fn transition(current: impl std::fmt::Display, attempted: impl std::fmt::Display) -> Self {
        Self::InvalidStatusTransition {
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }

    /// Stable label for metrics and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::ClassFull { .. } => "class_full",
            Self::MaxActiveBookingsExceeded { .. } => "max_active_bookings_exceeded",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::ClassNotBookable { .. } => "class_not_bookable",
            Self::ClassNotStarted => "class_not_started",
            Self::InvalidDiscountRule { .. } => "invalid_discount_rule",
            Self::Store(_) => "store",
            Self::UnexpectedOutput(_) => "unexpected_output",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

/// Convenience alias used across the engine
pub type Result<T, E = CreditsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_active_bookings_message_states_limit() {
        let err = CreditsError::MaxActiveBookingsExceeded { limit: 10 };
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn transition_message_names_current_status() {
        let err = CreditsError::transition("completed", "cancelled_by_consumer");
        assert_eq!(
            err.to_string(),
            "Cannot transition from completed to cancelled_by_consumer"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: CreditsError = StoreError::ShutdownInProgress.into();
        assert_eq!(err.kind(), "store");
        assert_eq!(err.to_string(), "Store is shutting down");
    }
}
