//! Error taxonomy.
//!
//! [`StoreError`] is what storage backends return. [`EngineError`] is what
//! callers of the booking and staff operations see. Conflicts are ordinary
//! control flow and are never reported as server faults.

use crate::types::SeatId;
use thiserror::Error;

/// Errors returned by a [`crate::store::SeatStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A compare-and-swap failed or a seat was not claimable.
    #[error("conflict: {detail}")]
    Conflict {
        /// Seats involved, when the conflict is about seats
        seats: Vec<SeatId>,
        /// What changed under the caller
        detail: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The mutation is malformed or violates a schema rule.
    #[error("invalid mutation: {0}")]
    Invalid(String),

    /// Storage could not be reached; nothing was committed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored data contradicts an invariant.
    #[error("integrity fault: {0}")]
    Integrity(String),
}

impl StoreError {
    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Conflict on a set of seats.
    pub fn seat_conflict(seats: Vec<SeatId>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            seats,
            detail: detail.into(),
        }
    }

    /// Conflict not tied to particular seats (table versions, live bookings).
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            seats: Vec::new(),
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the booking transaction, staff console and synchronizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed request; rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lost the race for one or more seats; refresh and choose again.
    #[error("seat conflict: {detail}")]
    SeatConflict {
        /// Seats that could not be claimed
        seats: Vec<SeatId>,
        /// What was in the way
        detail: String,
    },

    /// No valid session.
    #[error("authentication required")]
    AuthRequired,

    /// Session lacks the role for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Storage or transport failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Change-feed subscription dropped; recovered by re-pulling a snapshot.
    #[error("subscription lost: {0}")]
    SubscriptionLost(String),

    /// Stored data contradicts an invariant. Reported, never repaired.
    #[error("integrity fault: {0}")]
    IntegrityFault(String),
}

impl EngineError {
    /// Transient failures that may be retried at the transaction boundary.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether another writer won a race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::SeatConflict { .. })
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SeatConflict { .. } => "SEAT_CONFLICT",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::SubscriptionLost(_) => "SUBSCRIPTION_LOST",
            Self::IntegrityFault(_) => "INTEGRITY_FAULT",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { seats, detail } => Self::SeatConflict { seats, detail },
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Invalid(msg) => Self::Validation(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Integrity(msg) => Self::IntegrityFault(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let seat = SeatId::new();
        let err: EngineError = StoreError::seat_conflict(vec![seat], "taken").into();
        assert!(err.is_conflict());
        assert_eq!(err.code(), "SEAT_CONFLICT");

        let err: EngineError = StoreError::Unavailable("pool timed out".into()).into();
        assert!(err.is_transient());

        let err: EngineError = StoreError::Invalid("bad".into()).into();
        assert_eq!(err, EngineError::Validation("bad".into()));
    }

    #[test]
    fn only_unavailability_is_transient() {
        assert!(!EngineError::AuthRequired.is_transient());
        assert!(!EngineError::IntegrityFault("x".into()).is_transient());
        assert!(
            !EngineError::SeatConflict {
                seats: vec![],
                detail: String::new()
            }
            .is_transient()
        );
    }
}
