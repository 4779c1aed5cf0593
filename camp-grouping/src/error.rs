//! Error types for the grouping engine
//!
//! Infeasible placements are not errors; they are recorded as constraint
//! violations and the run still succeeds. Everything here means the
//! requested operation did not happen.

use thiserror::Error;
use uuid::Uuid;

/// Result type for grouping engine operations
pub type Result<T> = std::result::Result<T, GroupingError>;

#[derive(Debug, Error)]
pub enum GroupingError {
    /// Camp has zero confirmed registrations
    #[error("Camp {camp_id} has no confirmed campers")]
    NoCampers { camp_id: Uuid },

    /// Camp constraint configuration is unusable
    #[error("Invalid grouping constraints: {0}")]
    InvalidConstraints(String),

    /// Age and grade cannot be computed for this registration
    #[error("Athlete {athlete_id} (registration {registration_id}) has no valid date of birth")]
    MissingDateOfBirth {
        athlete_id: Uuid,
        registration_id: Uuid,
    },

    /// Another grouping run for the same camp is in flight
    #[error("A grouping run is already in progress for camp {camp_id}")]
    RunInProgress { camp_id: Uuid },

    #[error("Camper {camper_id} is not an active camper of this camp")]
    CamperNotInCamp { camper_id: Uuid },

    #[error("Group {group_id} is not an active group of camp {camp_id}")]
    GroupNotInCamp { group_id: Uuid, camp_id: Uuid },

    #[error("Camp not found: {0}")]
    CampNotFound(Uuid),

    #[error("Violation not found: {0}")]
    ViolationNotFound(Uuid),

    #[error("Violation {0} is already resolved")]
    ViolationAlreadyResolved(Uuid),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Database operation error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// camp-common error
    #[error(transparent)]
    Common(#[from] camp_common::Error),
}

impl GroupingError {
    /// Errors raised after the camp was found leave a failed run record
    /// behind (best effort for database errors); the rest leave nothing
    pub fn is_recorded_as_failed_run(&self) -> bool {
        matches!(
            self,
            GroupingError::InvalidConstraints(_)
                | GroupingError::MissingDateOfBirth { .. }
                | GroupingError::Database(_)
        )
    }
}
