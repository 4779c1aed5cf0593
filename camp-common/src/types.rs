//! Tagged status types shared across campers, groups, runs and violations
//!
//! Every enum here is stored in SQLite as its `as_str()` form and serialized
//! with the same lower snake case names, so the database, the JSON output
//! and the code agree on a single spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Database / wire representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(Error::Internal(format!(
                        "Unknown {} value: '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// How a camper ended up in their group
    pub enum AssignmentType {
        /// Placed by the allocator; recomputed on every re-run
        Auto => "auto",
        /// Moved by a human; pinned across re-runs
        Manual => "manual",
        /// Locked in place by a human without moving; pinned across re-runs
        Override => "override",
    }
}

impl AssignmentType {
    /// Pinned assignments survive re-runs unchanged
    pub fn is_pinned(&self) -> bool {
        matches!(self, AssignmentType::Manual | AssignmentType::Override)
    }
}

string_enum! {
    /// Kind of allocator execution
    pub enum RunType {
        /// First run for a camp
        Initial => "initial",
        /// Full recomputation of every auto-assigned camper
        Rerun => "rerun",
        /// Only unplaced campers are allocated; every placed camper stays put
        Incremental => "incremental",
    }
}

string_enum! {
    /// Lifecycle of one grouping run record
    pub enum GroupingStatus {
        /// Run completed and its results are persisted
        Completed => "completed",
        /// Run was rejected by input validation; nothing else was written
        Failed => "failed",
    }
}

string_enum! {
    /// What a constraint violation is about
    pub enum ViolationKind {
        SizeExceeded => "size_exceeded",
        GradeSpreadExceeded => "grade_spread_exceeded",
        FriendGroupSplit => "friend_group_split",
        FriendGroupTooLarge => "friend_group_too_large",
        ImpossiblePlacement => "impossible_placement",
        GradeDiscrepancy => "grade_discrepancy",
    }
}

impl ViolationKind {
    /// Default severity for a freshly raised violation of this kind
    pub fn default_severity(&self) -> ViolationSeverity {
        match self {
            ViolationKind::SizeExceeded
            | ViolationKind::GradeSpreadExceeded
            | ViolationKind::ImpossiblePlacement => ViolationSeverity::Hard,
            ViolationKind::FriendGroupSplit
            | ViolationKind::FriendGroupTooLarge
            | ViolationKind::GradeDiscrepancy => ViolationSeverity::Warning,
        }
    }
}

string_enum! {
    /// Violation severity
    pub enum ViolationSeverity {
        /// Soft preference not met
        Warning => "warning",
        /// Hard constraint broken
        Hard => "hard",
    }
}

string_enum! {
    /// Violation lifecycle state
    pub enum ViolationStatus {
        Unresolved => "unresolved",
        Resolved => "resolved",
    }
}

string_enum! {
    /// How a violation was resolved
    pub enum ResolutionType {
        /// A later run no longer exhibits the condition
        AutoFixed => "auto_fixed",
        /// A human moved a camper and accepted the trade-off
        ManualOverride => "manual_override",
        /// A human marked the condition as fine without changing data
        Accepted => "accepted",
        /// False positive
        Dismissed => "dismissed",
    }
}

string_enum! {
    /// What a run did with a violation
    pub enum RunViolationDisposition {
        /// First raised by this run
        Raised => "raised",
        /// Raised earlier and still present after this run
        StillOpen => "still_open",
        /// Resolved by this run because the condition is gone
        AutoFixed => "auto_fixed",
    }
}

string_enum! {
    /// Which input the validated grade came from
    pub enum GradeSource {
        Registration => "registration",
        DateOfBirth => "date_of_birth",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_str() {
        for kind in [
            ViolationKind::SizeExceeded,
            ViolationKind::GradeSpreadExceeded,
            ViolationKind::FriendGroupSplit,
            ViolationKind::FriendGroupTooLarge,
            ViolationKind::ImpossiblePlacement,
            ViolationKind::GradeDiscrepancy,
        ] {
            assert_eq!(kind.as_str().parse::<ViolationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_value_is_error() {
        assert!("sideways".parse::<AssignmentType>().is_err());
    }

    #[test]
    fn test_serde_matches_db_spelling() {
        let json = serde_json::to_string(&ResolutionType::AutoFixed).unwrap();
        assert_eq!(json, "\"auto_fixed\"");
    }

    #[test]
    fn test_default_severity() {
        assert_eq!(ViolationKind::SizeExceeded.default_severity(), ViolationSeverity::Hard);
        assert_eq!(ViolationKind::ImpossiblePlacement.default_severity(), ViolationSeverity::Hard);
        assert_eq!(ViolationKind::FriendGroupSplit.default_severity(), ViolationSeverity::Warning);
        assert_eq!(ViolationKind::GradeDiscrepancy.default_severity(), ViolationSeverity::Warning);
    }

    #[test]
    fn test_pinned_assignment_types() {
        assert!(!AssignmentType::Auto.is_pinned());
        assert!(AssignmentType::Manual.is_pinned());
        assert!(AssignmentType::Override.is_pinned());
    }
}
