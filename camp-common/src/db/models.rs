//! Database models
//!
//! Roster records are owned by the registration system and only read here.
//! Everything from `CamperSessionEntry` down is owned by the grouping engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    AssignmentType, GradeSource, GroupingStatus, ResolutionType, RunType, RunViolationDisposition,
    ViolationKind, ViolationSeverity, ViolationStatus,
};

/// Camp and its grouping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampRecord {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub num_groups: i32,
    pub max_group_size: i32,
    pub max_grade_spread: i32,
    /// Overrides the engine-wide late registration window when set
    pub late_registration_days: Option<i64>,
}

impl CampRecord {
    pub fn constraints(&self) -> GroupConstraints {
        GroupConstraints {
            num_groups: self.num_groups,
            max_group_size: self.max_group_size,
            max_grade_spread: self.max_grade_spread,
        }
    }
}

/// Hard limits applied to every group of a camp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConstraints {
    pub num_groups: i32,
    pub max_group_size: i32,
    pub max_grade_spread: i32,
}

impl GroupConstraints {
    /// Describe the first unusable limit, if any
    pub fn validate(&self) -> Result<(), String> {
        if self.num_groups <= 0 {
            return Err(format!("num_groups must be > 0, got {}", self.num_groups));
        }
        if self.max_group_size <= 0 {
            return Err(format!("max_group_size must be > 0, got {}", self.max_group_size));
        }
        if self.max_grade_spread < 0 {
            return Err(format!("max_grade_spread must be >= 0, got {}", self.max_grade_spread));
        }
        Ok(())
    }
}

/// One confirmed registration joined with its athlete
#[derive(Debug, Clone)]
pub struct RosterRow {
    pub registration_id: Uuid,
    pub athlete_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// Raw column value; validated by the normalizer
    pub date_of_birth: Option<String>,
    /// Self-reported grade as free text ("3rd", "K", "pre-k")
    pub grade: Option<String>,
    pub friend_requests: Vec<Uuid>,
    pub special_considerations: Option<String>,
    pub medical_notes: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// One camper's grouping state for one camp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamperSessionEntry {
    pub id: Uuid,
    pub camp_id: Uuid,
    pub athlete_id: Uuid,
    pub registration_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age_at_camp_start_months: i32,
    pub grade_from_registration: Option<i32>,
    pub grade_computed_from_dob: i32,
    /// Grade used for every constraint check
    pub grade_validated: i32,
    pub grade_source: GradeSource,
    pub grade_discrepancy: bool,
    pub grade_discrepancy_resolved: bool,
    pub friend_request_athlete_ids: Vec<Uuid>,
    pub friend_group_id: Option<Uuid>,
    pub is_late_registration: bool,
    pub special_considerations: Option<String>,
    pub medical_notes: Option<String>,
    /// `None` means unplaced
    pub assigned_group_id: Option<Uuid>,
    pub assignment_type: AssignmentType,
    pub assignment_reason: Option<String>,
    /// False once the registration is no longer confirmed
    pub is_active: bool,
}

impl CamperSessionEntry {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One of a camp's N destination groups, with live membership stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampGroup {
    pub id: Uuid,
    pub camp_id: Uuid,
    /// 1-based position; groups beyond the camp's `num_groups` are inactive
    pub group_index: i32,
    pub name: String,
    pub color: String,
    pub camper_count: i32,
    pub min_grade: Option<i32>,
    pub max_grade: Option<i32>,
    pub grade_spread: i32,
    pub size_violation: bool,
    pub grade_violation: bool,
    pub has_hard_violations: bool,
}

/// Friend cluster as found by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendCluster {
    pub id: Uuid,
    /// Camper session ids, ordered by athlete id
    pub member_ids: Vec<Uuid>,
    pub member_count: i32,
    pub min_grade: i32,
    pub max_grade: i32,
    pub grade_spread: i32,
    pub exceeds_grade_constraint: bool,
    pub exceeds_size_constraint: bool,
    pub can_be_placed_intact: bool,
}

/// Friend cluster as recorded by a run, with where it ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCluster {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub cluster: FriendCluster,
    pub placed_intact: bool,
    /// The shared group when placed intact
    pub group_id: Option<Uuid>,
}

/// Immutable audit record of one camper move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub id: Uuid,
    pub camp_id: Uuid,
    pub camper_id: Uuid,
    /// Set for moves made by a grouping run, `None` for manual moves
    pub run_id: Option<Uuid>,
    pub from_group_id: Option<Uuid>,
    pub to_group_id: Option<Uuid>,
    pub assignment_type: AssignmentType,
    pub reason: String,
    pub caused_size_violation: bool,
    pub caused_grade_violation: bool,
    pub caused_friend_split: bool,
    pub assigned_by: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one allocator execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingRun {
    pub id: Uuid,
    pub camp_id: Uuid,
    pub run_type: RunType,
    pub status: GroupingStatus,
    pub success: bool,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub trigger_reason: Option<String>,
    pub total_campers: i32,
    pub total_friend_clusters: i32,
    pub late_registrations_count: i32,
    pub grade_discrepancies_count: i32,
    pub max_group_size: i32,
    pub num_groups: i32,
    pub max_grade_spread: i32,
    pub execution_time_ms: i64,
    pub campers_auto_placed: i32,
    pub clusters_placed_intact: i32,
    pub clusters_split: i32,
    pub unplaced_campers: i32,
    pub total_violations: i32,
    /// Campers whose manual/override placement the run left untouched
    pub preserved_manual_overrides_count: i32,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A tracked constraint finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub id: Uuid,
    pub camp_id: Uuid,
    /// Run that raised it; `None` when raised by a manual move
    pub run_id: Option<Uuid>,
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    /// Identifies the same condition across runs
    pub fingerprint: String,
    pub group_id: Option<Uuid>,
    pub friend_cluster_id: Option<Uuid>,
    pub camper_ids: Vec<Uuid>,
    pub title: String,
    pub description: String,
    pub suggested_resolution: Option<String>,
    pub status: ViolationStatus,
    pub resolution_type: Option<ResolutionType>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConstraintViolation {
    pub fn is_open(&self) -> bool {
        self.status == ViolationStatus::Unresolved
    }
}

/// A violation as seen by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunViolation {
    pub run_id: Uuid,
    pub disposition: RunViolationDisposition,
    /// Current state of the violation, which may have changed since the run
    pub violation: ConstraintViolation,
}
