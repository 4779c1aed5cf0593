//! Builders shared by the unit tests of the pure components

use uuid::Uuid;

use camp_common::db::{CampGroup, CamperSessionEntry};
use camp_common::{AssignmentType, GradeSource};

/// Active, unplaced, auto-assigned camper with the given grade
pub fn camper(grade: i32) -> CamperSessionEntry {
    CamperSessionEntry {
        id: Uuid::new_v4(),
        camp_id: Uuid::nil(),
        athlete_id: Uuid::new_v4(),
        registration_id: Uuid::new_v4(),
        first_name: "Noah".to_string(),
        last_name: "Patel".to_string(),
        age_at_camp_start_months: 110,
        grade_from_registration: None,
        grade_computed_from_dob: grade,
        grade_validated: grade,
        grade_source: GradeSource::DateOfBirth,
        grade_discrepancy: false,
        grade_discrepancy_resolved: false,
        friend_request_athlete_ids: Vec::new(),
        friend_group_id: None,
        is_late_registration: false,
        special_considerations: None,
        medical_notes: None,
        assigned_group_id: None,
        assignment_type: AssignmentType::Auto,
        assignment_reason: None,
        is_active: true,
    }
}

/// Record a one-directional friend request
pub fn request(from: &mut CamperSessionEntry, to: &CamperSessionEntry) {
    from.friend_request_athlete_ids.push(to.athlete_id);
}

/// Empty groups numbered 1..=count
pub fn groups(count: i32) -> Vec<CampGroup> {
    (1..=count)
        .map(|index| CampGroup {
            id: Uuid::new_v4(),
            camp_id: Uuid::nil(),
            group_index: index,
            name: format!("Group {}", index),
            color: "#1E88E5".to_string(),
            camper_count: 0,
            min_grade: None,
            max_grade: None,
            grade_spread: 0,
            size_violation: false,
            grade_violation: false,
            has_hard_violations: false,
        })
        .collect()
}
