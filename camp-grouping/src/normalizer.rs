//! Camper session normalizer
//!
//! Turns confirmed registrations into comparable roster entries: a validated
//! grade (registration grade reconciled against the date-of-birth grade),
//! age, late-registration flag and the ordered friend request list.
//!
//! Pure functions only; nothing here touches the database.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use camp_common::db::{CampRecord, RosterRow};
use camp_common::time::parse_date;
use camp_common::GradeSource;

use crate::error::{GroupingError, Result};

/// Lowest grade (pre-K)
pub const MIN_GRADE: i32 = -1;
/// Highest grade
pub const MAX_GRADE: i32 = 12;

/// Knobs the normalizer needs from camp and engine configuration
#[derive(Debug, Clone, Copy)]
pub struct NormalizerSettings {
    pub late_registration_days: i64,
    pub max_grade_discrepancy: i32,
}

/// One camper after normalization, before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCamper {
    pub registration_id: Uuid,
    pub athlete_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age_at_camp_start_months: i32,
    pub grade_from_registration: Option<i32>,
    pub grade_computed_from_dob: i32,
    pub grade_validated: i32,
    pub grade_source: GradeSource,
    pub grade_discrepancy: bool,
    pub friend_request_athlete_ids: Vec<Uuid>,
    pub is_late_registration: bool,
    pub special_considerations: Option<String>,
    pub medical_notes: Option<String>,
}

/// First day of the school year a camp falls in
///
/// Camps starting in or after September belong to the school year that began
/// that September; earlier camps to the one that began the previous year.
pub fn school_year_start(camp_start: NaiveDate) -> NaiveDate {
    let year = if camp_start.month() >= 9 {
        camp_start.year()
    } else {
        camp_start.year() - 1
    };
    NaiveDate::from_ymd_opt(year, 9, 1).unwrap_or(camp_start)
}

/// Completed years between `dob` and `on`
///
/// A birthday falling on `on` itself counts as reached.
pub fn full_years_between(dob: NaiveDate, on: NaiveDate) -> i32 {
    let mut years = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    years
}

/// Completed months between `dob` and `on`, never negative
pub fn full_months_between(dob: NaiveDate, on: NaiveDate) -> i32 {
    let mut months = (on.year() - dob.year()) * 12 + on.month() as i32 - dob.month() as i32;
    if on.day() < dob.day() {
        months -= 1;
    }
    months.max(0)
}

/// Grade implied by date of birth for a camp starting on `camp_start`
pub fn grade_from_dob(dob: NaiveDate, camp_start: NaiveDate) -> i32 {
    let age = full_years_between(dob, school_year_start(camp_start));
    (age - 5).clamp(MIN_GRADE, MAX_GRADE)
}

/// Parse a self-reported grade ("3rd", "Grade 5", "K", "pre-k")
pub fn parse_registration_grade(text: &str) -> Option<i32> {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "pre-k" | "prek" | "pre k" | "pk" | "pre-kindergarten" | "prekindergarten" => {
            return Some(-1)
        }
        "k" | "kindergarten" => return Some(0),
        _ => {}
    }

    let digits: String = normalized.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Choose the grade used for constraints
///
/// Returns `(grade_validated, source, discrepancy)`. The registration grade
/// wins unless it is more than `max_discrepancy` away from the computed one.
pub fn validate_grade(
    registration: Option<i32>,
    computed: i32,
    max_discrepancy: i32,
) -> (i32, GradeSource, bool) {
    match registration {
        Some(reported) => {
            let discrepancy = reported != computed;
            if (reported - computed).abs() <= max_discrepancy {
                (reported, GradeSource::Registration, discrepancy)
            } else {
                (computed, GradeSource::DateOfBirth, discrepancy)
            }
        }
        None => (computed, GradeSource::DateOfBirth, false),
    }
}

/// Last day a registration still counts as on time
///
/// Fails with `InvalidConstraints` for a negative window or one reaching
/// outside the calendar.
pub fn late_cutoff(camp_start: NaiveDate, late_registration_days: i64) -> Result<NaiveDate> {
    if late_registration_days < 0 {
        return Err(GroupingError::InvalidConstraints(format!(
            "late_registration_days must be >= 0, got {}",
            late_registration_days
        )));
    }
    Duration::try_days(late_registration_days)
        .and_then(|window| camp_start.checked_sub_signed(window))
        .ok_or_else(|| {
            GroupingError::InvalidConstraints(format!(
                "late_registration_days {} is out of range for a camp starting {}",
                late_registration_days, camp_start
            ))
        })
}

/// True when the registration came in after the late cutoff
///
/// Registering on the cutoff day itself is on time.
pub fn is_late_registration(registered_at: DateTime<Utc>, cutoff: NaiveDate) -> bool {
    registered_at.date_naive() > cutoff
}

/// Normalize one registration
pub fn normalize_row(
    camp: &CampRecord,
    row: &RosterRow,
    settings: &NormalizerSettings,
) -> Result<NormalizedCamper> {
    let dob = row
        .date_of_birth
        .as_deref()
        .and_then(parse_date)
        .ok_or(GroupingError::MissingDateOfBirth {
            athlete_id: row.athlete_id,
            registration_id: row.registration_id,
        })?;

    let cutoff = late_cutoff(camp.start_date, settings.late_registration_days)?;
    let computed = grade_from_dob(dob, camp.start_date);
    let reported = row.grade.as_deref().and_then(parse_registration_grade);
    let (validated, source, discrepancy) =
        validate_grade(reported, computed, settings.max_grade_discrepancy);

    // Self requests and repeats carry no information
    let mut seen = HashSet::new();
    let friend_requests = row
        .friend_requests
        .iter()
        .copied()
        .filter(|id| *id != row.athlete_id && seen.insert(*id))
        .collect();

    Ok(NormalizedCamper {
        registration_id: row.registration_id,
        athlete_id: row.athlete_id,
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        age_at_camp_start_months: full_months_between(dob, camp.start_date),
        grade_from_registration: reported,
        grade_computed_from_dob: computed,
        grade_validated: validated,
        grade_source: source,
        grade_discrepancy: discrepancy,
        friend_request_athlete_ids: friend_requests,
        is_late_registration: is_late_registration(row.registered_at, cutoff),
        special_considerations: row.special_considerations.clone(),
        medical_notes: row.medical_notes.clone(),
    })
}

/// Normalize a camp's confirmed roster
///
/// An athlete registered more than once keeps only the earliest
/// registration. Fails on the first registration without a usable date of
/// birth.
pub fn normalize_roster(
    camp: &CampRecord,
    rows: &[RosterRow],
    settings: &NormalizerSettings,
) -> Result<Vec<NormalizedCamper>> {
    let mut ordered: Vec<&RosterRow> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        a.registered_at
            .cmp(&b.registered_at)
            .then_with(|| a.registration_id.cmp(&b.registration_id))
    });

    let mut seen = HashSet::new();
    let mut campers = Vec::with_capacity(ordered.len());
    for row in ordered {
        if !seen.insert(row.athlete_id) {
            tracing::warn!(
                athlete_id = %row.athlete_id,
                registration_id = %row.registration_id,
                "Ignoring duplicate registration for athlete"
            );
            continue;
        }
        campers.push(normalize_row(camp, row, settings)?);
    }

    // Stable order for everything downstream
    campers.sort_by_key(|c| c.athlete_id);
    Ok(campers)
}
