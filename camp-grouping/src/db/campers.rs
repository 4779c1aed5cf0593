//! Camper session persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::CamperSessionEntry;
use camp_common::{time, uuid_utils, AssignmentType, GradeSource};

use crate::error::Result;
use crate::normalizer::NormalizedCamper;

const ENTRY_COLUMNS: &str = r#"
    guid, camp_id, athlete_id, registration_id, first_name, last_name,
    age_at_camp_start_months, grade_from_registration, grade_computed_from_dob,
    grade_validated, grade_source, grade_discrepancy, grade_discrepancy_resolved,
    friend_request_athlete_ids, friend_group_id, is_late_registration,
    special_considerations, medical_notes, assigned_group_id, assignment_type,
    assignment_reason, is_active
"#;

fn entry_from_row(row: &SqliteRow) -> Result<CamperSessionEntry> {
    let guid: String = row.try_get("guid")?;
    let camp_id: String = row.try_get("camp_id")?;
    let athlete_id: String = row.try_get("athlete_id")?;
    let registration_id: String = row.try_get("registration_id")?;
    let grade_source: String = row.try_get("grade_source")?;
    let friend_requests: Option<String> = row.try_get("friend_request_athlete_ids")?;
    let friend_group_id: Option<String> = row.try_get("friend_group_id")?;
    let assigned_group_id: Option<String> = row.try_get("assigned_group_id")?;
    let assignment_type: String = row.try_get("assignment_type")?;

    Ok(CamperSessionEntry {
        id: uuid_utils::parse_column(&guid, "guid")?,
        camp_id: uuid_utils::parse_column(&camp_id, "camp_id")?,
        athlete_id: uuid_utils::parse_column(&athlete_id, "athlete_id")?,
        registration_id: uuid_utils::parse_column(&registration_id, "registration_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        age_at_camp_start_months: row.try_get("age_at_camp_start_months")?,
        grade_from_registration: row.try_get("grade_from_registration")?,
        grade_computed_from_dob: row.try_get("grade_computed_from_dob")?,
        grade_validated: row.try_get("grade_validated")?,
        grade_source: grade_source.parse::<GradeSource>()?,
        grade_discrepancy: row.try_get("grade_discrepancy")?,
        grade_discrepancy_resolved: row.try_get("grade_discrepancy_resolved")?,
        friend_request_athlete_ids: uuid_utils::from_json_list(
            friend_requests.as_deref(),
            "friend_request_athlete_ids",
        )?,
        friend_group_id: uuid_utils::parse_optional_column(friend_group_id.as_deref(), "friend_group_id")?,
        is_late_registration: row.try_get("is_late_registration")?,
        special_considerations: row.try_get("special_considerations")?,
        medical_notes: row.try_get("medical_notes")?,
        assigned_group_id: uuid_utils::parse_optional_column(assigned_group_id.as_deref(), "assigned_group_id")?,
        assignment_type: assignment_type.parse::<AssignmentType>()?,
        assignment_reason: row.try_get("assignment_reason")?,
        is_active: row.try_get("is_active")?,
    })
}

/// Insert or refresh a camper's normalized fields
///
/// Placement fields of an existing entry are left alone. A previously
/// resolved grade discrepancy stays resolved only while the two grades it
/// was about are unchanged.
pub async fn upsert_normalized(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    camper: &NormalizedCamper,
    now: &DateTime<Utc>,
) -> Result<()> {
    let now = time::to_db(now);

    sqlx::query(
        r#"
        INSERT INTO camper_sessions (
            guid, camp_id, athlete_id, registration_id, first_name, last_name,
            age_at_camp_start_months, grade_from_registration, grade_computed_from_dob,
            grade_validated, grade_source, grade_discrepancy, grade_discrepancy_resolved,
            friend_request_athlete_ids, is_late_registration, special_considerations,
            medical_notes, assignment_type, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 'auto', 1, ?, ?)
        ON CONFLICT(camp_id, athlete_id) DO UPDATE SET
            registration_id = excluded.registration_id,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            age_at_camp_start_months = excluded.age_at_camp_start_months,
            grade_discrepancy_resolved = CASE
                WHEN camper_sessions.grade_from_registration IS excluded.grade_from_registration
                     AND camper_sessions.grade_computed_from_dob = excluded.grade_computed_from_dob
                THEN camper_sessions.grade_discrepancy_resolved
                ELSE 0
            END,
            grade_from_registration = excluded.grade_from_registration,
            grade_computed_from_dob = excluded.grade_computed_from_dob,
            grade_validated = excluded.grade_validated,
            grade_source = excluded.grade_source,
            grade_discrepancy = excluded.grade_discrepancy,
            friend_request_athlete_ids = excluded.friend_request_athlete_ids,
            is_late_registration = excluded.is_late_registration,
            special_considerations = excluded.special_considerations,
            medical_notes = excluded.medical_notes,
            is_active = 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(uuid_utils::generate().to_string())
    .bind(camp_id.to_string())
    .bind(camper.athlete_id.to_string())
    .bind(camper.registration_id.to_string())
    .bind(&camper.first_name)
    .bind(&camper.last_name)
    .bind(camper.age_at_camp_start_months)
    .bind(camper.grade_from_registration)
    .bind(camper.grade_computed_from_dob)
    .bind(camper.grade_validated)
    .bind(camper.grade_source.as_str())
    .bind(camper.grade_discrepancy)
    .bind(uuid_utils::to_json_list(&camper.friend_request_athlete_ids))
    .bind(camper.is_late_registration)
    .bind(&camper.special_considerations)
    .bind(&camper.medical_notes)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Load a camp's camper sessions ordered by athlete id
pub async fn load_entries(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    active_only: bool,
) -> Result<Vec<CamperSessionEntry>> {
    let sql = format!(
        "SELECT {} FROM camper_sessions WHERE camp_id = ? {} ORDER BY athlete_id",
        ENTRY_COLUMNS,
        if active_only { "AND is_active = 1" } else { "" }
    );
    let rows = sqlx::query(&sql)
        .bind(camp_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn load_entry(conn: &mut SqliteConnection, camper_id: Uuid) -> Result<Option<CamperSessionEntry>> {
    let sql = format!("SELECT {} FROM camper_sessions WHERE guid = ?", ENTRY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(camper_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Set a camper's group, assignment type and reason
pub async fn update_placement(
    conn: &mut SqliteConnection,
    camper_id: Uuid,
    group_id: Option<Uuid>,
    assignment_type: AssignmentType,
    reason: Option<&str>,
    now: &DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE camper_sessions
        SET assigned_group_id = ?, assignment_type = ?, assignment_reason = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(group_id.map(|g| g.to_string()))
    .bind(assignment_type.as_str())
    .bind(reason)
    .bind(time::to_db(now))
    .bind(camper_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record which friend cluster of the latest run a camper belongs to
pub async fn set_friend_group(conn: &mut SqliteConnection, camper_id: Uuid, cluster_id: Option<Uuid>) -> Result<()> {
    sqlx::query("UPDATE camper_sessions SET friend_group_id = ? WHERE guid = ?")
        .bind(cluster_id.map(|c| c.to_string()))
        .bind(camper_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Take a camper whose registration is no longer confirmed out of grouping
pub async fn deactivate(conn: &mut SqliteConnection, camper_id: Uuid, now: &DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE camper_sessions
        SET is_active = 0, assigned_group_id = NULL, assignment_type = 'auto',
            assignment_reason = 'registration no longer confirmed', friend_group_id = NULL,
            updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(time::to_db(now))
    .bind(camper_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_discrepancy_resolved(conn: &mut SqliteConnection, camper_id: Uuid, now: &DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE camper_sessions SET grade_discrepancy_resolved = 1, updated_at = ? WHERE guid = ?")
        .bind(time::to_db(now))
        .bind(camper_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}
