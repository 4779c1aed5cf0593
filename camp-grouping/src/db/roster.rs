//! Read-only access to the registration system's tables

use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::{CampRecord, RosterRow};
use camp_common::{time, uuid_utils, Error};

use crate::error::{GroupingError, Result};

/// Load a camp and its grouping constraints
pub async fn load_camp(conn: &mut SqliteConnection, camp_id: Uuid) -> Result<CampRecord> {
    let row = sqlx::query(
        r#"
        SELECT guid, name, start_date, num_groups, max_group_size,
               max_grade_spread, late_registration_days
        FROM camps
        WHERE guid = ?
        "#,
    )
    .bind(camp_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(GroupingError::CampNotFound(camp_id))?;

    let start_date: String = row.try_get("start_date")?;
    let start_date = time::parse_date(&start_date).ok_or_else(|| {
        Error::Internal(format!("Invalid start_date '{}' for camp {}", start_date, camp_id))
    })?;

    Ok(CampRecord {
        id: camp_id,
        name: row.try_get("name")?,
        start_date,
        num_groups: row.try_get("num_groups")?,
        max_group_size: row.try_get("max_group_size")?,
        max_grade_spread: row.try_get("max_grade_spread")?,
        late_registration_days: row.try_get("late_registration_days")?,
    })
}

/// Load every confirmed registration of a camp joined with its athlete
pub async fn load_confirmed_roster(conn: &mut SqliteConnection, camp_id: Uuid) -> Result<Vec<RosterRow>> {
    let rows = sqlx::query(
        r#"
        SELECT r.guid AS registration_id, r.athlete_id, a.first_name, a.last_name,
               a.date_of_birth, r.grade, r.friend_requests,
               r.special_considerations, r.medical_notes, r.registered_at
        FROM registrations r
        JOIN athletes a ON a.guid = r.athlete_id
        WHERE r.camp_id = ? AND r.status = 'confirmed'
        ORDER BY r.registered_at, r.guid
        "#,
    )
    .bind(camp_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut roster = Vec::with_capacity(rows.len());
    for row in rows {
        let registration_id: String = row.try_get("registration_id")?;
        let athlete_id: String = row.try_get("athlete_id")?;
        let friend_requests: Option<String> = row.try_get("friend_requests")?;
        let registered_at: String = row.try_get("registered_at")?;

        roster.push(RosterRow {
            registration_id: uuid_utils::parse_column(&registration_id, "registration_id")?,
            athlete_id: uuid_utils::parse_column(&athlete_id, "athlete_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            date_of_birth: row.try_get("date_of_birth")?,
            grade: row.try_get("grade")?,
            friend_requests: uuid_utils::from_json_list(friend_requests.as_deref(), "friend_requests")?,
            special_considerations: row.try_get("special_considerations")?,
            medical_notes: row.try_get("medical_notes")?,
            registered_at: time::parse_timestamp(&registered_at, "registered_at")?,
        });
    }

    Ok(roster)
}
