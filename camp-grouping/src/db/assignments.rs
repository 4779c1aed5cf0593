//! Group assignment audit log
//!
//! Append-only: rows are inserted and read, never updated.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::GroupAssignment;
use camp_common::{time, uuid_utils, AssignmentType};

use crate::error::Result;

fn assignment_from_row(row: &SqliteRow) -> Result<GroupAssignment> {
    let guid: String = row.try_get("guid")?;
    let camp_id: String = row.try_get("camp_id")?;
    let camper_id: String = row.try_get("camper_id")?;
    let run_id: Option<String> = row.try_get("run_id")?;
    let from_group_id: Option<String> = row.try_get("from_group_id")?;
    let to_group_id: Option<String> = row.try_get("to_group_id")?;
    let assignment_type: String = row.try_get("assignment_type")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(GroupAssignment {
        id: uuid_utils::parse_column(&guid, "guid")?,
        camp_id: uuid_utils::parse_column(&camp_id, "camp_id")?,
        camper_id: uuid_utils::parse_column(&camper_id, "camper_id")?,
        run_id: uuid_utils::parse_optional_column(run_id.as_deref(), "run_id")?,
        from_group_id: uuid_utils::parse_optional_column(from_group_id.as_deref(), "from_group_id")?,
        to_group_id: uuid_utils::parse_optional_column(to_group_id.as_deref(), "to_group_id")?,
        assignment_type: assignment_type.parse::<AssignmentType>()?,
        reason: row.try_get("reason")?,
        caused_size_violation: row.try_get("caused_size_violation")?,
        caused_grade_violation: row.try_get("caused_grade_violation")?,
        caused_friend_split: row.try_get("caused_friend_split")?,
        assigned_by: row.try_get("assigned_by")?,
        created_at: time::parse_timestamp(&created_at, "created_at")?,
    })
}

pub async fn insert_assignment(conn: &mut SqliteConnection, assignment: &GroupAssignment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO group_assignments (
            guid, camp_id, camper_id, run_id, from_group_id, to_group_id,
            assignment_type, reason, caused_size_violation, caused_grade_violation,
            caused_friend_split, assigned_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(assignment.id.to_string())
    .bind(assignment.camp_id.to_string())
    .bind(assignment.camper_id.to_string())
    .bind(assignment.run_id.map(|r| r.to_string()))
    .bind(assignment.from_group_id.map(|g| g.to_string()))
    .bind(assignment.to_group_id.map(|g| g.to_string()))
    .bind(assignment.assignment_type.as_str())
    .bind(&assignment.reason)
    .bind(assignment.caused_size_violation)
    .bind(assignment.caused_grade_violation)
    .bind(assignment.caused_friend_split)
    .bind(&assignment.assigned_by)
    .bind(time::to_db(&assignment.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Assignments written by one grouping run
pub async fn list_for_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Vec<GroupAssignment>> {
    let rows = sqlx::query("SELECT * FROM group_assignments WHERE run_id = ? ORDER BY created_at, rowid")
        .bind(run_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

/// Full move history of one camper, oldest first
pub async fn list_for_camper(conn: &mut SqliteConnection, camper_id: Uuid) -> Result<Vec<GroupAssignment>> {
    let rows = sqlx::query("SELECT * FROM group_assignments WHERE camper_id = ? ORDER BY created_at, rowid")
        .bind(camper_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}
