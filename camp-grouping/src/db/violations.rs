//! Constraint violation persistence
//!
//! Violations are inserted unresolved and later transitioned to resolved;
//! they are never deleted.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::{ConstraintViolation, RunViolation};
use camp_common::{
    time, uuid_utils, ResolutionType, RunViolationDisposition, ViolationKind, ViolationSeverity,
    ViolationStatus,
};

use crate::error::Result;

fn violation_from_row(row: &SqliteRow) -> Result<ConstraintViolation> {
    let guid: String = row.try_get("guid")?;
    let camp_id: String = row.try_get("camp_id")?;
    let run_id: Option<String> = row.try_get("run_id")?;
    let kind: String = row.try_get("kind")?;
    let severity: String = row.try_get("severity")?;
    let group_id: Option<String> = row.try_get("group_id")?;
    let friend_cluster_id: Option<String> = row.try_get("friend_cluster_id")?;
    let camper_ids: Option<String> = row.try_get("camper_ids")?;
    let status: String = row.try_get("status")?;
    let resolution_type: Option<String> = row.try_get("resolution_type")?;
    let created_at: String = row.try_get("created_at")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;

    Ok(ConstraintViolation {
        id: uuid_utils::parse_column(&guid, "guid")?,
        camp_id: uuid_utils::parse_column(&camp_id, "camp_id")?,
        run_id: uuid_utils::parse_optional_column(run_id.as_deref(), "run_id")?,
        kind: kind.parse::<ViolationKind>()?,
        severity: severity.parse::<ViolationSeverity>()?,
        fingerprint: row.try_get("fingerprint")?,
        group_id: uuid_utils::parse_optional_column(group_id.as_deref(), "group_id")?,
        friend_cluster_id: uuid_utils::parse_optional_column(friend_cluster_id.as_deref(), "friend_cluster_id")?,
        camper_ids: uuid_utils::from_json_list(camper_ids.as_deref(), "camper_ids")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        suggested_resolution: row.try_get("suggested_resolution")?,
        status: status.parse::<ViolationStatus>()?,
        resolution_type: resolution_type
            .as_deref()
            .map(str::parse::<ResolutionType>)
            .transpose()?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
        created_at: time::parse_timestamp(&created_at, "created_at")?,
        resolved_at: resolved_at
            .as_deref()
            .map(|ts| time::parse_timestamp(ts, "resolved_at"))
            .transpose()?,
    })
}

pub async fn insert_violation(conn: &mut SqliteConnection, violation: &ConstraintViolation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO constraint_violations (
            guid, camp_id, run_id, kind, severity, fingerprint, group_id,
            friend_cluster_id, camper_ids, title, description, suggested_resolution,
            status, resolution_type, resolved_by, resolution_notes, created_at, resolved_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(violation.id.to_string())
    .bind(violation.camp_id.to_string())
    .bind(violation.run_id.map(|r| r.to_string()))
    .bind(violation.kind.as_str())
    .bind(violation.severity.as_str())
    .bind(&violation.fingerprint)
    .bind(violation.group_id.map(|g| g.to_string()))
    .bind(violation.friend_cluster_id.map(|c| c.to_string()))
    .bind(uuid_utils::to_json_list(&violation.camper_ids))
    .bind(&violation.title)
    .bind(&violation.description)
    .bind(&violation.suggested_resolution)
    .bind(violation.status.as_str())
    .bind(violation.resolution_type.map(|r| r.as_str()))
    .bind(&violation.resolved_by)
    .bind(&violation.resolution_notes)
    .bind(time::to_db(&violation.created_at))
    .bind(violation.resolved_at.as_ref().map(time::to_db))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Violations of a camp, oldest first
pub async fn load_for_camp(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    unresolved_only: bool,
) -> Result<Vec<ConstraintViolation>> {
    let sql = if unresolved_only {
        "SELECT * FROM constraint_violations WHERE camp_id = ? AND status = 'unresolved' ORDER BY created_at, rowid"
    } else {
        "SELECT * FROM constraint_violations WHERE camp_id = ? ORDER BY created_at, rowid"
    };
    let rows = sqlx::query(sql)
        .bind(camp_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(violation_from_row).collect()
}

pub async fn get_violation(conn: &mut SqliteConnection, violation_id: Uuid) -> Result<Option<ConstraintViolation>> {
    let row = sqlx::query("SELECT * FROM constraint_violations WHERE guid = ?")
        .bind(violation_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(violation_from_row).transpose()
}

/// Record what a run did with one violation
pub async fn link_to_run(
    conn: &mut SqliteConnection,
    run_id: Uuid,
    violation_id: Uuid,
    disposition: RunViolationDisposition,
) -> Result<()> {
    sqlx::query("INSERT INTO run_violations (run_id, violation_id, disposition) VALUES (?, ?, ?)")
        .bind(run_id.to_string())
        .bind(violation_id.to_string())
        .bind(disposition.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Every violation a run raised, kept open or auto-fixed
pub async fn list_for_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Vec<RunViolation>> {
    let rows = sqlx::query(
        r#"
        SELECT v.*, rv.disposition
        FROM run_violations rv
        JOIN constraint_violations v ON v.guid = rv.violation_id
        WHERE rv.run_id = ?
        ORDER BY v.created_at, v.rowid
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<RunViolation> {
            let disposition: String = row.try_get("disposition")?;
            Ok(RunViolation {
                run_id,
                disposition: disposition.parse::<RunViolationDisposition>()?,
                violation: violation_from_row(row)?,
            })
        })
        .collect()
}

/// Every violation of a camp recorded for one condition, oldest first
pub async fn find_by_fingerprint(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    fingerprint: &str,
) -> Result<Vec<ConstraintViolation>> {
    let rows = sqlx::query(
        "SELECT * FROM constraint_violations WHERE camp_id = ? AND fingerprint = ? ORDER BY created_at, rowid",
    )
    .bind(camp_id.to_string())
    .bind(fingerprint)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(violation_from_row).collect()
}

/// Transition an unresolved violation to resolved
///
/// Returns false when the violation was not unresolved.
pub async fn resolve(
    conn: &mut SqliteConnection,
    violation_id: Uuid,
    resolution: ResolutionType,
    resolved_by: &str,
    notes: Option<&str>,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE constraint_violations
        SET status = 'resolved', resolution_type = ?, resolved_by = ?,
            resolution_notes = ?, resolved_at = ?
        WHERE guid = ? AND status = 'unresolved'
        "#,
    )
    .bind(resolution.as_str())
    .bind(resolved_by)
    .bind(notes)
    .bind(time::to_db(now))
    .bind(violation_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
