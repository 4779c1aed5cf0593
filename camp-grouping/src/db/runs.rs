//! Grouping run records

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::GroupingRun;
use camp_common::{time, uuid_utils, Error, GroupingStatus, RunType};

use crate::error::Result;

fn run_from_row(row: &SqliteRow) -> Result<GroupingRun> {
    let guid: String = row.try_get("guid")?;
    let camp_id: String = row.try_get("camp_id")?;
    let run_type: String = row.try_get("run_type")?;
    let status: String = row.try_get("status")?;
    let warnings: String = row.try_get("warnings")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: String = row.try_get("completed_at")?;

    let warnings: Vec<String> = serde_json::from_str(&warnings)
        .map_err(|e| Error::Internal(format!("Failed to deserialize warnings: {}", e)))?;

    Ok(GroupingRun {
        id: uuid_utils::parse_column(&guid, "guid")?,
        camp_id: uuid_utils::parse_column(&camp_id, "camp_id")?,
        run_type: run_type.parse::<RunType>()?,
        status: status.parse::<GroupingStatus>()?,
        success: row.try_get("success")?,
        error_message: row.try_get("error_message")?,
        triggered_by: row.try_get("triggered_by")?,
        trigger_reason: row.try_get("trigger_reason")?,
        total_campers: row.try_get("total_campers")?,
        total_friend_clusters: row.try_get("total_friend_clusters")?,
        late_registrations_count: row.try_get("late_registrations_count")?,
        grade_discrepancies_count: row.try_get("grade_discrepancies_count")?,
        max_group_size: row.try_get("max_group_size")?,
        num_groups: row.try_get("num_groups")?,
        max_grade_spread: row.try_get("max_grade_spread")?,
        execution_time_ms: row.try_get("execution_time_ms")?,
        campers_auto_placed: row.try_get("campers_auto_placed")?,
        clusters_placed_intact: row.try_get("clusters_placed_intact")?,
        clusters_split: row.try_get("clusters_split")?,
        unplaced_campers: row.try_get("unplaced_campers")?,
        total_violations: row.try_get("total_violations")?,
        preserved_manual_overrides_count: row.try_get("preserved_manual_overrides_count")?,
        warnings,
        started_at: time::parse_timestamp(&started_at, "started_at")?,
        completed_at: time::parse_timestamp(&completed_at, "completed_at")?,
    })
}

pub async fn insert_run(conn: &mut SqliteConnection, run: &GroupingRun) -> Result<()> {
    let warnings = serde_json::to_string(&run.warnings)
        .map_err(|e| Error::Internal(format!("Failed to serialize warnings: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO grouping_runs (
            guid, camp_id, run_type, status, success, error_message, triggered_by,
            trigger_reason, total_campers, total_friend_clusters, late_registrations_count,
            grade_discrepancies_count, max_group_size, num_groups, max_grade_spread,
            execution_time_ms, campers_auto_placed, clusters_placed_intact, clusters_split,
            unplaced_campers, total_violations, preserved_manual_overrides_count,
            warnings, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.id.to_string())
    .bind(run.camp_id.to_string())
    .bind(run.run_type.as_str())
    .bind(run.status.as_str())
    .bind(run.success)
    .bind(&run.error_message)
    .bind(&run.triggered_by)
    .bind(&run.trigger_reason)
    .bind(run.total_campers)
    .bind(run.total_friend_clusters)
    .bind(run.late_registrations_count)
    .bind(run.grade_discrepancies_count)
    .bind(run.max_group_size)
    .bind(run.num_groups)
    .bind(run.max_grade_spread)
    .bind(run.execution_time_ms)
    .bind(run.campers_auto_placed)
    .bind(run.clusters_placed_intact)
    .bind(run.clusters_split)
    .bind(run.unplaced_campers)
    .bind(run.total_violations)
    .bind(run.preserved_manual_overrides_count)
    .bind(warnings)
    .bind(time::to_db(&run.started_at))
    .bind(time::to_db(&run.completed_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Option<GroupingRun>> {
    let row = sqlx::query("SELECT * FROM grouping_runs WHERE guid = ?")
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Runs of a camp, most recent first
pub async fn list_runs(conn: &mut SqliteConnection, camp_id: Uuid) -> Result<Vec<GroupingRun>> {
    let rows = sqlx::query("SELECT * FROM grouping_runs WHERE camp_id = ? ORDER BY started_at DESC, rowid DESC")
        .bind(camp_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(run_from_row).collect()
}
