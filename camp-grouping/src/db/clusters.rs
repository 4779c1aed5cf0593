//! Friend cluster audit records, one set per run

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::db::{FriendCluster, RecordedCluster};
use camp_common::uuid_utils;

use crate::allocator::ClusterOutcome;
use crate::error::Result;

pub async fn insert_cluster(
    conn: &mut SqliteConnection,
    run_id: Uuid,
    camp_id: Uuid,
    cluster: &FriendCluster,
    outcome: Option<&ClusterOutcome>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO friend_clusters (
            guid, run_id, camp_id, member_ids, member_count, min_grade, max_grade,
            grade_spread, exceeds_grade_constraint, exceeds_size_constraint,
            can_be_placed_intact, placed_intact, group_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(cluster.id.to_string())
    .bind(run_id.to_string())
    .bind(camp_id.to_string())
    .bind(uuid_utils::to_json_list(&cluster.member_ids))
    .bind(cluster.member_count)
    .bind(cluster.min_grade)
    .bind(cluster.max_grade)
    .bind(cluster.grade_spread)
    .bind(cluster.exceeds_grade_constraint)
    .bind(cluster.exceeds_size_constraint)
    .bind(cluster.can_be_placed_intact)
    .bind(outcome.map_or(false, |o| o.placed_intact))
    .bind(outcome.and_then(|o| o.group_id).map(|g| g.to_string()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn cluster_from_row(row: &SqliteRow) -> Result<RecordedCluster> {
    let guid: String = row.try_get("guid")?;
    let run_id: String = row.try_get("run_id")?;
    let member_ids: String = row.try_get("member_ids")?;
    let group_id: Option<String> = row.try_get("group_id")?;

    Ok(RecordedCluster {
        run_id: uuid_utils::parse_column(&run_id, "run_id")?,
        cluster: FriendCluster {
            id: uuid_utils::parse_column(&guid, "guid")?,
            member_ids: uuid_utils::from_json_list(Some(&member_ids), "member_ids")?,
            member_count: row.try_get("member_count")?,
            min_grade: row.try_get("min_grade")?,
            max_grade: row.try_get("max_grade")?,
            grade_spread: row.try_get("grade_spread")?,
            exceeds_grade_constraint: row.try_get("exceeds_grade_constraint")?,
            exceeds_size_constraint: row.try_get("exceeds_size_constraint")?,
            can_be_placed_intact: row.try_get("can_be_placed_intact")?,
        },
        placed_intact: row.try_get("placed_intact")?,
        group_id: uuid_utils::parse_optional_column(group_id.as_deref(), "group_id")?,
    })
}

/// Clusters found by one run, in the order the run found them
pub async fn list_for_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Vec<RecordedCluster>> {
    let rows = sqlx::query("SELECT * FROM friend_clusters WHERE run_id = ? ORDER BY rowid")
        .bind(run_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(cluster_from_row).collect()
}
