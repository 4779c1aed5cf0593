//! Camp group persistence and derived stats

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use uuid::Uuid;

use camp_common::db::{CampGroup, GroupConstraints};
use camp_common::{time, uuid_utils};

use crate::error::Result;
use crate::stats::GroupStats;

/// Display colors, reused cyclically past the eighth group
pub const GROUP_COLORS: [&str; 8] = [
    "#E53935", "#1E88E5", "#43A047", "#FB8C00", "#8E24AA", "#00ACC1", "#FDD835", "#6D4C41",
];

pub fn group_name(index: i32) -> String {
    format!("Group {}", index)
}

pub fn group_color(index: i32) -> &'static str {
    let slot = (index - 1).rem_euclid(GROUP_COLORS.len() as i32) as usize;
    GROUP_COLORS[slot]
}

fn group_from_row(row: &SqliteRow) -> Result<CampGroup> {
    let guid: String = row.try_get("guid")?;
    let camp_id: String = row.try_get("camp_id")?;

    Ok(CampGroup {
        id: uuid_utils::parse_column(&guid, "guid")?,
        camp_id: uuid_utils::parse_column(&camp_id, "camp_id")?,
        group_index: row.try_get("group_index")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        camper_count: row.try_get("camper_count")?,
        min_grade: row.try_get("min_grade")?,
        max_grade: row.try_get("max_grade")?,
        grade_spread: row.try_get("grade_spread")?,
        size_violation: row.try_get("size_violation")?,
        grade_violation: row.try_get("grade_violation")?,
        has_hard_violations: row.try_get("has_hard_violations")?,
    })
}

/// Create any of groups 1..=num_groups the camp does not have yet
///
/// Groups past `num_groups` (left over after the camp shrank) are kept so
/// their history stays valid; the allocator treats them as inactive.
pub async fn ensure_groups(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    num_groups: i32,
    now: &DateTime<Utc>,
) -> Result<()> {
    let now = time::to_db(now);
    for index in 1..=num_groups {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO camp_groups (guid, camp_id, group_index, name, color, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid_utils::generate().to_string())
        .bind(camp_id.to_string())
        .bind(index)
        .bind(group_name(index))
        .bind(group_color(index))
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(camp_id = %camp_id, group_index = index, "Created camp group");
        }
    }

    Ok(())
}

/// Load every group of a camp in index order
pub async fn load_groups(conn: &mut SqliteConnection, camp_id: Uuid) -> Result<Vec<CampGroup>> {
    let rows = sqlx::query("SELECT * FROM camp_groups WHERE camp_id = ? ORDER BY group_index")
        .bind(camp_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(group_from_row).collect()
}

pub async fn load_group(conn: &mut SqliteConnection, group_id: Uuid) -> Result<Option<CampGroup>> {
    let row = sqlx::query("SELECT * FROM camp_groups WHERE guid = ?")
        .bind(group_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(group_from_row).transpose()
}

/// Recompute and store the derived stats of every group of a camp
///
/// Counts active campers only. Returns the updated groups in index order.
pub async fn recompute_group_stats(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    constraints: &GroupConstraints,
    now: &DateTime<Utc>,
) -> Result<Vec<CampGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT g.guid AS guid, COUNT(c.guid) AS camper_count,
               MIN(c.grade_validated) AS min_grade, MAX(c.grade_validated) AS max_grade
        FROM camp_groups g
        LEFT JOIN camper_sessions c ON c.assigned_group_id = g.guid AND c.is_active = 1
        WHERE g.camp_id = ?
        GROUP BY g.guid
        "#,
    )
    .bind(camp_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut stats: HashMap<Uuid, GroupStats> = HashMap::with_capacity(rows.len());
    for row in rows {
        let guid: String = row.try_get("guid")?;
        stats.insert(
            uuid_utils::parse_column(&guid, "guid")?,
            GroupStats {
                camper_count: row.try_get("camper_count")?,
                min_grade: row.try_get("min_grade")?,
                max_grade: row.try_get("max_grade")?,
            },
        );
    }

    let now = time::to_db(now);
    let mut groups = load_groups(conn, camp_id).await?;
    for group in &mut groups {
        stats
            .get(&group.id)
            .copied()
            .unwrap_or_default()
            .apply_to(group, constraints);

        sqlx::query(
            r#"
            UPDATE camp_groups
            SET camper_count = ?, min_grade = ?, max_grade = ?, grade_spread = ?,
                size_violation = ?, grade_violation = ?, has_hard_violations = ?, updated_at = ?
            WHERE guid = ?
            "#,
        )
        .bind(group.camper_count)
        .bind(group.min_grade)
        .bind(group.max_grade)
        .bind(group.grade_spread)
        .bind(group.size_violation)
        .bind(group.grade_violation)
        .bind(group.has_hard_violations)
        .bind(&now)
        .bind(group.id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(groups)
}
