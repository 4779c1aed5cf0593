//! Run claims shared through the database
//!
//! One `grouping_locks` row per camp while a run is in flight. The in-process
//! [`RunGuard`](crate::guard::RunGuard) only sees callers sharing an engine;
//! these rows are what separate processes on the same database file see.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use camp_common::{time, uuid_utils};

use crate::error::Result;

/// A claim held by this process; release it when the run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunClaim {
    pub camp_id: Uuid,
    pub token: Uuid,
}

async fn insert_claim(
    conn: &mut SqliteConnection,
    claim: &RunClaim,
    claimed_by: &str,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO grouping_locks (camp_id, token, claimed_by, claimed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(camp_id) DO NOTHING
        "#,
    )
    .bind(claim.camp_id.to_string())
    .bind(claim.token.to_string())
    .bind(claimed_by)
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(inserted == 1)
}

/// Claim a camp for one run
///
/// Returns `None` while another claim for the camp is live. A claim older
/// than `stale_after_secs` is broken and replaced. The insert comes first so
/// the write lock is held before the existing claim is read.
pub async fn try_claim(
    conn: &mut SqliteConnection,
    camp_id: Uuid,
    claimed_by: &str,
    stale_after_secs: i64,
    now: &DateTime<Utc>,
) -> Result<Option<RunClaim>> {
    let claim = RunClaim {
        camp_id,
        token: uuid_utils::generate(),
    };
    if insert_claim(conn, &claim, claimed_by, now).await? {
        return Ok(Some(claim));
    }

    let Some(row) = sqlx::query("SELECT token, claimed_by, claimed_at FROM grouping_locks WHERE camp_id = ?")
        .bind(camp_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(insert_claim(conn, &claim, claimed_by, now).await?.then_some(claim));
    };

    let token: String = row.try_get("token")?;
    let holder: String = row.try_get("claimed_by")?;
    let claimed_at: String = row.try_get("claimed_at")?;
    let claimed_at = time::parse_timestamp(&claimed_at, "claimed_at")?;

    let stale = Duration::try_seconds(stale_after_secs)
        .and_then(|window| claimed_at.checked_add_signed(window))
        .map_or(false, |expires| expires < *now);
    if !stale {
        return Ok(None);
    }

    tracing::warn!(
        camp_id = %camp_id,
        claimed_by = %holder,
        claimed_at = %claimed_at,
        "Breaking stale grouping run claim"
    );
    sqlx::query("DELETE FROM grouping_locks WHERE camp_id = ? AND token = ?")
        .bind(camp_id.to_string())
        .bind(&token)
        .execute(&mut *conn)
        .await?;

    Ok(insert_claim(conn, &claim, claimed_by, now).await?.then_some(claim))
}

/// Drop a claim; a claim already broken by another process is left alone
pub async fn release(conn: &mut SqliteConnection, claim: &RunClaim) -> Result<()> {
    sqlx::query("DELETE FROM grouping_locks WHERE camp_id = ? AND token = ?")
        .bind(claim.camp_id.to_string())
        .bind(claim.token.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camp_common::db::init_memory_database;

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let camp = Uuid::new_v4();
        let now = time::now();

        let claim = try_claim(&mut conn, camp, "a", 900, &now).await.unwrap().unwrap();
        assert!(try_claim(&mut conn, camp, "b", 900, &now).await.unwrap().is_none());
        assert!(try_claim(&mut conn, Uuid::new_v4(), "b", 900, &now).await.unwrap().is_some());

        release(&mut conn, &claim).await.unwrap();
        assert!(try_claim(&mut conn, camp, "b", 900, &now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_claim_is_broken() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let camp = Uuid::new_v4();
        let then = time::now() - Duration::minutes(30);

        let dead = try_claim(&mut conn, camp, "crashed", 900, &then).await.unwrap().unwrap();
        let fresh = try_claim(&mut conn, camp, "next", 900, &time::now()).await.unwrap().unwrap();
        assert_ne!(dead.token, fresh.token);

        // The dead process waking up does not release the new claim
        release(&mut conn, &dead).await.unwrap();
        assert!(try_claim(&mut conn, camp, "third", 900, &time::now()).await.unwrap().is_none());
    }
}
