//! Database schema migrations
//!
//! Versioned changes applied after the baseline `CREATE TABLE IF NOT EXISTS`
//! pass. Each migration is idempotent and recorded in `schema_version`.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field already ran them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use ALTER TABLE** - prefer ALTER TABLE over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if the table has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1"
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for per-camp queries
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_registrations_camp ON registrations(camp_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_camper_sessions_group ON camper_sessions(assigned_group_id)",
        "CREATE INDEX IF NOT EXISTS idx_group_assignments_camper ON group_assignments(camper_id)",
        "CREATE INDEX IF NOT EXISTS idx_grouping_runs_camp ON grouping_runs(camp_id, started_at)",
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: fingerprint lookup for reconciling violations across runs
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_violations_fingerprint ON constraint_violations(camp_id, fingerprint, status)"
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Migration v3: cross-process run claims and per-run violation links
///
/// `grouping_locks` holds one row per camp while a run is in flight, so
/// separate processes sharing the database see each other's runs.
/// `run_violations` records what each run did with every violation it saw.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS grouping_locks (
            camp_id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            claimed_by TEXT NOT NULL,
            claimed_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS run_violations (
            run_id TEXT NOT NULL REFERENCES grouping_runs(guid) ON DELETE CASCADE,
            violation_id TEXT NOT NULL REFERENCES constraint_violations(guid),
            disposition TEXT NOT NULL,
            PRIMARY KEY (run_id, violation_id)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_friend_clusters_run ON friend_clusters(run_id)",
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}
