//! Database initialization
//!
//! Creates the database file on first run, applies connection pragmas,
//! creates every table idempotently and then runs versioned migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on another writer before failing with SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pragmas every pooled connection gets
fn connect_options(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options.foreign_keys(true).busy_timeout(BUSY_TIMEOUT)
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL allows readers to proceed while a grouping run holds the write lock
    let options = connect_options(SqliteConnectOptions::new().filename(db_path))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    prepare_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to a single connection: every SQLite `:memory:` connection is its
/// own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(SqliteConnectOptions::from_str("sqlite::memory:")?))
        .await?;

    prepare_schema(&pool).await?;

    Ok(pool)
}

async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    // Create tables (idempotent - safe to call multiple times)
    create_schema_version_table(pool).await?;

    // Roster tables owned by the registration system
    create_camps_table(pool).await?;
    create_athletes_table(pool).await?;
    create_registrations_table(pool).await?;

    // Grouping engine tables
    create_camp_groups_table(pool).await?;
    create_camper_sessions_table(pool).await?;
    create_grouping_runs_table(pool).await?;
    create_friend_clusters_table(pool).await?;
    create_group_assignments_table(pool).await?;
    create_constraint_violations_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the camps table
///
/// Carries the per-camp grouping constraints read by every run.
pub async fn create_camps_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS camps (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            num_groups INTEGER NOT NULL DEFAULT 5,
            max_group_size INTEGER NOT NULL DEFAULT 12,
            max_grade_spread INTEGER NOT NULL DEFAULT 2,
            late_registration_days INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_athletes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS athletes (
            guid TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_birth TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the registrations table
///
/// `friend_requests` is a JSON array of athlete GUIDs in the order the
/// family entered them.
async fn create_registrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registrations (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            athlete_id TEXT NOT NULL REFERENCES athletes(guid) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'confirmed',
            grade TEXT,
            friend_requests TEXT,
            special_considerations TEXT,
            medical_notes TEXT,
            registered_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_camp_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS camp_groups (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            group_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            camper_count INTEGER NOT NULL DEFAULT 0,
            min_grade INTEGER,
            max_grade INTEGER,
            grade_spread INTEGER NOT NULL DEFAULT 0,
            size_violation INTEGER NOT NULL DEFAULT 0,
            grade_violation INTEGER NOT NULL DEFAULT 0,
            has_hard_violations INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(camp_id, group_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the camper_sessions table
///
/// One row per (camp, athlete); the join point between the roster and the
/// grouping engine's own records.
async fn create_camper_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS camper_sessions (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            athlete_id TEXT NOT NULL REFERENCES athletes(guid),
            registration_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            age_at_camp_start_months INTEGER NOT NULL,
            grade_from_registration INTEGER,
            grade_computed_from_dob INTEGER NOT NULL,
            grade_validated INTEGER NOT NULL,
            grade_source TEXT NOT NULL,
            grade_discrepancy INTEGER NOT NULL DEFAULT 0,
            grade_discrepancy_resolved INTEGER NOT NULL DEFAULT 0,
            friend_request_athlete_ids TEXT NOT NULL DEFAULT '[]',
            friend_group_id TEXT,
            is_late_registration INTEGER NOT NULL DEFAULT 0,
            special_considerations TEXT,
            medical_notes TEXT,
            assigned_group_id TEXT REFERENCES camp_groups(guid),
            assignment_type TEXT NOT NULL DEFAULT 'auto',
            assignment_reason TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(camp_id, athlete_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_grouping_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grouping_runs (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            run_type TEXT NOT NULL,
            status TEXT NOT NULL,
            success INTEGER NOT NULL,
            error_message TEXT,
            triggered_by TEXT NOT NULL,
            trigger_reason TEXT,
            total_campers INTEGER NOT NULL DEFAULT 0,
            total_friend_clusters INTEGER NOT NULL DEFAULT 0,
            late_registrations_count INTEGER NOT NULL DEFAULT 0,
            grade_discrepancies_count INTEGER NOT NULL DEFAULT 0,
            max_group_size INTEGER NOT NULL,
            num_groups INTEGER NOT NULL,
            max_grade_spread INTEGER NOT NULL,
            execution_time_ms INTEGER NOT NULL DEFAULT 0,
            campers_auto_placed INTEGER NOT NULL DEFAULT 0,
            clusters_placed_intact INTEGER NOT NULL DEFAULT 0,
            clusters_split INTEGER NOT NULL DEFAULT 0,
            unplaced_campers INTEGER NOT NULL DEFAULT 0,
            total_violations INTEGER NOT NULL DEFAULT 0,
            preserved_manual_overrides_count INTEGER NOT NULL DEFAULT 0,
            warnings TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_friend_clusters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS friend_clusters (
            guid TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES grouping_runs(guid),
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            member_ids TEXT NOT NULL,
            member_count INTEGER NOT NULL,
            min_grade INTEGER NOT NULL,
            max_grade INTEGER NOT NULL,
            grade_spread INTEGER NOT NULL,
            exceeds_grade_constraint INTEGER NOT NULL,
            exceeds_size_constraint INTEGER NOT NULL,
            can_be_placed_intact INTEGER NOT NULL,
            placed_intact INTEGER NOT NULL,
            group_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the group_assignments table
///
/// Append-only audit log; rows are never updated or deleted.
async fn create_group_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_assignments (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            camper_id TEXT NOT NULL REFERENCES camper_sessions(guid),
            run_id TEXT REFERENCES grouping_runs(guid),
            from_group_id TEXT,
            to_group_id TEXT,
            assignment_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            caused_size_violation INTEGER NOT NULL DEFAULT 0,
            caused_grade_violation INTEGER NOT NULL DEFAULT 0,
            caused_friend_split INTEGER NOT NULL DEFAULT 0,
            assigned_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_constraint_violations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS constraint_violations (
            guid TEXT PRIMARY KEY,
            camp_id TEXT NOT NULL REFERENCES camps(guid) ON DELETE CASCADE,
            run_id TEXT REFERENCES grouping_runs(guid),
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            group_id TEXT,
            friend_cluster_id TEXT,
            camper_ids TEXT NOT NULL DEFAULT '[]',
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            suggested_resolution TEXT,
            status TEXT NOT NULL DEFAULT 'unresolved',
            resolution_type TEXT,
            resolved_by TEXT,
            resolution_notes TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
