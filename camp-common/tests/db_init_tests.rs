//! Tests for database initialization and migrations

use camp_common::db::{init_database, init_memory_database};
use tempfile::TempDir;

const ENGINE_TABLES: [&str; 8] = [
    "camp_groups",
    "camper_sessions",
    "constraint_violations",
    "friend_clusters",
    "group_assignments",
    "grouping_locks",
    "grouping_runs",
    "run_violations",
];

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("camp.db");
    assert!(!db_path.exists());

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("camp.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO camps (guid, name, start_date) VALUES ('c1', 'Kept', '2025-07-14')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let name: String = sqlx::query_scalar("SELECT name FROM camps WHERE guid = 'c1'")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(name, "Kept");
}

#[tokio::test]
async fn test_all_tables_created() {
    let pool = init_memory_database().await.unwrap();

    for table in ["camps", "athletes", "registrations"].iter().chain(ENGINE_TABLES.iter()) {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_migrations_recorded() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("camp.db");
    let pool = init_database(&db_path).await.unwrap();

    let version: i32 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, 3);

    let index: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'constraint_violations'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(index >= 1);
    pool.close().await;

    // Re-running migrations on an up-to-date database is a no-op
    let pool = init_database(&db_path).await.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 3);
}

#[tokio::test]
async fn test_camp_defaults() {
    let pool = init_memory_database().await.unwrap();
    sqlx::query("INSERT INTO camps (guid, name, start_date) VALUES ('c1', 'Defaults', '2025-07-14')")
        .execute(&pool)
        .await
        .unwrap();

    let (groups, size, spread): (i32, i32, i32) =
        sqlx::query_as("SELECT num_groups, max_group_size, max_grade_spread FROM camps WHERE guid = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!((groups, size, spread), (5, 12, 2));
}

#[tokio::test]
async fn test_every_pooled_connection_gets_pragmas() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("camp.db")).await.unwrap();

    // Hold two connections at once so the second is not the one that ran the schema
    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    for conn in [&mut first, &mut second] {
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(journal_mode, "wal");
    }
}
