//! Shared fixtures for grouping engine integration tests
//!
//! Every camp starts on 2025-07-14, so the school year starts 2024-09-01 and
//! a date of birth of `(2019 - g)-03-10` implies grade `g`.

#![allow(dead_code)]

use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use camp_common::config::GroupingSettings;
use camp_common::db::{init_database, CampGroup, CamperSessionEntry};
use camp_grouping::GroupingEngine;

pub const CAMP_START: &str = "2025-07-14";
pub const ON_TIME: &str = "2025-05-01T09:00:00+00:00";

/// Date of birth implying `grade` for a camp starting on CAMP_START
pub fn dob_for_grade(grade: i32) -> String {
    format!("{}-03-10", 2019 - grade)
}

/// One registration to seed
pub struct NewCamper {
    pub athlete_id: Uuid,
    pub first_name: String,
    pub date_of_birth: Option<String>,
    pub reported_grade: Option<String>,
    pub friends: Vec<Uuid>,
    pub registered_at: String,
}

impl NewCamper {
    pub fn grade(grade: i32) -> Self {
        Self {
            athlete_id: Uuid::new_v4(),
            first_name: format!("Camper{}", grade),
            date_of_birth: Some(dob_for_grade(grade)),
            reported_grade: None,
            friends: Vec::new(),
            registered_at: ON_TIME.to_string(),
        }
    }

    pub fn with_friends(mut self, friends: &[Uuid]) -> Self {
        self.friends = friends.to_vec();
        self
    }
}

/// A camp in a fresh temporary database
pub struct TestCamp {
    pub engine: GroupingEngine,
    pub camp_id: Uuid,
    _dir: TempDir,
}

impl TestCamp {
    pub async fn new(num_groups: i32, max_group_size: i32, max_grade_spread: i32) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("camp.db");
        let pool = init_database(&db_path).await.unwrap();

        let camp_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO camps (guid, name, start_date, num_groups, max_group_size, max_grade_spread)
            VALUES (?, 'Summer Soccer Week 2', ?, ?, ?, ?)
            "#,
        )
        .bind(camp_id.to_string())
        .bind(CAMP_START)
        .bind(num_groups)
        .bind(max_group_size)
        .bind(max_grade_spread)
        .execute(&pool)
        .await
        .unwrap();

        let settings = GroupingSettings {
            database_path: db_path,
            ..GroupingSettings::default()
        };

        Self {
            engine: GroupingEngine::new(pool, settings),
            camp_id,
            _dir: dir,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.engine.db
    }

    /// An engine with its own pool on the same database file, as a second
    /// process would have
    pub async fn second_engine(&self) -> GroupingEngine {
        let pool = init_database(&self.engine.settings.database_path).await.unwrap();
        GroupingEngine::new(pool, self.engine.settings.clone())
    }

    /// Register a camper; returns the athlete id
    pub async fn add(&self, camper: NewCamper) -> Uuid {
        sqlx::query("INSERT INTO athletes (guid, first_name, last_name, date_of_birth) VALUES (?, ?, 'Tester', ?)")
            .bind(camper.athlete_id.to_string())
            .bind(&camper.first_name)
            .bind(&camper.date_of_birth)
            .execute(self.pool())
            .await
            .unwrap();

        let friends: Vec<String> = camper.friends.iter().map(Uuid::to_string).collect();
        sqlx::query(
            r#"
            INSERT INTO registrations (guid, camp_id, athlete_id, status, grade, friend_requests, registered_at)
            VALUES (?, ?, ?, 'confirmed', ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.camp_id.to_string())
        .bind(camper.athlete_id.to_string())
        .bind(&camper.reported_grade)
        .bind(serde_json::to_string(&friends).unwrap())
        .bind(&camper.registered_at)
        .execute(self.pool())
        .await
        .unwrap();

        camper.athlete_id
    }

    /// Register a camper with no friend requests at the given grade
    pub async fn add_grade(&self, grade: i32) -> Uuid {
        self.add(NewCamper::grade(grade)).await
    }

    pub async fn set_registration_status(&self, athlete_id: Uuid, status: &str) {
        sqlx::query("UPDATE registrations SET status = ? WHERE athlete_id = ? AND camp_id = ?")
            .bind(status)
            .bind(athlete_id.to_string())
            .bind(self.camp_id.to_string())
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn set_num_groups(&self, num_groups: i32) {
        sqlx::query("UPDATE camps SET num_groups = ? WHERE guid = ?")
            .bind(num_groups)
            .bind(self.camp_id.to_string())
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn set_late_registration_days(&self, days: i64) {
        sqlx::query("UPDATE camps SET late_registration_days = ? WHERE guid = ?")
            .bind(days)
            .bind(self.camp_id.to_string())
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn campers(&self) -> Vec<CamperSessionEntry> {
        self.engine.list_campers(self.camp_id).await.unwrap()
    }

    pub async fn camper_for(&self, athlete_id: Uuid) -> CamperSessionEntry {
        self.campers()
            .await
            .into_iter()
            .find(|c| c.athlete_id == athlete_id)
            .unwrap()
    }

    pub async fn groups(&self) -> Vec<CampGroup> {
        self.engine.list_groups(self.camp_id).await.unwrap()
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE camp_id = ?", table))
            .bind(self.camp_id.to_string())
            .fetch_one(self.pool())
            .await
            .unwrap()
    }
}
