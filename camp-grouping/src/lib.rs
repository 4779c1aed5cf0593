//! camp-grouping library - Camp grouping engine
//!
//! Partitions a camp's confirmed campers into a fixed number of activity
//! groups under hard limits (group size, grade spread), keeps requested
//! friends together where it can, preserves manual overrides across re-runs
//! and records every move and every violation.
//!
//! Pipeline per run: [`normalizer`] → [`clusters`] → [`allocator`] →
//! [`auditor`], persisted by [`recorder`] in one transaction. Human
//! corrections go through [`overrides`].

use sqlx::SqlitePool;
use uuid::Uuid;

use camp_common::config::GroupingSettings;
use camp_common::db::{
    CampGroup, CamperSessionEntry, ConstraintViolation, GroupAssignment, GroupingRun, RecordedCluster,
    RunViolation,
};
use camp_common::{time, ResolutionType};

pub mod allocator;
pub mod auditor;
pub mod clusters;
pub mod db;
pub mod error;
pub mod guard;
pub mod normalizer;
pub mod overrides;
pub mod recorder;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use error::{GroupingError, Result};
pub use guard::RunGuard;
pub use overrides::{MoveOptions, MoveOutcome};
pub use recorder::{RunReport, RunRequest};

/// Grouping engine shared by every caller in the process
///
/// Cheap to clone; clones share the pool and the per-camp run guard.
#[derive(Clone)]
pub struct GroupingEngine {
    /// Database connection pool
    pub db: SqlitePool,
    pub settings: GroupingSettings,
    runs: RunGuard,
}

impl GroupingEngine {
    pub fn new(db: SqlitePool, settings: GroupingSettings) -> Self {
        Self {
            db,
            settings,
            runs: RunGuard::new(),
        }
    }

    /// Guard tracking which camps have a run in flight
    pub fn run_guard(&self) -> &RunGuard {
        &self.runs
    }

    /// Run the grouping pipeline for one camp
    ///
    /// Fails with `RunInProgress` while another run for the same camp is in
    /// flight, in this process or in another one sharing the database.
    /// Rejected runs leave a failed run record where the camp exists
    /// (see [`GroupingError::is_recorded_as_failed_run`]).
    pub async fn run_grouping(&self, camp_id: Uuid, request: RunRequest) -> Result<RunReport> {
        let Some(_permit) = self.runs.try_acquire(camp_id) else {
            tracing::warn!(camp_id = %camp_id, "Rejecting grouping run: another run is in progress");
            return Err(GroupingError::RunInProgress { camp_id });
        };

        let Some(claim) = self.claim_camp(camp_id, &request.triggered_by).await? else {
            tracing::warn!(camp_id = %camp_id, "Rejecting grouping run: another process holds the camp");
            return Err(GroupingError::RunInProgress { camp_id });
        };

        let result = self.run_claimed(camp_id, &request).await;

        let released = match self.db.acquire().await {
            Ok(mut conn) => db::locks::release(&mut conn, &claim).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = released {
            tracing::error!(camp_id = %camp_id, error = %e, "Failed to release grouping run claim");
        }

        result
    }

    async fn claim_camp(&self, camp_id: Uuid, claimed_by: &str) -> Result<Option<db::locks::RunClaim>> {
        let now = time::now();
        let mut tx = self.db.begin().await?;
        let claim =
            db::locks::try_claim(&mut tx, camp_id, claimed_by, self.settings.stale_run_claim_secs, &now).await?;
        tx.commit().await?;
        Ok(claim)
    }

    async fn run_claimed(&self, camp_id: Uuid, request: &RunRequest) -> Result<RunReport> {
        let started_at = time::now();
        match recorder::execute_run(&self.db, &self.settings, camp_id, request).await {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_recorded_as_failed_run() {
                    if let Err(record_err) =
                        recorder::record_failed_run(&self.db, camp_id, request, &err, started_at).await
                    {
                        tracing::error!(
                            camp_id = %camp_id,
                            error = %record_err,
                            "Failed to record failed grouping run"
                        );
                    }
                } else {
                    tracing::warn!(camp_id = %camp_id, error = %err, "Grouping run rejected");
                }
                Err(err)
            }
        }
    }

    pub async fn move_camper(&self, camper_id: Uuid, target_group_id: Uuid, options: MoveOptions) -> Result<MoveOutcome> {
        overrides::move_camper(&self.db, camper_id, target_group_id, &options).await
    }

    pub async fn pin_camper(&self, camper_id: Uuid, reason: Option<&str>, pinned_by: &str) -> Result<CamperSessionEntry> {
        overrides::pin_camper(&self.db, camper_id, reason, pinned_by).await
    }

    pub async fn resolve_violation(
        &self,
        violation_id: Uuid,
        resolution: ResolutionType,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConstraintViolation> {
        overrides::resolve_violation(&self.db, violation_id, resolution, resolved_by, notes).await
    }

    /// Active groups of a camp with their current stats
    pub async fn list_groups(&self, camp_id: Uuid) -> Result<Vec<CampGroup>> {
        let mut conn = self.db.acquire().await?;
        let camp = db::roster::load_camp(&mut conn, camp_id).await?;
        let groups = db::groups::load_groups(&mut conn, camp_id).await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.group_index <= camp.num_groups)
            .collect())
    }

    /// Active campers of a camp ordered by athlete id
    pub async fn list_campers(&self, camp_id: Uuid) -> Result<Vec<CamperSessionEntry>> {
        let mut conn = self.db.acquire().await?;
        db::campers::load_entries(&mut conn, camp_id, true).await
    }

    pub async fn list_violations(&self, camp_id: Uuid, unresolved_only: bool) -> Result<Vec<ConstraintViolation>> {
        let mut conn = self.db.acquire().await?;
        db::violations::load_for_camp(&mut conn, camp_id, unresolved_only).await
    }

    /// Runs of a camp, most recent first
    pub async fn list_runs(&self, camp_id: Uuid) -> Result<Vec<GroupingRun>> {
        let mut conn = self.db.acquire().await?;
        db::runs::list_runs(&mut conn, camp_id).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<GroupingRun>> {
        let mut conn = self.db.acquire().await?;
        db::runs::get_run(&mut conn, run_id).await
    }

    /// Assignment log entries written by one run
    pub async fn run_assignments(&self, run_id: Uuid) -> Result<Vec<GroupAssignment>> {
        let mut conn = self.db.acquire().await?;
        db::assignments::list_for_run(&mut conn, run_id).await
    }

    /// Violations a run raised, left open or auto-fixed, with their current state
    ///
    /// The raised and still-open entries together are the run's
    /// `total_violations`.
    pub async fn run_violations(&self, run_id: Uuid) -> Result<Vec<RunViolation>> {
        let mut conn = self.db.acquire().await?;
        db::violations::list_for_run(&mut conn, run_id).await
    }

    /// Friend clusters found by one run and how each was placed
    pub async fn run_clusters(&self, run_id: Uuid) -> Result<Vec<RecordedCluster>> {
        let mut conn = self.db.acquire().await?;
        db::clusters::list_for_run(&mut conn, run_id).await
    }

    /// Move history of one camper, oldest first
    pub async fn camper_history(&self, camper_id: Uuid) -> Result<Vec<GroupAssignment>> {
        let mut conn = self.db.acquire().await?;
        db::assignments::list_for_camper(&mut conn, camper_id).await
    }
}
