//! Grouping run recorder
//!
//! Runs the whole pipeline (normalize, cluster, allocate, audit) for one
//! camp and persists the outcome in a single transaction: camper sessions,
//! group stats, the run record, friend cluster audit rows, assignment log
//! entries, violation transitions and the run's link to every violation it
//! raised, kept open or auto-fixed. Any error before commit rolls back
//! everything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

use camp_common::config::GroupingSettings;
use camp_common::db::{CampGroup, CampRecord, ConstraintViolation, GroupAssignment, GroupingRun, RosterRow};
use camp_common::{
    time, uuid_utils, AssignmentType, GroupingStatus, ResolutionType, RunType, RunViolationDisposition,
};

use crate::allocator::{allocate, AllocationInput};
use crate::auditor::{audit, reconcile, AuditInput};
use crate::clusters::{build_clusters, ClusterAnalysis};
use crate::db;
use crate::error::{GroupingError, Result};
use crate::normalizer::{late_cutoff, normalize_roster, NormalizerSettings};

/// Actor recorded on automatic violation transitions
pub const SYSTEM_ACTOR: &str = "system";

const DEACTIVATED_REASON: &str = "registration no longer confirmed";

/// Parameters of one grouping run
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub run_type: RunType,
    pub triggered_by: String,
    pub trigger_reason: Option<String>,
}

impl RunRequest {
    pub fn new(run_type: RunType, triggered_by: impl Into<String>) -> Self {
        Self {
            run_type,
            triggered_by: triggered_by.into(),
            trigger_reason: None,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: GroupingRun,
    /// Active groups with their stats after the run
    pub groups: Vec<CampGroup>,
    pub assignments_recorded: usize,
    pub violations_raised: Vec<ConstraintViolation>,
    pub violations_auto_fixed: Vec<Uuid>,
    /// Unresolved violations of the camp after the run
    pub open_violations: usize,
}

impl RunReport {
    /// True when nothing needs a human's attention
    pub fn is_clean(&self) -> bool {
        self.open_violations == 0
    }
}

/// Run the pipeline for one camp and commit the result
pub async fn execute_run(
    pool: &SqlitePool,
    settings: &GroupingSettings,
    camp_id: Uuid,
    request: &RunRequest,
) -> Result<RunReport> {
    let clock = Instant::now();
    let started_at = time::now();
    let run_id = uuid_utils::generate();

    let mut tx = pool.begin().await?;

    let camp = db::roster::load_camp(&mut tx, camp_id).await?;
    let constraints = camp.constraints();
    constraints.validate().map_err(GroupingError::InvalidConstraints)?;
    let late_registration_days = camp
        .late_registration_days
        .unwrap_or(settings.default_late_registration_days);
    late_cutoff(camp.start_date, late_registration_days)?;

    let roster = db::roster::load_confirmed_roster(&mut tx, camp_id).await?;
    if roster.is_empty() {
        return Err(GroupingError::NoCampers { camp_id });
    }

    tracing::info!(
        camp_id = %camp_id,
        run_id = %run_id,
        run_type = %request.run_type,
        registrations = roster.len(),
        "Starting grouping run"
    );

    let normalizer_settings = NormalizerSettings {
        late_registration_days,
        max_grade_discrepancy: settings.max_grade_discrepancy,
    };
    let normalized = normalize_roster(&camp, &roster, &normalizer_settings)?;
    let mut warnings = roster_warnings(&roster, normalized.len());

    for camper in &normalized {
        db::campers::upsert_normalized(&mut tx, camp_id, camper, &started_at).await?;
    }

    // Campers whose registration dropped out since the last run
    let confirmed: HashSet<Uuid> = normalized.iter().map(|c| c.athlete_id).collect();
    let mut assignments: Vec<GroupAssignment> = Vec::new();
    for entry in db::campers::load_entries(&mut tx, camp_id, true).await? {
        if confirmed.contains(&entry.athlete_id) {
            continue;
        }
        db::campers::deactivate(&mut tx, entry.id, &started_at).await?;
        tracing::info!(camper_id = %entry.id, "Deactivated camper with unconfirmed registration");
        if entry.assigned_group_id.is_some() {
            assignments.push(GroupAssignment {
                id: uuid_utils::generate(),
                camp_id,
                camper_id: entry.id,
                run_id: Some(run_id),
                from_group_id: entry.assigned_group_id,
                to_group_id: None,
                assignment_type: AssignmentType::Auto,
                reason: DEACTIVATED_REASON.to_string(),
                caused_size_violation: false,
                caused_grade_violation: false,
                caused_friend_split: false,
                assigned_by: request.triggered_by.clone(),
                created_at: started_at,
            });
        }
    }

    db::groups::ensure_groups(&mut tx, camp_id, constraints.num_groups, &started_at).await?;
    let groups = db::groups::load_groups(&mut tx, camp_id).await?;
    let entries = db::campers::load_entries(&mut tx, camp_id, true).await?;

    let analysis = build_clusters(&entries, &constraints);
    warnings.extend(unmatched_request_warnings(&analysis));

    let allocation = allocate(&AllocationInput {
        entries: &entries,
        clusters: &analysis,
        groups: &groups,
        constraints,
        run_type: request.run_type,
    });

    let by_id: HashMap<Uuid, _> = entries.iter().map(|e| (e.id, e)).collect();
    for placement in allocation.placements.iter().filter(|p| !p.held) {
        let Some(entry) = by_id.get(&placement.camper_id) else {
            continue;
        };
        let unchanged = entry.assigned_group_id == placement.group_id
            && entry.assignment_type == placement.assignment_type
            && entry.assignment_reason == placement.reason;
        if !unchanged {
            db::campers::update_placement(
                &mut tx,
                placement.camper_id,
                placement.group_id,
                placement.assignment_type,
                placement.reason.as_deref(),
                &started_at,
            )
            .await?;
        }
    }
    for entry in &entries {
        let cluster_id = analysis.cluster_of.get(&entry.id).copied();
        if entry.friend_group_id != cluster_id {
            db::campers::set_friend_group(&mut tx, entry.id, cluster_id).await?;
        }
    }

    let groups = db::groups::recompute_group_stats(&mut tx, camp_id, &constraints, &started_at).await?;
    let group_by_id: HashMap<Uuid, &CampGroup> = groups.iter().map(|g| (g.id, g)).collect();

    for plan in &allocation.plans {
        let target = plan.to_group_id.and_then(|g| group_by_id.get(&g));
        assignments.push(GroupAssignment {
            id: uuid_utils::generate(),
            camp_id,
            camper_id: plan.camper_id,
            run_id: Some(run_id),
            from_group_id: plan.from_group_id,
            to_group_id: plan.to_group_id,
            assignment_type: AssignmentType::Auto,
            reason: plan.reason.clone(),
            caused_size_violation: target.map_or(false, |g| g.size_violation),
            caused_grade_violation: target.map_or(false, |g| g.grade_violation),
            caused_friend_split: plan.caused_friend_split,
            assigned_by: request.triggered_by.clone(),
            created_at: started_at,
        });
    }

    let active_groups: Vec<CampGroup> = groups
        .iter()
        .filter(|g| g.group_index <= constraints.num_groups)
        .cloned()
        .collect();
    let findings = audit(&AuditInput {
        groups: &groups,
        constraints: &constraints,
        entries: &entries,
        cluster_findings: &analysis.findings,
        allocation_findings: &allocation.findings,
    });
    let existing = db::violations::load_for_camp(&mut tx, camp_id, false).await?;
    let reconciliation = reconcile(&existing, findings);

    let completed_at = time::now();
    let run = GroupingRun {
        id: run_id,
        camp_id,
        run_type: request.run_type,
        status: GroupingStatus::Completed,
        success: true,
        error_message: None,
        triggered_by: request.triggered_by.clone(),
        trigger_reason: request.trigger_reason.clone(),
        total_campers: entries.len() as i32,
        total_friend_clusters: analysis.clusters.len() as i32,
        late_registrations_count: entries.iter().filter(|e| e.is_late_registration).count() as i32,
        grade_discrepancies_count: entries.iter().filter(|e| e.grade_discrepancy).count() as i32,
        max_group_size: constraints.max_group_size,
        num_groups: constraints.num_groups,
        max_grade_spread: constraints.max_grade_spread,
        execution_time_ms: clock.elapsed().as_millis() as i64,
        campers_auto_placed: allocation.campers_auto_placed as i32,
        clusters_placed_intact: allocation.clusters_placed_intact as i32,
        clusters_split: allocation.clusters_split as i32,
        unplaced_campers: allocation.unplaced as i32,
        total_violations: (reconciliation.still_open.len() + reconciliation.raise.len()) as i32,
        preserved_manual_overrides_count: allocation.preserved_manual_overrides as i32,
        warnings,
        started_at,
        completed_at,
    };

    // Run row first: clusters, assignments and violations reference it
    db::runs::insert_run(&mut tx, &run).await?;

    let outcomes: HashMap<Uuid, _> = allocation
        .cluster_outcomes
        .iter()
        .map(|o| (o.cluster_id, o))
        .collect();
    for cluster in &analysis.clusters {
        db::clusters::insert_cluster(&mut tx, run_id, camp_id, cluster, outcomes.get(&cluster.id).copied()).await?;
    }

    for assignment in &assignments {
        db::assignments::insert_assignment(&mut tx, assignment).await?;
    }

    let mut violations_raised = Vec::with_capacity(reconciliation.raise.len());
    for finding in reconciliation.raise {
        let violation = finding.into_violation(camp_id, Some(run_id), completed_at);
        db::violations::insert_violation(&mut tx, &violation).await?;
        db::violations::link_to_run(&mut tx, run_id, violation.id, RunViolationDisposition::Raised).await?;
        violations_raised.push(violation);
    }
    for violation_id in &reconciliation.still_open {
        db::violations::link_to_run(&mut tx, run_id, *violation_id, RunViolationDisposition::StillOpen).await?;
    }

    let auto_fix_note = format!("Condition no longer present after run {}", run_id);
    for violation_id in &reconciliation.auto_fix {
        db::violations::resolve(
            &mut tx,
            *violation_id,
            ResolutionType::AutoFixed,
            SYSTEM_ACTOR,
            Some(&auto_fix_note),
            &completed_at,
        )
        .await?;
        db::violations::link_to_run(&mut tx, run_id, *violation_id, RunViolationDisposition::AutoFixed).await?;
    }

    tx.commit().await?;

    tracing::info!(
        camp_id = %camp_id,
        run_id = %run_id,
        campers = run.total_campers,
        clusters = run.total_friend_clusters,
        auto_placed = run.campers_auto_placed,
        preserved = run.preserved_manual_overrides_count,
        unplaced = run.unplaced_campers,
        raised = violations_raised.len(),
        auto_fixed = reconciliation.auto_fix.len(),
        elapsed_ms = run.execution_time_ms,
        "Grouping run completed"
    );

    Ok(RunReport {
        open_violations: run.total_violations as usize,
        run,
        groups: active_groups,
        assignments_recorded: assignments.len(),
        violations_raised,
        violations_auto_fixed: reconciliation.auto_fix,
    })
}

/// Write a failed run record for a run that was rejected
pub async fn record_failed_run(
    pool: &SqlitePool,
    camp_id: Uuid,
    request: &RunRequest,
    error: &GroupingError,
    started_at: DateTime<Utc>,
) -> Result<GroupingRun> {
    let mut tx = pool.begin().await?;
    let camp = db::roster::load_camp(&mut tx, camp_id).await?;

    let run = failed_run(&camp, request, error, started_at);
    db::runs::insert_run(&mut tx, &run).await?;
    tx.commit().await?;

    tracing::warn!(
        camp_id = %camp_id,
        run_id = %run.id,
        error = %error,
        "Recorded failed grouping run"
    );

    Ok(run)
}

fn failed_run(camp: &CampRecord, request: &RunRequest, error: &GroupingError, started_at: DateTime<Utc>) -> GroupingRun {
    let completed_at = time::now();
    GroupingRun {
        id: uuid_utils::generate(),
        camp_id: camp.id,
        run_type: request.run_type,
        status: GroupingStatus::Failed,
        success: false,
        error_message: Some(error.to_string()),
        triggered_by: request.triggered_by.clone(),
        trigger_reason: request.trigger_reason.clone(),
        total_campers: 0,
        total_friend_clusters: 0,
        late_registrations_count: 0,
        grade_discrepancies_count: 0,
        max_group_size: camp.max_group_size,
        num_groups: camp.num_groups,
        max_grade_spread: camp.max_grade_spread,
        execution_time_ms: (completed_at - started_at).num_milliseconds().max(0),
        campers_auto_placed: 0,
        clusters_placed_intact: 0,
        clusters_split: 0,
        unplaced_campers: 0,
        total_violations: 0,
        preserved_manual_overrides_count: 0,
        warnings: Vec::new(),
        started_at,
        completed_at,
    }
}

/// Warnings about registrations the normalizer dropped or trimmed
fn roster_warnings(roster: &[RosterRow], kept: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    if roster.len() > kept {
        warnings.push(format!(
            "Ignored {} duplicate registration(s); the earliest registration per athlete was used",
            roster.len() - kept
        ));
    }
    for row in roster.iter().filter(|r| r.friend_requests.contains(&r.athlete_id)) {
        warnings.push(format!(
            "Ignored self friend request on registration {}",
            row.registration_id
        ));
    }
    warnings
}

fn unmatched_request_warnings(analysis: &ClusterAnalysis) -> Vec<String> {
    analysis
        .unmatched_requests
        .iter()
        .map(|request| {
            tracing::warn!(
                camper_id = %request.camper_id,
                requested_athlete_id = %request.requested_athlete_id,
                "Dropping friend request for athlete not in this camp"
            );
            format!(
                "Camper {} requested athlete {} who is not a confirmed camper of this camp",
                request.camper_id, request.requested_athlete_id
            )
        })
        .collect()
}
