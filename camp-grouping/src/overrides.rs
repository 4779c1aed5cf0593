//! Manual override layer
//!
//! Human corrections to a grouping: moving a camper between groups, pinning
//! a placement so re-runs keep it, and resolving violations. A move may
//! knowingly break a hard limit; it is allowed, logged with the violations
//! it caused, and those violations are raised for follow-up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use camp_common::db::{CampGroup, CamperSessionEntry, ConstraintViolation, GroupAssignment, GroupConstraints};
use camp_common::{time, uuid_utils, AssignmentType, ResolutionType, ViolationKind};

use crate::auditor::{camper_fingerprint, group_fingerprint, members_fingerprint, ViolationFinding};
use crate::clusters::build_clusters;
use crate::db;
use crate::error::{GroupingError, Result};

const DEFAULT_MOVE_REASON: &str = "manual move";

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub reason: Option<String>,
    pub moved_by: String,
}

/// Result of a manual move
#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    /// The camper after the move
    pub entry: CamperSessionEntry,
    pub assignment: GroupAssignment,
    pub violations_raised: Vec<ConstraintViolation>,
    pub violations_resolved: Vec<Uuid>,
}

/// Move a camper to another active group of the same camp
pub async fn move_camper(
    pool: &SqlitePool,
    camper_id: Uuid,
    target_group_id: Uuid,
    options: &MoveOptions,
) -> Result<MoveOutcome> {
    let now = time::now();
    let mut tx = pool.begin().await?;

    let entry = load_active_entry(&mut tx, camper_id).await?;
    let camp = db::roster::load_camp(&mut tx, entry.camp_id).await?;
    let constraints = camp.constraints();

    let target = db::groups::load_group(&mut tx, target_group_id)
        .await?
        .filter(|g| g.camp_id == camp.id && g.group_index >= 1 && g.group_index <= constraints.num_groups)
        .ok_or(GroupingError::GroupNotInCamp {
            group_id: target_group_id,
            camp_id: camp.id,
        })?;

    if entry.assigned_group_id == Some(target.id) {
        return Err(GroupingError::InvalidInput(format!(
            "{} is already in {}",
            entry.display_name(),
            target.name
        )));
    }

    let reason = options
        .reason
        .clone()
        .unwrap_or_else(|| DEFAULT_MOVE_REASON.to_string());
    db::campers::update_placement(
        &mut tx,
        camper_id,
        Some(target.id),
        AssignmentType::Manual,
        Some(&reason),
        &now,
    )
    .await?;

    let groups = db::groups::recompute_group_stats(&mut tx, camp.id, &constraints, &now).await?;
    let entries = db::campers::load_entries(&mut tx, camp.id, true).await?;

    let mut outcome = Settlement::new(camp.id, &options.moved_by, &entry, &target, now);

    // Source and target groups: raise what the move broke, resolve what it cleared
    let touched: Vec<&CampGroup> = groups
        .iter()
        .filter(|g| g.id == target.id || Some(g.id) == entry.assigned_group_id)
        .collect();
    let mut caused_size_violation = false;
    let mut caused_grade_violation = false;
    for group in touched {
        let is_target = group.id == target.id;
        caused_size_violation |= is_target && group.size_violation;
        caused_grade_violation |= is_target && group.grade_violation;

        let size = group
            .size_violation
            .then(|| ViolationFinding::size_exceeded(group, &constraints));
        outcome
            .settle(&mut tx, group_fingerprint(ViolationKind::SizeExceeded, group.id), size)
            .await?;

        let spread = group
            .grade_violation
            .then(|| ViolationFinding::grade_spread_exceeded(group, &constraints));
        outcome
            .settle(&mut tx, group_fingerprint(ViolationKind::GradeSpreadExceeded, group.id), spread)
            .await?;
    }

    // The camper has a home now
    outcome
        .settle(&mut tx, camper_fingerprint(ViolationKind::ImpossiblePlacement, camper_id), None)
        .await?;

    let caused_friend_split = settle_friend_split(&mut tx, &mut outcome, &entries, &groups, &entry, &constraints).await?;

    let assignment = GroupAssignment {
        id: uuid_utils::generate(),
        camp_id: camp.id,
        camper_id,
        run_id: None,
        from_group_id: entry.assigned_group_id,
        to_group_id: Some(target.id),
        assignment_type: AssignmentType::Manual,
        reason,
        caused_size_violation,
        caused_grade_violation,
        caused_friend_split,
        assigned_by: options.moved_by.clone(),
        created_at: now,
    };
    db::assignments::insert_assignment(&mut tx, &assignment).await?;

    let moved = load_active_entry(&mut tx, camper_id).await?;
    tx.commit().await?;

    tracing::info!(
        camper_id = %camper_id,
        from_group = ?entry.assigned_group_id,
        to_group = %target.id,
        moved_by = %options.moved_by,
        caused_size_violation,
        caused_grade_violation,
        caused_friend_split,
        raised = outcome.raised.len(),
        resolved = outcome.resolved.len(),
        "Camper moved manually"
    );

    Ok(MoveOutcome {
        entry: moved,
        assignment,
        violations_raised: outcome.raised,
        violations_resolved: outcome.resolved,
    })
}

/// Raise or resolve the split violation of the moved camper's friend cluster
///
/// Returns true when this move is what split the cluster.
async fn settle_friend_split(
    conn: &mut SqliteConnection,
    outcome: &mut Settlement<'_>,
    entries: &[CamperSessionEntry],
    groups: &[CampGroup],
    moved: &CamperSessionEntry,
    constraints: &GroupConstraints,
) -> Result<bool> {
    let analysis = build_clusters(entries, constraints);
    let Some(cluster) = analysis
        .cluster_of
        .get(&moved.id)
        .and_then(|id| analysis.cluster(*id))
    else {
        return Ok(false);
    };
    if cluster.member_count < 2 {
        return Ok(false);
    }

    let members: Vec<(&CamperSessionEntry, Option<Uuid>)> = cluster
        .member_ids
        .iter()
        .filter_map(|id| entries.iter().find(|e| e.id == *id))
        .map(|e| (e, e.assigned_group_id))
        .collect();

    let split_now = members
        .iter()
        .map(|(_, g)| *g)
        .collect::<HashSet<_>>()
        .len()
        > 1;
    let split_before = members
        .iter()
        .map(|(e, g)| if e.id == moved.id { moved.assigned_group_id } else { *g })
        .collect::<HashSet<_>>()
        .len()
        > 1;

    let group_names: HashMap<Uuid, String> = groups.iter().map(|g| (g.id, g.name.clone())).collect();
    let finding = split_now.then(|| ViolationFinding::friend_group_split(cluster.id, &members, &group_names));
    outcome
        .settle(conn, members_fingerprint(ViolationKind::FriendGroupSplit, &cluster.member_ids), finding)
        .await?;

    Ok(split_now && !split_before)
}

/// Violation transitions made by one manual move
struct Settlement<'a> {
    camp_id: Uuid,
    actor: &'a str,
    note: String,
    now: DateTime<Utc>,
    raised: Vec<ConstraintViolation>,
    resolved: Vec<Uuid>,
}

impl<'a> Settlement<'a> {
    fn new(camp_id: Uuid, actor: &'a str, entry: &CamperSessionEntry, target: &CampGroup, now: DateTime<Utc>) -> Self {
        Self {
            camp_id,
            actor,
            note: format!("Cleared by moving {} to {}", entry.display_name(), target.name),
            now,
            raised: Vec::new(),
            resolved: Vec::new(),
        }
    }

    /// Bring the violations of one condition in line with `finding`
    ///
    /// A present condition is raised unless a human already has it open or
    /// signed it off; an absent one resolves whatever is still open.
    async fn settle(
        &mut self,
        conn: &mut SqliteConnection,
        fingerprint: String,
        finding: Option<ViolationFinding>,
    ) -> Result<()> {
        let existing = db::violations::find_by_fingerprint(conn, self.camp_id, &fingerprint).await?;

        match finding {
            Some(finding) => {
                let suppressed = existing.iter().any(|v| {
                    v.is_open()
                        || matches!(
                            v.resolution_type,
                            Some(ResolutionType::Accepted) | Some(ResolutionType::Dismissed)
                        )
                });
                if !suppressed {
                    let violation = finding.into_violation(self.camp_id, None, self.now);
                    db::violations::insert_violation(conn, &violation).await?;
                    self.raised.push(violation);
                }
            }
            None => {
                for violation in existing.iter().filter(|v| v.is_open()) {
                    let changed = db::violations::resolve(
                        conn,
                        violation.id,
                        ResolutionType::ManualOverride,
                        self.actor,
                        Some(&self.note),
                        &self.now,
                    )
                    .await?;
                    if changed {
                        self.resolved.push(violation.id);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Mark a camper's current placement as an override so re-runs keep it
pub async fn pin_camper(
    pool: &SqlitePool,
    camper_id: Uuid,
    reason: Option<&str>,
    pinned_by: &str,
) -> Result<CamperSessionEntry> {
    let now = time::now();
    let mut tx = pool.begin().await?;

    let entry = load_active_entry(&mut tx, camper_id).await?;
    let Some(group_id) = entry.assigned_group_id else {
        return Err(GroupingError::InvalidInput(format!(
            "{} is not placed in a group",
            entry.display_name()
        )));
    };

    let reason = reason
        .map(str::to_string)
        .or_else(|| entry.assignment_reason.clone());
    db::campers::update_placement(
        &mut tx,
        camper_id,
        Some(group_id),
        AssignmentType::Override,
        reason.as_deref(),
        &now,
    )
    .await?;

    let pinned = load_active_entry(&mut tx, camper_id).await?;
    tx.commit().await?;

    tracing::info!(camper_id = %camper_id, group_id = %group_id, pinned_by = %pinned_by, "Camper placement pinned");

    Ok(pinned)
}

/// Resolve an unresolved violation on a human's behalf
pub async fn resolve_violation(
    pool: &SqlitePool,
    violation_id: Uuid,
    resolution: ResolutionType,
    resolved_by: &str,
    notes: Option<&str>,
) -> Result<ConstraintViolation> {
    if resolution == ResolutionType::AutoFixed {
        return Err(GroupingError::InvalidInput(
            "auto_fixed is reserved for violations cleared by a grouping run".to_string(),
        ));
    }

    let now = time::now();
    let mut tx = pool.begin().await?;

    let violation = db::violations::get_violation(&mut tx, violation_id)
        .await?
        .ok_or(GroupingError::ViolationNotFound(violation_id))?;
    if !violation.is_open() {
        return Err(GroupingError::ViolationAlreadyResolved(violation_id));
    }

    if !db::violations::resolve(&mut tx, violation_id, resolution, resolved_by, notes, &now).await? {
        return Err(GroupingError::ViolationAlreadyResolved(violation_id));
    }

    // A confirmed grade stops being a discrepancy for the camper
    if violation.kind == ViolationKind::GradeDiscrepancy {
        for camper_id in &violation.camper_ids {
            db::campers::set_discrepancy_resolved(&mut tx, *camper_id, &now).await?;
        }
    }

    let resolved = db::violations::get_violation(&mut tx, violation_id)
        .await?
        .ok_or(GroupingError::ViolationNotFound(violation_id))?;
    tx.commit().await?;

    tracing::info!(
        violation_id = %violation_id,
        kind = %violation.kind,
        resolution = %resolution,
        resolved_by = %resolved_by,
        "Violation resolved"
    );

    Ok(resolved)
}

async fn load_active_entry(conn: &mut SqliteConnection, camper_id: Uuid) -> Result<CamperSessionEntry> {
    db::campers::load_entry(conn, camper_id)
        .await?
        .filter(|e| e.is_active)
        .ok_or(GroupingError::CamperNotInCamp { camper_id })
}
