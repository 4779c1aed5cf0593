//! Violation auditor
//!
//! Evaluates a finished assignment against the camp's constraints and turns
//! every shortfall into a typed finding. Findings carry a fingerprint (kind
//! plus the ids they are about) so the same condition can be recognised
//! across runs:
//!
//! - an open violation whose condition is gone is resolved as `auto_fixed`
//! - a condition that is already open, accepted or dismissed is not raised again
//! - anything else becomes a new unresolved violation
//!
//! Violations are never deleted, only transitioned.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use camp_common::db::{CampGroup, CamperSessionEntry, ConstraintViolation, FriendCluster, GroupConstraints};
use camp_common::{ResolutionType, ViolationKind, ViolationSeverity, ViolationStatus};

/// A constraint shortfall found by the builder, allocator or auditor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationFinding {
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub fingerprint: String,
    pub group_id: Option<Uuid>,
    pub friend_cluster_id: Option<Uuid>,
    pub camper_ids: Vec<Uuid>,
    pub title: String,
    pub description: String,
    pub suggested_resolution: Option<String>,
}

pub fn group_fingerprint(kind: ViolationKind, group_id: Uuid) -> String {
    format!("{}:group:{}", kind, group_id)
}

pub fn camper_fingerprint(kind: ViolationKind, camper_id: Uuid) -> String {
    format!("{}:camper:{}", kind, camper_id)
}

/// Fingerprint over a set of campers; order of `ids` does not matter
pub fn members_fingerprint(kind: ViolationKind, ids: &[Uuid]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort();
    let joined: Vec<String> = sorted.iter().map(Uuid::to_string).collect();
    format!("{}:campers:{}", kind, joined.join(","))
}

impl ViolationFinding {
    fn new(kind: ViolationKind, fingerprint: String, title: String, description: String) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            fingerprint,
            group_id: None,
            friend_cluster_id: None,
            camper_ids: Vec::new(),
            title,
            description,
            suggested_resolution: None,
        }
    }

    pub fn size_exceeded(group: &CampGroup, constraints: &GroupConstraints) -> Self {
        let kind = ViolationKind::SizeExceeded;
        Self {
            group_id: Some(group.id),
            suggested_resolution: Some("Move campers out of this group or raise the camp's max group size".to_string()),
            ..Self::new(
                kind,
                group_fingerprint(kind, group.id),
                format!("{} is over capacity", group.name),
                format!(
                    "{} has {} campers; the limit is {}",
                    group.name, group.camper_count, constraints.max_group_size
                ),
            )
        }
    }

    pub fn grade_spread_exceeded(group: &CampGroup, constraints: &GroupConstraints) -> Self {
        let kind = ViolationKind::GradeSpreadExceeded;
        Self {
            group_id: Some(group.id),
            suggested_resolution: Some("Move the youngest or oldest campers to a closer-grade group".to_string()),
            ..Self::new(
                kind,
                group_fingerprint(kind, group.id),
                format!("{} spans too many grades", group.name),
                format!(
                    "{} spans grades {} to {} (spread {}); the limit is {}",
                    group.name,
                    group.min_grade.unwrap_or_default(),
                    group.max_grade.unwrap_or_default(),
                    group.grade_spread,
                    constraints.max_grade_spread
                ),
            )
        }
    }

    pub fn friend_group_too_large(cluster: &FriendCluster, constraints: &GroupConstraints) -> Self {
        let kind = ViolationKind::FriendGroupTooLarge;
        Self {
            friend_cluster_id: Some(cluster.id),
            camper_ids: cluster.member_ids.clone(),
            suggested_resolution: Some("Ask families which friend requests matter most".to_string()),
            ..Self::new(
                kind,
                members_fingerprint(kind, &cluster.member_ids),
                format!("Friend group of {} cannot fit in one group", cluster.member_count),
                format!(
                    "{} campers are linked by friend requests but a group holds at most {}",
                    cluster.member_count, constraints.max_group_size
                ),
            )
        }
    }

    /// `placements` lists every cluster member with the group it ended up in
    pub fn friend_group_split(
        cluster_id: Uuid,
        placements: &[(&CamperSessionEntry, Option<Uuid>)],
        group_names: &HashMap<Uuid, String>,
    ) -> Self {
        let kind = ViolationKind::FriendGroupSplit;
        let camper_ids: Vec<Uuid> = placements.iter().map(|(entry, _)| entry.id).collect();
        let where_placed: Vec<String> = placements
            .iter()
            .map(|(entry, group)| {
                let group_name = group
                    .and_then(|g| group_names.get(&g).cloned())
                    .unwrap_or_else(|| "unplaced".to_string());
                format!("{} -> {}", entry.display_name(), group_name)
            })
            .collect();
        let distinct: HashSet<Option<Uuid>> = placements.iter().map(|(_, g)| *g).collect();

        Self {
            friend_cluster_id: Some(cluster_id),
            camper_ids: camper_ids.clone(),
            suggested_resolution: Some("Move separated friends together or accept the split".to_string()),
            ..Self::new(
                kind,
                members_fingerprint(kind, &camper_ids),
                format!("Friend group of {} was split", placements.len()),
                format!(
                    "Friend group split across {} groups: {}",
                    distinct.len(),
                    where_placed.join("; ")
                ),
            )
        }
    }

    pub fn impossible_placement(entry: &CamperSessionEntry) -> Self {
        let kind = ViolationKind::ImpossiblePlacement;
        Self {
            camper_ids: vec![entry.id],
            suggested_resolution: Some("Assign this camper manually and accept the resulting constraint trade-off".to_string()),
            ..Self::new(
                kind,
                camper_fingerprint(kind, entry.id),
                format!("{} could not be placed", entry.display_name()),
                format!(
                    "No group can take {} (grade {}) without breaking a size or grade spread limit",
                    entry.display_name(),
                    entry.grade_validated
                ),
            )
        }
    }

    pub fn grade_discrepancy(entry: &CamperSessionEntry) -> Self {
        let kind = ViolationKind::GradeDiscrepancy;
        Self {
            camper_ids: vec![entry.id],
            suggested_resolution: Some("Confirm the camper's grade with the family".to_string()),
            ..Self::new(
                kind,
                camper_fingerprint(kind, entry.id),
                format!("Grade mismatch for {}", entry.display_name()),
                format!(
                    "Registration says grade {}, date of birth implies grade {}; using grade {}",
                    entry
                        .grade_from_registration
                        .map(|g| g.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    entry.grade_computed_from_dob,
                    entry.grade_validated
                ),
            )
        }
    }

    /// Materialize as a new unresolved violation
    pub fn into_violation(self, camp_id: Uuid, run_id: Option<Uuid>, now: DateTime<Utc>) -> ConstraintViolation {
        ConstraintViolation {
            id: Uuid::new_v4(),
            camp_id,
            run_id,
            kind: self.kind,
            severity: self.severity,
            fingerprint: self.fingerprint,
            group_id: self.group_id,
            friend_cluster_id: self.friend_cluster_id,
            camper_ids: self.camper_ids,
            title: self.title,
            description: self.description,
            suggested_resolution: self.suggested_resolution,
            status: ViolationStatus::Unresolved,
            resolution_type: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
            resolved_at: None,
        }
    }
}

/// Everything the auditor looks at after allocation
pub struct AuditInput<'a> {
    /// Groups with freshly recomputed stats
    pub groups: &'a [CampGroup],
    pub constraints: &'a GroupConstraints,
    pub entries: &'a [CamperSessionEntry],
    /// From the friend cluster builder
    pub cluster_findings: &'a [ViolationFinding],
    /// From the allocator (splits, impossible placements)
    pub allocation_findings: &'a [ViolationFinding],
}

/// Collect every finding for a finished assignment
pub fn audit(input: &AuditInput<'_>) -> Vec<ViolationFinding> {
    let mut findings = Vec::new();

    let mut groups: Vec<&CampGroup> = input.groups.iter().collect();
    groups.sort_by_key(|g| g.group_index);
    for group in groups {
        if group.size_violation {
            findings.push(ViolationFinding::size_exceeded(group, input.constraints));
        }
        if group.grade_violation {
            findings.push(ViolationFinding::grade_spread_exceeded(group, input.constraints));
        }
    }

    findings.extend(input.cluster_findings.iter().cloned());
    findings.extend(input.allocation_findings.iter().cloned());

    findings.extend(
        input
            .entries
            .iter()
            .filter(|e| e.is_active && e.grade_discrepancy && !e.grade_discrepancy_resolved)
            .map(ViolationFinding::grade_discrepancy),
    );

    findings
}

/// What persisting a run's findings must do to the violation table
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// New unresolved violations to insert
    pub raise: Vec<ViolationFinding>,
    /// Open violations whose condition is gone
    pub auto_fix: Vec<Uuid>,
    /// Open violations whose condition is still present
    pub still_open: Vec<Uuid>,
}

/// Match a run's findings against a camp's existing violations
pub fn reconcile(existing: &[ConstraintViolation], findings: Vec<ViolationFinding>) -> Reconciliation {
    let current: HashSet<&str> = findings.iter().map(|f| f.fingerprint.as_str()).collect();

    // Conditions a human already has in front of them or has signed off on
    let suppressed: HashSet<&str> = existing
        .iter()
        .filter(|v| {
            v.is_open()
                || matches!(
                    v.resolution_type,
                    Some(ResolutionType::Accepted) | Some(ResolutionType::Dismissed)
                )
        })
        .map(|v| v.fingerprint.as_str())
        .collect();

    let mut result = Reconciliation::default();
    for violation in existing.iter().filter(|v| v.is_open()) {
        if current.contains(violation.fingerprint.as_str()) {
            result.still_open.push(violation.id);
        } else {
            result.auto_fix.push(violation.id);
        }
    }

    let mut raised = HashSet::new();
    for finding in findings {
        if suppressed.contains(finding.fingerprint.as_str()) {
            continue;
        }
        if raised.insert(finding.fingerprint.clone()) {
            result.raise.push(finding);
        }
    }

    result
}
