//! Group allocator
//!
//! Greedy cluster-first bin packing with override pinning:
//!
//! 1. Campers with a manual/override placement in an active group are held
//!    in place (for incremental runs, every placed camper is held).
//! 2. Group state is seeded from the held campers.
//! 3. The remaining members of each friend cluster form one placement unit;
//!    units are ordered largest first, then by lower average grade, then by
//!    smallest athlete id.
//! 4. A unit goes whole into the eligible group with the most remaining
//!    capacity (lowest index on ties). If no group can take it whole, its
//!    members are placed one at a time by the same rule.
//! 5. Campers no group can take stay unplaced and are reported.
//!
//! The allocator never breaks a hard limit itself; hard violations can only
//! come from held campers. Identical input always gives identical output.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use camp_common::db::{CampGroup, CamperSessionEntry, FriendCluster, GroupConstraints};
use camp_common::{AssignmentType, RunType};

use crate::auditor::ViolationFinding;
use crate::clusters::ClusterAnalysis;
use crate::stats::GroupStats;

pub struct AllocationInput<'a> {
    /// Active campers of the camp
    pub entries: &'a [CamperSessionEntry],
    pub clusters: &'a ClusterAnalysis,
    /// Every group of the camp; only indexes 1..=num_groups receive campers
    pub groups: &'a [CampGroup],
    pub constraints: GroupConstraints,
    pub run_type: RunType,
}

/// Final state of one camper after allocation
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub camper_id: Uuid,
    pub group_id: Option<Uuid>,
    pub assignment_type: AssignmentType,
    pub reason: Option<String>,
    /// Left where it was rather than allocated
    pub held: bool,
}

/// A camper whose group changes; becomes one GroupAssignment record
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPlan {
    pub camper_id: Uuid,
    pub from_group_id: Option<Uuid>,
    pub to_group_id: Option<Uuid>,
    pub reason: String,
    pub caused_friend_split: bool,
}

/// How one friend cluster ended up
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub cluster_id: Uuid,
    pub placed_intact: bool,
    /// The shared group when placed intact
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Default)]
pub struct AllocationResult {
    /// One per active camper, in the order of the input entries
    pub placements: Vec<Placement>,
    pub plans: Vec<AssignmentPlan>,
    pub cluster_outcomes: Vec<ClusterOutcome>,
    /// `friend_group_split` and `impossible_placement` findings
    pub findings: Vec<ViolationFinding>,
    pub held_in_place: usize,
    pub preserved_manual_overrides: usize,
    pub campers_auto_placed: usize,
    /// Multi-member clusters that ended up in one group
    pub clusters_placed_intact: usize,
    /// Clusters whose members ended up in more than one group
    pub clusters_split: usize,
    pub unplaced: usize,
}

impl AllocationResult {
    pub fn group_of(&self, camper_id: Uuid) -> Option<Uuid> {
        self.placements
            .iter()
            .find(|p| p.camper_id == camper_id)
            .and_then(|p| p.group_id)
    }
}

/// Running state of one destination group
#[derive(Debug, Clone)]
struct Slot {
    group_id: Uuid,
    name: String,
    stats: GroupStats,
}

impl Slot {
    fn remaining(&self, constraints: &GroupConstraints) -> i32 {
        constraints.max_group_size - self.stats.camper_count
    }

    /// Would `count` campers with grades in `lo..=hi` fit here?
    fn fits(&self, count: i32, lo: i32, hi: i32, constraints: &GroupConstraints) -> bool {
        if self.stats.camper_count + count > constraints.max_group_size {
            return false;
        }
        let new_lo = self.stats.min_grade.map_or(lo, |m| m.min(lo));
        let new_hi = self.stats.max_grade.map_or(hi, |m| m.max(hi));
        new_hi - new_lo <= constraints.max_grade_spread
    }

    fn add(&mut self, grade: i32) {
        self.stats.add(grade);
    }
}

/// Eligible slot with the most remaining capacity; slots are in index order
/// so the strict comparison keeps the lowest index on ties
fn best_slot(slots: &[Slot], count: i32, lo: i32, hi: i32, constraints: &GroupConstraints) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (idx, slot) in slots.iter().enumerate() {
        if !slot.fits(count, lo, hi, constraints) {
            continue;
        }
        let remaining = slot.remaining(constraints);
        if best.map_or(true, |(_, r)| remaining > r) {
            best = Some((idx, remaining));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Unpinned members of one cluster, placed together when possible
struct Unit<'a> {
    cluster: &'a FriendCluster,
    members: Vec<&'a CamperSessionEntry>,
    grade_sum: i64,
    /// Group already holding every held member of this cluster
    anchor: Option<usize>,
}

impl Unit<'_> {
    fn grade_range(&self) -> (i32, i32) {
        let lo = self.members.iter().map(|m| m.grade_validated).min().unwrap_or(0);
        let hi = self.members.iter().map(|m| m.grade_validated).max().unwrap_or(0);
        (lo, hi)
    }

    fn first_athlete(&self) -> Option<Uuid> {
        self.members.first().map(|m| m.athlete_id)
    }

    /// Largest first, then lower average grade, then smallest athlete id
    fn placement_order(&self, other: &Self) -> Ordering {
        let (la, lb) = (self.members.len() as i64, other.members.len() as i64);
        lb.cmp(&la)
            .then_with(|| (self.grade_sum * lb).cmp(&(other.grade_sum * la)))
            .then_with(|| self.first_athlete().cmp(&other.first_athlete()))
    }
}

fn split_cause(cluster: &FriendCluster) -> &'static str {
    if cluster.exceeds_size_constraint {
        "due to size limit"
    } else if cluster.exceeds_grade_constraint {
        "due to grade spread limit"
    } else {
        "because no group had room for the whole cluster"
    }
}

/// Assign every active camper to at most one group
pub fn allocate(input: &AllocationInput<'_>) -> AllocationResult {
    let constraints = &input.constraints;

    let mut active_groups: Vec<&CampGroup> = input
        .groups
        .iter()
        .filter(|g| g.group_index >= 1 && g.group_index <= constraints.num_groups)
        .collect();
    active_groups.sort_by_key(|g| g.group_index);

    let mut slots: Vec<Slot> = active_groups
        .iter()
        .map(|g| Slot {
            group_id: g.id,
            name: g.name.clone(),
            stats: GroupStats::default(),
        })
        .collect();
    let slot_of: HashMap<Uuid, usize> = slots
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.group_id, idx))
        .collect();

    let entries: Vec<&CamperSessionEntry> = input.entries.iter().filter(|e| e.is_active).collect();
    let by_id: HashMap<Uuid, &CamperSessionEntry> = entries.iter().map(|e| (e.id, *e)).collect();

    // Step 1-2: hold pinned campers and seed their groups
    let mut held: HashSet<Uuid> = HashSet::new();
    let mut result = AllocationResult::default();
    for entry in &entries {
        let Some(slot_idx) = entry.assigned_group_id.and_then(|g| slot_of.get(&g).copied()) else {
            continue;
        };
        let keep = match input.run_type {
            RunType::Incremental => true,
            RunType::Initial | RunType::Rerun => entry.assignment_type.is_pinned(),
        };
        if keep {
            held.insert(entry.id);
            slots[slot_idx].add(entry.grade_validated);
            if entry.assignment_type.is_pinned() {
                result.preserved_manual_overrides += 1;
            }
        }
    }
    result.held_in_place = held.len();

    // Step 3: build and order placement units
    let mut units: Vec<Unit<'_>> = Vec::new();
    for cluster in &input.clusters.clusters {
        let members: Vec<&CamperSessionEntry> = cluster
            .member_ids
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .filter(|e| !held.contains(&e.id))
            .collect();
        if members.is_empty() {
            continue;
        }

        let held_groups: HashSet<usize> = cluster
            .member_ids
            .iter()
            .filter(|id| held.contains(id))
            .filter_map(|id| by_id.get(id).and_then(|e| e.assigned_group_id))
            .filter_map(|g| slot_of.get(&g).copied())
            .collect();
        let anchor = if held_groups.len() == 1 {
            held_groups.into_iter().next()
        } else {
            None
        };

        units.push(Unit {
            cluster,
            grade_sum: members.iter().map(|m| m.grade_validated as i64).sum(),
            members,
            anchor,
        });
    }
    units.sort_by(|a, b| a.placement_order(b));

    // Step 4-5: place units whole, else member by member
    let mut decided: HashMap<Uuid, (Option<usize>, String)> = HashMap::new();
    for unit in &units {
        let count = unit.members.len() as i32;
        let (lo, hi) = unit.grade_range();
        let cluster_size = unit.cluster.member_count;

        let anchored = unit
            .anchor
            .filter(|&idx| slots[idx].fits(count, lo, hi, constraints));
        let whole = anchored.or_else(|| best_slot(&slots, count, lo, hi, constraints));

        if let Some(slot_idx) = whole {
            let reason = if anchored.is_some() {
                format!("placed with friends already in {}", slots[slot_idx].name)
            } else if cluster_size > 1 {
                format!("placed with friend cluster of {}", cluster_size)
            } else {
                "placed individually".to_string()
            };
            for member in &unit.members {
                slots[slot_idx].add(member.grade_validated);
                decided.insert(member.id, (Some(slot_idx), reason.clone()));
            }
            tracing::debug!(
                cluster_id = %unit.cluster.id,
                members = count,
                group = %slots[slot_idx].name,
                "Placed cluster intact"
            );
            continue;
        }

        let mut members = unit.members.clone();
        members.sort_by_key(|m| (m.grade_validated, m.athlete_id));
        if count > 1 {
            tracing::debug!(
                cluster_id = %unit.cluster.id,
                members = count,
                "No group fits cluster whole, splitting"
            );
        }

        for member in members {
            let grade = member.grade_validated;
            match best_slot(&slots, 1, grade, grade, constraints) {
                Some(slot_idx) => {
                    slots[slot_idx].add(grade);
                    let reason = if cluster_size > 1 {
                        format!("split from friend cluster of {} {}", cluster_size, split_cause(unit.cluster))
                    } else {
                        "placed individually".to_string()
                    };
                    decided.insert(member.id, (Some(slot_idx), reason));
                }
                None => {
                    tracing::warn!(
                        camper_id = %member.id,
                        grade = grade,
                        "No group can take camper without breaking a hard limit"
                    );
                    decided.insert(
                        member.id,
                        (None, "unplaced: no group satisfies size and grade limits".to_string()),
                    );
                    result.findings.push(ViolationFinding::impossible_placement(member));
                }
            }
        }
    }

    // Final placement per camper
    for entry in &entries {
        let placement = if held.contains(&entry.id) {
            Placement {
                camper_id: entry.id,
                group_id: entry.assigned_group_id,
                assignment_type: entry.assignment_type,
                reason: entry.assignment_reason.clone(),
                held: true,
            }
        } else {
            let (slot_idx, reason) = decided
                .get(&entry.id)
                .cloned()
                .unwrap_or((None, "unplaced: not part of any friend cluster".to_string()));
            let group_id = slot_idx.map(|idx| slots[idx].group_id);
            if group_id.is_some() {
                result.campers_auto_placed += 1;
            }
            Placement {
                camper_id: entry.id,
                group_id,
                assignment_type: AssignmentType::Auto,
                reason: Some(reason),
                held: false,
            }
        };
        if placement.group_id.is_none() {
            result.unplaced += 1;
        }
        result.placements.push(placement);
    }

    let final_group: HashMap<Uuid, Option<Uuid>> = result
        .placements
        .iter()
        .map(|p| (p.camper_id, p.group_id))
        .collect();
    let group_names: HashMap<Uuid, String> = input
        .groups
        .iter()
        .map(|g| (g.id, g.name.clone()))
        .collect();

    // Cluster outcomes and split findings from the final state
    let mut split_members: HashSet<Uuid> = HashSet::new();
    for cluster in &input.clusters.clusters {
        let members: Vec<(&CamperSessionEntry, Option<Uuid>)> = cluster
            .member_ids
            .iter()
            .filter_map(|id| by_id.get(id).map(|e| (*e, final_group.get(id).copied().flatten())))
            .collect();
        let distinct: HashSet<Option<Uuid>> = members.iter().map(|(_, g)| *g).collect();

        let shared = if distinct.len() == 1 {
            distinct.iter().next().copied().flatten()
        } else {
            None
        };
        result.cluster_outcomes.push(ClusterOutcome {
            cluster_id: cluster.id,
            placed_intact: shared.is_some(),
            group_id: shared,
        });

        if members.len() > 1 {
            if shared.is_some() {
                result.clusters_placed_intact += 1;
            } else if distinct.len() > 1 {
                result.clusters_split += 1;
                split_members.extend(members.iter().map(|(e, _)| e.id));
                result
                    .findings
                    .push(ViolationFinding::friend_group_split(cluster.id, &members, &group_names));
            }
        }
    }

    // Audit plans for every camper whose group changed
    for placement in result.placements.iter().filter(|p| !p.held) {
        let Some(entry) = by_id.get(&placement.camper_id) else {
            continue;
        };
        if entry.assigned_group_id == placement.group_id {
            continue;
        }
        result.plans.push(AssignmentPlan {
            camper_id: entry.id,
            from_group_id: entry.assigned_group_id,
            to_group_id: placement.group_id,
            reason: placement.reason.clone().unwrap_or_default(),
            caused_friend_split: split_members.contains(&entry.id),
        });
    }

    result
}
