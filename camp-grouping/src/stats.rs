//! Group membership statistics
//!
//! Every change to group membership ends with a recompute of these stats
//! inside the same transaction (see `db::groups::recompute_group_stats`).
//! The allocator and the auditor use the same arithmetic in memory.

use camp_common::db::{CampGroup, GroupConstraints};

/// Derived stats for one group's live membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupStats {
    pub camper_count: i32,
    pub min_grade: Option<i32>,
    pub max_grade: Option<i32>,
}

impl GroupStats {
    pub fn from_grades<I: IntoIterator<Item = i32>>(grades: I) -> Self {
        grades.into_iter().fold(GroupStats::default(), |mut stats, grade| {
            stats.add(grade);
            stats
        })
    }

    pub fn add(&mut self, grade: i32) {
        self.camper_count += 1;
        self.min_grade = Some(self.min_grade.map_or(grade, |m| m.min(grade)));
        self.max_grade = Some(self.max_grade.map_or(grade, |m| m.max(grade)));
    }

    /// Spread between youngest and oldest grade; 0 for an empty group
    pub fn grade_spread(&self) -> i32 {
        match (self.min_grade, self.max_grade) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0,
        }
    }

    pub fn size_violation(&self, constraints: &GroupConstraints) -> bool {
        self.camper_count > constraints.max_group_size
    }

    pub fn grade_violation(&self, constraints: &GroupConstraints) -> bool {
        self.grade_spread() > constraints.max_grade_spread
    }

    /// Copy these stats and the derived violation flags onto a group
    pub fn apply_to(&self, group: &mut CampGroup, constraints: &GroupConstraints) {
        group.camper_count = self.camper_count;
        group.min_grade = self.min_grade;
        group.max_grade = self.max_grade;
        group.grade_spread = self.grade_spread();
        group.size_violation = self.size_violation(constraints);
        group.grade_violation = self.grade_violation(constraints);
        group.has_hard_violations = group.size_violation || group.grade_violation;
    }
}
