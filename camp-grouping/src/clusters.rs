//! Friend cluster builder
//!
//! Friend requests form an undirected graph over a camp's campers: a request
//! in either direction links the pair. Each connected component is one
//! friend cluster, the unit the allocator tries to keep together. Campers
//! nobody requested and who requested nobody form singleton clusters, so the
//! clusters cover the roster exactly once.

use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use camp_common::db::{CamperSessionEntry, FriendCluster, GroupConstraints};

use crate::auditor::ViolationFinding;

/// Disjoint-set forest over camper indices
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // Path halving
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// A friend request naming an athlete who is not an active camper here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchedRequest {
    pub camper_id: Uuid,
    pub requested_athlete_id: Uuid,
}

/// Result of one cluster build
#[derive(Debug, Default)]
pub struct ClusterAnalysis {
    /// Ordered by each cluster's smallest athlete id
    pub clusters: Vec<FriendCluster>,
    /// Camper session id -> cluster id
    pub cluster_of: HashMap<Uuid, Uuid>,
    /// `friend_group_too_large` findings, one per oversized cluster
    pub findings: Vec<ViolationFinding>,
    pub unmatched_requests: Vec<UnmatchedRequest>,
}

impl ClusterAnalysis {
    pub fn cluster(&self, cluster_id: Uuid) -> Option<&FriendCluster> {
        self.clusters.iter().find(|c| c.id == cluster_id)
    }
}

/// Build friend clusters for a camp's active campers
pub fn build_clusters(entries: &[CamperSessionEntry], constraints: &GroupConstraints) -> ClusterAnalysis {
    let mut campers: Vec<&CamperSessionEntry> = entries.iter().filter(|e| e.is_active).collect();
    campers.sort_by_key(|e| e.athlete_id);

    let index_of: HashMap<Uuid, usize> = campers
        .iter()
        .enumerate()
        .map(|(idx, e)| (e.athlete_id, idx))
        .collect();

    let mut forest = UnionFind::new(campers.len());
    let mut unmatched_requests = Vec::new();

    for (idx, camper) in campers.iter().enumerate() {
        for requested in &camper.friend_request_athlete_ids {
            match index_of.get(requested) {
                Some(&other) => forest.union(idx, other),
                None => unmatched_requests.push(UnmatchedRequest {
                    camper_id: camper.id,
                    requested_athlete_id: *requested,
                }),
            }
        }
    }

    // Campers are sorted by athlete id, so grouping by root in index order
    // yields members in athlete id order and clusters in first-member order
    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut first_seen: Vec<usize> = Vec::new();
    for idx in 0..campers.len() {
        let root = forest.find(idx);
        let members = components.entry(root).or_default();
        if members.is_empty() {
            first_seen.push(root);
        }
        members.push(idx);
    }

    let mut analysis = ClusterAnalysis {
        unmatched_requests,
        ..ClusterAnalysis::default()
    };

    for root in first_seen {
        let Some(members) = components.get(&root) else {
            continue;
        };
        let cluster = make_cluster(members.iter().map(|&idx| campers[idx]), constraints);

        if cluster.exceeds_size_constraint {
            tracing::warn!(
                cluster_id = %cluster.id,
                member_count = cluster.member_count,
                max_group_size = constraints.max_group_size,
                "Friend cluster is larger than any group can hold"
            );
            analysis
                .findings
                .push(ViolationFinding::friend_group_too_large(&cluster, constraints));
        }

        for member in &cluster.member_ids {
            analysis.cluster_of.insert(*member, cluster.id);
        }
        analysis.clusters.push(cluster);
    }

    analysis
}

fn make_cluster<'a, I>(members: I, constraints: &GroupConstraints) -> FriendCluster
where
    I: Iterator<Item = &'a CamperSessionEntry>,
{
    let mut member_ids = Vec::new();
    let mut min_grade = i32::MAX;
    let mut max_grade = i32::MIN;
    for member in members {
        member_ids.push(member.id);
        min_grade = min_grade.min(member.grade_validated);
        max_grade = max_grade.max(member.grade_validated);
    }

    let member_count = member_ids.len() as i32;
    let grade_spread = max_grade - min_grade;
    let exceeds_grade_constraint = grade_spread > constraints.max_grade_spread;
    let exceeds_size_constraint = member_count > constraints.max_group_size;

    FriendCluster {
        id: Uuid::new_v4(),
        member_ids,
        member_count,
        min_grade,
        max_grade,
        grade_spread,
        exceeds_grade_constraint,
        exceeds_size_constraint,
        can_be_placed_intact: !exceeds_grade_constraint && !exceeds_size_constraint,
    }
}
