//! Integration tests for grouping runs
//!
//! Covers the end-to-end run pipeline against a real SQLite database:
//! distribution, friend clusters, grade handling, run records, rerun
//! preservation and the partition/audit properties every run must keep.

mod helpers;

use std::collections::{HashMap, HashSet};

use camp_common::time;
use camp_common::{
    GradeSource, GroupingStatus, RunType, RunViolationDisposition, ViolationKind, ViolationSeverity,
};
use camp_grouping::db::locks;
use camp_grouping::{GroupingError, RunRequest};
use helpers::{NewCamper, TestCamp};
use uuid::Uuid;

fn request(run_type: RunType) -> RunRequest {
    RunRequest::new(run_type, "coach@example.com")
}

#[tokio::test]
async fn test_even_distribution_without_friends() {
    let camp = TestCamp::new(5, 12, 2).await;
    for i in 0..20 {
        camp.add_grade(3 + i % 3).await;
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();

    assert!(report.run.success);
    assert_eq!(report.run.status, GroupingStatus::Completed);
    assert_eq!(report.run.total_campers, 20);
    assert_eq!(report.run.campers_auto_placed, 20);
    assert_eq!(report.run.unplaced_campers, 0);
    assert_eq!(report.run.total_violations, 0);
    assert!(report.is_clean());

    let groups = camp.groups().await;
    assert_eq!(groups.len(), 5);
    assert!(groups.iter().all(|g| g.camper_count == 4));
    assert!(groups.iter().all(|g| !g.has_hard_violations));
    assert_eq!(groups[0].name, "Group 1");
}

#[tokio::test]
async fn test_oversized_friend_cluster_is_split_once() {
    let camp = TestCamp::new(5, 12, 2).await;
    let ids: Vec<Uuid> = (0..15).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        // Everyone requests everyone else
        let friends: Vec<Uuid> = ids.iter().copied().filter(|f| f != id).collect();
        let mut camper = NewCamper::grade(4).with_friends(&friends);
        camper.athlete_id = *id;
        camper.first_name = format!("Friend{}", i);
        camp.add(camper).await;
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    assert_eq!(report.run.total_friend_clusters, 1);
    assert_eq!(report.run.clusters_split, 1);
    assert_eq!(report.run.unplaced_campers, 0);

    let splits: Vec<_> = report
        .violations_raised
        .iter()
        .filter(|v| v.kind == ViolationKind::FriendGroupSplit)
        .collect();
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0].camper_ids.len(), 15);
    assert_eq!(splits[0].severity, ViolationSeverity::Warning);
    assert!(splits[0].description.contains("Group 1"));

    let too_large = report
        .violations_raised
        .iter()
        .filter(|v| v.kind == ViolationKind::FriendGroupTooLarge)
        .count();
    assert_eq!(too_large, 1);

    assert!(camp.groups().await.iter().all(|g| g.camper_count <= 12));
}

#[tokio::test]
async fn test_grade_discrepancy_uses_registration_grade() {
    let camp = TestCamp::new(1, 12, 2).await;
    let mut camper = NewCamper::grade(5);
    camper.reported_grade = Some("3rd".to_string());
    let athlete = camp.add(camper).await;

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();

    let entry = camp.camper_for(athlete).await;
    assert_eq!(entry.grade_from_registration, Some(3));
    assert_eq!(entry.grade_computed_from_dob, 5);
    assert_eq!(entry.grade_validated, 3);
    assert_eq!(entry.grade_source, GradeSource::Registration);
    assert!(entry.grade_discrepancy);

    assert_eq!(report.run.grade_discrepancies_count, 1);
    assert_eq!(report.violations_raised.len(), 1);
    assert_eq!(report.violations_raised[0].kind, ViolationKind::GradeDiscrepancy);
    assert_eq!(report.violations_raised[0].camper_ids, vec![entry.id]);
}

#[tokio::test]
async fn test_no_confirmed_campers_writes_nothing() {
    let camp = TestCamp::new(5, 12, 2).await;
    let athlete = camp.add_grade(3).await;
    camp.set_registration_status(athlete, "cancelled").await;

    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::NoCampers { camp_id } if camp_id == camp.camp_id));
    assert_eq!(camp.count("grouping_runs").await, 0);
}

#[tokio::test]
async fn test_one_directional_request_keeps_pair_together() {
    let camp = TestCamp::new(3, 12, 2).await;
    let b = camp.add_grade(4).await;
    let a = camp.add(NewCamper::grade(4).with_friends(&[b])).await;
    for _ in 0..6 {
        camp.add_grade(4).await;
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    assert_eq!(report.run.clusters_placed_intact, 1);

    let a = camp.camper_for(a).await;
    let b = camp.camper_for(b).await;
    assert!(a.assigned_group_id.is_some());
    assert_eq!(a.assigned_group_id, b.assigned_group_id);
    assert_eq!(a.friend_group_id, b.friend_group_id);
}

#[tokio::test]
async fn test_missing_date_of_birth_records_failed_run() {
    let camp = TestCamp::new(2, 12, 2).await;
    camp.add_grade(3).await;
    let mut broken = NewCamper::grade(3);
    broken.date_of_birth = None;
    let broken_id = camp.add(broken).await;

    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::MissingDateOfBirth { athlete_id, .. } if athlete_id == broken_id));

    let runs = camp.engine.list_runs(camp.camp_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].success);
    assert_eq!(runs[0].status, GroupingStatus::Failed);
    assert!(runs[0].error_message.as_deref().unwrap().contains(&broken_id.to_string()));

    // Nothing else from the rejected run survived
    assert_eq!(camp.count("camper_sessions").await, 0);
    assert_eq!(camp.count("camp_groups").await, 0);
}

#[tokio::test]
async fn test_invalid_constraints_rejected() {
    let camp = TestCamp::new(0, 12, 2).await;
    camp.add_grade(3).await;

    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::InvalidConstraints(_)));

    let runs = camp.engine.list_runs(camp.camp_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].success);
    assert_eq!(runs[0].num_groups, 0);
}

#[tokio::test]
async fn test_unknown_camp() {
    let camp = TestCamp::new(2, 12, 2).await;
    let missing = Uuid::new_v4();
    let err = camp.engine.run_grouping(missing, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::CampNotFound(id) if id == missing));
}

#[tokio::test]
async fn test_every_camper_is_placed_or_reported() {
    let camp = TestCamp::new(3, 8, 2).await;
    for i in 0..30 {
        camp.add_grade(i % 9).await;
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let groups = camp.groups().await;
    let group_ids: HashSet<Uuid> = groups.iter().map(|g| g.id).collect();

    let violations = camp.engine.list_violations(camp.camp_id, true).await.unwrap();
    let reported: HashSet<Uuid> = violations
        .iter()
        .filter(|v| v.kind == ViolationKind::ImpossiblePlacement)
        .flat_map(|v| v.camper_ids.iter().copied())
        .collect();

    let campers = camp.campers().await;
    assert_eq!(campers.len(), 30);
    for camper in &campers {
        match camper.assigned_group_id {
            Some(group) => {
                assert!(group_ids.contains(&group));
                assert!(!reported.contains(&camper.id));
            }
            None => assert!(reported.contains(&camper.id), "{} dropped silently", camper.id),
        }
    }
    assert_eq!(report.run.unplaced_campers as usize, reported.len());
    assert!(report.run.unplaced_campers > 0);

    // Hard limits hold wherever no hard violation is flagged
    for group in &groups {
        if !group.has_hard_violations {
            assert!(group.camper_count <= 8);
            assert!(group.grade_spread <= 2);
        }
        let actual = campers.iter().filter(|c| c.assigned_group_id == Some(group.id)).count();
        assert_eq!(group.camper_count as usize, actual);
    }
}

#[tokio::test]
async fn test_clusters_cover_every_camper_once() {
    let camp = TestCamp::new(3, 6, 3).await;
    let mut athletes = Vec::new();
    for i in 0..12 {
        let friends: Vec<Uuid> = if i % 3 == 0 { Vec::new() } else { vec![athletes[i - 1]] };
        athletes.push(camp.add(NewCamper::grade(2 + (i as i32 % 2)).with_friends(&friends)).await);
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    assert_eq!(report.run.total_friend_clusters, 4);

    let clusters = camp.engine.run_clusters(report.run.id).await.unwrap();
    assert_eq!(clusters.len(), 4);
    let mut seen = HashSet::new();
    for recorded in &clusters {
        assert_eq!(recorded.cluster.member_count, 3);
        assert!(recorded.placed_intact);
        assert!(recorded.group_id.is_some());
        for member in &recorded.cluster.member_ids {
            assert!(seen.insert(*member), "camper in two clusters");
        }
    }
    let all: HashSet<Uuid> = camp.campers().await.iter().map(|c| c.id).collect();
    assert_eq!(seen, all);
}

#[tokio::test]
async fn test_every_group_change_is_logged_once() {
    let camp = TestCamp::new(4, 12, 2).await;
    for i in 0..16 {
        camp.add_grade(i % 3).await;
    }

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let assignments = camp.engine.run_assignments(report.run.id).await.unwrap();
    assert_eq!(assignments.len(), 16);
    assert_eq!(report.assignments_recorded, 16);

    let mut per_camper: HashMap<Uuid, usize> = HashMap::new();
    for assignment in &assignments {
        assert!(assignment.from_group_id.is_none());
        assert!(assignment.to_group_id.is_some());
        assert_eq!(assignment.assigned_by, "coach@example.com");
        *per_camper.entry(assignment.camper_id).or_default() += 1;
    }
    assert!(per_camper.values().all(|&n| n == 1));
}

#[tokio::test]
async fn test_rerun_without_changes_is_idempotent() {
    let camp = TestCamp::new(3, 6, 2).await;
    let first_friend = camp.add_grade(2).await;
    camp.add(NewCamper::grade(3).with_friends(&[first_friend])).await;
    for i in 0..14 {
        camp.add_grade(1 + i % 4).await;
    }

    camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let before: HashMap<Uuid, Option<Uuid>> = camp
        .campers()
        .await
        .iter()
        .map(|c| (c.id, c.assigned_group_id))
        .collect();
    let open_before = camp.engine.list_violations(camp.camp_id, true).await.unwrap().len();

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Rerun)).await.unwrap();
    let after: HashMap<Uuid, Option<Uuid>> = camp
        .campers()
        .await
        .iter()
        .map(|c| (c.id, c.assigned_group_id))
        .collect();

    assert_eq!(before, after);
    assert!(camp.engine.run_assignments(report.run.id).await.unwrap().is_empty());
    assert!(report.violations_raised.is_empty());
    assert!(report.violations_auto_fixed.is_empty());
    assert_eq!(report.open_violations, open_before);
    assert_eq!(report.run.preserved_manual_overrides_count, 0);
    assert_eq!(camp.engine.list_runs(camp.camp_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_incremental_run_places_only_new_campers() {
    let camp = TestCamp::new(2, 12, 2).await;
    for _ in 0..6 {
        camp.add_grade(4).await;
    }
    camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let before: HashMap<Uuid, Option<Uuid>> = camp
        .campers()
        .await
        .iter()
        .map(|c| (c.id, c.assigned_group_id))
        .collect();

    let mut late = NewCamper::grade(4);
    late.registered_at = "2025-07-10T12:00:00+00:00".to_string();
    let late = camp.add(late).await;

    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Incremental)).await.unwrap();
    assert_eq!(report.run.run_type, RunType::Incremental);
    assert_eq!(report.run.late_registrations_count, 1);
    assert_eq!(report.run.campers_auto_placed, 1);

    let late = camp.camper_for(late).await;
    assert!(late.is_late_registration);
    assert!(late.assigned_group_id.is_some());

    for camper in camp.campers().await {
        if let Some(previous) = before.get(&camper.id) {
            assert_eq!(&camper.assigned_group_id, previous);
        }
    }
    let assignments = camp.engine.run_assignments(report.run.id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].camper_id, late.id);
}

#[tokio::test]
async fn test_cancelled_registration_leaves_its_group() {
    let camp = TestCamp::new(2, 12, 2).await;
    let leaving = camp.add_grade(3).await;
    for _ in 0..3 {
        camp.add_grade(3).await;
    }
    camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let entry = camp.camper_for(leaving).await;
    let old_group = entry.assigned_group_id;

    camp.set_registration_status(leaving, "cancelled").await;
    let report = camp.engine.run_grouping(camp.camp_id, request(RunType::Rerun)).await.unwrap();

    assert_eq!(report.run.total_campers, 3);
    assert!(camp.campers().await.iter().all(|c| c.athlete_id != leaving));

    let history = camp.engine.camper_history(entry.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.from_group_id, old_group);
    assert_eq!(last.to_group_id, None);
    assert_eq!(last.run_id, Some(report.run.id));

    let total: i32 = camp.groups().await.iter().map(|g| g.camper_count).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_run_rejected_while_another_is_in_flight() {
    let camp = TestCamp::new(2, 12, 2).await;
    camp.add_grade(3).await;

    let permit = camp.engine.run_guard().try_acquire(camp.camp_id).unwrap();
    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::RunInProgress { camp_id } if camp_id == camp.camp_id));
    assert_eq!(camp.count("grouping_runs").await, 0);

    // Other camps are unaffected by the held permit
    let other = camp.engine.run_guard().try_acquire(Uuid::new_v4());
    assert!(other.is_some());

    drop(permit);
    assert!(camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_runs_for_same_camp() {
    let camp = TestCamp::new(3, 12, 2).await;
    for i in 0..12 {
        camp.add_grade(i % 3).await;
    }

    let (first, second) = tokio::join!(
        camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)),
        camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)),
    );

    // Either both ran one after the other or one was turned away
    let outcomes = [&first, &second];
    assert!(outcomes.iter().any(|r| r.is_ok()));
    for result in outcomes {
        if let Err(err) = result {
            assert!(matches!(err, GroupingError::RunInProgress { .. }));
        }
    }
    assert!(!camp.engine.run_guard().is_running(camp.camp_id));
}

#[tokio::test]
async fn test_out_of_range_late_window_records_failed_run() {
    let camp = TestCamp::new(2, 12, 2).await;
    camp.add_grade(3).await;
    camp.set_late_registration_days(200_000_000).await;

    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::InvalidConstraints(ref msg) if msg.contains("late_registration_days")));

    let runs = camp.engine.list_runs(camp.camp_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, GroupingStatus::Failed);
    assert_eq!(camp.count("camper_sessions").await, 0);

    camp.set_late_registration_days(-5).await;
    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::InvalidConstraints(_)));

    camp.set_late_registration_days(14).await;
    assert!(camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.is_ok());
}

#[tokio::test]
async fn test_run_rejected_while_another_process_holds_the_camp() {
    let camp = TestCamp::new(2, 12, 2).await;
    camp.add_grade(3).await;
    let other = camp.second_engine().await;

    // The other process is mid-run
    let mut conn = other.db.acquire().await.unwrap();
    let claim = locks::try_claim(&mut conn, camp.camp_id, "other-process", 900, &time::now())
        .await
        .unwrap()
        .unwrap();

    let err = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap_err();
    assert!(matches!(err, GroupingError::RunInProgress { camp_id } if camp_id == camp.camp_id));
    assert_eq!(camp.count("grouping_runs").await, 0);
    assert!(!camp.engine.run_guard().is_running(camp.camp_id));

    locks::release(&mut conn, &claim).await.unwrap();
    drop(conn);
    assert!(camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.is_ok());

    // A finished run leaves no claim behind
    assert!(other.run_grouping(camp.camp_id, request(RunType::Rerun)).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_runs_from_separate_processes() {
    let camp = TestCamp::new(4, 12, 2).await;
    for i in 0..40 {
        camp.add_grade(i % 3).await;
    }
    let other = camp.second_engine().await;

    let (first, second) = tokio::join!(
        camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)),
        other.run_grouping(camp.camp_id, request(RunType::Initial)),
    );

    let mut completed = 0;
    for result in [&first, &second] {
        match result {
            Ok(_) => completed += 1,
            Err(err) => assert!(matches!(err, GroupingError::RunInProgress { .. }), "unexpected error: {}", err),
        }
    }
    assert!(completed >= 1);

    // Only completed runs are recorded; a turned-away run writes nothing
    let runs = camp.engine.list_runs(camp.camp_id).await.unwrap();
    assert_eq!(runs.len(), completed);
    assert!(runs.iter().all(|r| r.status == GroupingStatus::Completed));
    let total: i32 = camp.groups().await.iter().map(|g| g.camper_count).sum();
    assert_eq!(total, 40);
}

#[tokio::test]
async fn test_run_outcome_is_reconstructable_from_run_id() {
    let camp = TestCamp::new(2, 5, 0).await;
    for grade in 1..=4 {
        camp.add_grade(grade).await;
    }

    let first = camp.engine.run_grouping(camp.camp_id, request(RunType::Initial)).await.unwrap();
    let linked = camp.engine.run_violations(first.run.id).await.unwrap();
    assert_eq!(linked.len(), first.run.total_violations as usize);
    assert!(linked.iter().all(|l| l.disposition == RunViolationDisposition::Raised));

    let clusters = camp.engine.run_clusters(first.run.id).await.unwrap();
    assert_eq!(clusters.len(), first.run.total_friend_clusters as usize);
    assert!(clusters.iter().all(|c| c.run_id == first.run.id));
    let placed_intact = clusters
        .iter()
        .filter(|c| c.placed_intact && c.cluster.member_count > 1)
        .count();
    assert_eq!(placed_intact, first.run.clusters_placed_intact as usize);

    // Nothing changed: the same violations are carried, not re-raised
    let second = camp.engine.run_grouping(camp.camp_id, request(RunType::Rerun)).await.unwrap();
    assert!(second.violations_raised.is_empty());
    let linked = camp.engine.run_violations(second.run.id).await.unwrap();
    let counted: Vec<_> = linked
        .iter()
        .filter(|l| l.disposition != RunViolationDisposition::AutoFixed)
        .collect();
    assert_eq!(counted.len(), second.run.total_violations as usize);
    assert_eq!(second.run.total_violations, 2);
    assert!(counted.iter().all(|l| l.disposition == RunViolationDisposition::StillOpen));
    assert!(counted.iter().all(|l| l.violation.run_id == Some(first.run.id)));

    // Room for everyone: the third run fixes both
    camp.set_num_groups(4).await;
    let third = camp.engine.run_grouping(camp.camp_id, request(RunType::Rerun)).await.unwrap();
    assert_eq!(third.run.total_violations, 0);
    let linked = camp.engine.run_violations(third.run.id).await.unwrap();
    assert_eq!(linked.len(), 2);
    assert!(linked.iter().all(|l| l.disposition == RunViolationDisposition::AutoFixed));
    assert!(linked.iter().all(|l| !l.violation.is_open()));

    let stored = camp.engine.get_run(second.run.id).await.unwrap().unwrap();
    assert_eq!(stored.id, second.run.id);
    assert_eq!(stored.total_violations, 2);
    assert_eq!(stored.run_type, RunType::Rerun);
    assert!(camp.engine.get_run(Uuid::new_v4()).await.unwrap().is_none());
}
