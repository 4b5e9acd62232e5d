//! Reconciler tests against both repository implementations

mod common;

use std::sync::Arc;

use common::{at, existing_record, pi_node};
use pifleet::discovery::MembershipEvent;
use pifleet::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use pifleet::storage::{
    MockNodeRepository, NodeRepository, NodeRole, NodeStatus, SqliteNodeRepository,
};

fn sqlite_repo(dir: &tempfile::TempDir) -> Arc<SqliteNodeRepository> {
    Arc::new(SqliteNodeRepository::new(dir.path().join("nodes.db")).unwrap())
}

#[test]
fn test_discovered_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let repo = sqlite_repo(&dir);
    let reconciler = Reconciler::new(repo.clone());

    let first = MembershipEvent::discovered(pi_node("pi-a", "192.168.1.50").seen_at(at(0)));
    let second = MembershipEvent::discovered(pi_node("pi-a", "192.168.1.50").seen_at(at(30)));

    assert_eq!(reconciler.reconcile(&first).unwrap(), ReconcileOutcome::Created);
    assert_eq!(reconciler.reconcile(&second).unwrap(), ReconcileOutcome::Refreshed);

    let records = repo.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "pi-a");
    assert_eq!(records[0].last_seen, at(30));
    assert_eq!(records[0].version, 1);
}

#[test]
fn test_recovery_via_updated() {
    let repo = Arc::new(MockNodeRepository::new());
    repo.insert(existing_record("pi-b", "10.0.0.2", NodeStatus::Unknown));
    let reconciler = Reconciler::new(repo.clone());

    let event = MembershipEvent::updated(pi_node("pi-b", "10.0.0.2").seen_at(at(60)));
    assert_eq!(reconciler.reconcile(&event).unwrap(), ReconcileOutcome::Recovered);

    let record = repo.find_by_ip("10.0.0.2".parse().unwrap()).unwrap().unwrap();
    assert_eq!(record.status, NodeStatus::Discovered);
    assert_eq!(record.architecture, "arm64");
    assert_eq!(record.model, "Pi4");
    assert_eq!(record.last_seen, at(60));
    // operator-owned fields survive
    assert_eq!(record.role, NodeRole::Master);
    assert_eq!(record.cluster_id.as_deref(), Some("cluster-a"));
    assert_eq!(record.name, "pi-b");
}

#[test]
fn test_recovery_via_discovered_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let repo = sqlite_repo(&dir);
    let reconciler = Reconciler::new(repo.clone());
    let node = pi_node("pi-c", "10.0.0.3");

    reconciler
        .reconcile(&MembershipEvent::discovered(node.clone()))
        .unwrap();
    assert_eq!(
        reconciler.reconcile(&MembershipEvent::lost(node.clone())).unwrap(),
        ReconcileOutcome::MarkedUnknown
    );
    assert_eq!(
        reconciler.reconcile(&MembershipEvent::lost(node.clone())).unwrap(),
        ReconcileOutcome::Ignored
    );
    assert_eq!(
        reconciler.reconcile(&MembershipEvent::discovered(node)).unwrap(),
        ReconcileOutcome::Recovered
    );

    let records = repo.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NodeStatus::Discovered);
}

#[test]
fn test_lost_for_unregistered_address_is_ignored() {
    let repo = Arc::new(MockNodeRepository::new());
    let reconciler = Reconciler::new(repo.clone());

    let event = MembershipEvent::lost(pi_node("ghost", "10.9.9.9"));
    assert_eq!(reconciler.reconcile(&event).unwrap(), ReconcileOutcome::Ignored);
    assert!(repo.list().unwrap().is_empty());
    assert_eq!(repo.write_count(), 0);
}

#[test]
fn test_lost_marks_operator_statuses_unknown() {
    let repo = Arc::new(MockNodeRepository::new());
    repo.insert(existing_record("pi-d", "10.0.0.4", NodeStatus::Ready));
    let reconciler = Reconciler::new(repo.clone());

    let event = MembershipEvent::lost(pi_node("pi-d", "10.0.0.4"));
    assert_eq!(reconciler.reconcile(&event).unwrap(), ReconcileOutcome::MarkedUnknown);

    let record = repo.find_by_ip("10.0.0.4".parse().unwrap()).unwrap().unwrap();
    assert_eq!(record.status, NodeStatus::Unknown);
    assert_eq!(record.role, NodeRole::Master);
}

#[test]
fn test_name_clash_with_other_address() {
    let dir = tempfile::tempdir().unwrap();
    let repo = sqlite_repo(&dir);
    let reconciler = Reconciler::new(repo.clone());

    reconciler
        .reconcile(&MembershipEvent::discovered(pi_node("pi", "10.0.0.1")))
        .unwrap();
    reconciler
        .reconcile(&MembershipEvent::discovered(pi_node("pi", "10.0.0.2")))
        .unwrap();

    let mut names: Vec<_> = repo.list().unwrap().into_iter().map(|r| r.name).collect();
    names.sort();
    assert_eq!(names, vec!["pi", "pi-10-0-0-2"]);
}

#[test]
fn test_transient_failure_drops_event_without_side_effects() {
    let repo = Arc::new(MockNodeRepository::new());
    let reconciler = Reconciler::new(repo.clone());
    let event = MembershipEvent::discovered(pi_node("pi-e", "10.0.0.5"));

    repo.fail_next(1);
    let err = reconciler.reconcile(&event).unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, ReconcileError::Storage { .. }));
    assert_eq!(err.ip(), "10.0.0.5".parse::<std::net::IpAddr>().unwrap());
    assert!(repo.list().unwrap().is_empty());

    // handle swallows the error
    repo.fail_next(1);
    assert_eq!(reconciler.handle(&event), None);

    // the next event for the same node succeeds
    assert_eq!(reconciler.handle(&event), Some(ReconcileOutcome::Created));
}
