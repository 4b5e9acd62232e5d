//! End-to-end scenarios: backend samples through to durable records

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pifleet::discovery::{EventKind, MembershipEvent, StaticBackend};
use pifleet::reconcile::{ReconcileOutcome, Reconciler};
use pifleet::storage::{
    MockNodeRepository, NodeRepository, NodeRole, NodeStatus, SharedNodeRepository,
    SqliteNodeRepository,
};

use super::fixtures::{
    discovery_config, node, pi4_node, record_events, scripted_service, settle, INTERVAL,
};

type OutcomeLog = Arc<Mutex<Vec<(EventKind, ReconcileOutcome)>>>;

/// Reconcile inline on the observer worker so paused-time tests stay
/// deterministic
fn attach_reconciler(
    service: &pifleet::discovery::DiscoveryService,
    repo: SharedNodeRepository,
) -> OutcomeLog {
    let reconciler = Reconciler::new(repo);
    let log: OutcomeLog = Arc::default();
    let sink = log.clone();
    service.subscribe_fn("reconciler", move |event: &MembershipEvent| {
        if let Some(outcome) = reconciler.handle(event) {
            sink.lock().unwrap().push((event.kind, outcome));
        }
    });
    log
}

fn record_for(repo: &dyn NodeRepository) -> pifleet::storage::NodeRecord {
    repo.find_by_ip("192.168.1.50".parse().unwrap())
        .unwrap()
        .expect("record for 192.168.1.50")
}

#[tokio::test(start_paused = true)]
async fn test_node_lifecycle_through_background_cycles() {
    let (backend, service) = scripted_service();
    let repo = Arc::new(MockNodeRepository::new());
    let outcomes = attach_reconciler(&service, repo.clone());
    let events = record_events(&service, "recorder");

    // cycle 1 at t=0 sees n1
    backend.show(vec![pi4_node()]);
    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let record = record_for(repo.as_ref());
    assert_eq!(record.status, NodeStatus::Discovered);
    assert_eq!(record.role, NodeRole::Worker);
    assert_eq!(record.architecture, "arm64");
    assert_eq!(record.model, "Pi4");

    // n1 disappears; sweeps run at t=20 and t=40, staleness is 30s
    backend.hide_all();
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(service.member_count().await, 1);
    assert_eq!(record_for(repo.as_ref()).status, NodeStatus::Discovered);

    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(service.member_count().await, 0);
    let record = record_for(repo.as_ref());
    assert_eq!(record.status, NodeStatus::Unknown);
    assert_eq!(repo.list().unwrap().len(), 1);

    // n1 returns and is picked up by the cycle at t=50
    backend.show(vec![pi4_node()]);
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(record_for(repo.as_ref()).status, NodeStatus::Discovered);
    assert_eq!(repo.list().unwrap().len(), 1);

    service.stop().await;
    settle().await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (EventKind::Discovered, "n1".to_string()),
            (EventKind::Lost, "n1".to_string()),
            (EventKind::Discovered, "n1".to_string()),
        ]
    );
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            (EventKind::Discovered, ReconcileOutcome::Created),
            (EventKind::Lost, ReconcileOutcome::MarkedUnknown),
            (EventKind::Discovered, ReconcileOutcome::Recovered),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_staleness_threshold_boundary() {
    let (backend, service) = scripted_service();
    let events = record_events(&service, "recorder");

    backend.show(vec![node("n1", "10.0.0.1")]);
    service.run_cycle_once().await;
    backend.hide_all();

    // absent for just under three intervals
    tokio::time::advance(INTERVAL * 3 - Duration::from_millis(1)).await;
    service.run_cycle_once().await;
    assert!(service.sweep_once().await.is_empty());
    assert_eq!(service.member_count().await, 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    let lost = service.sweep_once().await;
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].kind, EventKind::Lost);
    assert_eq!(service.member_count().await, 0);

    // exactly one Lost
    assert!(service.sweep_once().await.is_empty());
    settle().await;
    let lost_count = events
        .lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| *kind == EventKind::Lost)
        .count();
    assert_eq!(lost_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_change_updates_record() {
    let (backend, service) = scripted_service();
    let repo = Arc::new(MockNodeRepository::new());
    let outcomes = attach_reconciler(&service, repo.clone());

    backend.show(vec![pi4_node()]);
    service.run_cycle_once().await;
    backend.show(vec![pi4_node().with_meta("model", "Pi5")]);
    let events = service.run_cycle_once().await;
    assert_eq!(events[0].kind, EventKind::Updated);
    settle().await;

    assert_eq!(record_for(repo.as_ref()).model, "Pi5");
    assert_eq!(
        outcomes.lock().unwrap().last(),
        Some(&(EventKind::Updated, ReconcileOutcome::Updated))
    );
}

#[tokio::test(start_paused = true)]
async fn test_static_nodes_pinned_in_registry_and_storage() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteNodeRepository::new(dir.path().join("fleet.db")).unwrap());

    let backend = StaticBackend::from_addresses(
        &["10.0.0.5:9091".to_string(), "10.0.0.6:9091".to_string()],
        "_pifleet._tcp",
    )
    .unwrap();
    let service =
        pifleet::discovery::DiscoveryService::new(discovery_config(), Arc::new(backend)).unwrap();
    attach_reconciler(&service, repo.clone());

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    service.stop().await;

    assert_eq!(service.stats().await.pinned, 2);
    let records = repo.list().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == NodeStatus::Discovered));
    assert_eq!(records[0].name, "static-10-0-0-5");
}

#[tokio::test(start_paused = true)]
async fn test_backend_outage_does_not_lose_nodes_early() {
    let (backend, service) = scripted_service();

    backend.show(vec![node("n1", "10.0.0.1")]);
    service.run_cycle_once().await;

    backend.set_failing(true);
    for _ in 0..2 {
        tokio::time::advance(INTERVAL).await;
        assert!(service.run_cycle_once().await.is_empty());
        assert!(service.sweep_once().await.is_empty());
    }
    assert_eq!(service.member_count().await, 1);

    backend.set_failing(false);
    tokio::time::advance(INTERVAL).await;
    assert!(service.run_cycle_once().await.is_empty());
    assert_eq!(service.member_count().await, 1);
}
