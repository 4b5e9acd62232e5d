//! Observer isolation: failing and panicking observers never affect
//! discovery or other observers

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pifleet::discovery::{MembershipEvent, MembershipObserver, ObserverError};

use super::fixtures::{node, record_events, scripted_service, settle, INTERVAL};

/// Fails on every event
#[derive(Default)]
struct AlwaysFails {
    calls: AtomicUsize,
}

#[async_trait]
impl MembershipObserver for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    async fn on_event(&self, _event: &MembershipEvent) -> Result<(), ObserverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("downstream unavailable".into())
    }
}

/// Panics on every event
struct AlwaysPanics;

#[async_trait]
impl MembershipObserver for AlwaysPanics {
    fn name(&self) -> &str {
        "always-panics"
    }

    async fn on_event(&self, event: &MembershipEvent) -> Result<(), ObserverError> {
        panic!("observer bug on {}", event.node.id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_observers_do_not_block_others() {
    const CYCLES: usize = 10;

    let (backend, service) = scripted_service();
    let failing = Arc::new(AlwaysFails::default());
    service.subscribe(failing.clone());
    service.subscribe(Arc::new(AlwaysPanics));
    let log = record_events(&service, "recorder");
    assert_eq!(service.observer_count(), 3);

    service.start().await.unwrap();

    // a new node every cycle so each cycle emits exactly one event
    for i in 0..CYCLES {
        backend.show(
            (0..=i)
                .map(|n| node(&format!("n{n}"), &format!("10.0.0.{}", n + 1)))
                .collect(),
        );
        tokio::time::sleep(INTERVAL).await;
    }

    assert!(service.is_running());
    service.stop().await;
    settle().await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), CYCLES);
    assert_eq!(service.member_count().await, CYCLES);
    assert_eq!(failing.calls.load(Ordering::SeqCst), CYCLES);
}

#[tokio::test]
async fn test_unsubscribed_observer_stops_receiving() {
    let (backend, service) = scripted_service();
    let kept = record_events(&service, "kept");

    let dropped_calls = Arc::new(AtomicUsize::new(0));
    let counter = dropped_calls.clone();
    let id = service.subscribe_fn("dropped", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    backend.show(vec![node("a", "10.0.0.1")]);
    service.run_cycle_once().await;
    settle().await;

    assert!(service.unsubscribe(id));
    assert!(!service.unsubscribe(id));

    backend.show(vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")]);
    service.run_cycle_once().await;
    settle().await;

    assert_eq!(kept.lock().unwrap().len(), 2);
    assert_eq!(dropped_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_observer_does_not_delay_cycles() {
    let (backend, service) = scripted_service();
    service.subscribe_fn("slow", |_| std::thread::sleep(Duration::from_millis(200)));

    let started = std::time::Instant::now();
    for i in 0..5 {
        backend.show(vec![node(&format!("n{i}"), "10.0.0.9")]);
        service.run_cycle_once().await;
    }
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(service.member_count().await, 5);
}
