//! Test fixtures for integration tests
//!
//! A scripted discovery backend whose visible set is controlled by the test,
//! plus helpers for building configs, nodes and event recorders.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pifleet::config::DiscoveryConfig;
use pifleet::discovery::{
    keys, BackendError, DiscoveryBackend, DiscoveryService, EventKind, MembershipEvent,
    ObservedNode,
};

/// Discovery interval used by every scenario
pub const INTERVAL: Duration = Duration::from_secs(10);

/// Backend reporting whatever the test last showed it
#[derive(Default)]
pub struct ScriptedBackend {
    visible: Mutex<Vec<ObservedNode>>,
    failing: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn show(&self, nodes: Vec<ObservedNode>) {
        *self.visible.lock().unwrap() = nodes;
    }

    pub fn hide_all(&self) {
        self.show(Vec::new());
    }

    #[allow(dead_code)]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DiscoveryBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn sample(&self) -> Result<Vec<ObservedNode>, BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(self.visible.lock().unwrap().clone())
    }
}

/// 10s interval, 2s timeout, default 3x staleness and 2x sweep
pub fn discovery_config() -> DiscoveryConfig {
    DiscoveryConfig::builder()
        .interval_secs(INTERVAL.as_secs())
        .timeout_secs(2)
        .shutdown_grace_secs(1)
        .build()
        .unwrap()
}

/// Service around a scripted backend
pub fn scripted_service() -> (Arc<ScriptedBackend>, DiscoveryService) {
    let backend = ScriptedBackend::new();
    let service = DiscoveryService::new(discovery_config(), backend.clone()).unwrap();
    (backend, service)
}

/// The node used throughout the end-to-end scenario
pub fn pi4_node() -> ObservedNode {
    ObservedNode::new("n1", "n1", "192.168.1.50".parse().unwrap(), 9091)
        .with_meta(keys::ARCH, "arm64")
        .with_meta(keys::MODEL, "Pi4")
}

pub fn node(id: &str, ip: &str) -> ObservedNode {
    ObservedNode::new(id, id, ip.parse().unwrap(), 9091)
}

/// Shared list of `(kind, id)` pairs seen by an observer
pub type EventLog = Arc<Mutex<Vec<(EventKind, String)>>>;

/// Subscribe a callback recording every event into a fresh log
pub fn record_events(service: &DiscoveryService, name: &str) -> EventLog {
    let log: EventLog = Arc::default();
    let sink = log.clone();
    service.subscribe_fn(name, move |event: &MembershipEvent| {
        sink.lock().unwrap().push((event.kind, event.node.id.clone()));
    });
    log
}

/// Let observer workers drain their queues
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
