//! Reconciler: membership events onto the durable node registry
//!
//! Presence comes and goes; identity stays. The reconciler joins the two by
//! IP address, never by discovery identity, and only ever performs
//! single-record writes that give the same end state when repeated:
//!
//! | Event                    | Record absent     | Record present                                  |
//! |--------------------------|-------------------|-------------------------------------------------|
//! | `Discovered` / `Updated` | create (Worker)   | refresh `last_seen`, apply arch/model changes,  |
//! |                          |                   | `Unknown` back to `Discovered`                  |
//! | `Lost`                   | ignore            | status to `Unknown` (record is kept)            |
//!
//! Storage failures are logged with the address and event kind and the event
//! is dropped. A node that is still present produces fresh events on later
//! cycles.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

use crate::discovery::{keys, EventKind, MembershipEvent, MembershipObserver, ObservedNode, ObserverError};
use crate::metrics;
use crate::storage::{NewNode, NodeRecord, NodeStatus, NodeUpdate, SharedNodeRepository, StorageError};
use crate::utils::{dashed_ip, sanitize_node_name, with_name_suffix};

/// Attempts for a conditional write that loses to a concurrent writer
const CONFLICT_ATTEMPTS: usize = 2;

/// Placeholder for unknown architecture or model
const UNKNOWN: &str = "unknown";

// ============================================================================
// Outcome and Errors
// ============================================================================

/// What a reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    /// New record created
    Created,
    /// Existing record, only `last_seen` moved
    Refreshed,
    /// Existing record, architecture or model changed
    Updated,
    /// Record moved from `Unknown` back to `Discovered`
    Recovered,
    /// Record moved to `Unknown`
    MarkedUnknown,
    /// Nothing to do
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Refreshed => "refreshed",
            Self::Updated => "updated",
            Self::Recovered => "recovered",
            Self::MarkedUnknown => "marked_unknown",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation failures
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("storage error reconciling {kind} for {ip}: {source}")]
    Storage {
        ip: IpAddr,
        kind: EventKind,
        #[source]
        source: StorageError,
    },

    /// Every candidate name was taken
    #[error("no free node name for {ip}")]
    NameExhausted { ip: IpAddr },
}

impl ReconcileError {
    pub fn ip(&self) -> IpAddr {
        match self {
            Self::Storage { ip, .. } | Self::NameExhausted { ip } => *ip,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage { source, .. } => source.is_transient(),
            Self::NameExhausted { .. } => false,
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Maps membership events onto a [`NodeRepository`](crate::storage::NodeRepository)
#[derive(Clone)]
pub struct Reconciler {
    repo: SharedNodeRepository,
}

impl Reconciler {
    pub fn new(repo: SharedNodeRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &SharedNodeRepository {
        &self.repo
    }

    /// Apply one event
    pub fn reconcile(&self, event: &MembershipEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let node = &event.node;
        let err = |source: StorageError| ReconcileError::Storage {
            ip: node.ip,
            kind: event.kind,
            source,
        };

        match event.kind {
            EventKind::Discovered | EventKind::Updated => self.upsert(node).map_err(|e| match e {
                UpsertError::Storage(source) => err(source),
                UpsertError::NameExhausted => ReconcileError::NameExhausted { ip: node.ip },
            }),
            EventKind::Lost => self.mark_unknown(node).map_err(err),
        }
    }

    /// Apply one event, logging and counting the result
    ///
    /// Errors are logged here and not returned; the event is dropped.
    pub fn handle(&self, event: &MembershipEvent) -> Option<ReconcileOutcome> {
        match self.reconcile(event) {
            Ok(outcome) => {
                metrics::record_reconcile_outcome(outcome.as_str());
                match outcome {
                    ReconcileOutcome::Refreshed | ReconcileOutcome::Ignored => tracing::debug!(
                        ip = %event.node.ip,
                        kind = %event.kind,
                        outcome = %outcome,
                        "Reconciled"
                    ),
                    _ => tracing::info!(
                        ip = %event.node.ip,
                        kind = %event.kind,
                        outcome = %outcome,
                        "Reconciled"
                    ),
                }
                Some(outcome)
            }
            Err(e) => {
                metrics::record_reconcile_outcome("error");
                tracing::error!(
                    ip = %event.node.ip,
                    kind = %event.kind,
                    transient = e.is_transient(),
                    error = %e,
                    "Reconciliation failed, dropping event"
                );
                None
            }
        }
    }

    fn upsert(&self, node: &ObservedNode) -> Result<ReconcileOutcome, UpsertError> {
        match self.repo.find_by_ip(node.ip)? {
            Some(record) => Ok(self.refresh(record, node)?),
            None => self.create(node),
        }
    }

    /// Bring an existing record in line with an observation
    fn refresh(
        &self,
        mut record: NodeRecord,
        node: &ObservedNode,
    ) -> Result<ReconcileOutcome, StorageError> {
        for attempt in 1..=CONFLICT_ATTEMPTS {
            let patch = refresh_patch(&record, node);
            if patch.is_empty() {
                self.repo.touch_last_seen(&record.id, node.last_seen)?;
                return Ok(ReconcileOutcome::Refreshed);
            }

            let recovering = patch.status == Some(NodeStatus::Discovered);
            match self.repo.update_fields(&record.id, record.version, &patch) {
                Ok(_) if recovering => return Ok(ReconcileOutcome::Recovered),
                Ok(_) => return Ok(ReconcileOutcome::Updated),
                Err(StorageError::Conflict { .. }) if attempt < CONFLICT_ATTEMPTS => {
                    tracing::debug!(id = %record.id, ip = %node.ip, "Concurrent update, re-reading");
                    record = self
                        .repo
                        .get(&record.id)?
                        .ok_or_else(|| StorageError::NotFound(record.id.clone()))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Unavailable("conflict retries exhausted".to_string()))
    }

    fn create(&self, node: &ObservedNode) -> Result<ReconcileOutcome, UpsertError> {
        for name in candidate_names(node) {
            match self.repo.create(new_node(name, node)) {
                Ok(record) => {
                    tracing::info!(
                        id = %record.id,
                        name = %record.name,
                        ip = %record.ip,
                        architecture = %record.architecture,
                        "Registered new node"
                    );
                    return Ok(ReconcileOutcome::Created);
                }
                Err(StorageError::Duplicate { field, value }) if field == "name" => {
                    tracing::debug!(name = %value, ip = %node.ip, "Node name taken, trying next");
                }
                Err(StorageError::Duplicate { field, .. }) if field == "ip" => {
                    // another writer registered this address first
                    let record = self
                        .repo
                        .find_by_ip(node.ip)?
                        .ok_or_else(|| StorageError::NotFound(node.ip.to_string()))?;
                    return Ok(self.refresh(record, node)?);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(UpsertError::NameExhausted)
    }

    fn mark_unknown(&self, node: &ObservedNode) -> Result<ReconcileOutcome, StorageError> {
        for attempt in 1..=CONFLICT_ATTEMPTS {
            let Some(record) = self.repo.find_by_ip(node.ip)? else {
                tracing::debug!(ip = %node.ip, "Lost node has no record");
                return Ok(ReconcileOutcome::Ignored);
            };
            if record.status == NodeStatus::Unknown {
                return Ok(ReconcileOutcome::Ignored);
            }

            let patch = NodeUpdate {
                status: Some(NodeStatus::Unknown),
                ..Default::default()
            };
            match self.repo.update_fields(&record.id, record.version, &patch) {
                Ok(_) => return Ok(ReconcileOutcome::MarkedUnknown),
                Err(StorageError::Conflict { .. }) if attempt < CONFLICT_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Unavailable("conflict retries exhausted".to_string()))
    }
}

enum UpsertError {
    Storage(StorageError),
    NameExhausted,
}

impl From<StorageError> for UpsertError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Changes an observation implies for a stored record, `last_seen` aside
fn refresh_patch(record: &NodeRecord, node: &ObservedNode) -> NodeUpdate {
    let mut patch = NodeUpdate::default();

    if let Some(arch) = node.architecture() {
        if arch != record.architecture {
            patch.architecture = Some(arch.to_string());
        }
    }
    if let Some(model) = node.model() {
        if model != record.model {
            patch.model = Some(model.to_string());
        }
    }
    if record.status == NodeStatus::Unknown {
        patch.status = Some(NodeStatus::Discovered);
    }

    if !patch.is_empty() {
        patch.last_seen = Some(node.last_seen);
    }
    patch
}

/// Names to try in order: the sanitized display name, then with the dashed
/// address, then with a random suffix
fn candidate_names(node: &ObservedNode) -> Vec<String> {
    let dashed = dashed_ip(node.ip);
    let base = node
        .display_name()
        .and_then(sanitize_node_name)
        .unwrap_or_else(|| format!("node-{dashed}"));

    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    let mut names = vec![base.clone()];
    if !base.ends_with(&dashed) {
        names.push(with_name_suffix(&base, &dashed));
    }
    names.push(with_name_suffix(&base, &random));
    names
}

fn new_node(name: String, node: &ObservedNode) -> NewNode {
    NewNode {
        mac: node.meta(keys::MAC).map(str::to_string),
        architecture: node.architecture().unwrap_or(UNKNOWN).to_string(),
        model: node.model().unwrap_or(UNKNOWN).to_string(),
        last_seen: node.last_seen,
        ..NewNode::discovered(name, node.ip)
    }
}

#[async_trait]
impl MembershipObserver for Reconciler {
    fn name(&self) -> &str {
        "reconciler"
    }

    async fn on_event(&self, event: &MembershipEvent) -> Result<(), ObserverError> {
        let reconciler = self.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || {
            reconciler.handle(&event);
        })
        .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockNodeRepository, NodeRepository, NodeRole};
    use std::sync::Arc;

    fn setup() -> (Arc<MockNodeRepository>, Reconciler) {
        let repo = Arc::new(MockNodeRepository::new());
        (repo.clone(), Reconciler::new(repo))
    }

    fn pi(ip: &str) -> ObservedNode {
        ObservedNode::new("n1", "n1", ip.parse().unwrap(), 9091)
            .with_meta(keys::ARCH, "arm64")
            .with_meta(keys::MODEL, "Pi4")
    }

    #[test]
    fn test_discovered_creates_worker() {
        let (repo, reconciler) = setup();

        let outcome = reconciler
            .reconcile(&MembershipEvent::discovered(pi("192.168.1.50")))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);

        let record = repo.find_by_ip("192.168.1.50".parse().unwrap()).unwrap().unwrap();
        assert_eq!(record.name, "n1");
        assert_eq!(record.status, NodeStatus::Discovered);
        assert_eq!(record.role, NodeRole::Worker);
        assert_eq!(record.architecture, "arm64");
        assert_eq!(record.model, "Pi4");
        assert_eq!(record.cpu_cores, 0);
        assert_eq!(record.memory_mb, 0);
    }

    #[test]
    fn test_defaults_without_metadata() {
        let (repo, reconciler) = setup();
        let node = ObservedNode::new("probe:x", "", "10.0.0.7".parse().unwrap(), 9091);

        reconciler.reconcile(&MembershipEvent::discovered(node)).unwrap();

        let record = repo.list().unwrap().remove(0);
        assert_eq!(record.name, "node-10-0-0-7");
        assert_eq!(record.architecture, "unknown");
        assert_eq!(record.model, "unknown");
    }

    #[test]
    fn test_lost_unknown_record_ignored() {
        let (repo, reconciler) = setup();
        let outcome = reconciler.reconcile(&MembershipEvent::lost(pi("10.0.0.1"))).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(repo.write_count(), 0);
    }

    #[test]
    fn test_lost_then_updated_recovers() {
        let (repo, reconciler) = setup();
        reconciler.reconcile(&MembershipEvent::discovered(pi("10.0.0.1"))).unwrap();

        let lost = reconciler.reconcile(&MembershipEvent::lost(pi("10.0.0.1"))).unwrap();
        assert_eq!(lost, ReconcileOutcome::MarkedUnknown);
        let again = reconciler.reconcile(&MembershipEvent::lost(pi("10.0.0.1"))).unwrap();
        assert_eq!(again, ReconcileOutcome::Ignored);

        let record = repo.list().unwrap().remove(0);
        assert_eq!(record.status, NodeStatus::Unknown);

        let upgraded = pi("10.0.0.1").with_meta(keys::MODEL, "Pi5");
        let outcome = reconciler.reconcile(&MembershipEvent::updated(upgraded)).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Recovered);

        let record = repo.list().unwrap().remove(0);
        assert_eq!(record.status, NodeStatus::Discovered);
        assert_eq!(record.model, "Pi5");
    }

    #[test]
    fn test_unchanged_update_only_touches() {
        let (repo, reconciler) = setup();
        reconciler.reconcile(&MembershipEvent::discovered(pi("10.0.0.1"))).unwrap();
        let writes = repo.write_count();

        let later = pi("10.0.0.1").seen_at(chrono::Utc::now() + chrono::Duration::seconds(30));
        let outcome = reconciler
            .reconcile(&MembershipEvent::updated(later.clone()))
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Refreshed);
        assert_eq!(repo.write_count(), writes);
        let record = repo.list().unwrap().remove(0);
        assert_eq!(record.last_seen, later.last_seen);
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_updated_for_untracked_node_creates() {
        let (repo, reconciler) = setup();
        let outcome = reconciler.reconcile(&MembershipEvent::updated(pi("10.0.0.2"))).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_name_clash_gets_suffix() {
        let (repo, reconciler) = setup();
        reconciler.reconcile(&MembershipEvent::discovered(pi("10.0.0.1"))).unwrap();
        reconciler.reconcile(&MembershipEvent::discovered(pi("10.0.0.2"))).unwrap();

        let names: Vec<String> = repo.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["n1", "n1-10-0-0-2"]);
    }

    #[test]
    fn test_storage_failure_reports_ip_and_kind() {
        let (repo, reconciler) = setup();
        repo.set_unavailable(true);

        let err = reconciler
            .reconcile(&MembershipEvent::discovered(pi("10.0.0.9")))
            .unwrap_err();
        assert_eq!(err.ip(), "10.0.0.9".parse::<IpAddr>().unwrap());
        assert!(err.is_transient());
        assert!(matches!(err, ReconcileError::Storage { kind: EventKind::Discovered, .. }));

        assert_eq!(reconciler.handle(&MembershipEvent::discovered(pi("10.0.0.9"))), None);
    }

    #[test]
    fn test_candidate_names() {
        let names = candidate_names(&pi("10.0.0.3").with_meta(keys::NAME, "Kitchen Pi"));
        assert_eq!(names[0], "kitchen-pi");
        assert_eq!(names[1], "kitchen-pi-10-0-0-3");
        assert!(names[2].starts_with("kitchen-pi-"));
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn test_observer_runs_off_thread() {
        let (repo, reconciler) = setup();
        reconciler
            .on_event(&MembershipEvent::discovered(pi("10.0.0.4")))
            .await
            .unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
    }
}
