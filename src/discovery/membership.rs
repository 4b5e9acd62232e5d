//! Membership registry
//!
//! In-memory table of the nodes currently visible to discovery, keyed by
//! discovery identity. Only the discovery service writes to it; readers get
//! copies, never references into the map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::event::{EventKind, MembershipEvent};
use super::node::ObservedNode;

// ============================================================================
// Member Entry
// ============================================================================

/// A registry entry: the latest observation plus bookkeeping
#[derive(Debug, Clone)]
pub struct MemberEntry {
    /// Latest observation
    pub node: ObservedNode,

    /// Pinned entries are never swept (statically configured nodes)
    pub pinned: bool,

    /// When the identity was first observed
    pub first_seen: DateTime<Utc>,

    /// Monotonic time of the latest observation
    seen_at: Instant,
}

impl MemberEntry {
    fn new(node: ObservedNode, pinned: bool, now: Instant) -> Self {
        Self {
            first_seen: node.last_seen,
            node,
            pinned,
            seen_at: now,
        }
    }

    /// Time elapsed since the latest observation
    pub fn since_seen(&self) -> Duration {
        self.seen_at.elapsed()
    }

    /// Whether the entry has gone unobserved for at least `threshold`
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        !self.pinned && now.saturating_duration_since(self.seen_at) >= threshold
    }
}

// ============================================================================
// Membership Registry
// ============================================================================

/// Concurrency-safe table of live members
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    members: Arc<RwLock<HashMap<String, MemberEntry>>>,
}

impl MembershipRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and report the resulting transition
    ///
    /// Returns `Discovered` for an unknown identity, `Updated` when anything
    /// besides `last_seen` changed, and `None` for a plain refresh.
    pub async fn upsert(&self, node: ObservedNode, pinned: bool) -> Option<EventKind> {
        let mut members = self.members.write().await;
        Self::upsert_locked(&mut members, node, pinned, Instant::now())
    }

    /// Record a batch of observations under a single lock
    ///
    /// Events come back in observation order.
    pub async fn apply(&self, nodes: Vec<ObservedNode>, pinned: bool) -> Vec<MembershipEvent> {
        let now = Instant::now();
        let mut members = self.members.write().await;

        let mut events = Vec::new();
        for node in nodes {
            let snapshot = node.clone();
            if let Some(kind) = Self::upsert_locked(&mut members, node, pinned, now) {
                events.push(MembershipEvent::new(kind, snapshot));
            }
        }
        events
    }

    fn upsert_locked(
        members: &mut HashMap<String, MemberEntry>,
        node: ObservedNode,
        pinned: bool,
        now: Instant,
    ) -> Option<EventKind> {
        match members.get_mut(&node.id) {
            Some(entry) => {
                let changed = entry.node.differs_from(&node);
                entry.node = node;
                entry.pinned = pinned;
                entry.seen_at = now;
                changed.then_some(EventKind::Updated)
            }
            None => {
                members.insert(node.id.clone(), MemberEntry::new(node, pinned, now));
                Some(EventKind::Discovered)
            }
        }
    }

    /// Remove and return every unpinned entry unobserved for at least
    /// `threshold`
    pub async fn sweep_stale(&self, threshold: Duration) -> Vec<ObservedNode> {
        let now = Instant::now();
        let mut members = self.members.write().await;

        let stale: Vec<String> = members
            .iter()
            .filter(|(_, entry)| entry.is_stale(threshold, now))
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| members.remove(&id))
            .map(|entry| entry.node)
            .collect()
    }

    /// Point-in-time copy of all entries
    pub async fn snapshot(&self) -> Vec<MemberEntry> {
        self.members.read().await.values().cloned().collect()
    }

    /// Copy of one entry
    pub async fn get(&self, id: &str) -> Option<MemberEntry> {
        self.members.read().await.get(id).cloned()
    }

    /// Drop an entry without emitting anything
    pub async fn remove(&self, id: &str) -> Option<MemberEntry> {
        self.members.write().await.remove(id)
    }

    /// Number of members
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Registry statistics
    pub async fn stats(&self) -> MembershipStats {
        let members = self.members.read().await;
        let pinned = members.values().filter(|e| e.pinned).count();

        MembershipStats {
            total: members.len(),
            pinned,
            dynamic: members.len() - pinned,
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipStats {
    pub total: usize,
    pub pinned: usize,
    pub dynamic: usize,
}

// ============================================================================
// Tests
// ============================================================================
