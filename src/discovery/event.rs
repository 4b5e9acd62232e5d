//! Membership events and the observer interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::node::ObservedNode;

/// Kind of membership transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// First observation of an identity
    Discovered,

    /// Known identity whose advertised data changed
    Updated,

    /// Identity evicted after missing the staleness threshold
    Lost,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Updated => "updated",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable membership transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub kind: EventKind,
    pub node: ObservedNode,
}

impl MembershipEvent {
    pub fn new(kind: EventKind, node: ObservedNode) -> Self {
        Self { kind, node }
    }

    pub fn discovered(node: ObservedNode) -> Self {
        Self::new(EventKind::Discovered, node)
    }

    pub fn updated(node: ObservedNode) -> Self {
        Self::new(EventKind::Updated, node)
    }

    pub fn lost(node: ObservedNode) -> Self {
        Self::new(EventKind::Lost, node)
    }
}

impl fmt::Display for MembershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.node.id, self.node.address())
    }
}

/// Error returned by an observer; logged and otherwise ignored
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of membership events
///
/// Each observer runs on its own queue, so a slow or failing observer never
/// stalls discovery or other observers. Panics are caught and logged.
#[async_trait]
pub trait MembershipObserver: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Handle one event
    async fn on_event(&self, event: &MembershipEvent) -> Result<(), ObserverError>;
}

/// Adapter turning a plain callback into an observer
pub struct FnObserver<F> {
    name: String,
    callback: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&MembershipEvent) + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F> MembershipObserver for FnObserver<F>
where
    F: Fn(&MembershipEvent) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &MembershipEvent) -> Result<(), ObserverError> {
        (self.callback)(event);
        Ok(())
    }
}
