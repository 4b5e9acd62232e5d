//! Discovery backends
//!
//! A backend produces the set of nodes it can currently see. The discovery
//! service calls [`DiscoveryBackend::sample`] once per cycle and bounds it
//! with the configured timeout. Exactly one backend is active per service,
//! chosen from [`DiscoveryMethod`] when the service is built.

pub mod broadcast;
pub mod probe;
pub mod static_list;

use async_trait::async_trait;
use std::sync::Arc;

use super::error::BackendError;
use super::node::ObservedNode;
use crate::config::{DiscoveryConfig, DiscoveryMethod};

pub use broadcast::BroadcastBackend;
pub use probe::ProbeBackend;
pub use static_list::StaticBackend;

/// Strategy that yields observed nodes
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Whether entries from this backend are exempt from staleness eviction
    fn pins_entries(&self) -> bool {
        false
    }

    /// Everything currently visible, deduplicated by discovery identity
    async fn sample(&self) -> Result<Vec<ObservedNode>, BackendError>;

    /// Release sockets and background tasks
    async fn shutdown(&self) {}
}

/// Shared backend handle
pub type SharedBackend = Arc<dyn DiscoveryBackend>;

/// Build the backend selected by configuration
///
/// Must be called from within a Tokio runtime (the broadcast backend spawns
/// its listener immediately).
pub fn create_backend(config: &DiscoveryConfig) -> Result<SharedBackend, BackendError> {
    let backend: SharedBackend = match config.method {
        DiscoveryMethod::Broadcast => Arc::new(BroadcastBackend::new(
            config.service_type_domain(),
            config.interface.as_deref(),
        )?),
        DiscoveryMethod::Probe => Arc::new(ProbeBackend::from_config(config)),
        DiscoveryMethod::Static => Arc::new(StaticBackend::from_addresses(
            &config.static_nodes,
            &config.service_type,
        )?),
    };

    tracing::info!(
        backend = backend.name(),
        interface = ?config.interface,
        "Discovery backend created"
    );
    Ok(backend)
}

/// Drop repeated identities, keeping the last observation of each
pub(crate) fn dedup_by_id(nodes: Vec<ObservedNode>) -> Vec<ObservedNode> {
    let mut out: Vec<ObservedNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        match out.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => out.push(node),
        }
    }
    out
}
