//! pifleet - node discovery and fleet membership for single-board computer clusters
//!
//! Nodes join and leave without an enrollment step. pifleet keeps track of
//! which nodes are reachable on the local segment and reconciles that
//! ephemeral view with a durable node registry keyed by IP address.
//!
//! # Architecture
//!
//! - [`announce`] - Announcement Beacon advertising this node
//! - [`discovery`] - Discovery backends, membership registry and service
//! - [`reconcile`] - Membership events onto the durable node registry
//! - [`storage`] - Node registry contract and SQLite implementation
//! - [`notify`] - Webhook live-status notifier
//! - [`status`] - Health and metrics endpoints
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Node naming and local host facts
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pifleet::config::Config;
//! use pifleet::discovery::DiscoveryService;
//! use pifleet::reconcile::Reconciler;
//! use pifleet::storage::open_repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let repo = open_repository(&config.storage)?;
//!     let service = DiscoveryService::from_config(config.discovery)?;
//!     service.subscribe(Arc::new(Reconciler::new(repo)));
//!     service.start().await?;
//!     Ok(())
//! }
//! ```

pub mod announce;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod reconcile;
pub mod status;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DiscoveryConfig, DiscoveryMethod};
    pub use crate::discovery::{
        DiscoveryBackend, DiscoveryService, EventKind, MembershipEvent, MembershipObserver,
        ObservedNode,
    };
    pub use crate::error::{Error, ErrorCategory, FleetErrorTrait, Result};
    pub use crate::reconcile::{ReconcileOutcome, Reconciler};
    pub use crate::storage::{NodeRecord, NodeRepository, NodeStatus};
}
