//! Node discovery and fleet membership
//!
//! A [`DiscoveryService`] samples one [`DiscoveryBackend`] per interval and
//! keeps the [`MembershipRegistry`] of nodes currently visible on the local
//! network segment. Transitions are published as [`MembershipEvent`]s to any
//! number of [`MembershipObserver`]s, each on its own queue.
//!
//! # Example
//!
//! ```ignore
//! use pifleet::config::DiscoveryConfig;
//! use pifleet::discovery::DiscoveryService;
//!
//! let service = DiscoveryService::from_config(DiscoveryConfig::default())?;
//! service.subscribe_fn("log", |event| println!("{event}"));
//! service.start().await?;
//! ```

pub mod backend;
pub mod bus;
pub mod error;
pub mod event;
pub mod membership;
pub mod node;
pub mod service;

pub use backend::{
    create_backend, BroadcastBackend, DiscoveryBackend, ProbeBackend, SharedBackend, StaticBackend,
};
pub use bus::{EventBus, ObserverId};
pub use error::{BackendError, DiscoveryError};
pub use event::{EventKind, FnObserver, MembershipEvent, MembershipObserver, ObserverError};
pub use membership::{MemberEntry, MembershipRegistry, MembershipStats};
pub use node::{keys, ObservedNode};
pub use service::DiscoveryService;
