//! Durable node registry
//!
//! Source of truth for node identity. Discovery only ever reaches it
//! through the reconciler, which keys every lookup by IP address.

pub mod record;
pub mod repository;

pub use record::{NewNode, NodeRecord, NodeRole, NodeStatus, NodeUpdate, StorageError};
pub use repository::{
    MockNodeRepository, NodeRepository, SharedNodeRepository, SqliteNodeRepository,
};

use std::sync::Arc;

use crate::config::StorageConfig;

/// Open the SQLite registry named in configuration
pub fn open_repository(config: &StorageConfig) -> Result<SharedNodeRepository, StorageError> {
    Ok(Arc::new(SqliteNodeRepository::new(&config.sqlite_path)?))
}
