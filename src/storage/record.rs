//! Durable node records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Status and Role
// ============================================================================

/// Lifecycle status of a durable node record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Seen on the network, not yet self-reported
    Discovered,
    /// Dropped out of discovery; identity retained
    Unknown,
    /// Connected and serving
    Ready,
    /// Taken out of rotation by an operator
    Maintenance,
    /// Explicitly shut down
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Unknown => "unknown",
            Self::Ready => "ready",
            Self::Maintenance => "maintenance",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "unknown" => Ok(Self::Unknown),
            "ready" => Ok(Self::Ready),
            "maintenance" => Ok(Self::Maintenance),
            "offline" => Ok(Self::Offline),
            other => Err(StorageError::Corrupt(format!("unknown node status '{other}'"))),
        }
    }
}

/// Cluster role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Worker,
    Master,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Master => "master",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(Self::Worker),
            "master" => Ok(Self::Master),
            other => Err(StorageError::Corrupt(format!("unknown node role '{other}'"))),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A persisted node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    /// Unique among live records
    pub name: String,
    /// Join key for discovery; unique among live records
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub status: NodeStatus,
    pub role: NodeRole,
    pub architecture: String,
    pub model: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub last_seen: DateTime<Utc>,
    pub cluster_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Incremented by every `update_fields`
    pub version: u64,
}

impl NodeRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields for a new record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub name: String,
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub status: NodeStatus,
    pub role: NodeRole,
    pub architecture: String,
    pub model: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub last_seen: DateTime<Utc>,
    pub cluster_id: Option<String>,
}

impl NewNode {
    /// A freshly discovered worker with placeholder resources
    pub fn discovered(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            mac: None,
            status: NodeStatus::Discovered,
            role: NodeRole::Worker,
            architecture: "unknown".to_string(),
            model: "unknown".to_string(),
            cpu_cores: 0,
            memory_mb: 0,
            last_seen: Utc::now(),
            cluster_id: None,
        }
    }

    pub(crate) fn into_record(self, id: String, now: DateTime<Utc>) -> NodeRecord {
        NodeRecord {
            id,
            name: self.name,
            ip: self.ip,
            mac: self.mac,
            status: self.status,
            role: self.role,
            architecture: self.architecture,
            model: self.model,
            cpu_cores: self.cpu_cores,
            memory_mb: self.memory_mb,
            last_seen: self.last_seen,
            cluster_id: self.cluster_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 1,
        }
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub mac: Option<String>,
    pub status: Option<NodeStatus>,
    pub role: Option<NodeRole>,
    pub architecture: Option<String>,
    pub model: Option<String>,
    pub cpu_cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub cluster_id: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a record in place
    pub(crate) fn apply_to(&self, record: &mut NodeRecord) {
        if let Some(v) = &self.name {
            record.name = v.clone();
        }
        if let Some(v) = &self.mac {
            record.mac = Some(v.clone());
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.role {
            record.role = v;
        }
        if let Some(v) = &self.architecture {
            record.architecture = v.clone();
        }
        if let Some(v) = &self.model {
            record.model = v.clone();
        }
        if let Some(v) = self.cpu_cores {
            record.cpu_cores = v;
        }
        if let Some(v) = self.memory_mb {
            record.memory_mb = v;
        }
        if let Some(v) = self.last_seen {
            record.last_seen = record.last_seen.max(v);
        }
        if let Some(v) = &self.cluster_id {
            record.cluster_id = Some(v.clone());
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Node registry errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("node not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("version conflict on node {id}: expected {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    /// Unique constraint on a live record
    #[error("a live node with {field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store temporarily unusable
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Conflict { .. } | Self::Io(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Duplicate { .. } => "duplicate",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Unavailable(_) => "unavailable",
            Self::Corrupt(_) => "corrupt",
        }
    }
}
