//! Repository Pattern for the Node Registry
//!
//! The reconciler talks to durable storage only through [`NodeRepository`],
//! which keeps it independent of the backing store:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Reconciler                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NodeRepository                          │
//! │  find_by_ip, create, update_fields, touch_last_seen, ...    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!     ┌─────────────────┐           ┌─────────────────┐
//!     │     SQLite      │           │      Mock       │
//!     │  Implementation │           │ Implementation  │
//!     └─────────────────┘           └─────────────────┘
//! ```
//!
//! Operations are synchronous. Writes other than `touch_last_seen` are
//! conditional on the record `version`, so callers that read then write
//! detect concurrent modification instead of overwriting it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pifleet::storage::{NodeRepository, SqliteNodeRepository, MockNodeRepository};
//!
//! // Production: use SQLite
//! let repo = SqliteNodeRepository::new("data/pifleet.db")?;
//!
//! // Testing: use Mock
//! let mock_repo = MockNodeRepository::new();
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::record::{NewNode, NodeRecord, NodeUpdate, StorageError};

// ============================================================================
// Repository Trait
// ============================================================================

/// Durable node registry contract
pub trait NodeRepository: Send + Sync {
    /// Live record with the given address
    fn find_by_ip(&self, ip: IpAddr) -> Result<Option<NodeRecord>, StorageError>;

    /// Live record with the given name
    fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>, StorageError>;

    /// Insert a record
    ///
    /// Fails with [`StorageError::Duplicate`] when a live record already
    /// has the same name or address.
    fn create(&self, node: NewNode) -> Result<NodeRecord, StorageError>;

    /// Apply a partial update if the stored version still equals
    /// `expected_version`
    fn update_fields(
        &self,
        id: &str,
        expected_version: u64,
        patch: &NodeUpdate,
    ) -> Result<NodeRecord, StorageError>;

    /// Move `last_seen` forward to `at`; never moves it backwards and does
    /// not change the version
    fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Record by id, including deleted ones
    fn get(&self, id: &str) -> Result<Option<NodeRecord>, StorageError>;

    /// All live records ordered by name
    fn list(&self) -> Result<Vec<NodeRecord>, StorageError>;

    /// Soft-delete; returns false when already deleted or absent
    fn mark_deleted(&self, id: &str) -> Result<bool, StorageError>;
}

/// Shared repository handle
pub type SharedNodeRepository = Arc<dyn NodeRepository>;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of NodeRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteNodeRepository {
    conn: Mutex<Connection>,
}

const NODE_COLUMNS: &str = "id, name, ip, mac, status, role, architecture, model, cpu_cores, \
     memory_mb, last_seen, cluster_id, created_at, updated_at, deleted_at, version";

impl SqliteNodeRepository {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "Node registry opened");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn().execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    ip TEXT NOT NULL,
                    mac TEXT,
                    status TEXT NOT NULL,
                    role TEXT NOT NULL,
                    architecture TEXT NOT NULL,
                    model TEXT NOT NULL,
                    cpu_cores INTEGER NOT NULL DEFAULT 0,
                    memory_mb INTEGER NOT NULL DEFAULT 0,
                    last_seen TEXT NOT NULL,
                    cluster_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted_at TEXT,
                    version INTEGER NOT NULL DEFAULT 1
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_live_ip
                    ON nodes(ip) WHERE deleted_at IS NULL;

                CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_live_name
                    ON nodes(name) WHERE deleted_at IS NULL;

                CREATE INDEX IF NOT EXISTS idx_nodes_status
                    ON nodes(status);
                "#,
        )?;
        Ok(())
    }

    fn select_one(
        conn: &Connection,
        clause: &str,
        param: &str,
    ) -> Result<Option<NodeRecord>, StorageError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} LIMIT 1");
        conn.query_row(&sql, params![param], RawNode::from_row)
            .optional()?
            .map(NodeRecord::try_from)
            .transpose()
    }

    fn write(conn: &Connection, record: &NodeRecord) -> Result<(), StorageError> {
        conn.execute(
            r#"
                UPDATE nodes SET
                    name = ?2, mac = ?3, status = ?4, role = ?5, architecture = ?6,
                    model = ?7, cpu_cores = ?8, memory_mb = ?9, last_seen = ?10,
                    cluster_id = ?11, updated_at = ?12, deleted_at = ?13, version = ?14
                WHERE id = ?1
                "#,
            params![
                record.id,
                record.name,
                record.mac,
                record.status.as_str(),
                record.role.as_str(),
                record.architecture,
                record.model,
                record.cpu_cores,
                record.memory_mb as i64,
                record.last_seen.to_rfc3339(),
                record.cluster_id,
                record.updated_at.to_rfc3339(),
                record.deleted_at.map(|t| t.to_rfc3339()),
                record.version as i64,
            ],
        )
        .map_err(|e| map_constraint(e, record))?;
        Ok(())
    }
}

impl NodeRepository for SqliteNodeRepository {
    fn find_by_ip(&self, ip: IpAddr) -> Result<Option<NodeRecord>, StorageError> {
        Self::select_one(&self.conn(), "ip = ?1 AND deleted_at IS NULL", &ip.to_string())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>, StorageError> {
        Self::select_one(&self.conn(), "name = ?1 AND deleted_at IS NULL", name)
    }

    fn create(&self, node: NewNode) -> Result<NodeRecord, StorageError> {
        let record = node.into_record(new_id(), Utc::now());
        let conn = self.conn();

        conn.execute(
            &format!(
                "INSERT INTO nodes ({NODE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, ?15)"
            ),
            params![
                record.id,
                record.name,
                record.ip.to_string(),
                record.mac,
                record.status.as_str(),
                record.role.as_str(),
                record.architecture,
                record.model,
                record.cpu_cores,
                record.memory_mb as i64,
                record.last_seen.to_rfc3339(),
                record.cluster_id,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.version as i64,
            ],
        )
        .map_err(|e| map_constraint(e, &record))?;

        tracing::debug!(id = %record.id, name = %record.name, ip = %record.ip, "Node record created");
        Ok(record)
    }

    fn update_fields(
        &self,
        id: &str,
        expected_version: u64,
        patch: &NodeUpdate,
    ) -> Result<NodeRecord, StorageError> {
        let conn = self.conn();
        let mut record = Self::select_one(&conn, "id = ?1", id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if record.version != expected_version {
            return Err(StorageError::Conflict {
                id: id.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }

        patch.apply_to(&mut record);
        record.version += 1;
        record.updated_at = Utc::now();
        Self::write(&conn, &record)?;
        Ok(record)
    }

    fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let conn = self.conn();
        let record = Self::select_one(&conn, "id = ?1", id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if at > record.last_seen {
            conn.execute(
                "UPDATE nodes SET last_seen = ?2 WHERE id = ?1",
                params![id, at.to_rfc3339()],
            )?;
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<NodeRecord>, StorageError> {
        Self::select_one(&self.conn(), "id = ?1", id)
    }

    fn list(&self) -> Result<Vec<NodeRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE deleted_at IS NULL ORDER BY name"
        ))?;

        let raw = stmt
            .query_map([], RawNode::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(NodeRecord::try_from).collect()
    }

    fn mark_deleted(&self, id: &str) -> Result<bool, StorageError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn().execute(
            "UPDATE nodes SET deleted_at = ?2, updated_at = ?2, version = version + 1 \
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )?;
        Ok(changed > 0)
    }
}

fn map_constraint(err: rusqlite::Error, record: &NodeRecord) -> StorageError {
    if let rusqlite::Error::SqliteFailure(e, Some(msg)) = &err {
        if e.code == ErrorCode::ConstraintViolation {
            if msg.contains("nodes.ip") {
                return StorageError::Duplicate {
                    field: "ip".to_string(),
                    value: record.ip.to_string(),
                };
            }
            if msg.contains("nodes.name") {
                return StorageError::Duplicate {
                    field: "name".to_string(),
                    value: record.name.clone(),
                };
            }
        }
    }
    StorageError::Database(err)
}

/// Row as stored, before parsing text columns
struct RawNode {
    id: String,
    name: String,
    ip: String,
    mac: Option<String>,
    status: String,
    role: String,
    architecture: String,
    model: String,
    cpu_cores: u32,
    memory_mb: i64,
    last_seen: String,
    cluster_id: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
    version: i64,
}

impl RawNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            ip: row.get(2)?,
            mac: row.get(3)?,
            status: row.get(4)?,
            role: row.get(5)?,
            architecture: row.get(6)?,
            model: row.get(7)?,
            cpu_cores: row.get(8)?,
            memory_mb: row.get(9)?,
            last_seen: row.get(10)?,
            cluster_id: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            deleted_at: row.get(14)?,
            version: row.get(15)?,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{value}': {e}")))
}

impl TryFrom<RawNode> for NodeRecord {
    type Error = StorageError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        Ok(Self {
            ip: raw
                .ip
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("bad ip '{}'", raw.ip)))?,
            status: raw.status.parse()?,
            role: raw.role.parse()?,
            last_seen: parse_time(&raw.last_seen)?,
            created_at: parse_time(&raw.created_at)?,
            updated_at: parse_time(&raw.updated_at)?,
            deleted_at: raw.deleted_at.as_deref().map(parse_time).transpose()?,
            memory_mb: raw.memory_mb.max(0) as u64,
            version: raw.version.max(0) as u64,
            id: raw.id,
            name: raw.name,
            mac: raw.mac,
            architecture: raw.architecture,
            model: raw.model,
            cpu_cores: raw.cpu_cores,
            cluster_id: raw.cluster_id,
        })
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory implementation of NodeRepository
///
/// Failures can be injected to exercise error paths.
#[derive(Default)]
pub struct MockNodeRepository {
    records: RwLock<HashMap<String, NodeRecord>>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    writes: AtomicUsize,
}

impl MockNodeRepository {
    /// Create a new empty mock repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` operations
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of successful `create`, `update_fields` and `mark_deleted`
    /// calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert a record as-is
    pub fn insert(&self, record: NodeRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("mock repository offline".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, NodeRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, NodeRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_clash(
        records: &HashMap<String, NodeRecord>,
        candidate: &NodeRecord,
    ) -> Option<StorageError> {
        let others = records
            .values()
            .filter(|r| r.id != candidate.id && !r.is_deleted());
        for other in others {
            if other.ip == candidate.ip {
                return Some(StorageError::Duplicate {
                    field: "ip".to_string(),
                    value: candidate.ip.to_string(),
                });
            }
            if other.name == candidate.name {
                return Some(StorageError::Duplicate {
                    field: "name".to_string(),
                    value: candidate.name.clone(),
                });
            }
        }
        None
    }
}

impl NodeRepository for MockNodeRepository {
    fn find_by_ip(&self, ip: IpAddr) -> Result<Option<NodeRecord>, StorageError> {
        self.check()?;
        Ok(self
            .read()
            .values()
            .find(|r| r.ip == ip && !r.is_deleted())
            .cloned())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>, StorageError> {
        self.check()?;
        Ok(self
            .read()
            .values()
            .find(|r| r.name == name && !r.is_deleted())
            .cloned())
    }

    fn create(&self, node: NewNode) -> Result<NodeRecord, StorageError> {
        self.check()?;
        let record = node.into_record(new_id(), Utc::now());
        let mut records = self.write();

        if let Some(err) = Self::live_clash(&records, &record) {
            return Err(err);
        }
        records.insert(record.id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    fn update_fields(
        &self,
        id: &str,
        expected_version: u64,
        patch: &NodeUpdate,
    ) -> Result<NodeRecord, StorageError> {
        self.check()?;
        let mut records = self.write();
        let current = records
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if current.version != expected_version {
            return Err(StorageError::Conflict {
                id: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        updated.version += 1;
        updated.updated_at = Utc::now();

        if let Some(err) = Self::live_clash(&records, &updated) {
            return Err(err);
        }
        records.insert(id.to_string(), updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.check()?;
        let mut records = self.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        record.last_seen = record.last_seen.max(at);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<NodeRecord>, StorageError> {
        self.check()?;
        Ok(self.read().get(id).cloned())
    }

    fn list(&self) -> Result<Vec<NodeRecord>, StorageError> {
        self.check()?;
        let mut live: Vec<NodeRecord> = self
            .read()
            .values()
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect();
        live.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(live)
    }

    fn mark_deleted(&self, id: &str) -> Result<bool, StorageError> {
        self.check()?;
        let mut records = self.write();
        match records.get_mut(id) {
            Some(record) if !record.is_deleted() => {
                let now = Utc::now();
                record.deleted_at = Some(now);
                record.updated_at = now;
                record.version += 1;
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::NodeStatus;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn exercise(repo: &dyn NodeRepository) {
        let created = repo.create(NewNode::discovered("pi-01", ip("192.168.1.50"))).unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.status, NodeStatus::Discovered);

        let found = repo.find_by_ip(ip("192.168.1.50")).unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(repo.find_by_name("pi-01").unwrap().unwrap().id, created.id);
        assert!(repo.find_by_ip(ip("192.168.1.51")).unwrap().is_none());

        // unique live ip and name
        let dup_ip = repo.create(NewNode::discovered("other", ip("192.168.1.50")));
        assert!(matches!(dup_ip, Err(StorageError::Duplicate { ref field, .. }) if field == "ip"));
        let dup_name = repo.create(NewNode::discovered("pi-01", ip("192.168.1.51")));
        assert!(matches!(dup_name, Err(StorageError::Duplicate { ref field, .. }) if field == "name"));

        // conditional update
        let patch = NodeUpdate {
            status: Some(NodeStatus::Unknown),
            architecture: Some("arm64".to_string()),
            ..Default::default()
        };
        let updated = repo.update_fields(&created.id, 1, &patch).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, NodeStatus::Unknown);
        assert_eq!(updated.architecture, "arm64");

        let stale = repo.update_fields(&created.id, 1, &patch);
        assert!(matches!(
            stale,
            Err(StorageError::Conflict { expected: 1, actual: 2, .. })
        ));
        assert!(matches!(
            repo.update_fields("missing", 1, &patch),
            Err(StorageError::NotFound(_))
        ));

        // touch is monotonic and unversioned
        let later = updated.last_seen + chrono::Duration::seconds(30);
        repo.touch_last_seen(&created.id, later).unwrap();
        repo.touch_last_seen(&created.id, updated.last_seen).unwrap();
        let touched = repo.get(&created.id).unwrap().unwrap();
        assert_eq!(touched.last_seen.timestamp(), later.timestamp());
        assert_eq!(touched.version, 2);

        // soft delete frees the address
        assert!(repo.mark_deleted(&created.id).unwrap());
        assert!(!repo.mark_deleted(&created.id).unwrap());
        assert!(repo.find_by_ip(ip("192.168.1.50")).unwrap().is_none());
        assert!(repo.get(&created.id).unwrap().unwrap().is_deleted());
        assert!(repo.list().unwrap().is_empty());
        repo.create(NewNode::discovered("pi-01", ip("192.168.1.50"))).unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_repository() {
        let repo = SqliteNodeRepository::in_memory().unwrap();
        exercise(&repo);
    }

    #[test]
    fn test_mock_repository() {
        let repo = MockNodeRepository::new();
        exercise(&repo);
        assert_eq!(repo.write_count(), 4);
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fleet.db");

        let id = {
            let repo = SqliteNodeRepository::new(&path).unwrap();
            repo.create(NewNode::discovered("pi-01", ip("10.0.0.1"))).unwrap().id
        };

        let repo = SqliteNodeRepository::new(&path).unwrap();
        let record = repo.get(&id).unwrap().unwrap();
        assert_eq!(record.name, "pi-01");
        assert_eq!(record.ip, ip("10.0.0.1"));
    }

    #[test]
    fn test_mock_injected_failures() {
        let repo = MockNodeRepository::new();
        repo.fail_next(1);
        assert!(matches!(
            repo.find_by_ip(ip("10.0.0.1")),
            Err(StorageError::Unavailable(_))
        ));
        assert!(repo.find_by_ip(ip("10.0.0.1")).unwrap().is_none());

        repo.set_unavailable(true);
        assert!(repo.list().unwrap_err().is_transient());
        repo.set_unavailable(false);
        assert!(repo.list().is_ok());
    }
}
