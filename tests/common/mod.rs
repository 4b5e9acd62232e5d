//! Common test utilities

use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;

use pifleet::discovery::{keys, ObservedNode};
use pifleet::storage::{NodeRecord, NodeRole, NodeStatus};

/// Create an observation with architecture and model attributes
pub fn pi_node(id: &str, ip: &str) -> ObservedNode {
    ObservedNode::new(id, id, ip.parse().unwrap(), 9091)
        .with_meta(keys::ARCH, "arm64")
        .with_meta(keys::MODEL, "Pi4")
}

/// Timestamp `secs` seconds after a fixed origin
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

/// A stored record as another writer would have left it
#[allow(dead_code)]
pub fn existing_record(name: &str, ip: &str, status: NodeStatus) -> NodeRecord {
    let now = at(0);
    NodeRecord {
        id: format!("rec-{name}"),
        name: name.to_string(),
        ip: ip.parse::<IpAddr>().unwrap(),
        mac: None,
        status,
        role: NodeRole::Master,
        architecture: "armv7".to_string(),
        model: "Pi3".to_string(),
        cpu_cores: 4,
        memory_mb: 1024,
        last_seen: now,
        cluster_id: Some("cluster-a".to_string()),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        version: 1,
    }
}
