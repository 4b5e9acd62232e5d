//! Static node list backend
//!
//! Addresses are parsed once at construction. Every sample returns the full
//! list, and the resulting registry entries are pinned.

use async_trait::async_trait;
use chrono::Utc;
use std::net::{SocketAddr, ToSocketAddrs};

use super::{dedup_by_id, DiscoveryBackend};
use crate::discovery::error::BackendError;
use crate::discovery::node::{keys, ObservedNode};

/// Backend serving a fixed, configured node list
#[derive(Debug, Clone)]
pub struct StaticBackend {
    nodes: Vec<ObservedNode>,
}

impl StaticBackend {
    /// Parse `host:port` strings into observations
    ///
    /// Fails on the first address that cannot be parsed or resolved.
    pub fn from_addresses(addresses: &[String], service_type: &str) -> Result<Self, BackendError> {
        let mut nodes = Vec::with_capacity(addresses.len());

        for raw in addresses {
            let addr = parse_node_address(raw)?;
            nodes.push(
                ObservedNode::new(
                    static_id(addr),
                    format!("static-{}", crate::utils::dashed_ip(addr.ip())),
                    addr.ip(),
                    addr.port(),
                )
                .with_service_type(service_type)
                .with_meta(keys::DISCOVERY, "static"),
            );
        }

        if nodes.is_empty() {
            tracing::warn!("Static discovery configured with an empty node list");
        }

        Ok(Self {
            nodes: dedup_by_id(nodes),
        })
    }

    /// Configured nodes
    pub fn nodes(&self) -> &[ObservedNode] {
        &self.nodes
    }
}

#[async_trait]
impl DiscoveryBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    fn pins_entries(&self) -> bool {
        true
    }

    async fn sample(&self) -> Result<Vec<ObservedNode>, BackendError> {
        let now = Utc::now();
        Ok(self
            .nodes
            .iter()
            .cloned()
            .map(|node| node.seen_at(now))
            .collect())
    }
}

fn static_id(addr: SocketAddr) -> String {
    format!("static:{addr}")
}

/// Parse a `host:port` string, resolving host names
pub fn parse_node_address(raw: &str) -> Result<SocketAddr, BackendError> {
    let raw = raw.trim();
    let invalid = |reason: &str| BackendError::InvalidAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(&e.to_string()))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| invalid("host did not resolve to an IPv4 address"))
}
