//! Active probe backend
//!
//! Enumerates the IPv4 subnets of local interfaces and attempts a TCP
//! connection to the service port on every candidate. Anything that accepts
//! is reported as a node. Connection attempts run through a fixed-size pool
//! so a large subnet cannot exhaust sockets.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use if_addrs::IfAddr;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

use super::DiscoveryBackend;
use crate::config::DiscoveryConfig;
use crate::discovery::error::BackendError;
use crate::discovery::node::{keys, ObservedNode};

/// Subnets larger than this are narrowed to the /24 around the host
const FALLBACK_PREFIX: u32 = 24;

/// Backend that sweeps local subnets for the service port
#[derive(Debug, Clone)]
pub struct ProbeBackend {
    port: u16,
    interface: Option<String>,
    concurrency: usize,
    max_hosts: usize,
    connect_timeout: Duration,
    service_type: String,
}

impl ProbeBackend {
    pub fn new(port: u16, service_type: impl Into<String>) -> Self {
        Self {
            port,
            interface: None,
            concurrency: 64,
            max_hosts: 1024,
            connect_timeout: Duration::from_millis(300),
            service_type: service_type.into(),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            port: config.probe_port,
            interface: config.interface.clone(),
            concurrency: config.probe_concurrency.max(1),
            max_hosts: config.probe_max_hosts.max(1),
            connect_timeout: Duration::from_millis(config.probe_connect_timeout_ms),
            service_type: config.service_type.clone(),
        }
    }

    /// Restrict probing to one interface
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    /// Set the worker pool size
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-address connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Candidate addresses from the local interfaces
    fn candidates(&self) -> Result<Vec<Ipv4Addr>, BackendError> {
        let mut candidates: Vec<Ipv4Addr> = Vec::new();
        let mut own: Vec<Ipv4Addr> = Vec::new();
        let mut matched = false;

        for iface in if_addrs::get_if_addrs()? {
            if iface.is_loopback() {
                continue;
            }
            if let Some(wanted) = &self.interface {
                if &iface.name != wanted {
                    continue;
                }
            }
            let IfAddr::V4(v4) = &iface.addr else {
                continue;
            };

            matched = true;
            own.push(v4.ip);
            for host in subnet_hosts(v4.ip, v4.netmask, self.max_hosts) {
                if !candidates.contains(&host) {
                    candidates.push(host);
                }
            }
        }

        if !matched {
            return Err(BackendError::NoInterface(self.interface.clone()));
        }

        candidates.retain(|ip| !own.contains(ip));
        Ok(candidates)
    }

    async fn probe(&self, ip: Ipv4Addr) -> Option<ObservedNode> {
        let addr = SocketAddr::new(IpAddr::V4(ip), self.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(self.classify(addr)),
            Ok(Err(e)) => {
                tracing::trace!(%addr, error = %e, "Probe refused");
                None
            }
            Err(_) => None,
        }
    }

    /// Turn a responder into an observation
    fn classify(&self, addr: SocketAddr) -> ObservedNode {
        ObservedNode::new(
            format!("probe:{addr}"),
            format!("node-{}", crate::utils::dashed_ip(addr.ip())),
            addr.ip(),
            addr.port(),
        )
        .with_service_type(&self.service_type)
        .with_meta(keys::DISCOVERY, "probe")
        .seen_at(Utc::now())
    }

    /// Probe an explicit address list
    pub async fn probe_addresses(&self, addresses: Vec<Ipv4Addr>) -> Vec<ObservedNode> {
        stream::iter(addresses)
            .map(|ip| self.probe(ip))
            .buffer_unordered(self.concurrency)
            .filter_map(|found| async move { found })
            .collect()
            .await
    }
}

#[async_trait]
impl DiscoveryBackend for ProbeBackend {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn sample(&self) -> Result<Vec<ObservedNode>, BackendError> {
        let candidates = self.candidates()?;
        tracing::debug!(
            candidates = candidates.len(),
            port = self.port,
            "Probing local subnets"
        );

        let found = self.probe_addresses(candidates).await;
        tracing::debug!(responders = found.len(), "Probe sweep finished");
        Ok(found)
    }
}

/// Host addresses of the subnet containing `ip`
///
/// Subnets with more than `max_hosts` hosts are narrowed to the surrounding
/// /24, then truncated.
pub fn subnet_hosts(ip: Ipv4Addr, netmask: Ipv4Addr, max_hosts: usize) -> Vec<Ipv4Addr> {
    let mut prefix = u32::from(netmask).leading_ones();
    if prefix >= 31 {
        return Vec::new();
    }
    if host_count(prefix) > max_hosts as u64 && prefix < FALLBACK_PREFIX {
        prefix = FALLBACK_PREFIX;
    }

    let mask = u32::MAX << (32 - prefix);
    let network = u32::from(ip) & mask;
    let broadcast = network | !mask;

    ((network + 1)..broadcast)
        .take(max_hosts)
        .map(Ipv4Addr::from)
        .collect()
}

fn host_count(prefix: u32) -> u64 {
    (1u64 << (32 - prefix)).saturating_sub(2)
}
