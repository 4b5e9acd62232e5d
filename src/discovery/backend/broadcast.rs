//! Passive broadcast backend (mDNS / DNS-SD)
//!
//! A listener task browses for the service type and maintains the set of
//! instances currently resolvable on the link. Each sample returns that set,
//! so an announcement seen several times between cycles yields one entry.
//! Instances leave the set when their goodbye packet arrives or their record
//! expires in the daemon cache.

use async_trait::async_trait;
use chrono::Utc;
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::DiscoveryBackend;
use crate::discovery::error::BackendError;
use crate::discovery::node::{keys, ObservedNode};

type VisibleSet = Arc<RwLock<HashMap<String, ObservedNode>>>;

/// Backend listening for service announcements on the local link
pub struct BroadcastBackend {
    daemon: ServiceDaemon,
    service_type: String,
    visible: VisibleSet,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastBackend {
    /// Join the multicast group and start browsing `service_type`
    ///
    /// `service_type` is fully qualified (`_pifleet._tcp.local.`). When an
    /// interface is named, every other interface is disabled on the daemon.
    pub fn new(service_type: impl Into<String>, interface: Option<&str>) -> Result<Self, BackendError> {
        let service_type = service_type.into();
        let daemon = ServiceDaemon::new()?;

        if let Some(name) = interface {
            daemon.disable_interface(IfKind::All)?;
            daemon.enable_interface(IfKind::Name(name.to_string()))?;
        }

        let receiver = daemon.browse(&service_type)?;
        let visible: VisibleSet = Arc::default();

        let listener = {
            let visible = visible.clone();
            let service_type = service_type.clone();
            tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    handle_event(&visible, &service_type, event).await;
                }
                tracing::debug!(service_type = %service_type, "Browse channel closed");
            })
        };

        tracing::info!(service_type = %service_type, interface = ?interface, "Browsing for announcements");

        Ok(Self {
            daemon,
            service_type,
            visible,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Fully qualified service type being browsed
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    fn listener_alive(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn handle_event(visible: &VisibleSet, service_type: &str, event: ServiceEvent) {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let Some(node) = observed_from_service_info(&info, service_type) else {
                tracing::debug!(fullname = info.get_fullname(), "Resolved instance has no address");
                return;
            };
            tracing::trace!(id = %node.id, ip = %node.ip, "Announcement resolved");
            visible.write().await.insert(node.id.clone(), node);
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            if visible.write().await.remove(&fullname).is_some() {
                tracing::debug!(fullname = %fullname, "Announcement withdrawn");
            }
        }
        _ => {}
    }
}

/// Convert a resolved DNS-SD instance into an observation
///
/// IPv4 addresses are preferred. Returns `None` when the instance carries no
/// address at all.
pub fn observed_from_service_info(info: &ServiceInfo, service_type: &str) -> Option<ObservedNode> {
    let addresses = info.get_addresses();
    let ip: IpAddr = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let fullname = info.get_fullname();
    let instance = fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| info.get_hostname().trim_end_matches('.'));

    // `_service._proto` without the domain
    let tag = service_type.splitn(3, '.').take(2).collect::<Vec<_>>().join(".");

    let mut node = ObservedNode::new(fullname, instance, ip, info.get_port()).with_service_type(&tag);
    for prop in info.get_properties().iter() {
        node = node.with_meta(prop.key(), prop.val_str());
    }
    Some(node.with_meta(keys::DISCOVERY, "broadcast"))
}

#[async_trait]
impl DiscoveryBackend for BroadcastBackend {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn sample(&self) -> Result<Vec<ObservedNode>, BackendError> {
        if !self.listener_alive() {
            return Err(BackendError::Closed);
        }

        let now = Utc::now();
        let visible = self.visible.read().await;
        Ok(visible.values().cloned().map(|node| node.seen_at(now)).collect())
    }

    async fn shutdown(&self) {
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            tracing::debug!(error = %e, "stop_browse failed");
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!(error = %e, "mDNS daemon shutdown failed");
        }

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.visible.write().await.clear();
    }
}
