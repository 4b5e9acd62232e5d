//! Announcement Beacon
//!
//! Advertises this node over mDNS / DNS-SD so that broadcast discovery on
//! other nodes can find it. The advertisement carries the fields every
//! implementation on the segment relies on:
//!
//! - instance name, service type and domain (`pi-kitchen._pifleet._tcp.local.`)
//! - advertised host name and port
//! - text attributes: `name`, `arch`, `model`, `version`, `capabilities`
//! - a record time-to-live, also carried as the `ttl` text attribute
//!
//! The beacon re-registers every `reannounce_secs` and sends a goodbye
//! (unregister) when stopped.

use mdns_sd::{IfKind, ServiceDaemon, ServiceInfo, UnregisterStatus};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::{AnnounceConfig, DiscoveryConfig};
use crate::discovery::keys;
use crate::metrics;
use crate::utils::{local_architecture, local_hostname, local_model, sanitize_node_name};

/// How long to wait for the goodbye packet to go out
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Beacon failures
#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("invalid announcement: {0}")]
    Invalid(String),
}

impl From<mdns_sd::Error> for AnnounceError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}

/// Wire-level announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Service instance name
    pub instance_name: String,
    /// Service type tag (`_pifleet._tcp`)
    pub service_type: String,
    /// Domain suffix (`local.`)
    pub domain: String,
    /// Advertised host name (`pi-kitchen.local.`)
    pub hostname: String,
    /// Advertised addresses; empty means every interface address
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// Free-form text attributes
    pub properties: BTreeMap<String, String>,
    /// Record time-to-live in seconds
    pub ttl_secs: u32,
}

impl Announcement {
    /// Describe the local node
    pub fn local(config: &AnnounceConfig, discovery: &DiscoveryConfig) -> Self {
        let host_label =
            sanitize_node_name(&local_hostname()).unwrap_or_else(|| "pifleet-node".to_string());
        let instance_name = config
            .instance_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{host_label}", discovery.service_name));

        let domain = format!("{}.", discovery.domain.trim_matches('.'));

        let mut properties = BTreeMap::new();
        properties.insert(keys::NAME.to_string(), instance_name.clone());
        properties.insert(keys::ARCH.to_string(), local_architecture().to_string());
        if let Some(model) = local_model() {
            properties.insert(keys::MODEL.to_string(), model);
        }
        properties.insert(keys::VERSION.to_string(), config.version.clone());
        if !config.capabilities.is_empty() {
            properties.insert(keys::CAPABILITIES.to_string(), config.capabilities.join(","));
        }

        Self {
            instance_name,
            service_type: discovery.service_type.trim_end_matches('.').to_string(),
            hostname: format!("{host_label}.{domain}"),
            domain,
            addresses: Vec::new(),
            port: config.port,
            properties,
            ttl_secs: config.ttl_secs,
        }
    }

    /// Set or replace a text attribute
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Advertise fixed addresses instead of every interface address
    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = addresses;
        self
    }

    /// `_pifleet._tcp.local.`
    pub fn service_type_domain(&self) -> String {
        format!("{}.{}", self.service_type, self.domain)
    }

    /// `<instance>._pifleet._tcp.local.`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.instance_name, self.service_type_domain())
    }

    /// Build the DNS-SD record set
    pub fn to_service_info(&self) -> Result<ServiceInfo, AnnounceError> {
        if self.instance_name.trim().is_empty() {
            return Err(AnnounceError::Invalid("instance name is empty".to_string()));
        }
        if self.port == 0 {
            return Err(AnnounceError::Invalid("port must be greater than 0".to_string()));
        }

        let addresses = self
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut properties: HashMap<String, String> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        properties.insert(keys::TTL.to_string(), self.ttl_secs.to_string());

        let info = ServiceInfo::new(
            &self.service_type_domain(),
            &self.instance_name,
            &self.hostname,
            addresses.as_str(),
            self.port,
            properties,
        )?;

        Ok(if self.addresses.is_empty() {
            info.enable_addr_auto()
        } else {
            info
        })
    }
}

/// Periodically advertises the local node
pub struct Beacon {
    announcement: Announcement,
    reannounce: Duration,
    interface: Option<String>,
}

impl Beacon {
    pub fn new(config: &AnnounceConfig, discovery: &DiscoveryConfig) -> Self {
        Self {
            announcement: Announcement::local(config, discovery),
            reannounce: config.reannounce_interval(),
            interface: discovery.interface.clone(),
        }
    }

    /// Use a prepared announcement
    pub fn with_announcement(mut self, announcement: Announcement) -> Self {
        self.announcement = announcement;
        self
    }

    pub fn announcement(&self) -> &Announcement {
        &self.announcement
    }

    /// Register the service and start re-announcing
    pub fn start(self) -> Result<BeaconHandle, AnnounceError> {
        if self.reannounce.is_zero() {
            return Err(AnnounceError::Invalid(
                "re-announce interval must be greater than 0".to_string(),
            ));
        }

        let info = self.announcement.to_service_info()?;
        let daemon = ServiceDaemon::new()?;
        if let Some(name) = &self.interface {
            daemon.disable_interface(IfKind::All)?;
            daemon.enable_interface(IfKind::Name(name.clone()))?;
        }

        register(&daemon, &info)?;
        tracing::info!(
            fullname = %self.announcement.fullname(),
            port = self.announcement.port,
            ttl_secs = self.announcement.ttl_secs,
            "Announcing node"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let fullname = info.get_fullname().to_string();
        let period = self.reannounce;

        let task = {
            let daemon = daemon.clone();
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = register(&daemon, &info) {
                                tracing::warn!(error = %e, "Re-announce failed");
                            }
                        }
                    }
                }
            })
        };

        Ok(BeaconHandle {
            daemon,
            fullname,
            shutdown_tx,
            task,
        })
    }
}

fn register(daemon: &ServiceDaemon, info: &ServiceInfo) -> Result<(), AnnounceError> {
    let result = daemon.register(info.clone());
    metrics::record_announcement(result.is_ok());
    result.map_err(AnnounceError::from)
}

/// Running beacon
pub struct BeaconHandle {
    daemon: ServiceDaemon,
    fullname: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BeaconHandle {
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Stop re-announcing, send a goodbye and shut the daemon down
    pub async fn stop(self) -> Result<(), AnnounceError> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Beacon task ended abnormally");
        }

        let receiver = self.daemon.unregister(&self.fullname)?;
        match tokio::time::timeout(UNREGISTER_TIMEOUT, receiver.recv_async()).await {
            Ok(Ok(UnregisterStatus::OK)) => {
                tracing::info!(fullname = %self.fullname, "Announcement withdrawn");
            }
            Ok(Ok(UnregisterStatus::NotFound)) => {
                tracing::debug!(fullname = %self.fullname, "Announcement already gone");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Unregister status lost"),
            Err(_) => tracing::warn!(fullname = %self.fullname, "Timed out withdrawing announcement"),
        }

        self.daemon.shutdown()?;
        Ok(())
    }
}
