//! Discovery configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// Passive mDNS / DNS-SD listening
    #[default]
    #[serde(alias = "mdns")]
    Broadcast,

    /// Active TCP sweep of local subnets
    Probe,

    /// Fixed address list from configuration
    Static,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Probe => "probe",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broadcast" | "mdns" => Ok(Self::Broadcast),
            "probe" => Ok(Self::Probe),
            "static" => Ok(Self::Static),
            other => Err(ConfigError::InvalidValue {
                field: "method".to_string(),
                reason: format!("unknown discovery method '{other}'"),
            }),
        }
    }
}

/// Discovery service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Active backend
    pub method: DiscoveryMethod,

    /// Restrict broadcast/probe to one interface
    pub interface: Option<String>,

    /// Discovery cycle period in seconds
    pub interval_secs: u64,

    /// Per-cycle sample timeout in seconds
    pub timeout_secs: u64,

    /// `host:port` entries for the static backend
    pub static_nodes: Vec<String>,

    /// Instance name used when announcing
    pub service_name: String,

    /// DNS-SD service type tag
    pub service_type: String,

    /// DNS-SD domain
    pub domain: String,

    /// Port probed by the probe backend
    pub probe_port: u16,

    /// Concurrent probe connections
    pub probe_concurrency: usize,

    /// Upper bound on probed addresses per subnet
    pub probe_max_hosts: usize,

    /// Probe connect timeout in milliseconds
    pub probe_connect_timeout_ms: u64,

    /// Missed intervals before an entry is lost
    pub staleness_multiplier: u32,

    /// Sweep period in intervals
    pub sweep_multiplier: u32,

    /// How long `stop` waits for in-flight cycles, in seconds
    pub shutdown_grace_secs: u64,

    /// Per-observer event queue length
    pub observer_queue_capacity: usize,
}

pub const DEFAULT_SERVICE_TYPE: &str = "_pifleet._tcp";
pub const DEFAULT_DOMAIN: &str = "local.";
pub const DEFAULT_SERVICE_PORT: u16 = 9091;

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::Broadcast,
            interface: None,
            interval_secs: 30,
            timeout_secs: 5,
            static_nodes: Vec::new(),
            service_name: "pifleet".to_string(),
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            probe_port: DEFAULT_SERVICE_PORT,
            probe_concurrency: 64,
            probe_max_hosts: 1024,
            probe_connect_timeout_ms: 300,
            staleness_multiplier: 3,
            sweep_multiplier: 2,
            shutdown_grace_secs: 5,
            observer_queue_capacity: 256,
        }
    }
}

impl DiscoveryConfig {
    /// Create a new config builder
    pub fn builder() -> DiscoveryConfigBuilder {
        DiscoveryConfigBuilder::default()
    }

    /// Discovery cycle period
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-cycle sample timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Time without observation after which an entry is lost
    #[must_use]
    pub fn staleness_threshold(&self) -> Duration {
        self.interval() * self.staleness_multiplier
    }

    /// Sweep cycle period
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.interval() * self.sweep_multiplier
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Fully qualified service type (`_pifleet._tcp.local.`)
    pub fn service_type_domain(&self) -> String {
        let ty = self.service_type.trim_end_matches('.');
        let domain = self.domain.trim_matches('.');
        format!("{ty}.{domain}.")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("interval_secs", "must be greater than 0"));
        }

        if self.timeout_secs == 0 || self.timeout_secs >= self.interval_secs {
            return Err(ConfigError::invalid(
                "timeout_secs",
                "must be greater than 0 and shorter than the interval",
            ));
        }

        if self.staleness_multiplier < 1 {
            return Err(ConfigError::invalid("staleness_multiplier", "must be at least 1"));
        }

        if self.sweep_multiplier < 1 {
            return Err(ConfigError::invalid("sweep_multiplier", "must be at least 1"));
        }

        if self.observer_queue_capacity == 0 {
            return Err(ConfigError::invalid("observer_queue_capacity", "must be greater than 0"));
        }

        if !is_service_type(&self.service_type) {
            return Err(ConfigError::invalid(
                "service_type",
                format!("'{}' is not of the form _name._tcp or _name._udp", self.service_type),
            ));
        }

        if self.method == DiscoveryMethod::Probe && self.probe_concurrency == 0 {
            return Err(ConfigError::invalid("probe_concurrency", "must be greater than 0"));
        }

        if matches!(&self.interface, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::invalid("interface", "must not be blank"));
        }

        Ok(())
    }
}

fn is_service_type(ty: &str) -> bool {
    let mut labels = ty.trim_end_matches('.').split('.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some(name), Some(proto), None) => {
            name.len() > 1 && name.starts_with('_') && (proto == "_tcp" || proto == "_udp")
        }
        _ => false,
    }
}

/// Builder for DiscoveryConfig
#[derive(Debug, Default)]
pub struct DiscoveryConfigBuilder {
    config: DiscoveryConfig,
}

impl DiscoveryConfigBuilder {
    pub fn method(mut self, method: DiscoveryMethod) -> Self {
        self.config.method = method;
        self
    }

    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.config.interface = Some(name.into());
        self
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.config.interval_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn static_nodes(mut self, nodes: Vec<String>) -> Self {
        self.config.static_nodes = nodes;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    pub fn service_type(mut self, ty: impl Into<String>) -> Self {
        self.config.service_type = ty.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain = domain.into();
        self
    }

    pub fn probe_port(mut self, port: u16) -> Self {
        self.config.probe_port = port;
        self
    }

    pub fn probe_concurrency(mut self, concurrency: usize) -> Self {
        self.config.probe_concurrency = concurrency;
        self
    }

    pub fn staleness_multiplier(mut self, multiplier: u32) -> Self {
        self.config.staleness_multiplier = multiplier;
        self
    }

    pub fn sweep_multiplier(mut self, multiplier: u32) -> Self {
        self.config.sweep_multiplier = multiplier;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    pub fn observer_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.observer_queue_capacity = capacity;
        self
    }

    /// Build and validate the config
    pub fn build(self) -> Result<DiscoveryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidValue { field, .. } | Self::MissingField { field } => field,
        }
    }
}
