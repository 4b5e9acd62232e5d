//! Configuration management for pifleet
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Command-line flags are applied on top by the binary.

mod discovery;

pub use discovery::{
    ConfigError, DiscoveryConfig, DiscoveryConfigBuilder, DiscoveryMethod, DEFAULT_DOMAIN,
    DEFAULT_SERVICE_PORT, DEFAULT_SERVICE_TYPE,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery service configuration
    pub discovery: DiscoveryConfig,

    /// Announcement beacon configuration
    pub announce: AnnounceConfig,

    /// Node registry storage
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Health and metrics endpoints
    pub status: StatusConfig,

    /// Outbound membership notifications
    pub notify: NotifyConfig,
}

/// Announcement beacon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Instance name; `<service_name>-<hostname>` when unset
    pub instance_name: Option<String>,

    /// Advertised service port
    pub port: u16,

    /// Advertisement record TTL in seconds
    pub ttl_secs: u32,

    /// Re-announce period in seconds
    pub reannounce_secs: u64,

    /// Advertised capabilities
    pub capabilities: Vec<String>,

    /// Advertised software version
    pub version: String,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            instance_name: None,
            port: DEFAULT_SERVICE_PORT,
            ttl_secs: 120,
            reannounce_secs: 60,
            capabilities: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AnnounceConfig {
    #[must_use]
    pub fn reannounce_interval(&self) -> Duration {
        Duration::from_secs(self.reannounce_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/pifleet.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Serve `/health/*` and `/metrics`
    pub enabled: bool,

    /// Listen address
    pub bind_address: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 9092)),
        }
    }
}

/// Webhook notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Endpoint receiving membership events; disabled when unset
    pub webhook_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Bearer token sent with each request
    pub auth_token: Option<String>,

    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
            auth_token: None,
            max_retries: 3,
        }
    }
}

impl NotifyConfig {
    /// Webhook request timeout
    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// An unknown `PIFLEET_DISCOVERY_METHOD` is an error rather than a
    /// silent fallback.
    pub fn from_env() -> Result<Self> {
        let defaults = DiscoveryConfig::default();

        let method = match std::env::var("PIFLEET_DISCOVERY_METHOD") {
            Ok(raw) => raw.parse::<DiscoveryMethod>()?,
            Err(_) => defaults.method,
        };

        let discovery = DiscoveryConfig {
            method,
            interface: std::env::var("PIFLEET_DISCOVERY_INTERFACE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            interval_secs: env_parse("PIFLEET_DISCOVERY_INTERVAL").unwrap_or(defaults.interval_secs),
            timeout_secs: env_parse("PIFLEET_DISCOVERY_TIMEOUT").unwrap_or(defaults.timeout_secs),
            static_nodes: env_list("PIFLEET_STATIC_NODES").unwrap_or_default(),
            service_name: std::env::var("PIFLEET_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_type: std::env::var("PIFLEET_SERVICE_TYPE").unwrap_or(defaults.service_type),
            domain: std::env::var("PIFLEET_DOMAIN").unwrap_or(defaults.domain),
            probe_port: env_parse("PIFLEET_PROBE_PORT").unwrap_or(defaults.probe_port),
            probe_concurrency: env_parse("PIFLEET_PROBE_CONCURRENCY")
                .unwrap_or(defaults.probe_concurrency),
            staleness_multiplier: env_parse("PIFLEET_STALENESS_MULTIPLIER")
                .unwrap_or(defaults.staleness_multiplier),
            sweep_multiplier: env_parse("PIFLEET_SWEEP_MULTIPLIER")
                .unwrap_or(defaults.sweep_multiplier),
            ..defaults
        };

        let announce_defaults = AnnounceConfig::default();
        let announce = AnnounceConfig {
            instance_name: std::env::var("PIFLEET_INSTANCE_NAME").ok(),
            port: env_parse("PIFLEET_ANNOUNCE_PORT").unwrap_or(announce_defaults.port),
            ttl_secs: env_parse("PIFLEET_ANNOUNCE_TTL").unwrap_or(announce_defaults.ttl_secs),
            capabilities: env_list("PIFLEET_CAPABILITIES").unwrap_or_default(),
            ..announce_defaults
        };

        let sqlite_path = std::env::var("PIFLEET_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/pifleet.db"))
            .into();

        let status_defaults = StatusConfig::default();
        let status = StatusConfig {
            enabled: env_parse("PIFLEET_STATUS_ENABLED").unwrap_or(status_defaults.enabled),
            bind_address: env_parse("PIFLEET_STATUS_BIND").unwrap_or(status_defaults.bind_address),
        };

        let notify = NotifyConfig {
            webhook_url: std::env::var("PIFLEET_WEBHOOK_URL").ok(),
            auth_token: std::env::var("PIFLEET_WEBHOOK_TOKEN").ok(),
            ..NotifyConfig::default()
        };

        let log_level = std::env::var("PIFLEET_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format = std::env::var("PIFLEET_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            discovery,
            announce,
            storage: StorageConfig { sqlite_path },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
            status,
            notify,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;

        if self.announce.reannounce_secs == 0 {
            anyhow::bail!("announce.reannounce_secs must be greater than 0");
        }

        if u64::from(self.announce.ttl_secs) < self.announce.reannounce_secs {
            anyhow::bail!("announce.ttl_secs must not be shorter than reannounce_secs");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        if let Some(url) = &self.notify.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("notify.webhook_url must be an http(s) URL");
            }
        }

        Ok(())
    }
}
