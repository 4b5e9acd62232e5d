//! Error types for discovery

use std::time::Duration;
use thiserror::Error;

/// Failures inside a discovery backend
///
/// Transport failures never stop the service: the cycle is logged and
/// treated as an empty sample.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Sampling exceeded the per-cycle timeout
    #[error("sample timed out after {0:?}")]
    Timeout(Duration),

    /// Socket or interface failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// mDNS daemon failure
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// No usable network interface
    #[error("no usable network interface{}", interface_suffix(.0))]
    NoInterface(Option<String>),

    /// Address in configuration could not be parsed or resolved
    #[error("invalid node address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Backend was shut down
    #[error("backend is shut down")]
    Closed,
}

fn interface_suffix(name: &Option<String>) -> String {
    name.as_deref()
        .map(|n| format!(" named {n}"))
        .unwrap_or_default()
}

impl BackendError {
    /// Configuration problems are fatal, transport problems are not
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. })
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
            Self::Mdns(_) => "mdns",
            Self::NoInterface(_) => "no_interface",
            Self::InvalidAddress { .. } => "invalid_address",
            Self::Closed => "closed",
        }
    }
}

impl From<mdns_sd::Error> for BackendError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}

/// Errors surfaced by the discovery service to its caller
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// `start` called while running
    #[error("discovery service is already running")]
    AlreadyRunning,

    /// Invalid configuration, reported before any task starts
    #[error("invalid discovery configuration: {0}")]
    Config(String),

    /// Backend could not be constructed
    #[error("discovery backend error: {0}")]
    Backend(#[from] BackendError),
}
