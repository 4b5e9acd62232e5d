//! Observed node model
//!
//! An [`ObservedNode`] is what a discovery backend reports for one remote
//! node in one cycle. It is ephemeral: the membership registry keeps the
//! latest observation per discovery identity and hands out clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

/// Well-known metadata keys carried in announcement text attributes
pub mod keys {
    /// Display name advertised by the node
    pub const NAME: &str = "name";
    /// CPU architecture (`arm64`, `armv7`, `amd64`, ...)
    pub const ARCH: &str = "arch";
    /// Long form of [`ARCH`] used by some older announcers
    pub const ARCHITECTURE: &str = "architecture";
    /// Board model (`Raspberry Pi 4 Model B`, ...)
    pub const MODEL: &str = "model";
    /// Agent software version
    pub const VERSION: &str = "version";
    /// Comma separated capability list
    pub const CAPABILITIES: &str = "capabilities";
    /// Announcement record time-to-live in seconds
    pub const TTL: &str = "ttl";
    /// Hardware address of the announcing interface
    pub const MAC: &str = "mac";
    /// Backend that produced the observation
    pub const DISCOVERY: &str = "discovery";
}

/// A node as seen by a discovery backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedNode {
    /// Backend-assigned identity (not stable across backends)
    pub id: String,

    /// Display name
    pub name: String,

    /// Address the node was seen at
    pub ip: IpAddr,

    /// Advertised service port
    pub port: u16,

    /// Service-type tag (e.g. `_pifleet._tcp`)
    pub service_type: String,

    /// Free-form key/value attributes
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Capabilities advertised by the node
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// When this observation was made
    pub last_seen: DateTime<Utc>,
}

impl ObservedNode {
    /// Create a new observation stamped with the current time
    pub fn new(id: impl Into<String>, name: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip,
            port,
            service_type: String::new(),
            metadata: BTreeMap::new(),
            capabilities: Vec::new(),
            last_seen: Utc::now(),
        }
    }

    /// Set the service-type tag
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Add a metadata attribute
    ///
    /// Setting [`keys::CAPABILITIES`] also refreshes the capability list.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == keys::CAPABILITIES {
            self.capabilities = parse_capabilities(&value);
        }
        self.metadata.insert(key, value);
        self
    }

    /// Override the observation time
    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = at;
        self
    }

    /// Socket address of the advertised service
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Look up a metadata value, ignoring empty strings
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Architecture from metadata (`arch` or `architecture`)
    pub fn architecture(&self) -> Option<&str> {
        self.meta(keys::ARCH).or_else(|| self.meta(keys::ARCHITECTURE))
    }

    /// Board model from metadata
    pub fn model(&self) -> Option<&str> {
        self.meta(keys::MODEL)
    }

    /// Preferred display name: the advertised `name` attribute, then the
    /// backend-provided name
    pub fn display_name(&self) -> Option<&str> {
        self.meta(keys::NAME).or_else(|| {
            let name = self.name.trim();
            (!name.is_empty()).then_some(name)
        })
    }

    /// True when anything other than `last_seen` differs
    pub fn differs_from(&self, other: &ObservedNode) -> bool {
        self.name != other.name
            || self.ip != other.ip
            || self.port != other.port
            || self.service_type != other.service_type
            || self.metadata != other.metadata
            || self.capabilities != other.capabilities
    }
}

/// Split a comma separated capability list, dropping blanks and duplicates
pub fn parse_capabilities(raw: &str) -> Vec<String> {
    let mut caps: Vec<String> = Vec::new();
    for cap in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !caps.iter().any(|c| c == cap) {
            caps.push(cap.to_string());
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> ObservedNode {
        ObservedNode::new("n1", "pi-01", "192.168.1.50".parse().unwrap(), 9091)
            .with_service_type("_pifleet._tcp")
            .with_meta(keys::ARCH, "arm64")
    }

    #[test]
    fn test_address() {
        assert_eq!(node().address().to_string(), "192.168.1.50:9091");
    }

    #[test]
    fn test_metadata_lookup() {
        let n = node()
            .with_meta(keys::MODEL, "  ")
            .with_meta(keys::ARCHITECTURE, "armv7");

        assert_eq!(n.architecture(), Some("arm64"));
        assert_eq!(n.model(), None);
    }

    #[test]
    fn test_architecture_fallback_key() {
        let n = ObservedNode::new("n1", "pi", "10.0.0.1".parse().unwrap(), 1)
            .with_meta(keys::ARCHITECTURE, "armv7");
        assert_eq!(n.architecture(), Some("armv7"));
    }

    #[test]
    fn test_display_name_prefers_metadata() {
        assert_eq!(node().display_name(), Some("pi-01"));
        assert_eq!(
            node().with_meta(keys::NAME, "kitchen").display_name(),
            Some("kitchen")
        );

        let mut blank = node();
        blank.name = " ".to_string();
        assert_eq!(blank.display_name(), None);
    }

    #[test]
    fn test_capabilities_from_metadata() {
        let n = node().with_meta(keys::CAPABILITIES, "gpio, camera,,gpio");
        assert_eq!(n.capabilities, vec!["gpio", "camera"]);
    }

    #[test]
    fn test_differs_ignores_last_seen() {
        let a = node();
        let b = a.clone().seen_at(a.last_seen + chrono::Duration::seconds(30));
        assert!(!a.differs_from(&b));

        let c = a.clone().with_meta(keys::MODEL, "Pi4");
        assert!(a.differs_from(&c));
    }
}
