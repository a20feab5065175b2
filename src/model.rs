//! Records produced by a scan run.
//!
//! The serialized field names (`ip`, `hostname`, `os`, `mac`, `service`,
//! `version`) are kept stable so exported results stay compatible with
//! existing consumers.
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Placeholder used when a service or version cannot be identified.
pub const UNKNOWN: &str = "Unknown";

/// IP address to uppercase colon-delimited MAC address.
pub type MacTable = HashMap<Ipv4Addr, String>;

/// A host that answered the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Address that answered the probe.
    pub ip: Ipv4Addr,
    /// Reverse DNS name, empty when the lookup failed.
    pub hostname: String,
    /// Coarse operating system hint derived from the reply TTL.
    #[serde(rename = "os")]
    pub os_guess: String,
    /// Filled in by [`crate::aggregate::merge`], empty until then.
    pub mac: String,
}

impl Device {
    /// Builds a freshly discovered device. The MAC is resolved later.
    pub fn discovered(ip: Ipv4Addr, hostname: String, os_guess: &str) -> Self {
        Self {
            ip,
            hostname,
            os_guess: os_guess.to_owned(),
            mac: String::new(),
        }
    }
}

/// What is believed to listen on an open TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name from the port table or the banner heuristics.
    pub service: String,
    /// Version string pulled out of the banner.
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: UNKNOWN.to_owned(),
            version: UNKNOWN.to_owned(),
        }
    }
}
