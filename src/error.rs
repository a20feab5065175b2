//! Error taxonomy for the scanning engine.
//!
//! Only validation problems and platform/environment failures are represented
//! here. Per-probe failures (timeouts, refused connections, DNS misses, empty
//! banners) are never surfaced as errors: they simply leave the probed address
//! or port out of the result.
use thiserror::Error;

/// Errors returned by the scanning engine.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The requested port range is reversed or contains port 0.
    #[error("Invalid port range {start}-{end}: ports must be between 1 and 65535 and start must be <= end")]
    InvalidPortRange {
        /// First port of the rejected range.
        start: u16,
        /// Last port of the rejected range.
        end: u16,
    },

    /// No target host was given for a port scan.
    #[error("A target host is required for port scanning")]
    EmptyHost,

    /// A subnet argument could not be understood as an IPv4 network.
    #[error("Invalid subnet '{0}': expected an IPv4 address or CIDR such as 192.168.1.0/24")]
    InvalidSubnet(String),

    /// The local network interfaces could not be listed.
    #[error("Network interface error: {0}")]
    Interfaces(#[from] network_interface::Error),

    /// The current platform has no supported way of performing the operation.
    #[error("Unsupported platform for {0}")]
    UnsupportedPlatform(&'static str),

    /// An external command or socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file exists but is not valid TOML for our options.
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}
