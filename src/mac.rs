//! Link-layer address lookup through the local ARP cache.
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{process::Command, time};

use crate::error::ScanError;
use crate::model::MacTable;

/// Upper bound for the cache query; `arp` should answer near instantly.
const ARP_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// An IPv4 address followed by a MAC in hex pairs, either as
/// `10.0.0.5   aa-bb-cc-dd-ee-ff` (Windows) or
/// `? (10.0.0.5) at aa:bb:cc:dd:ee:ff [ether] on eth0` (BSD/Linux).
static ARP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})\)?\s+(?:at\s+)?((?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2})")
        .expect("ARP pattern is valid")
});

static MAC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("MAC pattern is valid")
});

/// The kernel's view of the ARP cache, used when `arp` is not installed.
#[cfg(target_os = "linux")]
const PROC_NET_ARP: &str = "/proc/net/arp";

/// Reads the ARP cache. Failures and unsupported platforms are logged and
/// give an empty table.
pub async fn resolve_macs() -> MacTable {
    table_or_empty(try_resolve_macs().await)
}

fn table_or_empty(result: Result<MacTable, ScanError>) -> MacTable {
    result.unwrap_or_else(|e| {
        warn!("Could not read the ARP table: {e}");
        MacTable::new()
    })
}

/// Like [`resolve_macs`] but hands the failure to the caller.
///
/// On Linux a missing or failing `arp` falls back to `/proc/net/arp`.
pub async fn try_resolve_macs() -> Result<MacTable, ScanError> {
    match query_arp("arp").await {
        Ok(table) => Ok(table),
        #[cfg(target_os = "linux")]
        Err(e) => {
            debug!("arp failed ({e}), reading {PROC_NET_ARP}");
            read_proc_arp(PROC_NET_ARP).await
        }
        #[cfg(not(target_os = "linux"))]
        Err(e) => Err(e),
    }
}

async fn query_arp(program: &str) -> Result<MacTable, ScanError> {
    let mut cmd = Command::new(program);
    if cfg!(windows) {
        cmd.arg("-a");
    } else if cfg!(unix) {
        // -n skips the reverse lookup of every cached entry.
        cmd.arg("-an");
    } else {
        return Err(ScanError::UnsupportedPlatform("ARP table lookup"));
    }
    cmd.kill_on_drop(true);

    let output = time::timeout(ARP_QUERY_TIMEOUT, cmd.output()).await.map_err(std::io::Error::from)??;
    if !output.status.success() {
        return Err(ScanError::Io(std::io::Error::other(format!(
            "arp exited with {}",
            output.status
        ))));
    }

    let table = parse_arp_table(&String::from_utf8_lossy(&output.stdout));
    debug!("ARP table holds {} entries", table.len());
    Ok(table)
}

/// Parses `arp` output line by line. Lines without an address and a MAC,
/// such as headers and `(incomplete)` entries, are skipped.
///
/// ```rust
/// # use netscanner::mac::parse_arp_table;
/// # use std::net::Ipv4Addr;
/// let table = parse_arp_table("  10.0.0.5       aa-bb-cc-dd-ee-ff     dynamic");
/// assert_eq!(table[&Ipv4Addr::new(10, 0, 0, 5)], "AA:BB:CC:DD:EE:FF");
/// ```
pub fn parse_arp_table(output: &str) -> MacTable {
    output
        .lines()
        .filter_map(|line| {
            let captures = ARP_LINE.captures(line)?;
            let ip = captures[1].parse::<Ipv4Addr>().ok()?;
            Some((ip, normalize_mac(&captures[2])))
        })
        .collect()
}

/// Reads a `/proc/net/arp` style table.
#[cfg(target_os = "linux")]
async fn read_proc_arp(path: &str) -> Result<MacTable, ScanError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_proc_arp(&content))
}

/// Parses the kernel table: a header line, then
/// `IP  HW-type  flags  MAC  mask  device` per entry. Incomplete entries
/// (flags `0x0`, all-zero MAC) are skipped.
pub fn parse_proc_arp(content: &str) -> MacTable {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            let [ip, _hw_type, flags, mac, ..] = fields.as_slice() else {
                return None;
            };
            if *flags == "0x0" || *mac == "00:00:00:00:00:00" || !MAC.is_match(mac) {
                return None;
            }
            let ip = ip.parse::<Ipv4Addr>().ok()?;
            Some((ip, normalize_mac(mac)))
        })
        .collect()
}

fn normalize_mac(mac: &str) -> String {
    mac.replace('-', ":").to_uppercase()
}
