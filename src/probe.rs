//! Liveness probing with a TTL based operating system hint.
//!
//! The TTL heuristic is approximate: every router hop decrements the value
//! and stacks can be tuned, so the guess is a hint and never a guarantee.
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{io, process::Command, time};

use crate::model::UNKNOWN;

/// Slack given to the `ping` process on top of its own reply deadline.
const PROCESS_GRACE: Duration = Duration::from_millis(500);

static TTL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bttl[=:]\s*(\d{1,3})\b").expect("TTL pattern is valid"));

/// Fixed TTL to operating system table.
const TTL_OS_TABLE: [(u8, &str); 9] = [
    (32, "Windows 95/98/ME"),
    (60, "FreeBSD"),
    (62, "Windows CE"),
    (64, "Linux/macOS"),
    (100, "Chrome OS"),
    (128, "Windows"),
    (200, "Solaris"),
    (252, "IBM AIX"),
    (255, "Cisco/Unix"),
];

/// An echo-style request, the platform ICMP equivalent.
#[async_trait]
pub trait EchoProbe: Send + Sync {
    /// Sends one echo request to `ip`.
    ///
    /// Returns the textual reply, which carries a `TTL=N` or `TTL:N` field,
    /// or an error when the host did not answer within `timeout`.
    async fn echo(&self, ip: Ipv4Addr, timeout: Duration) -> io::Result<String>;
}

/// Echo requests sent through the system `ping` binary, which needs no raw
/// socket privileges.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPing;

impl SystemPing {
    fn command(ip: Ipv4Addr, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(std::env::consts::OS, ip, timeout))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Arguments for a single echo request on the given `std::env::consts::OS`.
///
/// The reply deadline flag differs per platform: Windows takes `-w` in
/// milliseconds, the BSD family (macOS included) takes `-W` in milliseconds
/// and Linux takes `-W` in whole seconds.
fn ping_args(os: &str, ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1).to_string();
    let mut args = match os {
        "windows" => vec!["-n".to_owned(), "1".to_owned(), "-w".to_owned(), millis],
        "macos" | "ios" | "freebsd" | "dragonfly" => {
            vec!["-c".to_owned(), "1".to_owned(), "-W".to_owned(), millis]
        }
        _ => {
            let secs = timeout.as_secs().max(1).to_string();
            vec!["-c".to_owned(), "1".to_owned(), "-W".to_owned(), secs]
        }
    };
    args.push(ip.to_string());
    args
}

/// Set once a `ping` process failed to start, so the cause is reported once
/// instead of for every host of every subnet.
static SPAWN_FAILURE_REPORTED: AtomicBool = AtomicBool::new(false);

fn report_spawn_failure(e: &io::Error) {
    if SPAWN_FAILURE_REPORTED.swap(true, Ordering::Relaxed) {
        debug!("Could not start ping: {e}");
    } else if e.raw_os_error() == Some(EMFILE) {
        warn!("Too many open files while starting ping. Please reduce the batch size, e.g. -b 50, or raise the limit with --ulimit.");
    } else {
        warn!("Could not start ping, hosts will be reported as down: {e}");
    }
}

// errno for "Too many open files" on Linux, macOS and the BSDs.
const EMFILE: i32 = 24;

#[async_trait]
impl EchoProbe for SystemPing {
    async fn echo(&self, ip: Ipv4Addr, timeout: Duration) -> io::Result<String> {
        let output = match time::timeout(timeout + PROCESS_GRACE, Self::command(ip, timeout).output())
            .await?
        {
            Ok(output) => output,
            Err(e) => {
                report_spawn_failure(&e);
                return Err(e);
            }
        };

        if !output.status.success() {
            return Err(io::Error::other(format!("ping {ip} exited with {}", output.status)));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

/// Probes `ip` once.
///
/// Returns the operating system guess when the host answered with a readable
/// TTL, and `None` otherwise. Failures of any kind (timeout, unreachable,
/// missing permissions) only ever mean "not alive".
pub async fn probe(prober: &dyn EchoProbe, ip: Ipv4Addr, timeout: Duration) -> Option<&'static str> {
    let reply = match prober.echo(ip, timeout).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("{ip} did not answer: {e}");
            return None;
        }
    };

    let Some(ttl) = parse_ttl(&reply) else {
        debug!("{ip} replied without a readable TTL");
        return None;
    };
    Some(os_guess(ttl))
}

/// Extracts the TTL from a `TTL=N`, `ttl=N` or `TTL:N` reply field.
///
/// ```rust
/// # use netscanner::probe::parse_ttl;
/// assert_eq!(parse_ttl("Reply from 10.0.0.1: bytes=32 time<1ms TTL=128"), Some(128));
/// assert_eq!(parse_ttl("64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.3 ms"), Some(64));
/// assert_eq!(parse_ttl("Request timed out."), None);
/// ```
pub fn parse_ttl(reply: &str) -> Option<u8> {
    TTL_PATTERN
        .captures(reply)
        .and_then(|captures| captures[1].parse().ok())
}

/// Maps a TTL through the fixed table, `"Unknown"` when it is not listed.
pub fn os_guess(ttl: u8) -> &'static str {
    TTL_OS_TABLE
        .iter()
        .find(|(known, _)| *known == ttl)
        .map_or(UNKNOWN, |(_, os)| os)
}
