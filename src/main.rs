#![allow(clippy::needless_doctest_main)]
//! `netscanner` finds the hosts of the local /24 subnets, or the TCP and UDP
//! services of a single host, and prints what it found.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use log::debug;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use netscanner::address::{local_subnets, parse_subnets, DnsReverseLookup, Subnet};
use netscanner::aggregate::discover;
use netscanner::input::{Config, Mode, Opts};
use netscanner::model::{Device, ServiceInfo};
use netscanner::probe::SystemPing;
use netscanner::scanner::Scanner;
use netscanner::sweep::Sweeper;
use netscanner::{detail, output, warning};

#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Safest batch size to use when the file limit is tiny.
#[cfg(unix)]
const SMALL_FILE_LIMIT: u64 = 200;

/// File descriptors a running `ping` child costs the scanner: its stdout and
/// stderr pipes plus the handle to wait on it.
const FDS_PER_PING: u64 = 3;
// Left for the resolver sockets, stdio and the runtime itself.
const RESERVED_FDS: u64 = 100;

/// One open TCP port in JSON output.
#[derive(serde_derive::Serialize)]
struct TcpPort<'a> {
    port: u16,
    #[serde(flatten)]
    info: &'a ServiceInfo,
}

/// One answering UDP port in JSON output.
#[derive(serde_derive::Serialize)]
struct UdpPort<'a> {
    port: u16,
    service: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    #[cfg(unix)]
    let fd_limit = {
        let ulimit = adjust_ulimit_size(&opts);
        opts.batch_size = infer_batch_size(&opts, ulimit);
        ulimit
    };
    #[cfg(not(unix))]
    let fd_limit = u64::MAX;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match opts.mode {
        Mode::Sweep => run_sweep(&opts, fd_limit, cancel.clone()).await?,
        Mode::Tcp => run_tcp(&opts, cancel.clone()).await?,
        Mode::Udp => run_udp(&opts, cancel.clone()).await?,
    }

    if cancel.is_cancelled() {
        warning!(
            "Scan interrupted, the results above are partial.",
            opts.greppable,
            opts.accessible
        );
    }
    Ok(())
}

async fn run_sweep(opts: &Opts, fd_limit: u64, cancel: CancellationToken) -> anyhow::Result<()> {
    let subnets = if opts.subnets.is_empty() {
        local_subnets()
    } else {
        parse_subnets(&opts.subnets)?
    };

    if subnets.is_empty() {
        warning!(
            "No local IPv4 subnet found. Pass the subnets to sweep with --subnets.",
            opts.greppable,
            opts.accessible
        );
        return Ok(());
    }

    let names = subnets.iter().map(Subnet::to_string).collect::<Vec<_>>();
    detail!(
        format!("Sweeping {}", names.join(", ")),
        opts.greppable || opts.json,
        opts.accessible
    );

    // Every subnet runs its own pool, so the file limit is shared between them.
    let concurrency = sweep_concurrency(opts.concurrency(), subnets.len(), fd_limit);
    if concurrency < opts.concurrency() {
        warning!(
            format!(
                "File limit allows {concurrency} pings in flight per subnet. Consider upping with --ulimit."
            ),
            opts.greppable || opts.json,
            opts.accessible
        );
    }

    let resolver = DnsReverseLookup::new(&opts.resolver, opts.connect_timeout()).await;
    let sweeper = Sweeper::new(
        Arc::new(SystemPing),
        Arc::new(resolver),
        concurrency,
        opts.connect_timeout(),
    )
    .with_cancel(cancel);

    let mut devices = discover(&sweeper, &subnets).await;
    devices.sort_by_key(|device| device.ip);

    export(opts, &devices)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        warning!("No devices answered.", opts.greppable, opts.accessible);
    }
    for device in &devices {
        output!(format_device(device, opts), opts.greppable, opts.accessible);
    }
    Ok(())
}

async fn run_tcp(opts: &Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    let host = opts.host.as_deref().unwrap_or_default();
    let open = scanner(opts, cancel)
        .scan_tcp(host, opts.range.start(), opts.range.end())
        .await?;

    let ports = open
        .iter()
        .map(|(&port, info)| TcpPort { port, info })
        .collect::<Vec<_>>();
    export(opts, &ports)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if opts.greppable {
        let ports = open.keys().map(u16::to_string).collect::<Vec<_>>();
        println!("{host} -> [{}]", ports.join(","));
        return Ok(());
    }

    if open.is_empty() {
        warning!(format!("No open TCP ports on {host}."), false, opts.accessible);
    }
    for (port, info) in &open {
        let socket = format!("{host}:{port}");
        if opts.accessible {
            println!("Open {socket} {} {}", info.service, info.version);
        } else {
            println!("Open {} {} {}", socket.purple(), info.service, info.version);
        }
    }
    Ok(())
}

async fn run_udp(opts: &Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    let host = opts.host.as_deref().unwrap_or_default();
    let open = scanner(opts, cancel)
        .scan_udp(host, opts.range.start(), opts.range.end())
        .await?;

    let ports = open
        .iter()
        .map(|(&port, service)| UdpPort { port, service })
        .collect::<Vec<_>>();
    export(opts, &ports)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if opts.greppable {
        let ports = open.keys().map(u16::to_string).collect::<Vec<_>>();
        println!("{host} -> [{}]", ports.join(","));
        return Ok(());
    }

    if open.is_empty() {
        warning!(
            format!("No UDP port on {host} answered. Silent ports may still be open."),
            false,
            opts.accessible
        );
    }
    for (port, service) in &open {
        let socket = format!("{host}:{port}");
        if opts.accessible {
            println!("Open {socket} {service}");
        } else {
            println!("Open {} {service}", socket.purple());
        }
    }
    Ok(())
}

/// Writes the results to `--output` when it is set.
fn export<T: Serialize + ?Sized>(opts: &Opts, results: &T) -> anyhow::Result<()> {
    let Some(path) = &opts.output else {
        return Ok(());
    };
    write_json(path, results)?;
    detail!(
        format!("Results written to {}", path.display()),
        opts.greppable || opts.json,
        opts.accessible
    );
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, results: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    fs::write(path, json).with_context(|| format!("Could not write results to {}", path.display()))
}

/// Pings in flight per subnet so that all subnets together stay within the
/// file limit. Never above `batch` and never below one.
fn sweep_concurrency(batch: usize, subnets: usize, fd_limit: u64) -> usize {
    let subnets = u64::try_from(subnets.max(1)).unwrap_or(u64::MAX);
    let budget = fd_limit.saturating_sub(RESERVED_FDS) / subnets.saturating_mul(FDS_PER_PING);
    usize::try_from(budget).map_or(batch, |budget| budget.min(batch)).max(1)
}

fn scanner(opts: &Opts, cancel: CancellationToken) -> Scanner {
    Scanner::new(
        opts.concurrency(),
        opts.connect_timeout(),
        opts.banner_timeout(),
        opts.udp_wait(),
        opts.tries,
        opts.scan_order,
    )
    .with_cancel(cancel)
}

fn format_device(device: &Device, opts: &Opts) -> String {
    let hostname = if device.hostname.is_empty() {
        "-"
    } else {
        device.hostname.as_str()
    };
    let mac = if device.mac.is_empty() {
        "-"
    } else {
        device.mac.as_str()
    };

    if opts.greppable {
        format!("{} -> [{hostname},{},{mac}]", device.ip, device.os_guess)
    } else if opts.accessible {
        format!("{} {hostname} {} {mac}", device.ip, device.os_guess)
    } else {
        format!(
            "{} {hostname} {} {mac}",
            device.ip.to_string().purple(),
            device.os_guess.cyan()
        )
    }
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    Resource::NOFILE
        .get()
        .map_or(DEFAULT_FILE_DESCRIPTORS_LIMIT, |(soft, _)| soft)
}

#[cfg(unix)]
fn infer_batch_size(opts: &Opts, ulimit: u64) -> u16 {
    let mut batch_size = u64::from(opts.batch_size);

    // Every probe holds a socket, leave some room for the process itself.
    if ulimit < batch_size {
        warning!(
            "File limit is lower than the batch size. Consider upping with --ulimit.",
            opts.greppable,
            opts.accessible
        );

        batch_size = if ulimit < SMALL_FILE_LIMIT {
            warning!(
                "Your file limit is very small, which negatively impacts the scan speed.",
                opts.greppable,
                opts.accessible
            );
            ulimit / 2
        } else {
            ulimit - 100
        };
    }

    u16::try_from(batch_size.max(1)).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use super::infer_batch_size;
    use super::{sweep_concurrency, write_json};
    use netscanner::input::Opts;
    use netscanner::model::Device;
    use parameterized::parameterized;
    use std::net::Ipv4Addr;

    #[test]
    #[cfg(unix)]
    fn batch_size_lowered_to_fit_the_file_limit() {
        let opts = Opts {
            batch_size: 4_000,
            ..Opts::default()
        };

        assert_eq!(infer_batch_size(&opts, 1_024), 924);
        assert_eq!(infer_batch_size(&opts, 120), 60);
        assert_eq!(infer_batch_size(&opts, 1), 1);
    }

    #[test]
    #[cfg(unix)]
    fn batch_size_kept_under_the_file_limit() {
        let opts = Opts::default();
        assert_eq!(infer_batch_size(&opts, 8_000), opts.batch_size);
    }

    #[parameterized(args = {
        (100, 1, 8_000), (100, 4, 1_024), (100, 10, 1_024), (100, 3, u64::MAX), (100, 50, 150),
    }, expected = {
        100, 77, 30, 100, 1,
    })]
    fn sweep_concurrency_shares_the_file_limit(args: (usize, usize, u64), expected: usize) {
        let (batch, subnets, fd_limit) = args;
        assert_eq!(sweep_concurrency(batch, subnets, fd_limit), expected);
    }

    #[test]
    fn results_written_as_json() {
        let path = std::env::temp_dir().join(format!("netscanner-results-{}.json", std::process::id()));
        let devices = vec![Device::discovered(Ipv4Addr::new(10, 0, 0, 7), "nas".to_owned(), "Windows")];

        write_json(&path, &devices).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(written[0]["ip"], "10.0.0.7");
        assert_eq!(written[0]["hostname"], "nas");
        assert_eq!(written[0]["os"], "Windows");
        assert_eq!(written[0]["mac"], "");
    }

    #[test]
    fn unwritable_output_is_an_error() {
        let path = std::env::temp_dir().join("netscanner-missing-dir").join("results.json");
        assert!(write_json(&path, &Vec::<Device>::new()).is_err());
    }

    #[test]
    fn format_device_modes() {
        use super::format_device;

        let device = Device::discovered(Ipv4Addr::new(10, 0, 0, 7), "nas".to_owned(), "Linux/macOS");

        let opts = Opts::default();
        assert_eq!(format_device(&device, &opts), "10.0.0.7 -> [nas,Linux/macOS,-]");

        let opts = Opts {
            greppable: false,
            accessible: true,
            ..Opts::default()
        };
        assert_eq!(format_device(&device, &opts), "10.0.0.7 nas Linux/macOS -");
    }
}
