//! Core functionality for TCP and UDP port enumeration on a single host.
use crate::error::ScanError;
use crate::input::ScanOrder;
use crate::model::ServiceInfo;
use crate::pool::TaskPool;
use crate::port_strategy::{PortRange, PortStrategy};
use log::{debug, warn};

mod services;
pub use services::{identify_service, tcp_service_name, udp_service_name};

use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    num::NonZero,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time,
};
use tokio_util::sync::CancellationToken;

/// Datagram sent to every UDP port. Its content does not matter, any reply
/// at all marks the port open.
const UDP_PROBE_PAYLOAD: &[u8] = b"ping";

/// Banner bytes read from an open TCP port.
const BANNER_LEN: usize = 1024;

#[derive(Debug)]
struct ScannerConnector {
    tries: NonZero<u8>,
    timeout: Duration,
    banner_timeout: Duration,
    udp_wait: Duration,
}

impl ScannerConnector {
    /// Given a socket, try to connect to it self.tries times.
    /// On success the port is open: the probe connection is shut down and a
    /// second, short-lived connection grabs the banner used to name the
    /// service. `None` means the port is closed or the probe failed; the two
    /// are not told apart.
    async fn scan_tcp(&self, socket: SocketAddr) -> Option<ServiceInfo> {
        let tries = self.tries.get();
        for nr_try in 1..=tries {
            match self.connect(socket).await {
                Ok(tcp_stream) => {
                    debug!(
                        "Connection was successful, shutting down stream {}",
                        &socket
                    );
                    if let Err(e) = { tcp_stream }.shutdown().await {
                        debug!("Shutdown stream error {}", &e);
                    }

                    let banner = self.grab_banner(socket).await;
                    debug!("Open {socket} after {nr_try} tries, banner {banner:?}");
                    return Some(identify_service(socket.port(), &banner));
                }
                Err(e) => {
                    if e.to_string().to_lowercase().contains("too many open files") {
                        warn!("Too many open files. Please reduce the batch size, e.g. -b 50.");
                    }
                    debug!("{socket} attempt {nr_try}: {e}");
                }
            }
        }
        None
    }

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.timeout, TcpStream::connect(socket)).await?
    }

    /// Reads whatever the service sends first. Timeouts, EOF and errors all
    /// give an empty banner.
    async fn grab_banner(&self, socket: SocketAddr) -> String {
        let Ok(Ok(mut stream)) = time::timeout(self.banner_timeout, TcpStream::connect(socket)).await
        else {
            return String::new();
        };

        let mut buffer = [0_u8; BANNER_LEN];
        match time::timeout(self.banner_timeout, stream.read(&mut buffer)).await {
            Ok(Ok(n)) => String::from_utf8_lossy(&buffer[..n]).into_owned(),
            Ok(Err(e)) => {
                debug!("Banner read from {socket} failed: {e}");
                String::new()
            }
            Err(_) => String::new(),
        }
    }

    /// Sends the probe datagram self.tries times and reports whether anything
    /// came back. Silence is treated as closed even though many UDP services
    /// never answer unsolicited datagrams.
    async fn scan_udp(&self, socket: SocketAddr) -> bool {
        let tries = self.tries.get();
        for nr_try in 1..=tries {
            match self.udp_scan(socket, UDP_PROBE_PAYLOAD).await {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(e) => {
                    debug!("{socket} attempt {nr_try}: {e}");
                    return false;
                }
            }
        }
        false
    }

    /// Binds to a UDP socket so we can send and receive packets
    async fn udp_bind(&self, socket: SocketAddr) -> io::Result<UdpSocket> {
        let local_addr = match socket {
            SocketAddr::V4(_) => SocketAddr::from(([0_u8; 4], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0_u16; 8], 0)),
        };

        UdpSocket::bind(local_addr).await
    }

    /// Performs a UDP scan on the specified socket with a payload.
    /// Returns Ok(true) if a response was received, Ok(false) if it timed out.
    /// Err is returned for other I/O errors, e.g. an ICMP port unreachable.
    async fn udp_scan(&self, socket: SocketAddr, payload: &[u8]) -> io::Result<bool> {
        let udp_socket = time::timeout(self.timeout, async {
            let udp_socket = self.udp_bind(socket).await?;
            udp_socket.connect(socket).await?;
            Ok::<_, io::Error>(udp_socket)
        })
        .await??;

        let mut buf = [0_u8; BANNER_LEN];
        udp_socket.send(payload).await?;

        match time::timeout(self.udp_wait, udp_socket.recv(&mut buf)).await {
            Ok(Ok(size)) => {
                debug!("Received {} bytes from {}", size, socket);
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }
}

/// Port scanner for a single host.
///
/// Each scan validates its range, resolves the host once, then probes every
/// port on a bounded pool. Open ports come back keyed by port number; closed
/// ports and failed probes are simply absent.
#[derive(Debug)]
pub struct Scanner {
    order: ScanOrder,
    concurrency: usize,
    cancel: CancellationToken,
    connector: Arc<ScannerConnector>,
}

impl Scanner {
    /// `timeout` bounds each connect (and the UDP socket setup),
    /// `banner_timeout` bounds the banner connection and read, `udp_wait` is
    /// how long a UDP probe listens for a reply. `tries` of 0 is treated as 1.
    pub fn new(
        concurrency: usize,
        timeout: Duration,
        banner_timeout: Duration,
        udp_wait: Duration,
        tries: u8,
        order: ScanOrder,
    ) -> Self {
        Self {
            order,
            concurrency,
            cancel: CancellationToken::new(),
            connector: Arc::new(ScannerConnector {
                tries: NonZero::new(tries).unwrap_or(NonZero::<u8>::MIN),
                timeout,
                banner_timeout,
                udp_wait,
            }),
        }
    }

    /// Lets the caller abort a scan and keep the ports found so far.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Finds open TCP ports in `start..=end` and names their services.
    ///
    /// The range and host are validated before any connection is attempted.
    pub async fn scan_tcp(
        &self,
        host: &str,
        start: u16,
        end: u16,
    ) -> Result<BTreeMap<u16, ServiceInfo>, ScanError> {
        let (ip, ports) = match self.prepare(host, start, end).await? {
            Some(target) => target,
            None => return Ok(BTreeMap::new()),
        };

        let connector = Arc::clone(&self.connector);
        let mut rx = self.pool().spawn_all(ports, move |port| {
            let connector = Arc::clone(&connector);
            async move {
                let info = connector.scan_tcp(SocketAddr::new(ip, port)).await?;
                Some((port, info))
            }
        });

        let mut open_ports = BTreeMap::new();
        while let Some((port, info)) = rx.recv().await {
            open_ports.insert(port, info);
        }
        debug!("Open TCP ports on {host}: {:?}", open_ports.keys());
        Ok(open_ports)
    }

    /// Finds UDP ports in `start..=end` that answer a probe datagram.
    ///
    /// Silent ports are reported as closed, which makes this a heuristic:
    /// many open UDP services never reply to an unexpected datagram.
    pub async fn scan_udp(
        &self,
        host: &str,
        start: u16,
        end: u16,
    ) -> Result<BTreeMap<u16, String>, ScanError> {
        let (ip, ports) = match self.prepare(host, start, end).await? {
            Some(target) => target,
            None => return Ok(BTreeMap::new()),
        };

        let connector = Arc::clone(&self.connector);
        let mut rx = self.pool().spawn_all(ports, move |port| {
            let connector = Arc::clone(&connector);
            async move {
                connector
                    .scan_udp(SocketAddr::new(ip, port))
                    .await
                    .then_some(port)
            }
        });

        let mut open_ports = BTreeMap::new();
        while let Some(port) = rx.recv().await {
            open_ports.insert(port, udp_service_name(port).to_owned());
        }
        debug!("Open UDP ports on {host}: {:?}", open_ports.keys());
        Ok(open_ports)
    }

    fn pool(&self) -> TaskPool {
        TaskPool::new(self.concurrency).with_cancel(self.cancel.clone())
    }

    /// Validates the request and resolves the host. `Ok(None)` means the host
    /// did not resolve, which like any other probe failure yields no ports.
    async fn prepare(
        &self,
        host: &str,
        start: u16,
        end: u16,
    ) -> Result<Option<(IpAddr, Vec<u16>)>, ScanError> {
        let range = PortRange::new(start, end)?;
        let host = host.trim();
        if host.is_empty() {
            return Err(ScanError::EmptyHost);
        }

        let Some(ip) = resolve_host(host).await else {
            warn!("Host {host:?} could not be resolved.");
            return Ok(None);
        };

        debug!(
            "Start scanning {host} ({ip}). Batch size {}, number of ports {}",
            self.concurrency,
            range.len()
        );
        Ok(Some((ip, PortStrategy::pick(range, self.order).order())))
    }
}

/// Uses the system resolver to get an address for host, preferring IPv4.
async fn resolve_host(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .ok()?
        .map(|addr| addr.ip())
        .collect::<Vec<_>>();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
