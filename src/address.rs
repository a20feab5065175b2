//! Provides the address space of a sweep: local /24 subnets, subnet
//! arguments, and reverse DNS for the hosts found in them.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use cidr_utils::cidr::IpCidr;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::{debug, warn};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use tokio::{fs, io, time};

use crate::error::ScanError;

/// Host addresses `.1` through `.254`; `.0` and `.255` are never probed.
const FIRST_HOST: u8 = 1;
const LAST_HOST: u8 = 254;

/// A /24 network identified by its first three octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet {
    prefix: [u8; 3],
}

impl Subnet {
    /// Builds the subnet `a.b.c.0/24`.
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self { prefix: [a, b, c] }
    }

    /// The /24 that `addr` falls in.
    pub const fn containing(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        Self::new(a, b, c)
    }

    /// The network address, `a.b.c.0`.
    pub const fn network(&self) -> Ipv4Addr {
        let [a, b, c] = self.prefix;
        Ipv4Addr::new(a, b, c, 0)
    }

    /// The 254 usable host addresses of the subnet, in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + Send + 'static {
        let [a, b, c] = self.prefix;
        (FIRST_HOST..=LAST_HOST).map(move |host| Ipv4Addr::new(a, b, c, host))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/24", self.network())
    }
}

/// Parses a CIDR (`192.168.1.0/24`) or a bare IPv4 address (`192.168.1.7`).
///
/// Only /24 sweeps are supported, so wider or narrower prefixes are reduced
/// to the /24 holding their first address.
///
/// ```rust
/// # use netscanner::address::Subnet;
/// let subnet: Subnet = "192.168.1.0/24".parse().unwrap();
/// assert_eq!(subnet, Subnet::new(192, 168, 1));
/// assert!("fe80::/64".parse::<Subnet>().is_err());
/// ```
impl FromStr for Subnet {
    type Err = ScanError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if let Ok(addr) = Ipv4Addr::from_str(input) {
            return Ok(Self::containing(addr));
        }

        match IpCidr::from_str(input) {
            Ok(cidr) => match cidr.first_address() {
                IpAddr::V4(first) => {
                    if cidr.network_length() != 24 {
                        warn!("Only /24 sweeps are supported, scanning {first}/24 for {input}");
                    }
                    Ok(Self::containing(first))
                }
                IpAddr::V6(_) => Err(ScanError::InvalidSubnet(input.to_owned())),
            },
            // Interface style notation keeps the host bits, e.g. 192.168.1.7/24.
            Err(_) => interface_network(input)
                .map(Self::containing)
                .ok_or_else(|| ScanError::InvalidSubnet(input.to_owned())),
        }
    }
}

fn interface_network(input: &str) -> Option<Ipv4Addr> {
    let (addr, length) = input.split_once('/')?;
    let addr = Ipv4Addr::from_str(addr.trim()).ok()?;
    let length = length.trim().parse::<u32>().ok().filter(|len| *len <= 32)?;
    let mask = u32::MAX.checked_shl(32 - length).unwrap_or(0);
    Some(Ipv4Addr::from(u32::from(addr) & mask))
}

/// Parses every subnet argument, rejecting the whole list on the first bad
/// entry. Duplicates are dropped while keeping the input order.
pub fn parse_subnets<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Subnet>, ScanError> {
    let mut seen = HashSet::new();
    let mut subnets = Vec::new();
    for input in inputs {
        let subnet = input.as_ref().parse::<Subnet>()?;
        if seen.insert(subnet) {
            subnets.push(subnet);
        }
    }
    Ok(subnets)
}

/// Lists the /24 subnets of every non-loopback IPv4 interface address.
///
/// Interface enumeration failures are logged and reported as an empty list,
/// the caller decides what no subnets means.
pub fn local_subnets() -> Vec<Subnet> {
    match try_local_subnets() {
        Ok(subnets) => subnets,
        Err(e) => {
            warn!("Could not enumerate local interfaces: {e}");
            Vec::new()
        }
    }
}

/// Like [`local_subnets`] but hands the enumeration error to the caller.
pub fn try_local_subnets() -> Result<Vec<Subnet>, ScanError> {
    let interfaces = NetworkInterface::show()?;
    let addrs = interfaces.iter().flat_map(|iface| {
        iface.addr.iter().filter_map(|addr| match addr {
            Addr::V4(v4) => Some((v4.ip, v4.netmask)),
            Addr::V6(_) => None,
        })
    });

    Ok(collect_subnets(addrs))
}

/// Masks each address with its netmask and keeps one entry per /24.
fn collect_subnets<I>(addrs: I) -> Vec<Subnet>
where
    I: IntoIterator<Item = (Ipv4Addr, Option<Ipv4Addr>)>,
{
    let mut seen = HashSet::new();
    let mut subnets = Vec::new();

    for (ip, netmask) in addrs {
        if ip.is_loopback() || ip.is_unspecified() {
            continue;
        }
        let network = netmask.map_or(ip, |mask| Ipv4Addr::from(u32::from(ip) & u32::from(mask)));
        let subnet = Subnet::containing(network);
        if seen.insert(subnet) {
            debug!("Found local subnet {subnet} from interface address {ip}");
            subnets.push(subnet);
        }
    }

    subnets
}

/// Best-effort reverse DNS.
#[async_trait]
pub trait ReverseLookup: Send + Sync {
    /// Returns the first name registered for `ip`, or `None` on any failure.
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// PTR lookups through a hickory resolver, bounded by a deadline.
pub struct DnsReverseLookup {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsReverseLookup {
    /// Builds a resolver from the `--resolver` option, see [`get_resolver`].
    pub async fn new(resolver: &Option<String>, timeout: Duration) -> Self {
        Self {
            resolver: get_resolver(resolver).await,
            timeout,
        }
    }
}

#[async_trait]
impl ReverseLookup for DnsReverseLookup {
    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        let lookup = match time::timeout(self.timeout, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                debug!("Reverse lookup for {ip} failed: {e}");
                return None;
            }
            Err(_) => {
                debug!("Reverse lookup for {ip} timed out");
                return None;
            }
        };

        lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_owned())
            .filter(|name| !name.is_empty())
    }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver (default
///       behaviour).
pub async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses and input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{collect_subnets, parse_subnets, Subnet};
    use crate::error::ScanError;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    #[test]
    fn subnet_hosts_skip_network_and_broadcast() {
        let hosts = Subnet::new(192, 168, 1).hosts().collect::<Vec<_>>();

        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn subnet_display() {
        assert_eq!(Subnet::new(10, 0, 0).to_string(), "10.0.0.0/24");
    }

    #[test]
    fn parse_cidr_and_bare_address() {
        assert_eq!("192.168.1.0/24".parse::<Subnet>().unwrap(), Subnet::new(192, 168, 1));
        assert_eq!("192.168.1.77".parse::<Subnet>().unwrap(), Subnet::new(192, 168, 1));
        assert_eq!("10.20.0.0/16".parse::<Subnet>().unwrap(), Subnet::new(10, 20, 0));
        assert_eq!("192.168.7.42/24".parse::<Subnet>().unwrap(), Subnet::new(192, 168, 7));
        assert_eq!("10.20.30.40/16".parse::<Subnet>().unwrap(), Subnet::new(10, 20, 0));
    }

    #[test]
    fn parse_incorrect_subnets() {
        for input in ["im_wrong", "300.10.1.0/24", "::1", ""] {
            assert!(
                matches!(input.parse::<Subnet>(), Err(ScanError::InvalidSubnet(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn parse_subnet_list_dedups() {
        let subnets =
            parse_subnets(&["192.168.1.0/24", "192.168.1.5", "10.0.0.0/24"]).unwrap();
        assert_eq!(subnets, vec![Subnet::new(192, 168, 1), Subnet::new(10, 0, 0)]);

        assert!(parse_subnets(&["192.168.1.0/24", "nope"]).is_err());
    }

    #[test]
    fn interface_addresses_are_masked_and_deduplicated() {
        let mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        let subnets = collect_subnets([
            (Ipv4Addr::new(192, 168, 1, 23), mask),
            (Ipv4Addr::new(192, 168, 1, 99), mask),
            (Ipv4Addr::new(127, 0, 0, 1), Some(Ipv4Addr::new(255, 0, 0, 0))),
            (Ipv4Addr::new(10, 1, 2, 3), Some(Ipv4Addr::new(255, 255, 0, 0))),
            (Ipv4Addr::new(172, 16, 5, 4), None),
            (Ipv4Addr::new(192, 168, 1, 200), mask),
        ]);

        assert_eq!(
            subnets,
            vec![
                Subnet::new(192, 168, 1),
                Subnet::new(10, 1, 0),
                Subnet::new(172, 16, 5),
            ]
        );
        let unique = subnets.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), subnets.len());
    }

    #[test]
    fn no_qualifying_interface_is_not_an_error() {
        let subnets = collect_subnets([(Ipv4Addr::LOCALHOST, None)]);
        assert!(subnets.is_empty());
    }

    #[test]
    fn local_subnets_have_no_duplicates() {
        let subnets = super::local_subnets();
        let unique = subnets.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), subnets.len());
    }
}
