//! Static port tables and banner heuristics used to name services.
use crate::model::{ServiceInfo, UNKNOWN};

// Both tables are sorted by port so lookups can binary search.
const TCP_SERVICES: &[(u16, &str)] = &[
    (7, "Echo"),
    (20, "FTP Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (79, "Finger"),
    (80, "HTTP"),
    (88, "Kerberos"),
    (110, "POP3"),
    (111, "RPCBind"),
    (113, "Ident"),
    (119, "NNTP"),
    (135, "MS RPC"),
    (139, "NetBIOS Session"),
    (143, "IMAP"),
    (179, "BGP"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (515, "LPD"),
    (548, "AFP"),
    (554, "RTSP"),
    (587, "SMTP Submission"),
    (631, "IPP"),
    (636, "LDAPS"),
    (873, "Rsync"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1080, "SOCKS"),
    (1433, "MSSQL"),
    (1521, "Oracle DB"),
    (1723, "PPTP"),
    (1883, "MQTT"),
    (2049, "NFS"),
    (2375, "Docker"),
    (3000, "HTTP Dev"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5000, "UPnP"),
    (5432, "PostgreSQL"),
    (5672, "AMQP"),
    (5900, "VNC"),
    (5985, "WinRM"),
    (6379, "Redis"),
    (6443, "Kubernetes API"),
    (8000, "HTTP Alt"),
    (8080, "HTTP Proxy"),
    (8443, "HTTPS Alt"),
    (9000, "HTTP Alt"),
    (9100, "JetDirect"),
    (9200, "Elasticsearch"),
    (11211, "Memcached"),
    (27017, "MongoDB"),
];

const UDP_SERVICES: &[(u16, &str)] = &[
    (7, "Echo"),
    (53, "DNS (Domain Name System)"),
    (67, "DHCP Server (Dynamic Host Configuration Protocol)"),
    (68, "DHCP Client (Dynamic Host Configuration Protocol)"),
    (69, "TFTP (Trivial File Transfer Protocol)"),
    (88, "Kerberos"),
    (123, "NTP (Network Time Protocol)"),
    (137, "NetBIOS Name Service"),
    (138, "NetBIOS Datagram Service"),
    (161, "SNMP (Simple Network Management Protocol)"),
    (162, "SNMP Trap"),
    (389, "CLDAP (Connectionless LDAP)"),
    (443, "QUIC"),
    (500, "IKE (Internet Key Exchange)"),
    (514, "Syslog"),
    (520, "RIP (Routing Information Protocol)"),
    (1194, "OpenVPN"),
    (1434, "MSSQL Browser"),
    (1701, "L2TP (Layer 2 Tunneling Protocol)"),
    (1812, "RADIUS Authentication"),
    (1813, "RADIUS Accounting"),
    (1900, "SSDP (Simple Service Discovery Protocol)"),
    (4500, "IPsec NAT Traversal"),
    (5060, "SIP (Session Initiation Protocol)"),
    (5353, "mDNS (Multicast DNS)"),
    (5355, "LLMNR (Link-Local Multicast Name Resolution)"),
    (11211, "Memcached"),
    (51820, "WireGuard"),
];

fn lookup(table: &[(u16, &'static str)], port: u16) -> Option<&'static str> {
    table
        .binary_search_by_key(&port, |&(known, _)| known)
        .ok()
        .map(|idx| table[idx].1)
}

/// Baseline TCP service name for a port, if it is a well known one.
pub fn tcp_service_name(port: u16) -> Option<&'static str> {
    lookup(TCP_SERVICES, port)
}

/// UDP service name for a port, `"Unknown"` when it is not listed.
pub fn udp_service_name(port: u16) -> &'static str {
    lookup(UDP_SERVICES, port).unwrap_or(UNKNOWN)
}

/// Names the service behind an open TCP port from its number and banner.
///
/// The port table gives the baseline name. An SSH banner overrides it with
/// `SSH` and the banner's second token as version; an HTTP, Apache or nginx
/// banner overrides it with `HTTP` (`HTTPS` on 443) and the `Server:` header
/// value as version, falling back to the second token.
///
/// ```rust
/// # use netscanner::scanner::identify_service;
/// let info = identify_service(80, "HTTP/1.1 200 OK\nServer: nginx/1.18");
/// assert_eq!(info.service, "HTTP");
/// assert_eq!(info.version, "nginx/1.18");
/// ```
pub fn identify_service(port: u16, banner: &str) -> ServiceInfo {
    let mut info = ServiceInfo::default();
    if let Some(name) = tcp_service_name(port) {
        name.clone_into(&mut info.service);
    }

    let lower = banner.to_lowercase();

    if lower.contains("ssh") {
        "SSH".clone_into(&mut info.service);
        if let Some(version) = second_token(banner) {
            info.version = version;
        }
    }

    if ["http", "apache", "nginx"].iter().any(|hint| lower.contains(hint)) {
        let service = if port == 443 { "HTTPS" } else { "HTTP" };
        service.clone_into(&mut info.service);
        if let Some(version) = server_header(banner).or_else(|| second_token(banner)) {
            info.version = version;
        }
    }

    info
}

fn second_token(banner: &str) -> Option<String> {
    banner.split_whitespace().nth(1).map(str::to_owned)
}

/// Value of a `Server:` line, matched case-insensitively.
fn server_header(banner: &str) -> Option<String> {
    banner.lines().find_map(|line| {
        let line = line.trim();
        let (name, value) = line.split_once(':')?;
        let value = value.trim();
        (name.trim().eq_ignore_ascii_case("server") && !value.is_empty()).then(|| value.to_owned())
    })
}
