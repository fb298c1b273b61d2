//! Parsing of `host:port` dial targets and network names.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

/// Network argument of a dial, mirroring the usual `tcp`/`tcp4`/`tcp6` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Either address family.
    #[default]
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Network {
    /// Whether a candidate of this family may be dialed on this network.
    pub fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(Error::UnsupportedNetwork {
                network: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host part of a dial target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// An IP literal; it is its own only candidate.
    Ip(IpAddr),
    /// A normalized (lowercase, no trailing dot) hostname.
    Name(String),
}

impl Host {
    /// Classify a raw host string (no port, no brackets).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressFormat`] for empty hosts and for numeric
    /// IPv4 encodings other than plain dotted-quad.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(Host::Ip(ip));
        }

        let mut name = raw.to_lowercase();
        if name.ends_with('.') {
            name.pop();
        }

        if name.is_empty() {
            return Err(Error::address_format(raw, "missing host"));
        }

        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(Host::Ip(ip));
        }

        reject_non_standard_ipv4(&name).map_err(|reason| Error::address_format(raw, reason))?;

        Ok(Host::Name(name))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            Host::Ip(ip) => write!(f, "{}", ip),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// A parsed `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: Host,
    pub port: u16,
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_host_port(s)
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Split `host:port` or `[ipv6]:port` into its parts.
///
/// # Errors
///
/// Returns [`Error::AddressFormat`] when the port is missing, zero or not a
/// number, when an IPv6 literal is not bracketed, when brackets hold
/// anything but an IPv6 literal, or when the host is empty or an
/// ambiguous numeric encoding.
pub fn split_host_port(address: &str) -> Result<HostPort, Error> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (inner, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::address_format(address, "missing ']' in address"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| Error::address_format(address, "missing port in address"))?;

        // Zone identifiers (fe80::1%eth0) are not part of the address.
        let literal = inner.split('%').next().unwrap_or(inner);
        let ip: Ipv6Addr = literal.parse().map_err(|_| {
            Error::address_format(address, "brackets only allowed for IPv6 addresses")
        })?;
        (Host::Ip(IpAddr::V6(ip)), port)
    } else {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| Error::address_format(address, "missing port in address"))?;
        if host.contains(':') {
            return Err(Error::address_format(
                address,
                "too many colons in address, IPv6 literals must be bracketed",
            ));
        }
        if host.contains(['[', ']']) {
            return Err(Error::address_format(address, "unexpected bracket in address"));
        }
        (Host::parse(host)?, port)
    };

    let port = parse_port(port).ok_or_else(|| {
        Error::address_format(address, format!("invalid port {:?}", port))
    })?;

    Ok(HostPort { host, port })
}

fn parse_port(port: &str) -> Option<u16> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    port.parse::<u16>().ok().filter(|&p| p != 0)
}

/// Reject hosts that inet_aton-style parsers read as IPv4 addresses in
/// octal, hex, integer or short form (`0177.0.0.1`, `0x7f000001`,
/// `2130706433`, `127.1`).
///
/// Only hosts made of one to four numeric labels qualify; `db1` or
/// `0x1.example.com` are ordinary names.
fn reject_non_standard_ipv4(host: &str) -> Result<(), &'static str> {
    let parts: Vec<&str> = host.split('.').collect();

    if parts.len() > 4 || !parts.iter().all(|p| is_numeric_label(p)) {
        return Ok(());
    }

    if parts.iter().any(|p| p.starts_with("0x")) {
        return Err("hexadecimal IP encoding not allowed");
    }

    // Plain dotted-quad already parsed as an IpAddr, so any four-part host
    // left here has a leading zero or an out-of-range octet.
    match parts.len() {
        1 => Err("decimal IP encoding not allowed"),
        2 | 3 => Err("short-form IP encoding not allowed"),
        _ => Err("octal or out-of-range IP encoding not allowed"),
    }
}

/// Decimal, or hex with a `0x` prefix. Hosts are already lowercase.
fn is_numeric_label(label: &str) -> bool {
    match label.strip_prefix("0x") {
        Some(hex) => hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Host {
        Host::Name(s.to_string())
    }

    // ==================== Valid addresses ====================

    #[test]
    fn test_split_hostname() {
        let hp = split_host_port("example.com:443").unwrap();
        assert_eq!(hp.host, name("example.com"));
        assert_eq!(hp.port, 443);
    }

    #[test]
    fn test_split_ipv4() {
        let hp = split_host_port("127.0.0.1:80").unwrap();
        assert_eq!(hp.host, Host::Ip("127.0.0.1".parse().unwrap()));
        assert_eq!(hp.port, 80);
    }

    #[test]
    fn test_split_ipv6() {
        let hp = split_host_port("[fe80::1]:6379").unwrap();
        assert_eq!(hp.host, Host::Ip("fe80::1".parse().unwrap()));
        assert_eq!(hp.port, 6379);
        assert_eq!(hp.to_string(), "[fe80::1]:6379");
    }

    #[test]
    fn test_split_ipv6_with_zone() {
        let hp = split_host_port("[fe80::1%eth0]:80").unwrap();
        assert_eq!(hp.host, Host::Ip("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(split_host_port("EXAMPLE.COM:80").unwrap().host, name("example.com"));
        assert_eq!(split_host_port("example.com.:80").unwrap().host, name("example.com"));
        assert_eq!(split_host_port("LocalHost.:80").unwrap().host, name("localhost"));
    }

    #[test]
    fn test_hostname_with_numbers() {
        assert_eq!(
            split_host_port("host123.example.com:80").unwrap().host,
            name("host123.example.com")
        );
        assert_eq!(
            split_host_port("0177.example.com:80").unwrap().host,
            name("0177.example.com")
        );
        assert_eq!(split_host_port("example.co2:80").unwrap().host, name("example.co2"));
    }

    // ==================== Malformed addresses ====================

    #[test]
    fn test_missing_port() {
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("example.com:").is_err());
        assert!(split_host_port("[::1]").is_err());
    }

    #[test]
    fn test_bad_port() {
        assert!(split_host_port("example.com:http").is_err());
        assert!(split_host_port("example.com:65536").is_err());
        assert!(split_host_port("example.com:0").is_err());
        assert!(split_host_port("example.com:+80").is_err());
    }

    #[test]
    fn test_empty_host() {
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port(".:80").is_err());
    }

    #[test]
    fn test_unbracketed_ipv6() {
        assert!(split_host_port("::1:80").is_err());
        assert!(split_host_port("fe80::1:6379").is_err());
    }

    #[test]
    fn test_bracketed_hostname() {
        assert!(split_host_port("[example.com]:80").is_err());
        assert!(split_host_port("[127.0.0.1]:80").is_err());
        assert!(split_host_port("[::1:80").is_err());
    }

    #[test]
    fn test_errors_are_address_format() {
        let err = split_host_port("nope").unwrap_err();
        assert!(matches!(err, Error::AddressFormat { .. }), "{err:?}");
    }

    // ==================== Non-standard IPv4 encodings ====================

    #[test]
    fn test_reject_octal() {
        assert!(split_host_port("0177.0.0.1:80").is_err());
        assert!(split_host_port("127.0.0.01:80").is_err());
        assert!(split_host_port("0251.0376.0251.0376:80").is_err());
    }

    #[test]
    fn test_reject_decimal() {
        assert!(split_host_port("2130706433:80").is_err());
        assert!(split_host_port("2852039166:80").is_err());
    }

    #[test]
    fn test_reject_hex() {
        assert!(split_host_port("0x7f000001:80").is_err());
        assert!(split_host_port("0X7F000001:80").is_err());
        assert!(split_host_port("0x7f.0.0.1:80").is_err());
    }

    #[test]
    fn test_hex_looking_names_are_hostnames() {
        for host in ["db1", "add2", "cafe1", "7f000001", "0x1.example.com"] {
            let hp = split_host_port(&format!("{}:80", host)).unwrap();
            assert_eq!(hp.host, name(host));
        }
    }

    #[test]
    fn test_reject_short_form() {
        assert!(split_host_port("127.1:80").is_err());
        assert!(split_host_port("127.0.1:80").is_err());
        assert!(split_host_port("169.254.43518:80").is_err());
    }

    #[test]
    fn test_reject_out_of_range_octet() {
        assert!(split_host_port("256.0.0.1:80").is_err());
    }

    // ==================== Network ====================

    #[test]
    fn test_network_parse() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("tcp4".parse::<Network>().unwrap(), Network::Tcp4);
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert!(matches!(
            "udp".parse::<Network>(),
            Err(Error::UnsupportedNetwork { .. })
        ));
    }

    #[test]
    fn test_network_admits() {
        let v4: SocketAddr = "93.184.216.34:80".parse().unwrap();
        let v6: SocketAddr = "[2606:2800:220:1::1]:80".parse().unwrap();
        assert!(Network::Tcp.admits(&v4) && Network::Tcp.admits(&v6));
        assert!(Network::Tcp4.admits(&v4) && !Network::Tcp4.admits(&v6));
        assert!(!Network::Tcp6.admits(&v4) && Network::Tcp6.admits(&v6));
    }
}
