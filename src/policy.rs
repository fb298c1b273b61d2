//! Built-in range policies.

/// Ranges that reach the local host, the local network or a cloud metadata service.
const LOCAL_RANGES: &[&str] = &[
    "0.0.0.0/8",          // "this network", 0.0.0.0 dials the local host
    "127.0.0.0/8",        // IPv4 loopback
    "10.0.0.0/8",         // RFC1918
    "172.16.0.0/12",      // RFC1918
    "192.168.0.0/16",     // RFC1918
    "169.254.0.0/16",     // RFC3927 link-local, includes 169.254.169.254
    "100.100.100.200/32", // Alibaba Cloud metadata
    "::/128",             // IPv6 unspecified
    "::1/128",            // IPv6 loopback
    "fe80::/10",          // IPv6 link-local
    "fc00::/7",           // IPv6 unique local, includes fd00:ec2::254
];

/// Special-purpose ranges that are not local but are never legitimate fetch targets.
const RESERVED_RANGES: &[&str] = &[
    "100.64.0.0/10",      // RFC6598 shared address space (CGNAT)
    "192.0.0.0/24",       // IETF protocol assignments
    "192.0.2.0/24",       // TEST-NET-1
    "198.18.0.0/15",      // benchmarking
    "198.51.100.0/24",    // TEST-NET-2
    "203.0.113.0/24",     // TEST-NET-3
    "224.0.0.0/4",        // multicast
    "240.0.0.0/4",        // reserved
    "255.255.255.255/32", // limited broadcast
    "100::/64",           // discard-only
    "2001:db8::/32",      // documentation
    "ff00::/8",           // IPv6 multicast
];

/// Base set of denied ranges.
///
/// Use [`PolicyBuilder`](crate::PolicyBuilder) to extend a base policy with
/// organization-specific ranges or exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Loopback, RFC1918, link-local, unique-local, unspecified and
    /// cloud metadata addresses.
    #[default]
    Standard,

    /// Everything in [`Policy::Standard`] plus documentation, benchmarking,
    /// shared address space, multicast, broadcast and other reserved ranges.
    Strict,
}

impl Policy {
    /// CIDR literals denied by this policy.
    pub fn ranges(self) -> impl Iterator<Item = &'static str> {
        let reserved: &[&str] = match self {
            Policy::Standard => &[],
            Policy::Strict => RESERVED_RANGES,
        };
        LOCAL_RANGES.iter().chain(reserved).copied()
    }
}
