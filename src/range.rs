//! CIDR range tables and IP classification.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use ipnet::IpNet;

use crate::error::Error;
use crate::policy::Policy;
use crate::policy_builder::PolicyBuilder;

static STANDARD: LazyLock<Arc<RangeTable>> = LazyLock::new(|| {
    // Built-in literals are exercised by the tests below.
    let table = PolicyBuilder::new(Policy::Standard)
        .build()
        .expect("built-in ranges are valid CIDR literals");
    Arc::new(table)
});

/// Address family of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// A parsed CIDR block, identified by the literal it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CidrRange {
    literal: String,
    net: IpNet,
}

impl CidrRange {
    /// Parse a CIDR literal such as `10.0.0.0/8` or `fe80::/10`.
    ///
    /// A bare address is accepted as a single-host range. Host bits after
    /// the prefix are ignored, `10.1.2.3/8` covers `10.0.0.0/8`.
    pub fn parse(literal: &str) -> Result<Self, Error> {
        let trimmed = literal.trim();
        let net = match trimmed.parse::<IpNet>() {
            Ok(net) => net.trunc(),
            Err(e) => {
                let ip: IpAddr = trimmed
                    .parse()
                    .map_err(|_| Error::invalid_cidr(literal, e.to_string()))?;
                let prefix = match ip {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                IpNet::new(ip, prefix).map_err(|e| Error::invalid_cidr(literal, e.to_string()))?
            }
        };

        Ok(Self {
            literal: trimmed.to_string(),
            net,
        })
    }

    pub fn family(&self) -> Family {
        match self.net {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.net.contains(&ip)
    }

    pub fn net(&self) -> IpNet {
        self.net
    }

    pub fn as_str(&self) -> &str {
        &self.literal
    }
}

impl FromStr for CidrRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

/// Result of classifying one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'a> {
    Allowed,
    Denied(&'a CidrRange),
}

impl Decision<'_> {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }
}

#[derive(Debug, Clone, Default)]
struct FamilySets {
    v4: Vec<CidrRange>,
    v6: Vec<CidrRange>,
}

impl FamilySets {
    fn insert(&mut self, range: CidrRange) {
        let set = match range.family() {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        };
        if !set.iter().any(|r| r.literal == range.literal) {
            set.push(range);
        }
    }

    fn find(&self, ip: IpAddr) -> Option<&CidrRange> {
        let set = match Family::of(ip) {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        };
        set.iter().find(|r| r.contains(ip))
    }

    fn iter(&self) -> impl Iterator<Item = &CidrRange> {
        self.v4.iter().chain(&self.v6)
    }
}

/// An immutable set of denied ranges, split by address family, with
/// optional allow exceptions.
///
/// Build one with [`RangeTable::build`] or [`PolicyBuilder`], or share the
/// process-wide default from [`RangeTable::standard`].
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    denied: FamilySets,
    allowed: FamilySets,
}

impl RangeTable {
    /// Build a table denying exactly the given ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCidr`] for the first malformed literal.
    pub fn build<I, S>(cidrs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::default();
        for cidr in cidrs {
            table.denied.insert(CidrRange::parse(cidr.as_ref())?);
        }
        Ok(table)
    }

    /// The shared [`Policy::Standard`] table, built once per process.
    pub fn standard() -> Arc<RangeTable> {
        Arc::clone(&*STANDARD)
    }

    pub(crate) fn deny(&mut self, range: CidrRange) {
        self.denied.insert(range);
    }

    pub(crate) fn allow(&mut self, range: CidrRange) {
        self.allowed.insert(range);
    }

    /// Classify an address.
    ///
    /// Only ranges of the address's own family are scanned. IPv4-mapped and
    /// IPv4-compatible IPv6 addresses are additionally checked as the IPv4
    /// address they embed. Allow exceptions win over denied ranges.
    pub fn lookup(&self, ip: IpAddr) -> Decision<'_> {
        let views = std::iter::once(ip).chain(embedded_ipv4(ip).map(IpAddr::V4));

        if views.clone().any(|view| self.allowed.find(view).is_some()) {
            return Decision::Allowed;
        }

        for view in views {
            if let Some(range) = self.denied.find(view) {
                return Decision::Denied(range);
            }
        }

        Decision::Allowed
    }

    pub fn denied_ranges(&self) -> impl Iterator<Item = &CidrRange> {
        self.denied.iter()
    }

    pub fn allowed_ranges(&self) -> impl Iterator<Item = &CidrRange> {
        self.allowed.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.v4.is_empty() && self.denied.v6.is_empty()
    }
}

/// The IPv4 address carried inside an IPv6 address, if any.
fn embedded_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    let IpAddr::V6(ip) = ip else {
        return None;
    };

    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }

    // Deprecated IPv4-compatible form (::a.b.c.d). `::` and `::1` are
    // native IPv6 addresses and stay out of it.
    let segments = ip.segments();
    if segments[0..6] == [0, 0, 0, 0, 0, 0] && (segments[6] != 0 || segments[7] > 1) {
        return Some(Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        ));
    }

    None
}
