//! Resolution and classification of dial targets.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::address::{split_host_port, Host};
use crate::error::Error;
use crate::range::{Decision, RangeTable};
use crate::resolver::{Resolve, SystemResolver};

/// Default bound on a single hostname resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a successful check: every candidate the host resolved to,
/// all of them allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked {
    /// Normalized host (use for Host header / SNI). IPv6 literals are bracketed.
    pub host: String,

    /// Port number.
    pub port: u16,

    /// Verified candidates in resolution order. Never empty when returned
    /// by a check.
    pub addrs: Vec<SocketAddr>,
}

impl Checked {
    /// The first verified candidate, if any.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }
}

/// Resolves dial targets and classifies every candidate against a
/// [`RangeTable`].
///
/// Cloning is cheap; the table and resolver are shared.
///
/// # Example
///
/// ```rust,no_run
/// use dial_jail::Guard;
///
/// # async fn example() -> Result<(), dial_jail::Error> {
/// let checked = Guard::default().check("example.com:443").await?;
/// println!("Safe to connect to {} via {:?}", checked.host, checked.addrs);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Guard {
    table: Arc<RangeTable>,
    resolver: Arc<dyn Resolve>,
    resolve_timeout: Option<Duration>,
}

impl Default for Guard {
    /// The shared standard table and the system resolver.
    fn default() -> Self {
        Self::with_table(RangeTable::standard())
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("table", &self.table)
            .field("resolve_timeout", &self.resolve_timeout)
            .finish_non_exhaustive()
    }
}

impl Guard {
    /// Guard using `table` and the system resolver.
    pub fn new(table: RangeTable) -> Self {
        Self::with_table(Arc::new(table))
    }

    /// Guard sharing an existing table.
    pub fn with_table(table: Arc<RangeTable>) -> Self {
        Self {
            table,
            resolver: Arc::new(SystemResolver),
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
        }
    }

    /// Replace the resolver.
    pub fn resolver(mut self, resolver: impl Resolve + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Bound each resolution; `None` waits as long as the resolver does.
    pub fn resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn table(&self) -> &Arc<RangeTable> {
        &self.table
    }

    /// Classify a single address.
    pub fn classify(&self, ip: IpAddr) -> Decision<'_> {
        self.table.lookup(ip)
    }

    /// Parse `host:port`, resolve the host and classify every candidate.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressFormat`] if `address` is malformed
    /// - [`Error::Resolution`] / [`Error::ResolveTimeout`] if the host does not resolve
    /// - [`Error::Denied`] if *any* candidate is denied, even when others are public
    pub async fn check(&self, address: &str) -> Result<Checked, Error> {
        let target = split_host_port(address)?;
        self.check_host(&target.host, target.port).await
    }

    /// Resolve and classify an already-parsed host.
    pub async fn check_host(&self, host: &Host, port: u16) -> Result<Checked, Error> {
        let address = format!("{}:{}", host, port);
        let ips = self.candidates(host).await?;

        for &ip in &ips {
            if let Decision::Denied(range) = self.table.lookup(ip) {
                warn!(address = %address, %ip, range = %range, "denied as local");
                return Err(Error::denied(address, ip, range.as_str()));
            }
        }

        debug!(address = %address, candidates = ?ips, "all candidates allowed");

        Ok(Checked {
            host: host.to_string(),
            port,
            addrs: ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect(),
        })
    }

    /// Blocking version of [`Guard::check`].
    ///
    /// Works both inside and outside of a Tokio runtime. When called from
    /// outside a runtime, it creates a temporary one.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a current-thread Tokio runtime, where
    /// blocking is not possible.
    pub fn check_sync(&self, address: &str) -> Result<Checked, Error> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(self.check(address)))
        } else {
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| Error::resolution(address, e.to_string()))?;
            rt.block_on(self.check(address))
        }
    }

    async fn candidates(&self, host: &Host) -> Result<Vec<IpAddr>, Error> {
        let name = match host {
            Host::Ip(ip) => return Ok(vec![*ip]),
            Host::Name(name) => name,
        };

        let lookup = self.resolver.resolve(name);
        let ips = match self.resolve_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lookup).await.map_err(|_| {
                warn!(host = %name, ?timeout, "DNS resolution timed out");
                Error::ResolveTimeout {
                    host: name.clone(),
                    timeout,
                }
            })??,
            None => lookup.await?,
        };

        if ips.is_empty() {
            return Err(Error::resolution(name.as_str(), "no IP addresses found"));
        }
        Ok(ips)
    }
}
