//! Hostname resolution.
//!
//! A [`Resolve`] implementation turns a hostname into every address the
//! underlying resolver reports. Classification happens afterwards in
//! [`Guard`](crate::Guard), over the whole list.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use tracing::{debug, warn};

use crate::error::Error;

/// Resolves a hostname to candidate addresses.
///
/// Implementations must return all addresses, not just the first, in the
/// order the resolver produced them. An empty list is treated as a failure
/// by the caller.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, Error>;
}

/// The operating system resolver, via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
        // lookup_host wants a port; it is discarded.
        let addrs = tokio::net::lookup_host((host, 0)).await.map_err(|e| {
            warn!(host = %host, error = %e, "DNS resolution failed");
            Error::resolution(host, e.to_string())
        })?;

        let ips = dedup(addrs.map(|addr| addr.ip()));
        debug!(host = %host, count = ips.len(), "resolved");
        Ok(ips)
    }
}

/// A DNS stub resolver built on hickory, configured from the system's
/// resolver configuration.
///
/// Unlike [`SystemResolver`] this does not go through the C library, so
/// `/etc/nsswitch.conf` sources other than `files` and `dns` are ignored.
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Build a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the system configuration cannot be read.
    pub fn new() -> Result<Self, Error> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| Error::resolution("system resolver configuration", e.to_string()))?
            .build();
        Ok(Self { resolver })
    }
}

impl fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
        let response = self.resolver.lookup_ip(host).await.map_err(|e| {
            warn!(host = %host, error = %e, "DNS resolution failed");
            Error::resolution(host, e.to_string())
        })?;

        let ips = dedup(response.iter());
        debug!(host = %host, count = ips.len(), "resolved");
        Ok(ips)
    }
}

/// A fixed hostname table.
///
/// Useful to pin hostnames to known addresses, and in tests. Hostnames are
/// matched case-insensitively; unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the addresses of `host`.
    pub fn with_host<I>(mut self, host: &str, ips: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.hosts
            .insert(normalize(host), ips.into_iter().collect());
        self
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
        self.hosts
            .get(&normalize(host))
            .map(|ips| dedup(ips.iter().copied()))
            .ok_or_else(|| Error::resolution(host, "no such host"))
    }
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_lowercase()
}

/// Collect addresses, dropping repeats but keeping first-seen order.
fn dedup(ips: impl Iterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut out: Vec<IpAddr> = Vec::new();
    for ip in ips {
        if !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}
