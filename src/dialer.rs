//! Resolve-and-pin dialing.
//!
//! [`GuardedDialer::dial`] resolves the host once, classifies every
//! candidate, and only then connects, to the verified IP literal. The
//! hostname is never handed to the connect step, so nothing can re-resolve
//! it to a different address between the check and the connect.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::address::{split_host_port, Network};
use crate::error::Error;
use crate::guard::Guard;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The base dial primitive: open a connection to an IP literal.
#[async_trait]
pub trait Connect: Send + Sync {
    type Conn: Send;

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Conn>;
}

/// Plain TCP via tokio, with Nagle's algorithm disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connect for TcpConnector {
    type Conn = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Dialer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    /// Bound on each connection attempt. An attempt that runs out of time
    /// counts as failed and the next candidate is tried.
    pub connect_timeout: Option<Duration>,

    /// How many verified candidates to try, in resolution order. `None`
    /// tries them all; `Some(1)` pins to the first one.
    pub max_attempts: Option<usize>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            max_attempts: None,
        }
    }
}

/// Connects only to addresses that passed the [`Guard`].
///
/// # Example
///
/// ```rust,no_run
/// use dial_jail::GuardedDialer;
///
/// # async fn example() -> Result<(), dial_jail::Error> {
/// let dialer = GuardedDialer::new();
/// let stream = dialer.dial("tcp", "example.com:80").await?;
/// println!("connected to {}", stream.peer_addr().unwrap());
///
/// let err = dialer.dial("tcp", "localhost:80").await.unwrap_err();
/// assert!(err.is_denied());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GuardedDialer<C = TcpConnector> {
    guard: Guard,
    connector: C,
    config: DialerConfig,
}

impl GuardedDialer<TcpConnector> {
    /// Standard ranges, system resolver, plain TCP.
    pub fn new() -> Self {
        Self::with_guard(Guard::default())
    }

    pub fn with_guard(guard: Guard) -> Self {
        Self {
            guard,
            connector: TcpConnector,
            config: DialerConfig::default(),
        }
    }
}

impl Default for GuardedDialer<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connect> GuardedDialer<C> {
    /// Replace the base dial primitive.
    pub fn connector<D: Connect>(self, connector: D) -> GuardedDialer<D> {
        GuardedDialer {
            guard: self.guard,
            connector,
            config: self.config,
        }
    }

    pub fn config(mut self, config: DialerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Dial `address` (`host:port` or `[ipv6]:port`) on `network`
    /// (`tcp`, `tcp4` or `tcp6`).
    ///
    /// Every resolved candidate is classified before any connection is
    /// attempted. If one is denied the dial fails, even when others are
    /// public. Allowed candidates of the right family are then tried in
    /// resolution order until one connects.
    ///
    /// Dropping the returned future cancels the dial.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedNetwork`] for an unknown network
    /// - [`Error::AddressFormat`] if `address` is malformed
    /// - [`Error::Resolution`] / [`Error::ResolveTimeout`] if the host does not
    ///   resolve, or has no address of the requested family
    /// - [`Error::Denied`] if any candidate is denied
    /// - [`Error::Connect`] if no candidate could be connected
    pub async fn dial(&self, network: &str, address: &str) -> Result<C::Conn, Error> {
        let network: Network = network.parse()?;
        self.dial_network(network, address).await
    }

    /// [`GuardedDialer::dial`] with an already-parsed network.
    pub async fn dial_network(&self, network: Network, address: &str) -> Result<C::Conn, Error> {
        let target = split_host_port(address)?;
        let checked = self.guard.check_host(&target.host, target.port).await?;

        let candidates: Vec<SocketAddr> = checked
            .addrs
            .iter()
            .copied()
            .filter(|addr| network.admits(addr))
            .collect();

        if candidates.is_empty() {
            return Err(Error::resolution(
                checked.host,
                format!("no {} addresses found", network),
            ));
        }

        self.connect_pinned(address, &candidates).await
    }

    async fn connect_pinned(
        &self,
        address: &str,
        candidates: &[SocketAddr],
    ) -> Result<C::Conn, Error> {
        let limit = self.config.max_attempts.unwrap_or(usize::MAX).max(1);
        let mut attempted = Vec::new();
        let mut last_error = None;

        for &addr in candidates.iter().take(limit) {
            attempted.push(addr);
            match self.connect_once(addr).await {
                Ok(conn) => {
                    debug!(address = %address, pinned = %addr, "connected");
                    return Ok(conn);
                }
                Err(e) => {
                    debug!(address = %address, pinned = %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no candidate addresses"));
        warn!(address = %address, attempts = attempted.len(), error = %source, "connect failed");

        Err(Error::Connect {
            address: address.to_string(),
            attempted,
            source,
        })
    }

    async fn connect_once(&self, addr: SocketAddr) -> io::Result<C::Conn> {
        match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.connector.connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, timeout),
                    )
                })?,
            None => self.connector.connect(addr).await,
        }
    }
}
