//! Error types for dial_jail.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while checking or dialing an address.
#[derive(Debug, Error)]
pub enum Error {
    /// The `host:port` string could not be parsed.
    #[error("invalid address {address}: {reason}")]
    AddressFormat { address: String, reason: String },

    /// The network is not one of `tcp`, `tcp4` or `tcp6`.
    #[error("unsupported network {network:?}, expected tcp, tcp4 or tcp6")]
    UnsupportedNetwork { network: String },

    /// A CIDR literal in a range table could not be parsed.
    #[error("invalid CIDR {cidr:?}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    /// DNS resolution failed or returned nothing usable.
    #[error("DNS error for {host}: {message}")]
    Resolution { host: String, message: String },

    /// DNS resolution did not finish in time.
    #[error("DNS resolution for {host} timed out after {timeout:?}")]
    ResolveTimeout { host: String, timeout: Duration },

    /// A candidate IP address falls inside a denied range.
    #[error("ip address {ip} is denied as local (matched {range})")]
    Denied {
        address: String,
        ip: IpAddr,
        range: String,
    },

    /// Every candidate passed classification but no connection could be opened.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        attempted: Vec<SocketAddr>,
        #[source]
        source: io::Error,
    },

    /// Invalid URL syntax.
    #[cfg(feature = "fetch")]
    #[error("Invalid URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A redirect pointed to a denied destination.
    #[cfg(feature = "fetch")]
    #[error("Redirect blocked: {redirect_url}: {source}")]
    RedirectBlocked {
        original_url: String,
        redirect_url: String,
        source: Box<Error>,
    },

    /// Too many redirects.
    #[cfg(feature = "fetch")]
    #[error("Too many redirects (max {max})")]
    TooManyRedirects { url: String, max: u8 },

    /// HTTP request failed.
    #[cfg(feature = "fetch")]
    #[error("HTTP error: {message}")]
    Http { url: String, message: String },
}

impl Error {
    /// Returns `true` if the destination was refused by the range table,
    /// either directly or through a redirect.
    pub fn is_denied(&self) -> bool {
        match self {
            Self::Denied { .. } => true,
            #[cfg(feature = "fetch")]
            Self::RedirectBlocked { source, .. } => source.is_denied(),
            _ => false,
        }
    }

    /// The denied IP address, if this is a denial.
    pub fn denied_ip(&self) -> Option<IpAddr> {
        match self {
            Self::Denied { ip, .. } => Some(*ip),
            #[cfg(feature = "fetch")]
            Self::RedirectBlocked { source, .. } => source.denied_ip(),
            _ => None,
        }
    }

    pub(crate) fn address_format(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressFormat {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_cidr(cidr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCidr {
            cidr: cidr.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn resolution(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            host: host.into(),
            message: message.into(),
        }
    }

    pub(crate) fn denied(address: impl Into<String>, ip: IpAddr, range: impl Into<String>) -> Self {
        Self::Denied {
            address: address.into(),
            ip,
            range: range.into(),
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn http(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::AddressFormat { .. }
            | Error::UnsupportedNetwork { .. }
            | Error::InvalidCidr { .. } => io::ErrorKind::InvalidInput,
            Error::ResolveTimeout { .. } => io::ErrorKind::TimedOut,
            Error::Connect { source, .. } => source.kind(),
            e if e.is_denied() => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
