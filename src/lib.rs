//! # dial_jail
//!
//! SSRF-safe outbound connections.
//!
//! `dial_jail` resolves a dial target, classifies *every* address it resolves
//! to against a table of local ranges, and refuses the whole target if any of
//! them is denied. Connections then go to the verified IP literals, never
//! back through the hostname, so a second DNS answer cannot swap in a private
//! address.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dial_jail::GuardedDialer;
//!
//! # async fn example() -> Result<(), dial_jail::Error> {
//! let dialer = GuardedDialer::new();
//! let stream = dialer.dial("tcp", "example.com:443").await?;
//! println!("Connected to {}", stream.peer_addr().unwrap());
//!
//! let err = dialer.dial("tcp", "169.254.169.254:80").await.unwrap_err();
//! assert!(err.is_denied());
//! # Ok(())
//! # }
//! ```
//!
//! With the `fetch` feature (on by default), [`client_builder`] builds a
//! `reqwest`-backed [`GuardedClient`] checked by the same guard, and
//! [`fetch`] follows redirects with each hop checked.

mod address;
mod dialer;
mod error;
mod guard;
mod policy;
mod policy_builder;
mod range;
mod resolver;

#[cfg(feature = "fetch")]
mod fetch;
#[cfg(feature = "fetch")]
mod transport;

pub use address::{split_host_port, Host, HostPort, Network};
pub use dialer::{Connect, DialerConfig, GuardedDialer, TcpConnector, DEFAULT_CONNECT_TIMEOUT};
pub use error::Error;
pub use guard::{Checked, Guard, DEFAULT_RESOLVE_TIMEOUT};
pub use policy::Policy;
pub use policy_builder::PolicyBuilder;
pub use range::{CidrRange, Decision, Family, RangeTable};
pub use resolver::{DnsResolver, Resolve, StaticResolver, SystemResolver};

#[cfg(feature = "fetch")]
pub use fetch::{check_url, fetch, fetch_sync, fetch_with, FetchResult};
#[cfg(feature = "fetch")]
pub use transport::{
    client, client_builder, GuardResolver, GuardedClient, GuardedClientBuilder, RequestBuilder,
    MAX_REDIRECTS,
};
