//! Custom range tables built on top of a base [`Policy`].
//!
//! The builder consumes `self` on each call and only parses when
//! [`PolicyBuilder::build`] runs, so a malformed literal anywhere in the
//! chain fails the whole build instead of being dropped.
//!
//! **Be careful with [`PolicyBuilder::allow_cidr`].** Exceptions win over
//! every denied range, including loopback:
//!
//! ```rust
//! use dial_jail::{Policy, PolicyBuilder};
//!
//! // DANGEROUS: this re-opens localhost.
//! let table = PolicyBuilder::new(Policy::Standard)
//!     .allow_cidr("127.0.0.0/8")
//!     .build()
//!     .unwrap();
//! assert!(table.lookup("127.0.0.1".parse().unwrap()).is_allowed());
//! ```

use crate::error::Error;
use crate::policy::Policy;
use crate::range::{CidrRange, RangeTable};

/// Builder for a [`RangeTable`] with organization-specific ranges.
///
/// # Precedence
///
/// 1. An address inside an allowed range is allowed.
/// 2. An address inside a denied range (base policy or `block_cidr`) is denied.
/// 3. Everything else is allowed.
///
/// # Example
///
/// ```rust
/// use dial_jail::{Policy, PolicyBuilder};
///
/// let table = PolicyBuilder::new(Policy::Standard)
///     .block_cidr("100.64.0.0/10")
///     .allow_cidr("10.20.0.0/16")
///     .build()
///     .unwrap();
///
/// assert!(table.lookup("100.64.1.1".parse().unwrap()).is_denied());
/// assert!(table.lookup("10.20.1.1".parse().unwrap()).is_allowed());
/// assert!(table.lookup("10.30.1.1".parse().unwrap()).is_denied());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    blocked_cidrs: Vec<String>,
    allowed_cidrs: Vec<String>,
}

impl PolicyBuilder {
    /// Start from the ranges of `base`.
    pub fn new(base: Policy) -> Self {
        Self {
            blocked_cidrs: base.ranges().map(str::to_string).collect(),
            ..Default::default()
        }
    }

    /// Start from nothing; only ranges added with `block_cidr` are denied.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Deny a range (CIDR notation or a bare address).
    pub fn block_cidr(mut self, cidr: &str) -> Self {
        self.blocked_cidrs.push(cidr.to_string());
        self
    }

    /// Deny several ranges.
    pub fn block_cidrs<I, S>(mut self, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_cidrs
            .extend(cidrs.into_iter().map(|c| c.as_ref().to_string()));
        self
    }

    /// Allow a range, overriding any denied range that contains it.
    pub fn allow_cidr(mut self, cidr: &str) -> Self {
        self.allowed_cidrs.push(cidr.to_string());
        self
    }

    /// Parse every range and build the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCidr`] for the first malformed literal.
    pub fn build(self) -> Result<RangeTable, Error> {
        let mut table = RangeTable::default();
        for cidr in &self.blocked_cidrs {
            table.deny(CidrRange::parse(cidr)?);
        }
        for cidr in &self.allowed_cidrs {
            table.allow(CidrRange::parse(cidr)?);
        }
        Ok(table)
    }
}
