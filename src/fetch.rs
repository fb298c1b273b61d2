//! HTTP fetching through the guard, with every redirect checked.
//!
//! Each hop is resolved and classified before any connection is made, and
//! the request is then sent to the verified addresses only.

use std::net::IpAddr;

use reqwest::header::LOCATION;
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use crate::address::Host;
use crate::error::Error;
use crate::guard::{Checked, Guard};
use crate::transport::{reqwest_builder, MAX_REDIRECTS};

/// Result of a fetch operation, including the redirect chain.
#[derive(Debug)]
pub struct FetchResult {
    /// The final HTTP response.
    pub response: Response,

    /// Checked hops that were followed, starting with the original URL.
    pub chain: Vec<Checked>,
}

/// Resolve and classify the host of `url`.
///
/// # Errors
///
/// [`Error::InvalidUrl`] if the URL has no host or no known port, otherwise
/// whatever [`Guard::check_host`] reports.
pub async fn check_url(guard: &Guard, url: &Url) -> Result<Checked, Error> {
    let host = match url.host() {
        Some(url::Host::Domain(domain)) => Host::parse(domain)?,
        Some(url::Host::Ipv4(ip)) => Host::Ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => Host::Ip(IpAddr::V6(ip)),
        None => return Err(Error::invalid_url(url.as_str(), "URL must have a host")),
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::invalid_url(url.as_str(), "URL has no port"))?;

    guard.check_host(&host, port).await
}

/// Fetch a URL with the default guard, following redirects safely.
///
/// # Example
///
/// ```rust,no_run
/// use dial_jail::fetch;
///
/// # async fn example() -> Result<(), dial_jail::Error> {
/// let result = fetch("https://example.com/").await?;
/// println!("Final URL: {}", result.response.url());
/// println!("Followed {} redirects", result.chain.len() - 1);
/// # Ok(())
/// # }
/// ```
pub async fn fetch(url: &str) -> Result<FetchResult, Error> {
    fetch_with(url, &Guard::default()).await
}

/// Fetch a URL through `guard`, following up to [`MAX_REDIRECTS`] redirects.
///
/// A denial on a redirect target is reported as [`Error::RedirectBlocked`]
/// wrapping the denial. Every other error, including resolution failures
/// on a redirect hop, is returned as is.
pub async fn fetch_with(url: &str, guard: &Guard) -> Result<FetchResult, Error> {
    let mut current = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;
    let mut chain: Vec<Checked> = Vec::new();

    for _ in 0..=MAX_REDIRECTS {
        let checked = check_url(guard, &current).await.map_err(|e| {
            if chain.is_empty() || !e.is_denied() {
                e
            } else {
                Error::RedirectBlocked {
                    original_url: url.to_string(),
                    redirect_url: current.to_string(),
                    source: Box::new(e),
                }
            }
        })?;

        let client = pinned_client(guard, &current, &checked)?;
        chain.push(checked);

        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(|e| Error::http(current.as_str(), e.to_string()))?;

        if !response.status().is_redirection() {
            return Ok(FetchResult { response, chain });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| Error::http(current.as_str(), "Redirect without Location header"))?;

        let next = current
            .join(location)
            .map_err(|e| Error::invalid_url(location, e.to_string()))?;
        debug!(from = %current, to = %next, "following redirect");
        current = next;
    }

    Err(Error::TooManyRedirects {
        url: url.to_string(),
        max: MAX_REDIRECTS,
    })
}

/// Synchronous version of [`fetch`].
///
/// # Panics
///
/// Panics when called from inside a current-thread Tokio runtime, where
/// blocking is not possible.
pub fn fetch_sync(url: &str) -> Result<FetchResult, Error> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        tokio::task::block_in_place(|| handle.block_on(fetch(url)))
    } else {
        let rt = tokio::runtime::Runtime::new().map_err(|e| Error::http(url, e.to_string()))?;
        rt.block_on(fetch(url))
    }
}

/// A single-hop client that connects only to `checked.addrs`.
///
/// Domains are pinned with `resolve_to_addrs` so TLS SNI and the Host
/// header still carry the name.
fn pinned_client(guard: &Guard, url: &Url, checked: &Checked) -> Result<Client, Error> {
    let mut builder = reqwest_builder(guard.clone()).redirect(RedirectPolicy::none());
    if let Some(url::Host::Domain(domain)) = url.host() {
        builder = builder.resolve_to_addrs(domain, &checked.addrs);
    }
    builder
        .build()
        .map_err(|e| Error::http(url.as_str(), e.to_string()))
}
