//! Guarded `reqwest` clients.
//!
//! [`client_builder`] wires a [`Guard`] into reqwest in two places. Its DNS
//! hook, [`GuardResolver`], classifies every address a hostname resolves
//! to, so hyper only ever connects to addresses that passed. hyper never
//! consults the DNS hook for IP-literal hosts, so [`GuardedClient`] also
//! classifies literal hosts itself before each request is sent, and the
//! redirect policy does the same for redirect targets. TLS settings and
//! timeouts are left to the caller.

use std::error::Error as StdError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Body, Client, ClientBuilder, IntoUrl, Method, Request, Response};
use tracing::warn;
use url::Url;

use crate::address::Host;
use crate::error::Error;
use crate::guard::Guard;
use crate::range::{Decision, RangeTable};

/// Maximum number of redirects to follow.
pub const MAX_REDIRECTS: u8 = 10;

type BoxError = Box<dyn StdError + Send + Sync>;

/// A `reqwest` DNS resolver that runs the guard over every answer.
///
/// Resolution fails if any answer is denied, so a host with one public and
/// one private address is refused outright. On its own it does not cover
/// IP-literal URLs; use [`GuardedClient`] for that.
#[derive(Debug, Clone)]
pub struct GuardResolver {
    guard: Guard,
}

impl GuardResolver {
    pub fn new(guard: Guard) -> Self {
        Self { guard }
    }
}

impl Resolve for GuardResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let guard = self.guard.clone();
        Box::pin(async move {
            let host = Host::parse(name.as_str())?;
            // hyper replaces the port with the one from the URL.
            let checked = guard.check_host(&host, 0).await?;
            let addrs: Addrs = Box::new(checked.addrs.into_iter());
            Ok::<_, BoxError>(addrs)
        })
    }
}

/// Start building a [`GuardedClient`] that connects through `guard`.
///
/// System proxies are disabled, since a proxy would resolve the target
/// itself. Redirects are followed up to [`MAX_REDIRECTS`] times and refused
/// when they point at a denied IP literal.
pub fn client_builder(guard: Guard) -> GuardedClientBuilder {
    GuardedClientBuilder {
        inner: reqwest_builder(guard.clone()),
        guard,
    }
}

/// Build a guarded client with default settings.
pub fn client(guard: Guard) -> Result<GuardedClient, Error> {
    client_builder(guard).build()
}

/// The guarded `reqwest` builder shared by [`client_builder`] and `fetch`.
pub(crate) fn reqwest_builder(guard: Guard) -> ClientBuilder {
    let table = Arc::clone(guard.table());
    Client::builder()
        .no_proxy()
        .dns_resolver(Arc::new(GuardResolver::new(guard)))
        .redirect(redirect_policy(table))
}

/// Builder for a [`GuardedClient`].
#[derive(Debug)]
pub struct GuardedClientBuilder {
    inner: ClientBuilder,
    guard: Guard,
}

impl GuardedClientBuilder {
    /// Adjust the underlying `reqwest` builder (TLS, timeouts, headers).
    ///
    /// Replacing the DNS resolver, the proxy settings or the redirect
    /// policy here removes the corresponding check.
    pub fn configure(mut self, f: impl FnOnce(ClientBuilder) -> ClientBuilder) -> Self {
        self.inner = f(self.inner);
        self
    }

    pub fn build(self) -> Result<GuardedClient, Error> {
        let inner = self
            .inner
            .build()
            .map_err(|e| Error::http("", e.to_string()))?;
        Ok(GuardedClient {
            inner,
            guard: self.guard,
        })
    }
}

/// A `reqwest` client whose every request is checked by a [`Guard`].
///
/// Cloning is cheap; the connection pool and the guard are shared.
///
/// # Example
///
/// ```rust,no_run
/// use dial_jail::{client, Guard};
///
/// # async fn example() -> Result<(), dial_jail::Error> {
/// let client = client(Guard::default())?;
/// let response = client.get("https://example.com/").send().await?;
/// println!("{}", response.status());
///
/// let err = client.get("http://169.254.169.254/").send().await.unwrap_err();
/// assert!(err.is_denied());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GuardedClient {
    inner: Client,
    guard: Guard,
}

impl GuardedClient {
    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            inner: self.inner.request(method, url),
        }
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Send `request` if its host is allowed.
    ///
    /// # Errors
    ///
    /// - [`Error::Denied`] if the URL host is a denied literal or resolves
    ///   to a denied address
    /// - [`Error::RedirectBlocked`] if a redirect points at a denied address
    /// - [`Error::Resolution`] / [`Error::ResolveTimeout`] if the host does
    ///   not resolve
    /// - [`Error::Http`] for any other transport failure
    pub async fn execute(&self, request: Request) -> Result<Response, Error> {
        let url = request.url().clone();

        if let Some(ip) = literal_ip(&url) {
            if let Decision::Denied(range) = self.guard.classify(ip) {
                warn!(url = %url, %ip, range = %range, "denied as local");
                return Err(Error::denied(url.as_str(), ip, range.as_str()));
            }
        }

        self.inner
            .execute(request)
            .await
            .map_err(|e| from_reqwest(&url, e))
    }
}

/// A request being built on a [`GuardedClient`]; checked when sent.
#[derive(Debug)]
pub struct RequestBuilder {
    client: GuardedClient,
    inner: reqwest::RequestBuilder,
}

impl RequestBuilder {
    pub fn header(self, key: HeaderName, value: HeaderValue) -> Self {
        self.map(|b| b.header(key, value))
    }

    pub fn body(self, body: impl Into<Body>) -> Self {
        self.map(|b| b.body(body))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|b| b.timeout(timeout))
    }

    /// Adjust the underlying `reqwest` request builder.
    pub fn map(mut self, f: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder) -> Self {
        self.inner = f(self.inner);
        self
    }

    pub async fn send(self) -> Result<Response, Error> {
        let request = self.inner.build().map_err(|e| {
            let url = e.url().map(Url::to_string).unwrap_or_default();
            Error::http(url, e.to_string())
        })?;
        self.client.execute(request).await
    }
}

fn redirect_policy(table: Arc<RangeTable>) -> RedirectPolicy {
    RedirectPolicy::custom(move |attempt| {
        if attempt.previous().len() >= usize::from(MAX_REDIRECTS) {
            let err = Error::TooManyRedirects {
                url: attempt.url().to_string(),
                max: MAX_REDIRECTS,
            };
            return attempt.error(err);
        }

        let denied = literal_ip(attempt.url()).and_then(|ip| match table.lookup(ip) {
            Decision::Denied(range) => Some(Error::denied(attempt.url().as_str(), ip, range.as_str())),
            Decision::Allowed => None,
        });

        match denied {
            Some(err) => {
                warn!(url = %attempt.url(), error = %err, "redirect denied");
                attempt.error(err)
            }
            None => attempt.follow(),
        }
    })
}

/// The host of `url` if it is an IP literal.
pub(crate) fn literal_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        url::Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        url::Host::Domain(_) => None,
    }
}

/// Recover the guard's own error from a `reqwest` error chain.
fn from_reqwest(url: &Url, err: reqwest::Error) -> Error {
    let mut source = StdError::source(&err);
    while let Some(e) = source {
        if let Some(inner) = e.downcast_ref::<Error>().and_then(rebuild) {
            if err.is_redirect() && inner.is_denied() {
                return Error::RedirectBlocked {
                    original_url: url.to_string(),
                    redirect_url: err.url().map(Url::to_string).unwrap_or_default(),
                    source: Box::new(inner),
                };
            }
            return inner;
        }
        source = e.source();
    }
    Error::http(url.as_str(), err.to_string())
}

fn rebuild(err: &Error) -> Option<Error> {
    let copy = match err {
        Error::Denied { address, ip, range } => Error::denied(address.as_str(), *ip, range.as_str()),
        Error::Resolution { host, message } => Error::resolution(host.as_str(), message.as_str()),
        Error::ResolveTimeout { host, timeout } => Error::ResolveTimeout {
            host: host.clone(),
            timeout: *timeout,
        },
        Error::AddressFormat { address, reason } => {
            Error::address_format(address.as_str(), reason.as_str())
        }
        Error::TooManyRedirects { url, max } => Error::TooManyRedirects {
            url: url.clone(),
            max: *max,
        },
        _ => return None,
    };
    Some(copy)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::str::FromStr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::policy::Policy;
    use crate::policy_builder::PolicyBuilder;
    use crate::resolver::StaticResolver;

    async fn answer(listener: TcpListener, response: &'static str) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    }

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(answer(listener, response));
        addr
    }

    const SECRET: &str =
        "HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\nSECRET";

    fn loopback_guard() -> Guard {
        let table = PolicyBuilder::new(Policy::Standard)
            .allow_cidr("127.0.0.1/32")
            .build()
            .unwrap();
        Guard::new(table)
    }

    // ==================== GuardResolver ====================

    #[tokio::test]
    async fn test_guard_resolver_denies_localhost() {
        let resolver = GuardResolver::new(Guard::default());
        let result = resolver.resolve(Name::from_str("localhost").unwrap()).await;
        let err = result.err().expect("localhost must not resolve");
        assert!(err.to_string().contains("denied as local"), "{err}");
    }

    #[tokio::test]
    async fn test_guard_resolver_returns_verified_addrs() {
        let guard = Guard::default().resolver(
            StaticResolver::new().with_host("public.test", ["93.184.216.34".parse().unwrap()]),
        );
        let resolver = GuardResolver::new(guard);
        let addrs: Vec<SocketAddr> = resolver
            .resolve(Name::from_str("public.test").unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec!["93.184.216.34:0".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_guard_resolver_mixed_answers() {
        let guard = Guard::default().resolver(StaticResolver::new().with_host(
            "mixed.test",
            ["93.184.216.34".parse().unwrap(), "10.1.2.3".parse().unwrap()],
        ));
        let result = GuardResolver::new(guard)
            .resolve(Name::from_str("mixed.test").unwrap())
            .await;
        assert!(result.is_err());
    }

    // ==================== GuardedClient ====================

    #[tokio::test]
    async fn test_client_refuses_loopback_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = client(Guard::default()).unwrap();
        let err = client
            .get(format!("http://{}/server-status", addr))
            .send()
            .await
            .unwrap_err();
        assert_eq!(err.denied_ip(), Some(addr.ip()));
        assert!(err.to_string().contains("denied as local"), "{err}");

        // Nothing ever connected.
        let accepted =
            tokio::time::timeout(Duration::from_millis(50), listener.accept()).await;
        assert!(accepted.is_err(), "the listener must not see a connection");
    }

    #[tokio::test]
    async fn test_client_refuses_metadata_literal() {
        let client = client(Guard::default()).unwrap();
        for url in [
            "http://169.254.169.254/latest/meta-data/",
            "http://[fe80::1]:6379/",
            "http://0177.0.0.1/",
        ] {
            let err = client.get(url).send().await.unwrap_err();
            assert!(err.is_denied(), "{url}: {err}");
        }
    }

    #[tokio::test]
    async fn test_client_allows_exception() {
        let addr = serve_once(SECRET).await;
        let client = client(loopback_guard()).unwrap();

        let response = client.get(format!("http://{}/", addr)).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "SECRET");
    }

    #[tokio::test]
    async fn test_client_resolution_error_is_typed() {
        let guard = Guard::default().resolver(StaticResolver::new());
        let client = client(guard).unwrap();

        let err = client.get("http://nosuch.test/").send().await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{err:?}");
        assert!(!err.is_denied());
    }

    #[tokio::test]
    async fn test_client_refuses_redirect_to_metadata() {
        let addr = serve_once(
            "HTTP/1.1 302 Found\r\n\
             Location: http://169.254.169.254/latest/meta-data/\r\n\
             Content-Length: 0\r\n\
             Connection: close\r\n\r\n",
        )
        .await;

        let client = client(loopback_guard()).unwrap();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RedirectBlocked { .. }), "{err:?}");
        assert_eq!(err.denied_ip(), Some("169.254.169.254".parse().unwrap()));
    }

    #[test]
    fn test_literal_ip() {
        let url = Url::parse("http://[fe80::1]:6379/").unwrap();
        assert_eq!(literal_ip(&url), Some("fe80::1".parse().unwrap()));

        let url = Url::parse("http://0177.0.0.1/").unwrap();
        assert_eq!(literal_ip(&url), Some("127.0.0.1".parse().unwrap()));

        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(literal_ip(&url), None);
    }
}
