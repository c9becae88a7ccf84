//! The client facade: explicit configuration in, responses out.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION,
    CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION, PROXY_AUTHORIZATION, SET_COOKIE,
    TRANSFER_ENCODING, USER_AGENT,
};
use http::Method;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::body::Body;
use crate::connect::{Connector, Proxy};
use crate::cookies::CookieJar;
use crate::dns::{DnsCache, Resolve};
use crate::error::{Error, ErrorKind, Result};
use crate::headers::set_if_missing;
use crate::into_url::IntoUrl;
use crate::pool::{Lease, PoolConfig, PoolStats};
use crate::proto::h1::{self, dispatch, parse};
use crate::redirect;
use crate::response::Response;
use crate::timeout::{Deadline, Timeouts};

const DEFAULT_USER_AGENT: &str = concat!("gale/", env!("CARGO_PKG_VERSION"));

/// When recycling a connection after a redirect, drain at most this much
/// leftover body before giving up on reuse.
const REDIRECT_DRAIN_LIMIT: usize = 64 * 1024;

/// An asynchronous HTTP client with connection pooling.
///
/// Cloning is cheap and shares pools, DNS cache and cookie jar.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientRef>,
}

struct ClientRef {
    connector: Connector,
    user_agent: HeaderValue,
    cookie_jar: CookieJar,
}

/// Configures an [`HttpClient`].
pub struct ClientBuilder {
    user_agent: String,
    timeouts: Timeouts,
    proxy: Option<Proxy>,
    resolver: Option<Arc<dyn Resolve>>,
    dns_ttl: Duration,
    dns_cache_size: usize,
    pool_patterns: Vec<(String, PoolConfig)>,
}

impl Default for ClientBuilder {
    fn default() -> ClientBuilder {
        ClientBuilder {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeouts: Timeouts::default(),
            proxy: None,
            resolver: None,
            dns_ttl: Duration::from_secs(10),
            dns_cache_size: 1000,
            pool_patterns: Vec::new(),
        }
    }
}

impl ClientBuilder {
    /// The `User-Agent` sent when the caller does not supply one.
    pub fn user_agent(mut self, agent: impl Into<String>) -> ClientBuilder {
        self.user_agent = agent.into();
        self
    }

    /// Default per-phase deadlines; individual requests may override.
    pub fn timeouts(mut self, timeouts: Timeouts) -> ClientBuilder {
        self.timeouts = timeouts;
        self
    }

    /// Route all traffic through an HTTP proxy.
    pub fn proxy(mut self, proxy: Proxy) -> ClientBuilder {
        self.proxy = Some(proxy);
        self
    }

    /// Replace the default `getaddrinfo` resolver.
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> ClientBuilder {
        self.resolver = Some(resolver);
        self
    }

    /// Tune the DNS cache (entry lifetime and size bound).
    pub fn dns_cache(mut self, ttl: Duration, max_size: usize) -> ClientBuilder {
        self.dns_ttl = ttl;
        self.dns_cache_size = max_size;
        self
    }

    /// Register a pool configuration for URLs matching `pattern` as a
    /// prefix. The longest matching pattern wins; register under
    /// [`DEFAULT_POOL_PATTERN`](crate::DEFAULT_POOL_PATTERN) to replace
    /// the fallback.
    pub fn pool_config(mut self, pattern: impl Into<String>, config: PoolConfig) -> ClientBuilder {
        self.pool_patterns.push((pattern.into(), config));
        self
    }

    /// Finish the builder.
    pub fn build(self) -> HttpClient {
        let user_agent = HeaderValue::from_str(&self.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT));
        HttpClient {
            inner: Arc::new(ClientRef {
                connector: Connector::new(
                    self.resolver,
                    DnsCache::new(self.dns_ttl, self.dns_cache_size),
                    self.proxy,
                    self.timeouts,
                    self.pool_patterns,
                ),
                user_agent,
                cookie_jar: CookieJar::new(),
            }),
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("user_agent", &self.user_agent)
            .field("timeouts", &self.timeouts)
            .field("proxy", &self.proxy)
            .field("pool_patterns", &self.pool_patterns.len())
            .finish()
    }
}

/// Per-request inputs, every recognized field enumerated.
#[derive(Debug)]
pub struct RequestOptions {
    /// Extra query parameters, appended to the URL's own in order.
    pub params: Vec<(String, String)>,
    /// Headers merged over the defaults; duplicates are sent as repeated
    /// lines.
    pub headers: HeaderMap,
    /// The request body.
    pub body: Body,
    /// Per-request deadline overrides.
    pub timeouts: Option<Timeouts>,
    /// Follow 3xx redirects.
    pub follow: bool,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    /// Apply and capture cookies through the client's jar.
    pub handle_cookies: bool,
    /// Keep the `Authorization` header on cross-origin redirects.
    pub retain_authorization: bool,
    /// Reject buffered bodies larger than this many bytes.
    pub max_body_size: Option<usize>,
}

impl Default for RequestOptions {
    fn default() -> RequestOptions {
        RequestOptions {
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: Body::empty(),
            timeouts: None,
            follow: false,
            verify_ssl: true,
            handle_cookies: false,
            retain_authorization: false,
            max_body_size: None,
        }
    }
}

impl RequestOptions {
    /// Options with every field at its default.
    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    /// Append one query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> RequestOptions {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append several query parameters; duplicate keys repeat in order.
    pub fn params<K, V, I>(mut self, pairs: I) -> RequestOptions
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add one header line.
    pub fn header(mut self, name: &str, value: &str) -> Result<RequestOptions> {
        let name: HeaderName = name.parse()?;
        self.headers.append(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Merge a prepared header map.
    pub fn headers(mut self, headers: HeaderMap) -> RequestOptions {
        crate::headers::merge(&mut self.headers, &headers);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Body>) -> RequestOptions {
        self.body = body.into();
        self
    }

    /// Send `value` as a JSON body with `Content-Type: application/json`.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<RequestOptions> {
        self.body = Body::json(value)?;
        Ok(self)
    }

    /// Send key/value pairs as a urlencoded form body.
    pub fn form<K, V, I>(mut self, pairs: I) -> RequestOptions
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.body = Body::form(pairs);
        self
    }

    /// Override the client's per-phase deadlines for this request.
    pub fn timeouts(mut self, timeouts: Timeouts) -> RequestOptions {
        self.timeouts = Some(timeouts);
        self
    }

    /// Follow 3xx redirects.
    pub fn follow(mut self, follow: bool) -> RequestOptions {
        self.follow = follow;
        self
    }

    /// Verify TLS certificates (on by default).
    pub fn verify_ssl(mut self, verify: bool) -> RequestOptions {
        self.verify_ssl = verify;
        self
    }

    /// Apply and capture cookies through the client's jar.
    pub fn handle_cookies(mut self, handle: bool) -> RequestOptions {
        self.handle_cookies = handle;
        self
    }

    /// Keep `Authorization` when a redirect changes origin.
    pub fn retain_authorization(mut self, retain: bool) -> RequestOptions {
        self.retain_authorization = retain;
        self
    }

    /// Fail buffered body reads beyond this many bytes.
    pub fn max_body_size(mut self, limit: usize) -> RequestOptions {
        self.max_body_size = Some(limit);
        self
    }
}

impl HttpClient {
    /// A client with default configuration.
    pub fn new() -> HttpClient {
        ClientBuilder::default().build()
    }

    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Issue a request and return the response with its body unread.
    pub async fn request(
        &self,
        method: Method,
        url: impl IntoUrl,
        mut opts: RequestOptions,
    ) -> Result<Response> {
        let mut url = url.into_url()?;
        append_params(&mut url, &opts.params);

        let timeouts = opts.timeouts.unwrap_or(*self.inner.connector.timeouts());
        let deadline = Deadline(timeouts.request_deadline());

        let mut method = method;
        let mut body = std::mem::take(&mut opts.body);
        let mut chain: Vec<Url> = Vec::new();

        loop {
            let (head, lease) = self
                .execute(&method, &url, &opts, &mut body, &timeouts, deadline)
                .await
                .map_err(|e| e.with_url(url.clone()).with_method(method.clone()))?;

            if opts.handle_cookies {
                self.inner
                    .cookie_jar
                    .store(&url, head.headers.get_all(SET_COOKIE).iter());
            }

            if opts.follow && redirect::is_redirect(head.status) {
                let hop = redirect::next_hop(
                    head.status,
                    &method,
                    &url,
                    head.headers.get(LOCATION),
                )
                .map_err(|e| {
                    e.with_url(url.clone())
                        .with_method(method.clone())
                        .with_status(head.status)
                })?;

                if chain.len() >= redirect::MAX_REDIRECTS {
                    return Err(Error::too_many_redirects(chain).with_method(method));
                }
                debug!(status = %head.status, to = %hop.url, "following redirect");
                chain.push(hop.url.clone());

                self.recycle_redirect_body(head, lease, &method, &timeouts, deadline)
                    .await;

                if hop.drop_body {
                    body = Body::empty();
                } else if !body.is_replayable() {
                    return Err(Error::builder(
                        "cannot follow a redirect with a streaming body",
                    )
                    .with_url(hop.url)
                    .with_method(method));
                }
                if hop.cross_origin && !opts.retain_authorization {
                    opts.headers.remove(AUTHORIZATION);
                }
                method = hop.method;
                url = hop.url;
                continue;
            }

            let decoder = h1::Decoder::new(parse::body_length(&head, &method).map_err(|e| {
                e.with_url(url.clone())
                    .with_method(method.clone())
                    .with_status(head.status)
            })?);
            return Ok(Response::new(
                head,
                lease,
                decoder,
                url,
                method,
                timeouts.sock_read,
                deadline,
                opts.max_body_size,
            ));
        }
    }

    /// `GET` sugar.
    pub async fn get(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::GET, url, opts).await
    }

    /// `POST` sugar.
    pub async fn post(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::POST, url, opts).await
    }

    /// `PUT` sugar.
    pub async fn put(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, url, opts).await
    }

    /// `PATCH` sugar.
    pub async fn patch(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::PATCH, url, opts).await
    }

    /// `DELETE` sugar.
    pub async fn delete(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, url, opts).await
    }

    /// `HEAD` sugar.
    pub async fn head(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::HEAD, url, opts).await
    }

    /// `OPTIONS` sugar.
    pub async fn options(&self, url: impl IntoUrl, opts: RequestOptions) -> Result<Response> {
        self.request(Method::OPTIONS, url, opts).await
    }

    /// Resolve once every outstanding lease has been returned.
    pub async fn wait_requests(&self) {
        self.inner.connector.wait_requests().await;
    }

    /// Close idle connections in every pool; leased connections close on
    /// their next release. The client remains usable for new requests only
    /// in the sense that they will open fresh connections.
    pub fn shutdown(&self) {
        self.inner.connector.shutdown();
    }

    /// Counters for the pool serving `url`, when it exists.
    pub fn pool_stats(&self, url: impl IntoUrl) -> Option<PoolStats> {
        let url = url.into_url().ok()?;
        self.inner.connector.pool_stats(&url)
    }

    /// DNS cache effectiveness counters.
    pub fn dns_cache_stats(&self) -> crate::dns::CacheStats {
        self.inner.connector.dns_cache().stats()
    }

    pub(crate) fn connector(&self) -> &Connector {
        &self.inner.connector
    }

    /// One wire exchange, with the single stale-connection retry.
    async fn execute(
        &self,
        method: &Method,
        url: &Url,
        opts: &RequestOptions,
        body: &mut Body,
        timeouts: &Timeouts,
        deadline: Deadline,
    ) -> Result<(h1::ResponseHead, Lease)> {
        let connector = &self.inner.connector;
        let head_bytes = self.serialize_head(method, url, opts, body)?;

        let mut lease = connector
            .acquire(url, opts.verify_ssl, timeouts, deadline, false)
            .await?;
        lease.mark_used();
        match dispatch::exchange(
            lease.conn_mut(),
            &head_bytes,
            body,
            timeouts.sock_read,
            deadline,
        )
        .await
        {
            Ok(head) => Ok((head, lease)),
            Err(err)
                if lease.reused
                    && body.is_replayable()
                    && matches!(err.kind(), ErrorKind::Io) =>
            {
                // the idle connection died between the liveness peek and
                // the write; one retry on a fresh connection
                warn!(%url, "reused connection was stale, retrying once");
                lease.discard();
                let mut lease = connector
                    .acquire(url, opts.verify_ssl, timeouts, deadline, true)
                    .await?;
                lease.mark_used();
                let head = dispatch::exchange(
                    lease.conn_mut(),
                    &head_bytes,
                    body,
                    timeouts.sock_read,
                    deadline,
                )
                .await?;
                Ok((head, lease))
            }
            Err(err) => {
                lease.discard();
                Err(err)
            }
        }
    }

    /// Serialize the start line and header block for one hop.
    fn serialize_head(
        &self,
        method: &Method,
        url: &Url,
        opts: &RequestOptions,
        body: &Body,
    ) -> Result<BytesMut> {
        let mut headers = opts.headers.clone();

        let host_value = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_owned(),
        };
        set_if_missing(&mut headers, HOST, HeaderValue::from_str(&host_value)?);
        set_if_missing(&mut headers, USER_AGENT, self.inner.user_agent.clone());
        set_if_missing(&mut headers, ACCEPT, HeaderValue::from_static("*/*"));
        set_if_missing(&mut headers, CONNECTION, HeaderValue::from_static("keep-alive"));
        set_if_missing(
            &mut headers,
            ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        match body.content_length() {
            _ if body.is_empty_kind() => {}
            Some(len) => {
                set_if_missing(&mut headers, CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                set_if_missing(
                    &mut headers,
                    TRANSFER_ENCODING,
                    HeaderValue::from_static("chunked"),
                );
            }
        }
        if let Some(content_type) = body.content_type() {
            set_if_missing(&mut headers, CONTENT_TYPE, content_type.clone());
        }

        if opts.handle_cookies {
            if let Some(cookie) = self.inner.cookie_jar.header_for(url) {
                set_if_missing(&mut headers, COOKIE, cookie);
            }
        }

        // plain-HTTP proxying: absolute-form target and proxy credentials
        // travel with each request
        let proxied_plain = self.inner.connector.proxy().is_some()
            && matches!(url.scheme(), "http" | "ws");
        if proxied_plain {
            if let Some(auth) = self.inner.connector.proxy().and_then(Proxy::authorization) {
                set_if_missing(&mut headers, PROXY_AUTHORIZATION, auth);
            }
        }

        let target = h1::encode::request_target(url, proxied_plain);
        let mut dst = BytesMut::new();
        h1::encode::write_head(&mut dst, method, &target, &headers);
        Ok(dst)
    }

    /// After a redirect, consume a small leftover body so the connection
    /// can be reused; anything larger is cheaper to throw away.
    async fn recycle_redirect_body(
        &self,
        head: h1::ResponseHead,
        lease: Lease,
        method: &Method,
        timeouts: &Timeouts,
        deadline: Deadline,
    ) {
        let decoder = match parse::body_length(&head, method) {
            Ok(len) => h1::Decoder::new(len),
            Err(_) => {
                lease.discard();
                return;
            }
        };
        let mut response = Response::new(
            head,
            lease,
            decoder,
            Url::parse("http://localhost/").expect("static url"),
            method.clone(),
            timeouts.sock_read,
            deadline,
            None,
        );
        let mut drained = 0usize;
        while let Ok(Some(block)) = response.chunk().await {
            drained += block.len();
            if drained > REDIRECT_DRAIN_LIMIT {
                // dropping the response closes the connection
                return;
            }
        }
    }
}

impl Default for HttpClient {
    fn default() -> HttpClient {
        HttpClient::new()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("connector", &self.inner.connector)
            .finish()
    }
}

fn append_params(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (k, v) in params {
        pairs.append_pair(k, v);
    }
}
