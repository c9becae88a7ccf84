//! The connector: maps a target URL to a pool, opens connections (TCP, then
//! TLS when the scheme asks for it), and tunnels through HTTP proxies.

pub(crate) mod proxy;
pub(crate) mod tls;

pub use self::proxy::Proxy;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::Url;

use crate::conn::{Connection, ConnectionKey, Io, Scheme};
use crate::dns::{literal_or_loopback, DnsCache, Family, GaiResolver, Resolve};
use crate::error::{Error, Result, TimeoutPhase};
use crate::pool::{Lease, LeaseTracker, Pool, PoolConfig, PoolStats};
use crate::timeout::{Deadline, Timeouts};

use self::tls::TlsClient;

/// Pattern key for the fallback pool configuration.
pub const DEFAULT_POOL_PATTERN: &str = ":default";

pub(crate) struct Connector {
    resolver: Arc<dyn Resolve>,
    dns_cache: DnsCache,
    tls: TlsClient,
    proxy: Option<Proxy>,
    timeouts: Timeouts,
    // insertion order matters: it breaks prefix-length ties
    pool_patterns: Vec<(String, PoolConfig)>,
    default_config: PoolConfig,
    pools: Mutex<HashMap<ConnectionKey, Arc<Pool>>>,
    tracker: Arc<LeaseTracker>,
}

impl Connector {
    pub(crate) fn new(
        resolver: Option<Arc<dyn Resolve>>,
        dns_cache: DnsCache,
        proxy: Option<Proxy>,
        timeouts: Timeouts,
        mut pool_patterns: Vec<(String, PoolConfig)>,
    ) -> Connector {
        let default_config = pool_patterns
            .iter()
            .position(|(p, _)| p == DEFAULT_POOL_PATTERN)
            .map(|i| pool_patterns.remove(i).1)
            .unwrap_or_default();
        Connector {
            resolver: resolver.unwrap_or_else(|| Arc::new(GaiResolver::new())),
            dns_cache,
            tls: TlsClient::new(),
            proxy,
            timeouts,
            pool_patterns,
            default_config,
            pools: Mutex::new(HashMap::new()),
            tracker: LeaseTracker::new(),
        }
    }

    pub(crate) fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub(crate) fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub(crate) fn dns_cache(&self) -> &DnsCache {
        &self.dns_cache
    }

    /// The pool key this URL maps to.
    pub(crate) fn key_for(&self, url: &Url) -> Result<ConnectionKey> {
        let scheme = Scheme::from_url_scheme(url.scheme())
            .ok_or_else(|| Error::builder(format!("unsupported scheme: {}", url.scheme())))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::builder("url has no host"))?
            .to_owned();
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(ConnectionKey {
            scheme,
            host,
            port,
            proxy: self.proxy.as_ref().map(Proxy::key),
        })
    }

    /// Longest-matching URL-prefix pattern wins; ties go to the earliest
    /// registered; the `:default` entry backs everything else.
    fn pool_config_for(&self, url: &Url) -> &PoolConfig {
        let target = url.as_str();
        let mut best: Option<(&str, &PoolConfig)> = None;
        for (pattern, config) in &self.pool_patterns {
            if target.starts_with(pattern.as_str()) {
                match best {
                    Some((seen, _)) if seen.len() >= pattern.len() => {}
                    _ => best = Some((pattern, config)),
                }
            }
        }
        best.map(|(_, c)| c).unwrap_or(&self.default_config)
    }

    fn pool_for(&self, url: &Url, key: &ConnectionKey) -> Arc<Pool> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get(key) {
            return Arc::clone(pool);
        }
        let config = self.pool_config_for(url).clone();
        debug!(key = %key, size = config.size, kind = ?config.kind, "creating pool");
        let pool = Pool::new(config, Arc::clone(&self.tracker));
        pools.insert(key.clone(), Arc::clone(&pool));
        pool
    }

    /// Counters for the pool serving `url`, if one exists yet.
    pub(crate) fn pool_stats(&self, url: &Url) -> Option<PoolStats> {
        let key = self.key_for(url).ok()?;
        let pools = self.pools.lock().unwrap();
        pools.get(&key).map(|p| p.stats())
    }

    /// Acquire a leased connection for `url`.
    ///
    /// When `fresh` is set an idle connection handed out by the pool is
    /// closed and replaced by a newly opened one; the stale-retry path
    /// relies on this.
    pub(crate) async fn acquire(
        &self,
        url: &Url,
        verify_ssl: bool,
        timeouts: &Timeouts,
        deadline: Deadline,
        fresh: bool,
    ) -> Result<Lease> {
        let key = self.key_for(url)?;
        let pool = self.pool_for(url, &key);

        let budget = match (timeouts.pool_acquire, deadline.remaining()?) {
            (Some(phase), Some(rem)) => Some(phase.min(rem)),
            (Some(phase), None) => Some(phase),
            (None, Some(rem)) => Some(rem),
            (None, None) => None,
        };
        let mut lease = pool.acquire(budget).await?;

        if fresh && !lease.is_empty() {
            lease.clear();
        }
        if lease.is_empty() {
            let conn = self.open(&key, verify_ssl, timeouts, deadline).await?;
            lease.install(conn);
        }
        Ok(lease)
    }

    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Some(literal) = literal_or_loopback(host) {
            return Ok(literal.collect());
        }
        if let Some(cached) = self.dns_cache.get(host, Family::Any) {
            trace!(host, "dns cache hit");
            return Ok(cached);
        }
        let addrs = self
            .resolver
            .resolve(host, Family::Any)
            .await
            .map_err(|e| Error::dns(host, e))?;
        if addrs.is_empty() {
            return Err(Error::dns(host, "resolver returned no addresses"));
        }
        self.dns_cache.set(host, Family::Any, addrs.clone());
        Ok(addrs)
    }

    async fn dial(
        &self,
        host: &str,
        port: u16,
        sock_connect: std::time::Duration,
        deadline: Deadline,
    ) -> Result<TcpStream> {
        let addrs = self.resolve(host).await?;
        let budget = deadline.clamp(sock_connect)?;

        let attempt = async {
            let mut last_err: Option<std::io::Error> = None;
            for ip in addrs {
                let addr = SocketAddr::new(ip, port);
                trace!(%addr, "tcp connect");
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        return Ok(stream);
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(Error::connect(
                last_err.expect("at least one address was attempted"),
            ))
        };
        tokio::time::timeout(budget, attempt)
            .await
            .map_err(|_| Error::timeout(TimeoutPhase::Connect))?
    }

    /// Open a new connection for `key`: resolve, TCP connect (through the
    /// proxy when one is configured), then TLS when the scheme requires it.
    pub(crate) async fn open(
        &self,
        key: &ConnectionKey,
        verify_ssl: bool,
        timeouts: &Timeouts,
        deadline: Deadline,
    ) -> Result<Connection> {
        let sock_connect = timeouts.sock_connect;
        let io = match (&self.proxy, key.scheme.is_tls()) {
            (None, false) => Io::Plain(self.dial(&key.host, key.port, sock_connect, deadline).await?),
            (None, true) => {
                let tcp = self.dial(&key.host, key.port, sock_connect, deadline).await?;
                let tls = self.tls.handshake(&key.host, tcp, verify_ssl).await?;
                Io::Tls(Box::new(tls))
            }
            (Some(proxy), false) => {
                // plain-HTTP proxying: the request itself goes to the proxy
                Io::Plain(
                    self.dial(proxy.host(), proxy.port(), sock_connect, deadline)
                        .await?,
                )
            }
            (Some(proxy), true) => {
                let mut tcp = self
                    .dial(proxy.host(), proxy.port(), sock_connect, deadline)
                    .await?;
                let auth = proxy.authorization();
                let budget = deadline.clamp(sock_connect)?;
                proxy::tunnel(&mut tcp, &key.host, key.port, auth.as_ref(), budget).await?;
                let tls = self.tls.handshake(&key.host, tcp, verify_ssl).await?;
                Io::Tls(Box::new(tls))
            }
        };
        debug!(key = %key, "connection established");
        Ok(Connection::new(key.clone(), io))
    }

    /// Resolve once no connection is leased anywhere.
    pub(crate) async fn wait_requests(&self) {
        self.tracker.idle().await;
    }

    /// Drain every pool. Idle connections close now; leased ones close on
    /// their next release.
    pub(crate) fn shutdown(&self) {
        let pools = self.pools.lock().unwrap();
        for pool in pools.values() {
            pool.drain();
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("proxy", &self.proxy)
            .field("pool_patterns", &self.pool_patterns.len())
            .finish()
    }
}
