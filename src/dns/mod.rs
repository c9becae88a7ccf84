//! DNS resolution used by the connector.
//!
//! This module contains:
//!
//! - The [`Resolve`] capability trait, so embedders can supply their own
//!   resolver.
//! - A [`GaiResolver`] that is the default: blocking `getaddrinfo` calls
//!   offloaded to the runtime's blocking thread pool.
//! - A TTL cache fronting any resolver, in [`cache`].

pub(crate) mod cache;

pub use self::cache::{CacheStats, DnsCache};

use std::future::Future;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::pin::Pin;
use std::{fmt, vec};

/// Which address family a resolution asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Any family the resolver returns, in resolver order.
    Any,
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
}

impl Family {
    fn keeps(&self, addr: &IpAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// The future a [`Resolve`] implementation returns.
pub type Resolving = Pin<Box<dyn Future<Output = io::Result<Vec<IpAddr>>> + Send>>;

/// An asynchronous name-to-addresses resolver.
///
/// Only the lookup itself is the implementor's concern; caching and
/// IP-literal bypass happen in the connector.
pub trait Resolve: Send + Sync + 'static {
    /// Resolve `host` into addresses of the requested family.
    ///
    /// An empty result is treated as a resolution failure by the caller.
    fn resolve(&self, host: &str, family: Family) -> Resolving;
}

/// A resolver using blocking `getaddrinfo` calls on the blocking pool.
#[derive(Clone, Default)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Construct a new `GaiResolver`.
    pub fn new() -> Self {
        GaiResolver { _priv: () }
    }
}

impl fmt::Debug for GaiResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("GaiResolver")
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, host: &str, family: Family) -> Resolving {
        let host = host.to_owned();
        Box::pin(async move {
            let addrs = tokio::task::spawn_blocking(move || {
                // port 0: only the addresses matter here
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await
            .map_err(|join_err| io::Error::new(io::ErrorKind::Other, join_err))??;
            Ok(addrs.into_iter().filter(|a| family.keeps(a)).collect())
        })
    }
}

/// Addresses that skip both the cache and the resolver.
///
/// Loopback names and IP literals resolve locally and instantly; caching
/// them would only let stale entries shadow `/etc/hosts` edits.
pub(crate) fn literal_or_loopback(host: &str) -> Option<vec::IntoIter<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(vec![ip].into_iter());
    }
    // `[::1]`-style bracketed v6 literals arrive stripped by the URL parser,
    // but accept them here as well for direct callers.
    if host.starts_with('[') && host.ends_with(']') {
        if let Ok(ip) = host[1..host.len() - 1].parse::<IpAddr>() {
            return Some(vec![ip].into_iter());
        }
    }
    if host.eq_ignore_ascii_case("localhost") {
        return Some(vec![IpAddr::from([127, 0, 0, 1])].into_iter());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_bypass_resolution() {
        assert!(literal_or_loopback("127.0.0.1").is_some());
        assert!(literal_or_loopback("127.1.2.3").is_some());
        assert!(literal_or_loopback("::1").is_some());
        assert!(literal_or_loopback("[::1]").is_some());
        assert!(literal_or_loopback("localhost").is_some());
        assert!(literal_or_loopback("example.com").is_none());
    }

    #[test]
    fn family_filters() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(Family::Any.keeps(&v4) && Family::Any.keeps(&v6));
        assert!(Family::V4.keeps(&v4) && !Family::V4.keeps(&v6));
        assert!(Family::V6.keeps(&v6) && !Family::V6.keeps(&v4));
    }

    #[tokio::test]
    async fn gai_resolves_loopback_name() {
        // "localhost" resolves through the host's own configuration, which
        // every test environment has.
        let resolver = GaiResolver::new();
        let addrs = resolver.resolve("localhost", Family::Any).await.unwrap();
        assert!(!addrs.is_empty());
    }
}
