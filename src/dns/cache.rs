//! TTL cache for resolver results.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::Family;

/// Default entry lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(10);
/// Default entry cap before least-recently-used eviction.
const DEFAULT_MAX_SIZE: usize = 1000;

/// A TTL + LRU cache over resolver results, keyed by (host, family).
///
/// Expired entries are discarded on read. Writes are idempotent;
/// last-writer-wins is acceptable under the single-loop model.
pub struct DnsCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_size: usize,
}

struct Inner {
    map: HashMap<(String, Family), Entry>,
    // monotonically increasing use stamp for LRU selection
    tick: u64,
    hits: u64,
    misses: u64,
}

struct Entry {
    addrs: Vec<IpAddr>,
    resolved_at: Instant,
    last_used: u64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that fell through to the resolver.
    pub misses: u64,
    /// Live entries, including not-yet-expired ones.
    pub size: usize,
    /// Entry cap.
    pub max_size: usize,
}

impl Default for DnsCache {
    fn default() -> DnsCache {
        DnsCache::new(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

impl DnsCache {
    /// Build a cache with the given entry lifetime and size bound.
    pub fn new(ttl: Duration, max_size: usize) -> DnsCache {
        DnsCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
            ttl,
            max_size,
        }
    }

    pub(crate) fn get(&self, host: &str, family: Family) -> Option<Vec<IpAddr>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let key = (host.to_owned(), family);
        match inner.map.get_mut(&key) {
            Some(entry) if entry.resolved_at.elapsed() <= self.ttl => {
                entry.last_used = tick;
                let addrs = entry.addrs.clone();
                inner.hits += 1;
                Some(addrs)
            }
            Some(_expired) => {
                inner.map.remove(&key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub(crate) fn set(&self, host: &str, family: Family, addrs: Vec<IpAddr>) {
        if self.max_size == 0 || addrs.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let key = (host.to_owned(), family);
        if !inner.map.contains_key(&key) && inner.map.len() >= self.max_size {
            if let Some(evict) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&evict);
            }
        }
        inner.map.insert(
            key,
            Entry {
                addrs,
                resolved_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    /// Drop one host's entries, all families.
    pub fn remove(&self, host: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.retain(|(h, _), _| h != host);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().unwrap().map.clear();
    }

    /// Current effectiveness counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            max_size: self.max_size,
        }
    }
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("DnsCache")
            .field("ttl", &self.ttl)
            .field("size", &stats.size)
            .field("hits", &stats.hits)
            .field("misses", &stats.misses)
            .finish()
    }
}
