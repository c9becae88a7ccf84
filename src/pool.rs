//! Connection pools.
//!
//! One pool exists per [`ConnectionKey`](crate::conn::ConnectionKey). The
//! *Smart* variant reuses the most recently parked connection first and
//! opens new ones on demand; the *Cyclic* variant rotates over a fixed ring
//! of slots for callers that want predictable reuse patterns.
//!
//! Accounting invariant for the Smart pool: idle connections each hold one
//! slot permit, leases hold one each, so the semaphore's available permits
//! are always `size - (idle + leased)`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::conn::Connection;
use crate::error::{Error, Result};

/// Counts leases across every pool of one client, so shutdown can await
/// outstanding work draining to zero.
pub(crate) struct LeaseTracker {
    count: AtomicUsize,
    notify: Notify,
}

impl LeaseTracker {
    pub(crate) fn new() -> Arc<LeaseTracker> {
        Arc::new(LeaseTracker {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Resolve once no leases remain anywhere.
    pub(crate) async fn idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Which pooling strategy a [`PoolConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolKind {
    /// Prefer reusing the most recently released connection (LIFO).
    #[default]
    Smart,
    /// Rotate over a fixed ring of slots (FIFO).
    Cyclic,
}

/// Limits applied to one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Hard cap on connections held or leased at once.
    pub size: usize,
    /// Retire a connection after this many exchanges. `None` is unlimited.
    pub max_conn_requests: Option<u64>,
    /// Retire a connection idle longer than this. `None` is unlimited.
    pub max_conn_idle: Option<Duration>,
    /// Pooling strategy.
    pub kind: PoolKind,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            size: 25,
            max_conn_requests: None,
            max_conn_idle: None,
            kind: PoolKind::Smart,
        }
    }
}

/// Counters a pool exposes for observation and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened on behalf of this pool over its lifetime.
    pub created: u64,
    /// Exchanges served over this pool's lifetime.
    pub requests_served: u64,
    /// Connections currently parked idle.
    pub idle: usize,
    /// Connections currently leased out.
    pub leased: usize,
}

pub(crate) struct Pool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    inner: Mutex<Inner>,
    tracker: Arc<LeaseTracker>,
    created: AtomicU64,
    served: AtomicU64,
    leased: AtomicUsize,
    closed: AtomicBool,
}

enum Inner {
    Smart {
        // LIFO: most recently released last
        idle: Vec<Idle>,
    },
    Cyclic {
        slots: Vec<Slot>,
        next: usize,
    },
}

struct Idle {
    conn: Connection,
    permit: OwnedSemaphorePermit,
}

enum Slot {
    Empty,
    Idle(Connection),
    Leased,
}

impl Pool {
    pub(crate) fn new(config: PoolConfig, tracker: Arc<LeaseTracker>) -> Arc<Pool> {
        let inner = match config.kind {
            PoolKind::Smart => Inner::Smart { idle: Vec::new() },
            PoolKind::Cyclic => Inner::Cyclic {
                slots: (0..config.size).map(|_| Slot::Empty).collect(),
                next: 0,
            },
        };
        Arc::new(Pool {
            semaphore: Arc::new(Semaphore::new(config.size)),
            inner: Mutex::new(inner),
            tracker,
            config,
            created: AtomicU64::new(0),
            served: AtomicU64::new(0),
            leased: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let idle = match *self.inner.lock().unwrap() {
            Inner::Smart { ref idle } => idle.len(),
            Inner::Cyclic { ref slots, .. } => {
                slots.iter().filter(|s| matches!(s, Slot::Idle(_))).count()
            }
        };
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            requests_served: self.served.load(Ordering::Relaxed),
            idle,
            leased: self.leased.load(Ordering::Relaxed),
        }
    }

    /// Whether a parked connection may serve one more exchange.
    fn reusable(&self, conn: &Connection) -> bool {
        if conn.is_closed() || !conn.is_keep_alive() {
            return false;
        }
        if let Some(max) = self.config.max_conn_requests {
            if conn.requests_served() >= max {
                trace!(key = %conn.key, "connection exhausted its request budget");
                return false;
            }
        }
        if let Some(max_idle) = self.config.max_conn_idle {
            if conn.idle_for() > max_idle {
                trace!(key = %conn.key, "connection idled out");
                return false;
            }
        }
        // the non-blocking peek: EOF or stray bytes mean the server
        // abandoned the connection while it was parked
        if conn.is_stale() {
            debug!(key = %conn.key, "discarding stale idle connection");
            return false;
        }
        true
    }

    /// Take a reusable idle connection, if one survives the checks.
    ///
    /// Violating connections found on the way are dropped and their slots
    /// freed.
    fn checkout_idle(self: &Arc<Self>) -> Option<Lease> {
        let mut inner = self.inner.lock().unwrap();
        match *inner {
            Inner::Smart { ref mut idle } => {
                while let Some(parked) = idle.pop() {
                    if self.reusable(&parked.conn) {
                        self.leased.fetch_add(1, Ordering::Relaxed);
                        self.tracker.start();
                        return Some(Lease {
                            conn: Some(parked.conn),
                            permit: Some(parked.permit),
                            pool: Arc::clone(self),
                            reused: true,
                            slot: None,
                        });
                    }
                    // dropped: connection closes, permit frees the slot
                }
                None
            }
            // cyclic slots keep their position; reuse decisions happen in
            // checkout_slot where the permit is already held
            Inner::Cyclic { .. } => None,
        }
    }

    /// Cyclic only: claim the next ring slot under an acquired permit.
    fn checkout_slot(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Lease {
        let mut inner = self.inner.lock().unwrap();
        match *inner {
            Inner::Cyclic {
                ref mut slots,
                ref mut next,
            } => {
                let size = slots.len();
                for probe in 0..size {
                    let i = (*next + probe) % size;
                    if matches!(slots[i], Slot::Leased) {
                        continue;
                    }
                    *next = (i + 1) % size;
                    let taken = std::mem::replace(&mut slots[i], Slot::Leased);
                    let conn = match taken {
                        Slot::Idle(conn) if self.reusable(&conn) => Some(conn),
                        _ => None,
                    };
                    let reused = conn.is_some();
                    self.leased.fetch_add(1, Ordering::Relaxed);
                    self.tracker.start();
                    return Lease {
                        conn,
                        permit: Some(permit),
                        pool: Arc::clone(self),
                        reused,
                        slot: Some(i),
                    };
                }
                // a permit guarantees strictly fewer leases than slots
                unreachable!("cyclic pool held a permit but found no free slot");
            }
            Inner::Smart { .. } => {
                self.leased.fetch_add(1, Ordering::Relaxed);
                self.tracker.start();
                Lease {
                    conn: None,
                    permit: Some(permit),
                    pool: Arc::clone(self),
                    reused: false,
                    slot: None,
                }
            }
        }
    }

    /// Acquire the right to hold one connection, reusing an idle one when
    /// possible. The returned lease may be empty; the caller then opens a
    /// connection and installs it with [`Lease::install`].
    pub(crate) async fn acquire(self: &Arc<Self>, acquire_budget: Option<Duration>) -> Result<Lease> {
        if let Some(lease) = self.checkout_idle() {
            trace!("reusing idle connection");
            return Ok(lease);
        }
        let acquired = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match acquire_budget {
            Some(budget) => tokio::time::timeout(budget, acquired)
                .await
                .map_err(|_| Error::pool_acquire_timeout())?,
            None => acquired.await,
        }
        .expect("pool semaphore never closes");
        // an idle connection may have been parked while this task waited
        if let Some(lease) = self.checkout_idle() {
            return Ok(lease);
        }
        Ok(self.checkout_slot(permit))
    }

    fn park(self: &Arc<Self>, conn: Connection, permit: OwnedSemaphorePermit, slot: Option<usize>) {
        if self.closed.load(Ordering::Relaxed) {
            // a drained pool takes nothing back; the connection closes here
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        match *inner {
            Inner::Smart { ref mut idle } => {
                trace!(key = %conn.key, idle = idle.len() + 1, "parking connection");
                idle.push(Idle { conn, permit });
            }
            Inner::Cyclic { ref mut slots, .. } => {
                let i = slot.expect("cyclic lease always carries its slot");
                slots[i] = Slot::Idle(conn);
                drop(permit);
            }
        }
    }

    fn reset_slot(&self, slot: Option<usize>) {
        if let Some(i) = slot {
            let mut inner = self.inner.lock().unwrap();
            if let Inner::Cyclic { ref mut slots, .. } = *inner {
                slots[i] = Slot::Empty;
            }
        }
    }

    /// Close every idle connection. Leased connections close on their next
    /// release because the pool stops accepting parks.
    pub(crate) fn drain(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        match *inner {
            Inner::Smart { ref mut idle } => idle.clear(),
            Inner::Cyclic { ref mut slots, .. } => {
                for slot in slots.iter_mut() {
                    if matches!(slot, Slot::Idle(_)) {
                        *slot = Slot::Empty;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("kind", &self.config.kind)
            .field("size", &self.config.size)
            .field("idle", &stats.idle)
            .field("leased", &stats.leased)
            .finish()
    }
}

/// Exclusive use of one pool slot, and usually of one connection.
///
/// Dropping a lease without calling [`release`](Lease::release) treats the
/// connection as broken: it is closed and only the slot is returned.
pub(crate) struct Lease {
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Pool>,
    pub(crate) reused: bool,
    slot: Option<usize>,
}

impl Lease {
    /// Install a freshly opened connection into an empty lease.
    pub(crate) fn install(&mut self, conn: Connection) {
        debug_assert!(self.conn.is_none());
        self.pool.created.fetch_add(1, Ordering::Relaxed);
        self.conn = Some(conn);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.conn.is_none()
    }

    /// Drop the held connection but keep the slot, so a fresh connection
    /// can be installed in its place (the stale-retry path).
    pub(crate) fn clear(&mut self) {
        self.conn = None;
        self.reused = false;
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("lease holds a connection")
    }

    /// Record the start of an exchange on the leased connection.
    pub(crate) fn mark_used(&mut self) {
        self.pool.served.fetch_add(1, Ordering::Relaxed);
        self.conn_mut().mark_used();
    }

    /// Return the connection to its pool if it may serve another exchange,
    /// otherwise close it and free the slot.
    pub(crate) fn release(mut self) {
        let conn = self.conn.take();
        let permit = self.permit.take();
        let slot = self.slot.take();
        match (conn, permit) {
            (Some(conn), Some(permit)) if self.pool.reusable(&conn) => {
                self.pool.park(conn, permit, slot);
            }
            _ => {
                // connection (if any) and permit drop here, closing the
                // transport and freeing the slot
            }
        }
        // Drop still decrements the lease count and resets a taken slot
    }

    /// Close the connection and free the slot.
    pub(crate) fn discard(self) {
        // Drop does the work
        drop(self);
    }

    /// Take the connection out of pool management entirely, for upgraded
    /// protocols that own the stream until close.
    pub(crate) fn detach(mut self) -> Connection {
        let conn = self.conn.take().expect("detach requires a connection");
        trace!(key = %conn.key, "detaching connection from pool");
        conn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.leased.fetch_sub(1, Ordering::Relaxed);
        self.pool.tracker.finish();
        self.pool.reset_slot(self.slot.take());
        // conn and permit fields drop naturally; a dropped connection's
        // transport closes with it
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("reused", &self.reused)
            .field("empty", &self.conn.is_none())
            .finish()
    }
}
