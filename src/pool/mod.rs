//! A bounded pool of steady connections with dedicated and shared leases.
//!
//! All admission and cache bookkeeping sits behind one mutex/condvar pair;
//! the condvar wait in [`ConnectionPool::connection`] (when `blocking` is
//! set and the pool is at capacity) is the only designed suspension point.

mod config;
mod lease;

pub use config::PoolConfig;
pub use lease::PooledLease;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::driver::{Driver, TransientPredicate};
use crate::error::SteadyDbError;
use crate::pool::lease::LeaseMode;
use crate::steady::{ConnectOptions, PingPolicy, SteadyConnection, SteadyHandle};

struct SharedSlot {
    con: SteadyHandle,
    shared: usize,
}

struct PoolState {
    idle: VecDeque<SteadyHandle>,
    shared: Vec<SharedSlot>,
    /// Outstanding connections: checked-out dedicated plus distinct shared.
    connections: usize,
    closed: bool,
}

pub(crate) struct PoolInner {
    driver: Arc<dyn Driver>,
    cfg: PoolConfig,
    opts: ConnectOptions,
    /// Effective shared-cache bound; zero unless the driver allows
    /// connection sharing.
    max_shared: usize,
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Point-in-time pool bookkeeping, mostly for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub connections: usize,
    pub idle: usize,
    pub shared_slots: usize,
    pub idle_in_transaction: usize,
    pub shared_in_transaction: usize,
}

/// A bounded set of steady connections handed out as leases.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open a pool over `driver` with the given configuration.
    ///
    /// Fails with [`SteadyDbError::NotThreadSafe`] if the driver declares
    /// thread-safety level 0, and with a config error if the sizing
    /// invariants cannot be met. `min_cached` idle connections are opened
    /// up front.
    pub fn open(driver: Arc<dyn Driver>, cfg: PoolConfig) -> Result<Self, SteadyDbError> {
        Self::open_with(driver, cfg, None)
    }

    /// Like [`open`](Self::open), with an override of the driver's
    /// transient-failure classification.
    pub fn open_with(
        driver: Arc<dyn Driver>,
        cfg: PoolConfig,
        transient_override: Option<TransientPredicate>,
    ) -> Result<Self, SteadyDbError> {
        let safety = driver.thread_safety();
        if !safety.allows_pooling() {
            return Err(SteadyDbError::NotThreadSafe);
        }
        let cfg = cfg.normalized()?;
        // Shared leases need connection-level thread safety; below that the
        // shared cache is silently disabled and every lease is dedicated.
        let max_shared = if safety.allows_sharing() {
            cfg.max_shared
        } else {
            0
        };
        let opts = ConnectOptions {
            max_usage: cfg.max_usage,
            set_session: cfg.set_session.clone(),
            ping: cfg.ping,
            transient_override,
        };
        let inner = Arc::new(PoolInner {
            driver,
            cfg,
            opts,
            max_shared,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                shared: Vec::new(),
                connections: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        });
        {
            let mut st = inner.state.lock();
            for _ in 0..inner.cfg.min_cached {
                st.idle.push_back(inner.steady_connection()?);
            }
        }
        Ok(Self { inner })
    }

    /// Check out a lease.
    ///
    /// With `shareable` set (and shared mode enabled), the pool prefers
    /// promoting an idle or fresh connection into the shared cache; once the
    /// cache is full it picks the member with the lowest share count that is
    /// not inside a transaction. Admission beyond `max_connections` either
    /// blocks on the pool condvar or fails with a capacity error, per the
    /// `blocking` setting.
    pub fn connection(&self, shareable: bool) -> Result<PooledLease, SteadyDbError> {
        if shareable && self.inner.max_shared > 0 {
            self.inner.clone().shared_lease()
        } else {
            self.inner.clone().dedicated_lease()
        }
    }

    /// A lease that is never shared with other callers.
    pub fn dedicated_connection(&self) -> Result<PooledLease, SteadyDbError> {
        self.connection(false)
    }

    /// An unpooled steady connection with this pool's options.
    pub fn steady_connection(&self) -> Result<SteadyHandle, SteadyDbError> {
        self.inner.steady_connection()
    }

    /// Close every cached connection and refuse further leases.
    pub fn close(&self) {
        self.inner.close_all();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let st = self.inner.state.lock();
        PoolStats {
            connections: st.connections,
            idle: st.idle.len(),
            shared_slots: st.shared.len(),
            idle_in_transaction: st
                .idle
                .iter()
                .filter(|con| con.lock().in_transaction())
                .count(),
            shared_in_transaction: st
                .shared
                .iter()
                .filter(|slot| slot.con.lock().in_transaction())
                .count(),
        }
    }
}

impl PoolInner {
    fn steady_connection(&self) -> Result<SteadyHandle, SteadyDbError> {
        Ok(SteadyConnection::open(self.driver.clone(), self.opts.clone())?.into_handle())
    }

    fn at_capacity(&self, st: &PoolState) -> bool {
        self.cfg.max_connections > 0 && st.connections >= self.cfg.max_connections
    }

    /// Block on the condvar, or fail fast when `blocking` is off. Re-checks
    /// pool closure after every wakeup.
    fn wait(&self, st: &mut MutexGuard<'_, PoolState>) -> Result<(), SteadyDbError> {
        if !self.cfg.blocking {
            return Err(SteadyDbError::Capacity(self.cfg.max_connections));
        }
        self.cond.wait(st);
        if st.closed {
            return Err(SteadyDbError::PoolClosed);
        }
        Ok(())
    }

    fn take_idle_or_connect(
        &self,
        st: &mut MutexGuard<'_, PoolState>,
    ) -> Result<SteadyHandle, SteadyDbError> {
        match st.idle.pop_front() {
            Some(con) => {
                con.lock().ping_check(PingPolicy::ON_CHECKOUT);
                Ok(con)
            }
            None => self.steady_connection(),
        }
    }

    fn dedicated_lease(self: Arc<Self>) -> Result<PooledLease, SteadyDbError> {
        let mut st = self.state.lock();
        if st.closed {
            return Err(SteadyDbError::PoolClosed);
        }
        while self.at_capacity(&st) {
            self.wait(&mut st)?;
        }
        let con = self.take_idle_or_connect(&mut st)?;
        st.connections += 1;
        drop(st);
        Ok(PooledLease::new(self, con, LeaseMode::Dedicated))
    }

    fn shared_lease(self: Arc<Self>) -> Result<PooledLease, SteadyDbError> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return Err(SteadyDbError::PoolClosed);
            }
            while st.shared.is_empty() && self.at_capacity(&st) {
                self.wait(&mut st)?;
            }
            if st.shared.len() < self.max_shared {
                // Room in the shared cache: promote an idle (or fresh)
                // connection into it.
                let con = self.take_idle_or_connect(&mut st)?;
                st.shared.push(SharedSlot {
                    con: con.clone(),
                    shared: 1,
                });
                st.connections += 1;
                self.cond.notify_one();
                drop(st);
                return Ok(PooledLease::new(self, con, LeaseMode::Shared));
            }
            // Cache full: share the least-shared member, waiting out any
            // that sit inside a transaction. A drained cache means slots
            // were folded back to idle while we slept; start over.
            let Some(idx) = best_shared_index(&st.shared) else {
                continue;
            };
            if st.shared[idx].con.lock().in_transaction() {
                self.wait(&mut st)?;
                continue;
            }
            let con = {
                let slot = &mut st.shared[idx];
                slot.shared += 1;
                slot.con.clone()
            };
            con.lock().ping_check(PingPolicy::ON_CHECKOUT);
            self.cond.notify_one();
            drop(st);
            return Ok(PooledLease::new(self, con, LeaseMode::Shared));
        }
    }

    /// Fold a connection back into the idle cache, or close it physically
    /// when the cache is full or the pool is shut down.
    pub(crate) fn cache(&self, con: SteadyHandle) {
        let mut st = self.state.lock();
        if st.closed {
            con.lock().close();
        } else if self.cfg.max_cached == 0 || st.idle.len() < self.cfg.max_cached {
            con.lock().reset(self.cfg.reset_on_return);
            st.idle.push_back(con);
        } else {
            debug!("idle cache full, closing returned connection");
            con.lock().close();
        }
        st.connections = st.connections.saturating_sub(1);
        self.cond.notify_one();
    }

    /// Drop one share of a shared connection; the last holder removes it
    /// from the shared cache and folds it back into the idle cache.
    pub(crate) fn unshare(&self, con: &SteadyHandle) {
        let became_idle = {
            let mut st = self.state.lock();
            match st
                .shared
                .iter()
                .position(|slot| Arc::ptr_eq(&slot.con, con))
            {
                Some(idx) => {
                    st.shared[idx].shared -= 1;
                    if st.shared[idx].shared == 0 {
                        st.shared.remove(idx);
                        true
                    } else {
                        self.cond.notify_one();
                        false
                    }
                }
                // Pool already closed and drained the slot.
                None => false,
            }
        };
        if became_idle {
            self.cache(con.clone());
        }
    }

    fn close_all(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        while let Some(con) = st.idle.pop_front() {
            con.lock().close();
        }
        while let Some(slot) = st.shared.pop() {
            slot.con.lock().close();
            st.connections = st.connections.saturating_sub(1);
        }
        self.cond.notify_all();
    }
}

/// Index of the best slot to share next: non-transactional before
/// transactional, then lowest share count.
fn best_shared_index(shared: &[SharedSlot]) -> Option<usize> {
    shared
        .iter()
        .enumerate()
        .min_by_key(|(_, slot)| (slot.con.lock().in_transaction(), slot.shared))
        .map(|(idx, _)| idx)
}
