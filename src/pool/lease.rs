use std::fmt;
use std::sync::Arc;

use crate::driver::SqlDialect;
use crate::error::SteadyDbError;
use crate::pool::PoolInner;
use crate::steady::{SteadyCursor, SteadyHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseMode {
    Dedicated,
    Shared,
}

/// A checked-out right to use one pooled connection.
///
/// Dropping (or calling [`close`](Self::close)) returns the connection to
/// the pool: a dedicated lease folds it back into the idle cache, a shared
/// lease decrements the share count and only the last holder folds it back.
pub struct PooledLease {
    pool: Arc<PoolInner>,
    con: SteadyHandle,
    mode: LeaseMode,
}

impl PooledLease {
    pub(crate) fn new(pool: Arc<PoolInner>, con: SteadyHandle, mode: LeaseMode) -> Self {
        Self { pool, con, mode }
    }

    /// Open a steady cursor on the leased connection.
    pub fn cursor(&self) -> Result<SteadyCursor, SteadyDbError> {
        SteadyCursor::new(self.con.clone())
    }

    /// Mark the start of a transaction on the leased connection.
    pub fn begin(&self) -> Result<(), SteadyDbError> {
        self.con.lock().begin()
    }

    /// Commit the pending transaction.
    pub fn commit(&self) -> Result<(), SteadyDbError> {
        self.con.lock().commit()
    }

    /// Roll back the pending transaction.
    pub fn rollback(&self) -> Result<(), SteadyDbError> {
        self.con.lock().rollback()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.con.lock().in_transaction()
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.mode == LeaseMode::Shared
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.con.lock().dialect()
    }

    /// Return the connection to the pool. Equivalent to dropping the lease;
    /// provided for call sites that want the return to read explicitly.
    pub fn close(self) {}
}

impl fmt::Debug for PooledLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledLease")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledLease {
    fn drop(&mut self) {
        match self.mode {
            LeaseMode::Dedicated => self.pool.cache(self.con.clone()),
            LeaseMode::Shared => self.pool.unshare(&self.con),
        }
    }
}
