use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::driver::{Driver, DriverError, RawConnection, RawCursor, SqlDialect, TransientPredicate};
use crate::error::SteadyDbError;
use crate::steady::PingPolicy;

/// The shareable unit the pool caches and leases.
pub type SteadyHandle = Arc<Mutex<SteadyConnection>>;

/// Options applied to every connection a pool (or caller) opens.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Recycle the connection after this many successful executions
    /// (0 = unlimited reuse).
    pub max_usage: u64,
    /// SQL statements run to prepare each fresh session, e.g.
    /// `set datestyle to ...`.
    pub set_session: Vec<String>,
    /// When to verify liveness with `ping()`.
    pub ping: PingPolicy,
    /// Optional override of the driver's transient-failure classification.
    pub transient_override: Option<TransientPredicate>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("max_usage", &self.max_usage)
            .field("set_session", &self.set_session)
            .field("ping", &self.ping)
            .field(
                "transient_override",
                &self.transient_override.as_ref().map(|_| "<predicate>"),
            )
            .finish()
    }
}

/// A fault-tolerant wrapper around one raw driver connection.
///
/// Opens the real connection on construction and transparently replaces it
/// when a classified transient failure strikes outside a transaction. Inside
/// a transaction the connection is never silently swapped; the failure
/// surfaces so the caller can retry the unit of work.
pub struct SteadyConnection {
    driver: Arc<dyn Driver>,
    opts: ConnectOptions,
    dialect: SqlDialect,
    con: Box<dyn RawConnection>,
    // Live copy of the ping bitmask; zeroed if the driver cannot ping.
    ping_mask: u8,
    usage: u64,
    in_transaction: bool,
    closed: bool,
}

impl SteadyConnection {
    /// Open a steady connection, immediately establishing the real one and
    /// running the session-preparation statements.
    pub fn open(driver: Arc<dyn Driver>, opts: ConnectOptions) -> Result<Self, SteadyDbError> {
        let con = fresh_raw(driver.as_ref(), &opts)?;
        let dialect = driver.dialect();
        let ping_mask = opts.ping.bits();
        Ok(Self {
            driver,
            opts,
            dialect,
            con,
            ping_mask,
            usage: 0,
            in_transaction: false,
            closed: false,
        })
    }

    /// Wrap in the handle type the pool and cursors share.
    #[must_use]
    pub fn into_handle(self) -> SteadyHandle {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    #[must_use]
    pub fn usage(&self) -> u64 {
        self.usage
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether `err` should be repaired by reconnecting.
    #[must_use]
    pub fn is_transient(&self, err: &DriverError) -> bool {
        match &self.opts.transient_override {
            Some(predicate) => predicate(err),
            None => err.is_transient(),
        }
    }

    /// Mark the start of a transaction. While the flag is set the
    /// connection is never transparently replaced.
    pub fn begin(&mut self) -> Result<(), SteadyDbError> {
        self.in_transaction = true;
        self.con.begin().map_err(SteadyDbError::Driver)
    }

    /// Commit the pending transaction.
    ///
    /// On a transient failure the dead connection is replaced *before* the
    /// error is re-raised, so no stale handle lingers; the caller must retry
    /// the unit of work.
    pub fn commit(&mut self) -> Result<(), SteadyDbError> {
        self.in_transaction = false;
        match self.con.commit() {
            Ok(()) => Ok(()),
            Err(err) if self.is_transient(&err) => {
                if let Ok(con) = fresh_raw(self.driver.as_ref(), &self.opts) {
                    self.adopt(con);
                    warn!(error = %err, "connection replaced after commit failure");
                }
                Err(SteadyDbError::TransientConnection(err))
            }
            Err(err) => Err(SteadyDbError::Driver(err)),
        }
    }

    /// Roll back the pending transaction, with the same replacement
    /// semantics as [`commit`](Self::commit).
    pub fn rollback(&mut self) -> Result<(), SteadyDbError> {
        self.in_transaction = false;
        match self.con.rollback() {
            Ok(()) => Ok(()),
            Err(err) if self.is_transient(&err) => {
                if let Ok(con) = fresh_raw(self.driver.as_ref(), &self.opts) {
                    self.adopt(con);
                    warn!(error = %err, "connection replaced after rollback failure");
                }
                Err(SteadyDbError::TransientConnection(err))
            }
            Err(err) => Err(SteadyDbError::Driver(err)),
        }
    }

    /// Verify liveness if `trigger` is in the configured ping policy.
    ///
    /// A dead connection found outside a transaction is replaced
    /// transparently. Inside a transaction the check only reports; swapping
    /// would corrupt transactional state. Returns `None` when no check ran.
    pub fn ping_check(&mut self, trigger: PingPolicy) -> Option<bool> {
        if self.ping_mask & trigger.bits() == 0 {
            return None;
        }
        let alive = match self.con.ping() {
            None => {
                // Driver cannot ping; stop asking.
                self.ping_mask = 0;
                return None;
            }
            Some(Ok(())) => true,
            Some(Err(_)) => false,
        };
        if !alive && !self.in_transaction {
            match fresh_raw(self.driver.as_ref(), &self.opts) {
                Ok(con) => {
                    self.adopt(con);
                    debug!("replaced dead connection after failed ping");
                    return Some(true);
                }
                Err(_) => return Some(false),
            }
        }
        Some(alive)
    }

    /// Reset for return to the pool: roll back when forced or when a
    /// transaction is open. Errors are deliberately swallowed; the
    /// connection is about to be cached or closed either way.
    pub fn reset(&mut self, force: bool) {
        if !self.closed && (force || self.in_transaction) {
            let _ = self.rollback();
        }
    }

    /// Close the physical connection. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.closed {
            self.con.close();
            self.in_transaction = false;
            self.closed = true;
        }
    }

    /// A raw cursor on this connection, with the max-usage guard and
    /// transparent reconnect.
    ///
    /// A connection past its usage budget (outside a transaction) is treated
    /// as a transient failure so it recycles here instead of limping on.
    pub fn raw_cursor(&mut self) -> Result<Box<dyn RawCursor>, SteadyDbError> {
        let transaction = self.in_transaction;
        if !transaction {
            self.ping_check(PingPolicy::ON_CURSOR);
        }
        let attempt = if self.usage_exceeded() && !transaction {
            Err(DriverError::operational("connection max usage reached"))
        } else {
            self.con.cursor()
        };
        match attempt {
            Ok(cursor) => Ok(cursor),
            Err(err) if self.is_transient(&err) => {
                if let Ok(mut con) = fresh_raw(self.driver.as_ref(), &self.opts) {
                    match con.cursor() {
                        Ok(cursor) => {
                            self.adopt(con);
                            if transaction {
                                return Err(self.surface(err));
                            }
                            debug!("connection replaced while opening cursor");
                            return Ok(cursor);
                        }
                        Err(_) => con.close(),
                    }
                }
                if transaction {
                    self.in_transaction = false;
                }
                Err(self.surface(err))
            }
            Err(err) => Err(SteadyDbError::Driver(err)),
        }
    }

    /// Cursor on the current raw connection only; no reconnect. Used by the
    /// steady cursor's first retry step.
    pub(crate) fn cursor_on_current(&mut self) -> Result<Box<dyn RawCursor>, DriverError> {
        if self.usage_exceeded() && !self.in_transaction {
            return Err(DriverError::operational("connection max usage reached"));
        }
        self.con.cursor()
    }

    /// Open a brand-new raw connection with this connection's options,
    /// without adopting it yet.
    pub(crate) fn create_raw(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        fresh_raw(self.driver.as_ref(), &self.opts)
    }

    /// Replace the underlying raw connection, resetting usage accounting
    /// and the transaction flag.
    pub(crate) fn adopt(&mut self, con: Box<dyn RawConnection>) {
        if !self.closed {
            self.con.close();
        }
        self.con = con;
        self.usage = 0;
        self.in_transaction = false;
        self.closed = false;
    }

    pub(crate) fn bump_usage(&mut self) {
        self.usage += 1;
    }

    pub(crate) fn usage_exceeded(&self) -> bool {
        self.opts.max_usage > 0 && self.usage >= self.opts.max_usage
    }

    pub(crate) fn set_in_transaction(&mut self, value: bool) {
        self.in_transaction = value;
    }

    pub(crate) fn surface(&self, err: DriverError) -> SteadyDbError {
        if self.is_transient(&err) {
            SteadyDbError::TransientConnection(err)
        } else {
            SteadyDbError::Driver(err)
        }
    }
}

impl Drop for SteadyConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect and run session preparation; closes the half-open connection if
/// preparation fails.
fn fresh_raw(
    driver: &dyn Driver,
    opts: &ConnectOptions,
) -> Result<Box<dyn RawConnection>, DriverError> {
    let mut con = driver.connect()?;
    if !opts.set_session.is_empty() {
        let prepared: Result<(), DriverError> = (|| {
            let mut cursor = con.cursor()?;
            for sql in &opts.set_session {
                cursor.execute(sql, &[])?;
            }
            cursor.close();
            Ok(())
        })();
        if let Err(err) = prepared {
            con.close();
            return Err(err);
        }
    }
    Ok(con)
}
