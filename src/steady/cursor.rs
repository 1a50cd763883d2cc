use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::driver::{DriverError, RawCursor};
use crate::error::SteadyDbError;
use crate::results::{ResultSet, Row};
use crate::steady::connection::{SteadyConnection, SteadyHandle};
use crate::steady::PingPolicy;
use crate::types::SqlValue;

/// A fault-tolerant cursor bound to one [`SteadyConnection`].
///
/// `execute` retries a classified transient failure at most twice: once with
/// a fresh cursor on the same connection, then once more after opening a
/// wholly new connection. Inside a transaction no retry happens; the
/// connection is replaced and the original error re-raised, so the (lost)
/// transaction never continues on a different session. Keep transactions
/// short to bound that data-loss window.
pub struct SteadyCursor {
    con: SteadyHandle,
    cursor: Box<dyn RawCursor>,
    input_sizes: Vec<usize>,
    output_sizes: Vec<(Option<usize>, usize)>,
}

impl SteadyCursor {
    /// Open a cursor on the given connection handle.
    pub fn new(con: SteadyHandle) -> Result<Self, SteadyDbError> {
        let cursor = con.lock().raw_cursor()?;
        Ok(Self {
            con,
            cursor,
            input_sizes: Vec::new(),
            output_sizes: Vec::new(),
        })
    }

    /// The handle of the owning connection.
    #[must_use]
    pub fn connection(&self) -> &SteadyHandle {
        &self.con
    }

    /// The SQL dialect of the owning connection's driver.
    #[must_use]
    pub fn dialect(&self) -> crate::driver::SqlDialect {
        self.con.lock().dialect()
    }

    /// Store input size hints, replayed if the cursor is replaced mid-retry.
    pub fn set_input_sizes(&mut self, sizes: Vec<usize>) {
        self.cursor.set_input_sizes(&sizes);
        self.input_sizes = sizes;
    }

    /// Store an output size hint, replayed if the cursor is replaced.
    pub fn set_output_size(&mut self, size: usize, column: Option<usize>) {
        self.cursor.set_output_size(size, column);
        self.output_sizes.push((column, size));
    }

    /// Execute a statement with positional parameters; returns rows
    /// affected. Each successful execution counts against the owning
    /// connection's usage budget.
    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SteadyDbError> {
        let handle = self.con.clone();
        let mut con = handle.lock();
        let transaction = con.in_transaction();
        if !transaction {
            con.ping_check(PingPolicy::ON_EXECUTE);
        }
        let attempt = if con.usage_exceeded() && !transaction {
            Err(DriverError::operational("connection max usage reached"))
        } else {
            self.cursor.execute(sql, params)
        };
        match attempt {
            Ok(affected) => {
                self.clear_sizes();
                con.bump_usage();
                Ok(affected)
            }
            Err(err) if con.is_transient(&err) => {
                self.recover(&mut con, sql, params, err, transaction)
            }
            Err(err) => Err(SteadyDbError::Driver(err)),
        }
    }

    /// Fetch all rows of the last executed statement. Pass-through: result
    /// iteration is never retried.
    pub fn fetch_all(&mut self) -> Result<Vec<Row>, SteadyDbError> {
        self.cursor.fetch_all().map_err(SteadyDbError::Driver)
    }

    /// Execute and fetch in one call, pairing the rows with the affected
    /// count.
    pub fn execute_fetch(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ResultSet, SteadyDbError> {
        let rows_affected = self.execute(sql, params)?;
        let rows = self.fetch_all()?;
        Ok(ResultSet {
            rows,
            rows_affected,
        })
    }

    /// Close the cursor. Safe to call more than once.
    pub fn close(&mut self) {
        self.cursor.close();
    }

    fn recover(
        &mut self,
        con: &mut MutexGuard<'_, SteadyConnection>,
        sql: &str,
        params: &[SqlValue],
        err: DriverError,
        transaction: bool,
    ) -> Result<u64, SteadyDbError> {
        if !transaction {
            // First retry: brand-new cursor on the same connection.
            if let Ok(mut cursor) = con.cursor_on_current() {
                self.apply_sizes(cursor.as_mut());
                match cursor.execute(sql, params) {
                    Ok(affected) => {
                        self.cursor.close();
                        self.cursor = cursor;
                        self.clear_sizes();
                        con.bump_usage();
                        debug!(error = %err, "statement retried on a fresh cursor");
                        return Ok(affected);
                    }
                    Err(_) => cursor.close(),
                }
            }
        }
        // Second retry: a wholly new connection.
        match con.create_raw() {
            Ok(mut raw) => match raw.cursor() {
                Ok(mut cursor) => {
                    if transaction {
                        // The transaction is lost; adopt the replacement but
                        // surface the original failure.
                        self.cursor.close();
                        con.adopt(raw);
                        self.cursor = cursor;
                        return Err(con.surface(err));
                    }
                    self.apply_sizes(cursor.as_mut());
                    match cursor.execute(sql, params) {
                        Ok(affected) => {
                            self.cursor.close();
                            con.adopt(raw);
                            self.cursor = cursor;
                            self.clear_sizes();
                            con.bump_usage();
                            warn!(error = %err, "statement recovered on a new connection");
                            Ok(affected)
                        }
                        Err(second) if second.class == err.class => {
                            // Same failure again: the replacement is no
                            // better, keep the original connection and error.
                            cursor.close();
                            raw.close();
                            Err(con.surface(err))
                        }
                        Err(second) => {
                            // A different failure on the new connection is
                            // the more informative one; adopt and raise it.
                            self.cursor.close();
                            con.adopt(raw);
                            self.cursor = cursor;
                            con.bump_usage();
                            Err(con.surface(second))
                        }
                    }
                }
                Err(_) => {
                    raw.close();
                    if transaction {
                        con.set_in_transaction(false);
                    }
                    Err(con.surface(err))
                }
            },
            Err(_) => {
                if transaction {
                    con.set_in_transaction(false);
                }
                Err(con.surface(err))
            }
        }
    }

    fn apply_sizes(&self, cursor: &mut dyn RawCursor) {
        if !self.input_sizes.is_empty() {
            cursor.set_input_sizes(&self.input_sizes);
        }
        for (column, size) in &self.output_sizes {
            cursor.set_output_size(*size, *column);
        }
    }

    fn clear_sizes(&mut self) {
        self.input_sizes.clear();
        self.output_sizes.clear();
    }
}

impl Drop for SteadyCursor {
    fn drop(&mut self) {
        self.close();
    }
}
