use thiserror::Error;

use crate::driver::DriverError;

/// Unified error type for pool, steady-connection, and gateway operations.
#[derive(Debug, Error)]
pub enum SteadyDbError {
    /// The underlying driver reported a failure that is not handled
    /// internally (constraint violations, programming errors, and so on).
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A recoverable connection failure that survived the internal retry
    /// budget, or occurred while a transaction was open.
    #[error("transient connection failure: {0}")]
    TransientConnection(DriverError),

    /// The pool is at `max_connections` and `blocking` is disabled.
    #[error("connection pool at capacity ({0} connections)")]
    Capacity(usize),

    /// The driver declares insufficient thread-safety for pooled use.
    #[error("database driver is not thread-safe")]
    NotThreadSafe,

    /// The pool has been closed; no further leases can be handed out.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The condition tree is malformed; raised before any SQL is built.
    #[error("invalid query condition: {0}")]
    QueryCompile(String),

    /// A SELECT reached the database and failed.
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    /// An INSERT reached the database and failed, or inserted nothing.
    #[error("insert failed: {0}")]
    Create(String),

    /// An UPDATE reached the database and failed, or had an empty payload.
    #[error("update failed: {0}")]
    Update(String),

    /// A DELETE reached the database and failed.
    #[error("delete failed: {0}")]
    Delete(String),

    /// Update or delete attempted without a condition; always a caller bug.
    #[error("update/delete attempted without a condition")]
    NoCondition,

    /// Lookup of a table name that was never registered.
    #[error("no such table registered: {0}")]
    UnknownTable(String),

    /// Invalid pool or gateway configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
