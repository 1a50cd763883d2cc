//! The driver collaborator contract.
//!
//! Concrete database drivers live outside this crate. They plug in through
//! three narrow traits modeled on the DB-API surface (connect, cursor,
//! execute, commit, rollback, ping) plus an explicit capability descriptor:
//! every failure carries a [`FailureClass`] so the pool and steady layers can
//! decide whether reconnecting may recover it, without inspecting concrete
//! error types.

use std::sync::Arc;

use thiserror::Error;

use crate::results::Row;
use crate::types::SqlValue;

/// How a driver failure should be classified for recovery purposes.
///
/// The first three classes are the conventional "transient" set: the kind of
/// failure a dropped socket or a restarted server produces, recoverable by
/// reconnecting. The rest involve statement or data semantics and must never
/// be retried silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Failure related to the database's operation, e.g. a lost connection.
    Operational,
    /// Failure in the driver/database interface itself.
    Interface,
    /// Internal database error, e.g. an invalidated cursor.
    Internal,
    /// Constraint violation or other data-integrity failure.
    Integrity,
    /// Malformed statement, wrong parameter count, missing table.
    Programming,
    /// Problems with the processed data, e.g. division by zero.
    Data,
}

impl FailureClass {
    /// Whether reconnecting may recover from this failure.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureClass::Operational | FailureClass::Interface | FailureClass::Internal
        )
    }
}

/// A classified failure reported by the driver.
#[derive(Debug, Clone, Error)]
#[error("{class:?} failure: {message}")]
pub struct DriverError {
    pub class: FailureClass,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn operational(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Operational, message)
    }

    /// Whether this failure belongs to the default transient set.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class.is_transient()
    }
}

/// Optional override for the transient-failure classification, supplied
/// through the pool configuration when the driver's default set is not
/// sufficient.
pub type TransientPredicate = Arc<dyn Fn(&DriverError) -> bool + Send + Sync>;

/// DB-API style thread-safety levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadSafety {
    /// Threads may not share the module; the pool refuses to operate.
    Unsafe,
    /// Threads may share the module, but not connections.
    Module,
    /// Threads may share connections; required for shared leases.
    Connections,
    /// Threads may share connections and cursors.
    Cursors,
}

impl ThreadSafety {
    #[must_use]
    pub fn allows_pooling(self) -> bool {
        self > ThreadSafety::Unsafe
    }

    #[must_use]
    pub fn allows_sharing(self) -> bool {
        self >= ThreadSafety::Connections
    }
}

/// The parameterization and quoting conventions of the target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// PostgreSQL: quoted identifiers, `ilike`, `~` regex matching,
    /// sequence-generated primary keys, `returning` support.
    Postgres,
    /// Anything speaking plain `like`/`regexp` without the above.
    #[default]
    Generic,
}

impl SqlDialect {
    /// The identifier quote character, empty for engines quoted elsewhere.
    #[must_use]
    pub fn field_symbol(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "\"",
            SqlDialect::Generic => "",
        }
    }

    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        let symbol = self.field_symbol();
        format!("{symbol}{ident}{symbol}")
    }

    /// Substring matching folds to case-insensitive `ilike` on engines that
    /// have it.
    #[must_use]
    pub fn like_operator(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "ilike",
            SqlDialect::Generic => "like",
        }
    }

    #[must_use]
    pub fn regex_operator(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "~",
            SqlDialect::Generic => "regexp",
        }
    }

    #[must_use]
    pub fn not_regex_operator(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "!~",
            SqlDialect::Generic => "not regexp",
        }
    }

    /// Whether primary keys come from a `<table>_id_seq` sequence.
    #[must_use]
    pub fn supports_sequences(self) -> bool {
        matches!(self, SqlDialect::Postgres)
    }

    #[must_use]
    pub fn supports_returning(self) -> bool {
        matches!(self, SqlDialect::Postgres)
    }
}

/// One cursor on a raw driver connection.
pub trait RawCursor: Send {
    /// Execute a statement with positional parameters; returns rows affected.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DriverError>;

    /// Fetch all rows produced by the last executed statement.
    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError>;

    /// Input size hints, passed through to drivers that use them.
    fn set_input_sizes(&mut self, _sizes: &[usize]) {}

    /// Output size hint for one column (or all when `column` is None).
    fn set_output_size(&mut self, _size: usize, _column: Option<usize>) {}

    fn close(&mut self) {}
}

/// One raw driver connection.
pub trait RawConnection: Send {
    fn cursor(&mut self) -> Result<Box<dyn RawCursor>, DriverError>;

    /// Mark the start of a transaction. Drivers with implicit transaction
    /// boundaries may leave the default no-op.
    fn begin(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Liveness check. `None` means the driver does not support pinging;
    /// the steady layer then stops asking.
    fn ping(&mut self) -> Option<Result<(), DriverError>> {
        None
    }

    fn close(&mut self) {}
}

/// Factory for raw connections plus the driver's capability descriptor.
pub trait Driver: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RawConnection>, DriverError>;

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::Connections
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::default()
    }
}
