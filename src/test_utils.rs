//! A scriptable in-memory driver for exercising the pool, steady and
//! gateway layers without a database. Enabled with the `test-utils`
//! feature.
//!
//! A [`MockScript`] is shared between the test and every connection/cursor
//! the [`MockDriver`] hands out: the test enqueues faults and result sets
//! up front, runs the code under test, then inspects the recorded
//! statements and connection counts.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{
    Driver, DriverError, FailureClass, RawConnection, RawCursor, SqlDialect, ThreadSafety,
};
use crate::results::Row;
use crate::types::SqlValue;

/// One statement as the mock cursor saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Default)]
struct ScriptState {
    connects: usize,
    open_connections: usize,
    closed_connections: usize,
    pings: usize,
    executed: Vec<ExecutedStatement>,
    connect_faults: VecDeque<DriverError>,
    cursor_faults: VecDeque<DriverError>,
    execute_faults: VecDeque<DriverError>,
    commit_faults: VecDeque<DriverError>,
    rollback_faults: VecDeque<DriverError>,
    ping_faults: VecDeque<DriverError>,
    results: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
}

/// Shared script and ledger behind a [`MockDriver`].
#[derive(Clone, Default)]
pub struct MockScript {
    state: Arc<Mutex<ScriptState>>,
}

impl MockScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connect(&self, err: DriverError) {
        self.state.lock().connect_faults.push_back(err);
    }

    pub fn fail_next_cursor(&self, err: DriverError) {
        self.state.lock().cursor_faults.push_back(err);
    }

    /// Queue a failure for the next `execute` call, on whichever cursor
    /// makes it.
    pub fn fail_next_execute(&self, err: DriverError) {
        self.state.lock().execute_faults.push_back(err);
    }

    pub fn fail_next_commit(&self, err: DriverError) {
        self.state.lock().commit_faults.push_back(err);
    }

    pub fn fail_next_rollback(&self, err: DriverError) {
        self.state.lock().rollback_faults.push_back(err);
    }

    pub fn fail_next_ping(&self, err: DriverError) {
        self.state.lock().ping_faults.push_back(err);
    }

    /// Queue the row set returned by the next `fetch_all`.
    pub fn push_result(&self, rows: Vec<Row>) {
        self.state.lock().results.push_back(rows);
    }

    /// Queue the rows-affected count of the next successful `execute`
    /// (defaults to 1 when the queue is empty).
    pub fn push_affected(&self, affected: u64) {
        self.state.lock().affected.push_back(affected);
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    #[must_use]
    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed_connections
    }

    #[must_use]
    pub fn pings(&self) -> usize {
        self.state.lock().pings
    }

    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.lock().executed.clone()
    }

    #[must_use]
    pub fn last_sql(&self) -> Option<String> {
        self.state
            .lock()
            .executed
            .last()
            .map(|stmt| stmt.sql.clone())
    }
}

/// A driver whose connections replay a [`MockScript`].
pub struct MockDriver {
    script: MockScript,
    thread_safety: ThreadSafety,
    dialect: SqlDialect,
    pingable: bool,
}

impl MockDriver {
    #[must_use]
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            thread_safety: ThreadSafety::Connections,
            dialect: SqlDialect::Postgres,
            pingable: true,
        }
    }

    #[must_use]
    pub fn with_thread_safety(mut self, thread_safety: ThreadSafety) -> Self {
        self.thread_safety = thread_safety;
        self
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Report no ping support, like drivers without a liveness check.
    #[must_use]
    pub fn without_ping(mut self) -> Self {
        self.pingable = false;
        self
    }
}

impl Driver for MockDriver {
    fn connect(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        let mut state = self.script.state.lock();
        if let Some(err) = state.connect_faults.pop_front() {
            return Err(err);
        }
        state.connects += 1;
        state.open_connections += 1;
        drop(state);
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
            pingable: self.pingable,
            closed: false,
        }))
    }

    fn thread_safety(&self) -> ThreadSafety {
        self.thread_safety
    }

    fn dialect(&self) -> SqlDialect {
        self.dialect
    }
}

struct MockConnection {
    script: MockScript,
    pingable: bool,
    closed: bool,
}

impl RawConnection for MockConnection {
    fn cursor(&mut self) -> Result<Box<dyn RawCursor>, DriverError> {
        if let Some(err) = self.script.state.lock().cursor_faults.pop_front() {
            return Err(err);
        }
        Ok(Box::new(MockCursor {
            script: self.script.clone(),
        }))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        match self.script.state.lock().commit_faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        match self.script.state.lock().rollback_faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ping(&mut self) -> Option<Result<(), DriverError>> {
        if !self.pingable {
            return None;
        }
        let mut state = self.script.state.lock();
        state.pings += 1;
        match state.ping_faults.pop_front() {
            Some(err) => Some(Err(err)),
            None => Some(Ok(())),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.script.state.lock();
            state.open_connections -= 1;
            state.closed_connections += 1;
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct MockCursor {
    script: MockScript,
}

impl RawCursor for MockCursor {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        let mut state = self.script.state.lock();
        if let Some(err) = state.execute_faults.pop_front() {
            return Err(err);
        }
        state.executed.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.affected.pop_front().unwrap_or(1))
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        Ok(self
            .script
            .state
            .lock()
            .results
            .pop_front()
            .unwrap_or_default())
    }
}

/// Build a row from column names and values.
#[must_use]
pub fn row(columns: &[&str], values: Vec<SqlValue>) -> Row {
    let names = Arc::new(columns.iter().map(|c| (*c).to_string()).collect::<Vec<_>>());
    Row::new(names, values)
}

/// A failure from the transient set, recoverable by reconnecting.
#[must_use]
pub fn transient_error() -> DriverError {
    DriverError::operational("server closed the connection unexpectedly")
}

/// A statement-semantics failure that must never be retried.
#[must_use]
pub fn fatal_error() -> DriverError {
    DriverError::new(FailureClass::Programming, "syntax error at or near")
}
