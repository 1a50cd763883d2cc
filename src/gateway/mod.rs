//! Table-level CRUD over a steady cursor.
//!
//! A [`TableGateway`] binds one registered [`TableSchema`] to a
//! [`SteadyCursor`] and exposes query, paginate and write operations that
//! build their SQL through [`statements`]. Every operation resets the
//! gateway's [`ExecutionState`] on entry and records the outcome, so a
//! caller can read one place for "did that change anything, and if not,
//! why".

pub mod schema;
mod statements;

pub use schema::{TableRegistry, TableSchema};
pub use statements::{FieldType, FieldTypeMap, QueryOptions};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::condition::Condition;
use crate::driver::SqlDialect;
use crate::error::SteadyDbError;
use crate::results::Row;
use crate::steady::SteadyCursor;
use crate::types::SqlValue;

use statements::{truncate_message, BatchStatement, MAX_DIAGNOSTIC_LEN};

/// Default page length for batched inserts and updates.
pub const DEFAULT_BATCH_PAGE: usize = 1000;

/// Outcome of the most recent gateway operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecStatus {
    #[default]
    Success,
    /// The statement ran but affected no rows.
    NoChange,
    Failure,
}

/// Sticky outcome record, reset at the start of every operation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    status: ExecStatus,
    message: String,
}

impl ExecutionState {
    fn reset(&mut self) {
        self.status = ExecStatus::Success;
        self.message.clear();
    }

    fn failure(&mut self, message: String) {
        self.status = ExecStatus::Failure;
        self.message = message;
    }

    fn no_change(&mut self, message: &str) {
        self.status = ExecStatus::NoChange;
        self.message = message.to_string();
    }

    #[must_use]
    pub fn status(&self) -> ExecStatus {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy)]
enum StatementKind {
    Query,
    Create,
    Update,
    Delete,
}

impl StatementKind {
    fn wrap(self, message: String) -> SteadyDbError {
        match self {
            StatementKind::Query => SteadyDbError::QueryExecution(message),
            StatementKind::Create => SteadyDbError::Create(message),
            StatementKind::Update => SteadyDbError::Update(message),
            StatementKind::Delete => SteadyDbError::Delete(message),
        }
    }
}

/// CRUD access to one table through a steady cursor.
pub struct TableGateway {
    schema: Arc<TableSchema>,
    cursor: SteadyCursor,
    dialect: SqlDialect,
    /// Stamped into the `create_uid`/`write_uid` audit columns.
    audit_uid: i64,
    state: ExecutionState,
}

impl TableGateway {
    #[must_use]
    pub fn new(schema: Arc<TableSchema>, cursor: SteadyCursor, audit_uid: i64) -> Self {
        let dialect = cursor.dialect();
        Self {
            schema,
            cursor,
            dialect,
            audit_uid,
            state: ExecutionState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Run a shaped select and fetch all rows.
    pub fn query(
        &mut self,
        condition: &Condition,
        opts: &QueryOptions,
    ) -> Result<Vec<Row>, SteadyDbError> {
        self.state.reset();
        let built = statements::build_select(&self.schema, self.dialect, condition, opts);
        let (sql, params) = self.guard(built)?;
        self.run(&sql, &params, StatementKind::Query)?;
        self.fetch(StatementKind::Query)
    }

    /// Run a paged select: first a wrapped count, then one page of rows.
    ///
    /// A `page_index` past the end falls back to the first page rather than
    /// returning nothing. Returns the total row count alongside the page.
    pub fn paginate(
        &mut self,
        condition: &Condition,
        page_index: u64,
        page_size: u64,
        opts: &QueryOptions,
    ) -> Result<(u64, Vec<Row>), SteadyDbError> {
        self.state.reset();
        if page_size == 0 {
            let err = Err(SteadyDbError::QueryCompile(
                "page_size must be nonzero".to_string(),
            ));
            return self.guard(err);
        }
        let base = QueryOptions {
            fields: opts.fields.clone(),
            order_by: opts.order_by.clone(),
            ..QueryOptions::default()
        };
        let built = statements::build_select(&self.schema, self.dialect, condition, &base);
        let (sql, params) = self.guard(built)?;

        let count_sql = format!("select count(1) row_count from ({sql}) t");
        self.run(&count_sql, &params, StatementKind::Query)?;
        let count_rows = self.fetch(StatementKind::Query)?;
        let row_count = count_rows
            .first()
            .and_then(|row| row.get("row_count"))
            .and_then(SqlValue::as_int)
            .copied()
            .unwrap_or(0)
            .max(0) as u64;
        if row_count == 0 {
            return Ok((0, Vec::new()));
        }

        let mut page_index = page_index.max(1);
        // An overflowing first-row offset is by definition past the end.
        let first_row = (page_index - 1).checked_mul(page_size);
        if first_row.is_none_or(|first| row_count <= first) {
            debug!(page_index, row_count, "page past the end, falling back to the first");
            page_index = 1;
        }
        let offset = (page_index - 1) * page_size;
        let page_sql = format!("select * from ({sql}) t limit {page_size} offset {offset}");
        self.run(&page_sql, &params, StatementKind::Query)?;
        let rows = self.fetch(StatementKind::Query)?;
        Ok((row_count, rows))
    }

    /// Insert one row, stamping audit columns. Returns the primary-key row
    /// on engines with `returning` support.
    pub fn create(
        &mut self,
        data: &BTreeMap<String, SqlValue>,
    ) -> Result<Option<Row>, SteadyDbError> {
        self.create_with(data, true)
    }

    /// Insert without stamping audit columns, for rows carried over from
    /// another system with their history intact.
    pub fn create_no_log(
        &mut self,
        data: &BTreeMap<String, SqlValue>,
    ) -> Result<Option<Row>, SteadyDbError> {
        self.create_with(data, false)
    }

    fn create_with(
        &mut self,
        data: &BTreeMap<String, SqlValue>,
        log_fields: bool,
    ) -> Result<Option<Row>, SteadyDbError> {
        self.state.reset();
        let built =
            statements::build_insert(&self.schema, self.dialect, data, self.audit_uid, log_fields);
        let (sql, params) = self.guard(built)?;
        let affected = self.run(&sql, &params, StatementKind::Create)?;
        if affected == 0 {
            let message = "no data add".to_string();
            self.state.failure(message.clone());
            return Err(SteadyDbError::Create(message));
        }
        if self.dialect.supports_returning() && !self.schema.primary_key_list().is_empty() {
            let rows = self.fetch(StatementKind::Create)?;
            return Ok(rows.into_iter().next());
        }
        Ok(None)
    }

    /// Insert many rows in pages of `page_size` (0 means one page). With
    /// `fetch` set, collects the returned primary-key rows.
    pub fn batch_create(
        &mut self,
        rows: &[BTreeMap<String, SqlValue>],
        page_size: usize,
        fetch: bool,
    ) -> Result<Vec<Row>, SteadyDbError> {
        self.state.reset();
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.check_uniform_keys(rows, StatementKind::Create)?;
        let built = statements::build_batch_insert(
            &self.schema,
            self.dialect,
            rows,
            self.audit_uid,
            true,
        );
        let batch = self.guard(built)?;
        let want_rows = fetch && !batch.tail.is_empty();
        let (affected, returned) = self.run_batch(&batch, page_size, StatementKind::Create, want_rows)?;
        if affected == 0 {
            let message = "no data add".to_string();
            self.state.failure(message.clone());
            return Err(SteadyDbError::Create(message));
        }
        Ok(returned)
    }

    /// Update rows matching `condition`, stamping the write-side audit
    /// columns. Affecting no rows is not an error; it lands in the
    /// execution state as [`ExecStatus::NoChange`].
    pub fn write(
        &mut self,
        data: &BTreeMap<String, SqlValue>,
        condition: &Condition,
    ) -> Result<(), SteadyDbError> {
        self.state.reset();
        let built = statements::build_update(
            &self.schema,
            self.dialect,
            data,
            condition,
            self.audit_uid,
            true,
        );
        let (sql, params) = self.guard(built)?;
        let affected = self.run(&sql, &params, StatementKind::Update)?;
        if affected == 0 {
            self.state.no_change("no rows updated");
        }
        Ok(())
    }

    /// Update many rows in one statement through a `values` list joined on
    /// `condition_keys` (the primary keys when empty). `data_keys` narrows
    /// the set columns; `field_type` adds the casts the `values` list needs.
    pub fn batch_write(
        &mut self,
        rows: &[BTreeMap<String, SqlValue>],
        condition_keys: &[String],
        data_keys: &[String],
        field_type: &FieldTypeMap,
    ) -> Result<(), SteadyDbError> {
        self.state.reset();
        if rows.is_empty() {
            return Ok(());
        }
        self.check_uniform_keys(rows, StatementKind::Update)?;
        let built = statements::build_batch_update(
            &self.schema,
            self.dialect,
            rows,
            condition_keys,
            data_keys,
            field_type,
            self.audit_uid,
            true,
        );
        let batch = self.guard(built)?;
        let (affected, _) =
            self.run_batch(&batch, DEFAULT_BATCH_PAGE, StatementKind::Update, false)?;
        if affected == 0 {
            self.state.no_change("no rows updated");
        }
        Ok(())
    }

    /// Delete rows matching `condition`; an empty condition is refused.
    pub fn delete(&mut self, condition: &Condition) -> Result<(), SteadyDbError> {
        self.state.reset();
        let built = statements::build_delete(&self.schema, self.dialect, condition);
        let (sql, params) = self.guard(built)?;
        let affected = self.run(&sql, &params, StatementKind::Delete)?;
        if affected == 0 {
            self.state.no_change("no rows deleted");
        }
        Ok(())
    }

    /// Record a build failure on the execution state before propagating it.
    fn guard<T>(&mut self, result: Result<T, SteadyDbError>) -> Result<T, SteadyDbError> {
        if let Err(err) = &result {
            self.state
                .failure(truncate_message(&err.to_string(), MAX_DIAGNOSTIC_LEN));
        }
        result
    }

    fn run(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        kind: StatementKind,
    ) -> Result<u64, SteadyDbError> {
        match self.cursor.execute(sql, params) {
            Ok(affected) => Ok(affected),
            Err(err) => {
                let message =
                    truncate_message(&format!("{err}; statement: {sql}"), MAX_DIAGNOSTIC_LEN);
                self.state.failure(message.clone());
                Err(kind.wrap(message))
            }
        }
    }

    fn fetch(&mut self, kind: StatementKind) -> Result<Vec<Row>, SteadyDbError> {
        match self.cursor.fetch_all() {
            Ok(rows) => Ok(rows),
            Err(err) => {
                let message = truncate_message(&err.to_string(), MAX_DIAGNOSTIC_LEN);
                self.state.failure(message.clone());
                Err(kind.wrap(message))
            }
        }
    }

    fn run_batch(
        &mut self,
        batch: &BatchStatement,
        page_size: usize,
        kind: StatementKind,
        fetch: bool,
    ) -> Result<(u64, Vec<Row>), SteadyDbError> {
        let page_size = if page_size == 0 {
            batch.rows.len()
        } else {
            page_size
        };
        let mut affected = 0u64;
        let mut returned = Vec::new();
        for page in batch.rows.chunks(page_size) {
            let sql = batch.sql_for(page.len());
            let params: Vec<SqlValue> = page.iter().flatten().cloned().collect();
            affected += self.run(&sql, &params, kind)?;
            if fetch {
                returned.extend(self.fetch(kind)?);
            }
        }
        Ok((affected, returned))
    }

    /// Mismatched key sets would silently misalign the shared row template;
    /// refuse them before any statement is built.
    fn check_uniform_keys(
        &mut self,
        rows: &[BTreeMap<String, SqlValue>],
        kind: StatementKind,
    ) -> Result<(), SteadyDbError> {
        let first = &rows[0];
        if rows
            .iter()
            .any(|row| row.len() != first.len() || !row.keys().eq(first.keys()))
        {
            let message = "batch rows have mismatched keys".to_string();
            self.state.failure(message.clone());
            return Err(kind.wrap(message));
        }
        Ok(())
    }
}
