//! SQL statement construction for the table gateway.
//!
//! Everything here is pure string/parameter assembly; nothing touches a
//! cursor. Caller payloads are `field -> value` maps, and every field name
//! is validated as a bare identifier before it lands in statement text.

use std::collections::BTreeMap;

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use crate::condition::{validate_ident, Condition};
use crate::driver::SqlDialect;
use crate::error::SteadyDbError;
use crate::gateway::schema::TableSchema;
use crate::types::SqlValue;

lazy_static! {
    /// Order-by clauses allow identifiers, quotes, dots, commas and
    /// whitespace; enough for `"a" desc, b.c` and nothing meaner.
    static ref ORDER_BY_RE: Regex = Regex::new(r#"^[A-Za-z0-9_".,\s]+$"#).unwrap();
}

/// Transport-bookkeeping fields stripped from every write payload.
const BOOKKEEPING_FIELDS: &[&str] = &["save_flag", "user_browser_tz"];

/// Diagnostic messages kept on the gateway state are capped at 1 MiB,
/// preserving the head and tail of oversized ones.
pub(crate) const MAX_DIAGNOSTIC_LEN: usize = 1024 * 1024;

/// Shaping knobs for [`build_select`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Columns to select; empty means `*`.
    pub fields: Vec<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Raw order-by clause, validated against a conservative charset.
    pub order_by: Option<String>,
    /// Wrap the query in `select count(1) count from (...) t`.
    pub count: bool,
    pub distinct: bool,
}

/// Column types that need an explicit cast in `values`-list updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    DateTime,
    Date,
    Json,
}

impl FieldType {
    fn sql_cast(self) -> &'static str {
        match self {
            FieldType::Int => "integer",
            FieldType::Float => "numeric",
            FieldType::Bool => "boolean",
            FieldType::DateTime => "timestamp",
            FieldType::Date => "date",
            FieldType::Json => "json",
        }
    }
}

/// Per-field cast declarations for [`build_batch_update`].
pub type FieldTypeMap = BTreeMap<String, FieldType>;

/// A statement executed in pages: `head` + N copies of `row_template`
/// (comma-joined) + `tail`, with one parameter group per row.
#[derive(Debug)]
pub(crate) struct BatchStatement {
    pub head: String,
    pub row_template: String,
    pub tail: String,
    pub rows: Vec<Vec<SqlValue>>,
}

impl BatchStatement {
    /// Render the statement text for a page of `rows` rows.
    pub fn sql_for(&self, rows: usize) -> String {
        let values = vec![self.row_template.as_str(); rows].join(",");
        format!("{}{}{}", self.head, values, self.tail)
    }
}

pub(crate) fn build_select(
    schema: &TableSchema,
    dialect: SqlDialect,
    condition: &Condition,
    opts: &QueryOptions,
) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
    let field_sql = select_field_sql(&opts.fields, opts.distinct, dialect)?;
    let (condition_sql, params) = condition.compile(dialect)?;
    let mut sql = format!(
        "select {field_sql} from {} where 1 = 1{condition_sql}",
        dialect.quote(schema.table())
    );
    if !opts.count {
        if let Some(order_by) = &opts.order_by {
            validate_order_by(order_by)?;
            sql.push_str(&format!(" Order By {order_by}"));
        }
    }
    if let Some(offset) = opts.offset {
        sql.push_str(&format!(" Offset {offset}"));
    }
    if let Some(limit) = opts.limit {
        sql.push_str(&format!(" Limit {limit}"));
    }
    if opts.count {
        sql = format!("select count(1) count from ({sql}) t");
    }
    Ok((sql, params))
}

fn select_field_sql(
    fields: &[String],
    distinct: bool,
    dialect: SqlDialect,
) -> Result<String, SteadyDbError> {
    if fields.is_empty() {
        return Ok(" * ".to_string());
    }
    let mut quoted = Vec::with_capacity(fields.len());
    for field in fields {
        validate_ident(field)?;
        quoted.push(dialect.quote(field));
    }
    let joined = quoted.join(",");
    if distinct {
        Ok(format!(" distinct {joined}"))
    } else {
        Ok(joined)
    }
}

fn validate_order_by(order_by: &str) -> Result<(), SteadyDbError> {
    if order_by.trim().is_empty() || !ORDER_BY_RE.is_match(order_by) {
        return Err(SteadyDbError::QueryCompile(format!(
            "unsafe order-by clause '{order_by}'"
        )));
    }
    Ok(())
}

pub(crate) fn build_insert(
    schema: &TableSchema,
    dialect: SqlDialect,
    data: &BTreeMap<String, SqlValue>,
    audit_uid: i64,
    log_fields: bool,
) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
    let data = prepare_insert_row(schema, data, audit_uid, log_fields);
    if data.is_empty() {
        return Err(SteadyDbError::Create("insert payload is empty".to_string()));
    }
    let mut columns = Vec::with_capacity(data.len() + 1);
    let mut placeholders = Vec::with_capacity(data.len() + 1);
    let mut params = Vec::with_capacity(data.len());
    if let Some(pk) = sequence_key(schema, dialect)? {
        columns.push(dialect.quote(pk));
        placeholders.push(format!("nextval('{}_id_seq')", schema.table()));
    }
    for (key, value) in &data {
        validate_ident(key)?;
        columns.push(dialect.quote(key));
        placeholders.push("%s".to_string());
        params.push(to_param(value));
    }
    let mut sql = format!(
        "Insert Into {} ({}) values ({})",
        dialect.quote(schema.table()),
        columns.join(","),
        placeholders.join(",")
    );
    sql.push_str(&returning_clause(schema, dialect));
    Ok((sql, params))
}

pub(crate) fn build_batch_insert(
    schema: &TableSchema,
    dialect: SqlDialect,
    rows: &[BTreeMap<String, SqlValue>],
    audit_uid: i64,
    log_fields: bool,
) -> Result<BatchStatement, SteadyDbError> {
    let prepared: Vec<_> = rows
        .iter()
        .map(|row| prepare_insert_row(schema, row, audit_uid, log_fields))
        .collect();
    let first = prepared
        .first()
        .filter(|row| !row.is_empty())
        .ok_or_else(|| SteadyDbError::Create("insert payload is empty".to_string()))?;
    let keys: Vec<String> = first.keys().cloned().collect();

    let mut columns = Vec::with_capacity(keys.len() + 1);
    let mut cells = Vec::with_capacity(keys.len() + 1);
    if let Some(pk) = sequence_key(schema, dialect)? {
        columns.push(dialect.quote(pk));
        cells.push(format!("nextval('{}_id_seq')", schema.table()));
    }
    for key in &keys {
        validate_ident(key)?;
        columns.push(dialect.quote(key));
        cells.push("%s".to_string());
    }
    let row_params = prepared
        .iter()
        .map(|row| keys.iter().map(|k| to_param(&row[k])).collect())
        .collect();
    Ok(BatchStatement {
        head: format!(
            "Insert Into {} ({}) values ",
            dialect.quote(schema.table()),
            columns.join(",")
        ),
        row_template: format!("({})", cells.join(",")),
        tail: returning_clause(schema, dialect),
        rows: row_params,
    })
}

pub(crate) fn build_update(
    schema: &TableSchema,
    dialect: SqlDialect,
    data: &BTreeMap<String, SqlValue>,
    condition: &Condition,
    audit_uid: i64,
    log_fields: bool,
) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
    if condition.is_empty() {
        return Err(SteadyDbError::NoCondition);
    }
    let data = prepare_update_row(schema, data, audit_uid, log_fields);
    if data.is_empty() {
        return Err(SteadyDbError::Update("no set item value".to_string()));
    }
    let mut set_parts = Vec::with_capacity(data.len());
    let mut params = Vec::with_capacity(data.len());
    for (key, value) in &data {
        validate_ident(key)?;
        set_parts.push(format!(" {} = %s ", dialect.quote(key)));
        params.push(to_param(value));
    }
    let (condition_sql, condition_params) = condition.compile(dialect)?;
    params.extend(condition_params);
    let sql = format!(
        "update {} set {} where 1 = 1{condition_sql}",
        dialect.quote(schema.table()),
        set_parts.join(",")
    );
    Ok((sql, params))
}

/// A many-row update through a `values` list joined back to the table. Rows
/// must share one key set; `condition_keys` (defaulting to the primary keys)
/// pick the join columns and the rest become set items, optionally narrowed
/// by `data_keys`.
pub(crate) fn build_batch_update(
    schema: &TableSchema,
    dialect: SqlDialect,
    rows: &[BTreeMap<String, SqlValue>],
    condition_keys: &[String],
    data_keys: &[String],
    field_type: &FieldTypeMap,
    audit_uid: i64,
    log_fields: bool,
) -> Result<BatchStatement, SteadyDbError> {
    let prepared: Vec<_> = rows
        .iter()
        .map(|row| prepare_update_row(schema, row, audit_uid, log_fields))
        .collect();
    let first = prepared
        .first()
        .filter(|row| !row.is_empty())
        .ok_or_else(|| SteadyDbError::Update("no set item value".to_string()))?;
    let keys: Vec<String> = first.keys().cloned().collect();

    let join_keys: Vec<String> = if condition_keys.is_empty() {
        schema.primary_key_list().to_vec()
    } else {
        condition_keys.to_vec()
    };

    let table = dialect.quote(schema.table());
    let mut set_parts = Vec::new();
    let mut where_parts = Vec::new();
    for key in &keys {
        validate_ident(key)?;
        let quoted = dialect.quote(key);
        if join_keys.contains(key) {
            where_parts.push(format!(" {table}.{quoted} = dt.{quoted} "));
        } else if data_keys.is_empty() || data_keys.contains(key) {
            set_parts.push(format!(" {quoted} = dt.{quoted} "));
        }
    }
    if set_parts.is_empty() {
        return Err(SteadyDbError::Update("no set item value".to_string()));
    }
    if where_parts.is_empty() {
        return Err(SteadyDbError::NoCondition);
    }

    let cells: Vec<String> = keys
        .iter()
        .map(|key| match field_type.get(key) {
            Some(ty) => format!("%s::{}", ty.sql_cast()),
            None => "%s".to_string(),
        })
        .collect();
    let columns: Vec<String> = keys.iter().map(|k| dialect.quote(k)).collect();
    let row_params = prepared
        .iter()
        .map(|row| keys.iter().map(|k| to_param(&row[k])).collect())
        .collect();
    Ok(BatchStatement {
        head: format!("update {table} set {} from (values ", set_parts.join(",")),
        row_template: format!("({})", cells.join(",")),
        tail: format!(
            ") as dt ({}) where 1 = 1 and {}",
            columns.join(","),
            where_parts.join(" And ")
        ),
        rows: row_params,
    })
}

pub(crate) fn build_delete(
    schema: &TableSchema,
    dialect: SqlDialect,
    condition: &Condition,
) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
    if condition.is_empty() {
        return Err(SteadyDbError::NoCondition);
    }
    let (condition_sql, params) = condition.compile(dialect)?;
    let sql = format!(
        "delete from {} where 1 = 1{condition_sql}",
        dialect.quote(schema.table())
    );
    Ok((sql, params))
}

fn sequence_key<'a>(
    schema: &'a TableSchema,
    dialect: SqlDialect,
) -> Result<Option<&'a str>, SteadyDbError> {
    if !(schema.has_sequence_pk() && dialect.supports_sequences()) {
        return Ok(None);
    }
    schema
        .primary_key_list()
        .first()
        .map(|pk| Some(pk.as_str()))
        .ok_or_else(|| {
            SteadyDbError::Config(format!(
                "table '{}' declares a sequence key but no primary key",
                schema.table()
            ))
        })
}

fn returning_clause(schema: &TableSchema, dialect: SqlDialect) -> String {
    if !dialect.supports_returning() || schema.primary_key_list().is_empty() {
        return String::new();
    }
    let keys: Vec<String> = schema
        .primary_key_list()
        .iter()
        .map(|k| dialect.quote(k))
        .collect();
    format!(" returning {}", keys.join(","))
}

/// Strip bookkeeping fields, fill insert defaults and stamp the full audit
/// quartet.
fn prepare_insert_row(
    schema: &TableSchema,
    data: &BTreeMap<String, SqlValue>,
    audit_uid: i64,
    log_fields: bool,
) -> BTreeMap<String, SqlValue> {
    let mut row = strip_bookkeeping(data);
    for (key, value) in schema.defaults() {
        row.entry(key.clone()).or_insert_with(|| value.clone());
    }
    if schema.has_log_fields() && log_fields {
        let now = Utc::now().naive_utc();
        row.insert("create_date".to_string(), SqlValue::Timestamp(now));
        row.insert("create_uid".to_string(), SqlValue::Int(audit_uid));
        row.insert("write_date".to_string(), SqlValue::Timestamp(now));
        row.insert("write_uid".to_string(), SqlValue::Int(audit_uid));
    }
    row
}

/// Strip bookkeeping fields and stamp the write-side audit pair.
fn prepare_update_row(
    schema: &TableSchema,
    data: &BTreeMap<String, SqlValue>,
    audit_uid: i64,
    log_fields: bool,
) -> BTreeMap<String, SqlValue> {
    let mut row = strip_bookkeeping(data);
    if schema.has_log_fields() && log_fields {
        row.insert(
            "write_date".to_string(),
            SqlValue::Timestamp(Utc::now().naive_utc()),
        );
        row.insert("write_uid".to_string(), SqlValue::Int(audit_uid));
    }
    row
}

fn strip_bookkeeping(data: &BTreeMap<String, SqlValue>) -> BTreeMap<String, SqlValue> {
    data.iter()
        .filter(|(key, _)| !BOOKKEEPING_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Structured values are serialized to text for the wire; everything else
/// passes through.
fn to_param(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Json(json) => SqlValue::Text(json.to_string()),
        other => other.clone(),
    }
}

/// Cap a diagnostic message, keeping its head and tail around an elision
/// marker. Cuts land on char boundaries.
pub(crate) fn truncate_message(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        return message.to_string();
    }
    const MARKER: &str = " ... ";
    let keep = limit.saturating_sub(MARKER.len());
    let mut head_end = keep / 2;
    while head_end > 0 && !message.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = message.len() - (keep - head_end);
    while tail_start < message.len() && !message.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!("{}{MARKER}{}", &message[..head_end], &message[tail_start..])
}
