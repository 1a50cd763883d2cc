use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SteadyDbError;
use crate::gateway::TableGateway;
use crate::steady::SteadyCursor;
use crate::types::SqlValue;

/// Static description of one table: name, primary keys, audit behavior and
/// insert defaults.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table: String,
    primary_keys: Vec<String>,
    /// Whether the table carries the audit quartet (`create_date`,
    /// `create_uid`, `write_date`, `write_uid`).
    log_fields: bool,
    /// Whether the primary key comes from a `<table>_id_seq` sequence on
    /// engines that support one.
    sequence_pk: bool,
    defaults: BTreeMap<String, SqlValue>,
}

impl TableSchema {
    /// A schema with primary key `id`, audit fields and a sequence-backed
    /// key; the common shape.
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            primary_keys: vec!["id".to_string()],
            log_fields: true,
            sequence_pk: true,
            defaults: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    #[must_use]
    pub fn without_log_fields(mut self) -> Self {
        self.log_fields = false;
        self
    }

    #[must_use]
    pub fn without_sequence(mut self) -> Self {
        self.sequence_pk = false;
        self
    }

    /// Value filled into inserts when the caller's payload omits the field.
    #[must_use]
    pub fn default_value(mut self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.defaults.insert(field.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn primary_key_list(&self) -> &[String] {
        &self.primary_keys
    }

    #[must_use]
    pub fn has_log_fields(&self) -> bool {
        self.log_fields
    }

    #[must_use]
    pub fn has_sequence_pk(&self) -> bool {
        self.sequence_pk
    }

    #[must_use]
    pub fn defaults(&self) -> &BTreeMap<String, SqlValue> {
        &self.defaults
    }
}

/// The known tables, looked up by name when building gateways.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl TableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. A second registration under the same name is
    /// ignored; the first one wins.
    pub fn register(&mut self, schema: TableSchema) {
        self.tables
            .entry(schema.table().to_string())
            .or_insert_with(|| Arc::new(schema));
    }

    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn get(&self, table: &str) -> Result<Arc<TableSchema>, SteadyDbError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| SteadyDbError::UnknownTable(table.to_string()))
    }

    /// Bind a registered table to a cursor, producing a gateway.
    pub fn gateway(
        &self,
        table: &str,
        cursor: SteadyCursor,
        audit_uid: i64,
    ) -> Result<TableGateway, SteadyDbError> {
        Ok(TableGateway::new(self.get(table)?, cursor, audit_uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let mut reg = TableRegistry::new();
        reg.register(TableSchema::new("orders"));
        reg.register(TableSchema::new("orders").without_log_fields());
        let schema = reg.get("orders").unwrap();
        assert!(schema.has_log_fields());
    }

    #[test]
    fn unknown_table_is_an_error() {
        let reg = TableRegistry::new();
        assert!(matches!(
            reg.get("missing"),
            Err(SteadyDbError::UnknownTable(_))
        ));
    }
}
