use std::collections::BTreeMap;
use std::sync::Arc;

use sql_steady::test_utils::{fatal_error, row, MockDriver, MockScript};
use sql_steady::{
    Condition, ConnectOptions, Entry, ExecStatus, FieldType, FieldTypeMap, QueryOptions,
    SqlDialect, SqlValue, SteadyConnection, SteadyCursor, SteadyDbError, TableGateway,
    TableRegistry, TableSchema,
};

fn registry() -> TableRegistry {
    let mut reg = TableRegistry::new();
    reg.register(TableSchema::new("orders"));
    reg.register(
        TableSchema::new("plain")
            .without_log_fields()
            .without_sequence(),
    );
    reg
}

fn gateway_on(script: &MockScript, dialect: SqlDialect, table: &str) -> TableGateway {
    let driver = Arc::new(MockDriver::new(script.clone()).with_dialect(dialect));
    let handle = SteadyConnection::open(driver, ConnectOptions::default())
        .unwrap()
        .into_handle();
    let cursor = SteadyCursor::new(handle).unwrap();
    registry().gateway(table, cursor, 7).unwrap()
}

fn open_condition() -> Condition {
    Condition::new(vec![Entry::cmp("=", "state", "open")]).unwrap()
}

#[test]
fn unknown_tables_are_refused() {
    let script = MockScript::new();
    let driver = Arc::new(MockDriver::new(script.clone()));
    let handle = SteadyConnection::open(driver, ConnectOptions::default())
        .unwrap()
        .into_handle();
    let cursor = SteadyCursor::new(handle).unwrap();
    assert!(matches!(
        registry().gateway("missing", cursor, 7),
        Err(SteadyDbError::UnknownTable(_))
    ));
}

#[test]
fn query_builds_a_parameterized_select() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["id"], vec![SqlValue::Int(1)])]);

    let rows = gw.query(&open_condition(), &QueryOptions::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        script.last_sql().as_deref(),
        Some(r#"select  *  from "orders" where 1 = 1 And ( "state" = %s )"#)
    );
    let executed = script.executed();
    assert_eq!(executed[0].params, vec![SqlValue::Text("open".into())]);
    assert_eq!(gw.state().status(), ExecStatus::Success);
}

#[test]
fn paginate_counts_then_fetches_one_page() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["row_count"], vec![SqlValue::Int(5)])]);
    script.push_result(vec![
        row(&["id"], vec![SqlValue::Int(3)]),
        row(&["id"], vec![SqlValue::Int(4)]),
    ]);

    let (total, rows) = gw
        .paginate(&open_condition(), 2, 2, &QueryOptions::default())
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(rows.len(), 2);
    let executed = script.executed();
    assert!(executed[0].sql.starts_with("select count(1) row_count from ("));
    assert!(executed[1].sql.ends_with("limit 2 offset 2"));
}

#[test]
fn paginate_falls_back_to_the_first_page() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["row_count"], vec![SqlValue::Int(3)])]);
    script.push_result(vec![row(&["id"], vec![SqlValue::Int(1)])]);

    let (total, _) = gw
        .paginate(&open_condition(), 9, 2, &QueryOptions::default())
        .unwrap();
    assert_eq!(total, 3);
    assert!(script.executed()[1].sql.ends_with("limit 2 offset 0"));
}

#[test]
fn paginate_with_a_huge_page_index_falls_back() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["row_count"], vec![SqlValue::Int(3)])]);
    script.push_result(vec![row(&["id"], vec![SqlValue::Int(1)])]);

    let (total, rows) = gw
        .paginate(&open_condition(), u64::MAX, 2, &QueryOptions::default())
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 1);
    assert!(script.executed()[1].sql.ends_with("limit 2 offset 0"));
}

#[test]
fn paginate_with_no_matches_stops_after_the_count() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["row_count"], vec![SqlValue::Int(0)])]);

    let (total, rows) = gw
        .paginate(&open_condition(), 1, 20, &QueryOptions::default())
        .unwrap();
    assert_eq!(total, 0);
    assert!(rows.is_empty());
    assert_eq!(script.executed().len(), 1);
}

#[test]
fn create_stamps_audit_columns_and_returns_keys() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(vec![row(&["id"], vec![SqlValue::Int(42)])]);

    let mut data = BTreeMap::new();
    data.insert("state".to_string(), SqlValue::Text("open".into()));
    let created = gw.create(&data).unwrap().unwrap();
    assert_eq!(created.get("id"), Some(&SqlValue::Int(42)));

    let sql = script.last_sql().unwrap();
    assert!(sql.starts_with(r#"Insert Into "orders""#));
    assert!(sql.contains("nextval('orders_id_seq')"));
    assert!(sql.contains(r#""create_uid""#));
    assert!(sql.ends_with(r#"returning "id""#));
    assert!(script.executed()[0]
        .params
        .contains(&SqlValue::Int(7)));
}

#[test]
fn create_no_log_skips_audit_columns() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_result(Vec::new());

    let mut data = BTreeMap::new();
    data.insert("state".to_string(), SqlValue::Text("open".into()));
    gw.create_no_log(&data).unwrap();
    let sql = script.last_sql().unwrap();
    assert!(!sql.contains("create_date"));
    assert!(!sql.contains("write_uid"));
}

#[test]
fn create_without_returning_support_yields_no_row() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Generic, "plain");

    let mut data = BTreeMap::new();
    data.insert("name".to_string(), SqlValue::Text("a".into()));
    let created = gw.create(&data).unwrap();
    assert!(created.is_none());
    assert!(!script.last_sql().unwrap().contains("returning"));
}

#[test]
fn batch_create_pages_the_insert() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_affected(2);
    script.push_affected(1);
    script.push_result(vec![
        row(&["id"], vec![SqlValue::Int(1)]),
        row(&["id"], vec![SqlValue::Int(2)]),
    ]);
    script.push_result(vec![row(&["id"], vec![SqlValue::Int(3)])]);

    let mut item = BTreeMap::new();
    item.insert("state".to_string(), SqlValue::Text("open".into()));
    let rows = vec![item.clone(), item.clone(), item];
    let created = gw.batch_create(&rows, 2, true).unwrap();
    assert_eq!(created.len(), 3);

    let executed = script.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].sql.matches("nextval").count(), 2);
    assert_eq!(executed[1].sql.matches("nextval").count(), 1);
}

#[test]
fn batch_create_with_mismatched_keys_fails_before_any_statement() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");

    let mut a = BTreeMap::new();
    a.insert("state".to_string(), SqlValue::Text("open".into()));
    let mut b = BTreeMap::new();
    b.insert("kind".to_string(), SqlValue::Text("x".into()));

    let err = gw.batch_create(&[a, b], 0, false).unwrap_err();
    assert!(matches!(err, SteadyDbError::Create(_)));
    assert!(script.executed().is_empty());
    assert_eq!(gw.state().status(), ExecStatus::Failure);
}

#[test]
fn write_with_no_matches_is_no_change_not_an_error() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.push_affected(0);

    let mut data = BTreeMap::new();
    data.insert("state".to_string(), SqlValue::Text("done".into()));
    gw.write(&data, &open_condition()).unwrap();
    assert_eq!(gw.state().status(), ExecStatus::NoChange);
}

#[test]
fn write_without_condition_is_refused() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");

    let mut data = BTreeMap::new();
    data.insert("state".to_string(), SqlValue::Text("done".into()));
    let err = gw.write(&data, &Condition::empty()).unwrap_err();
    assert!(matches!(err, SteadyDbError::NoCondition));
    assert!(script.executed().is_empty());
    assert_eq!(gw.state().status(), ExecStatus::Failure);
}

#[test]
fn batch_write_joins_through_a_typed_values_list() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");

    let mut item = BTreeMap::new();
    item.insert("id".to_string(), SqlValue::Int(1));
    item.insert("state".to_string(), SqlValue::Text("done".into()));
    let mut types = FieldTypeMap::new();
    types.insert("id".to_string(), FieldType::Int);

    gw.batch_write(&[item], &[], &[], &types).unwrap();
    let sql = script.last_sql().unwrap();
    assert!(sql.contains("from (values (%s::integer,"));
    assert!(sql.contains(r#"as dt ("id","state","write_date","write_uid")"#));
    assert!(sql.contains(r#""orders"."id" = dt."id""#));
}

#[test]
fn batch_write_with_mismatched_keys_fails_before_any_statement() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");

    let mut a = BTreeMap::new();
    a.insert("id".to_string(), SqlValue::Int(1));
    a.insert("state".to_string(), SqlValue::Text("done".into()));
    let mut b = BTreeMap::new();
    b.insert("id".to_string(), SqlValue::Int(2));

    let err = gw
        .batch_write(&[a, b], &[], &[], &FieldTypeMap::new())
        .unwrap_err();
    assert!(matches!(err, SteadyDbError::Update(_)));
    assert!(script.executed().is_empty());
    assert_eq!(gw.state().status(), ExecStatus::Failure);
}

#[test]
fn delete_without_condition_is_refused() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    let err = gw.delete(&Condition::empty()).unwrap_err();
    assert!(matches!(err, SteadyDbError::NoCondition));
    assert!(script.executed().is_empty());
}

#[test]
fn delete_builds_a_guarded_statement() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    gw.delete(&open_condition()).unwrap();
    assert_eq!(
        script.last_sql().as_deref(),
        Some(r#"delete from "orders" where 1 = 1 And ( "state" = %s )"#)
    );
}

#[test]
fn execution_failures_land_on_the_state() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Postgres, "orders");
    script.fail_next_execute(fatal_error());

    let err = gw
        .query(&open_condition(), &QueryOptions::default())
        .unwrap_err();
    assert!(matches!(err, SteadyDbError::QueryExecution(_)));
    assert_eq!(gw.state().status(), ExecStatus::Failure);
    assert!(gw.state().message().contains("statement:"));
}

#[test]
fn json_payloads_round_trip_as_text() {
    let script = MockScript::new();
    let mut gw = gateway_on(&script, SqlDialect::Generic, "plain");

    let mut data = BTreeMap::new();
    data.insert(
        "payload".to_string(),
        SqlValue::Json(serde_json::json!({"tags": ["a", "b"]})),
    );
    gw.create(&data).unwrap();
    let sent = &script.executed()[0].params[0];
    let parsed = sent.as_json().unwrap();
    assert_eq!(parsed["tags"][0], "a");
}
