//! Rendering of condition entries into SQL text and parameters.

use crate::condition::{parse_op, CmpOp, Entry, InOrKind, OpToken};
use crate::driver::SqlDialect;
use crate::error::SteadyDbError;
use crate::types::SqlValue;

/// A resolved item: `in_or_*` hybrids are gone, every comparison carries a
/// concrete operator.
enum Item {
    Cmp {
        op: CmpOp,
        fields: Vec<String>,
        value: SqlValue,
    },
    Or,
    Group(Vec<Item>),
}

pub(crate) fn compile(
    entries: &[Entry],
    dialect: SqlDialect,
) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
    let items = resolve(entries)?;
    let mut sql = String::new();
    let mut params = Vec::new();
    render_items(&items, dialect, &mut sql, &mut params)?;
    Ok((sql, params))
}

/// Rewrite entries into concrete items. The `in_or_*` operators look at the
/// comma-separated value: a single element degrades to the base operator, a
/// multi-element `in_or_=` becomes a membership test, and the multi-element
/// wildcard forms expand into one comparison per element joined by OR
/// markers.
fn resolve(entries: &[Entry]) -> Result<Vec<Item>, SteadyDbError> {
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Entry::Or => items.push(Item::Or),
            Entry::Group(children) => items.push(Item::Group(resolve(children)?)),
            Entry::Unary { op, fields } => {
                let op = plain_op(op)?;
                items.push(Item::Cmp {
                    op,
                    fields: fields.clone(),
                    value: SqlValue::Null,
                });
            }
            Entry::Cmp { op, fields, value } => {
                let token = parse_op(op).ok_or_else(|| {
                    SteadyDbError::QueryCompile(format!("unknown operator '{op}'"))
                })?;
                match token {
                    OpToken::Plain(op) => items.push(Item::Cmp {
                        op,
                        fields: fields.clone(),
                        value: value.clone(),
                    }),
                    OpToken::InOr(kind) => {
                        let text = text_value(value, op)?;
                        let parts: Vec<String> =
                            text.split(',').map(|p| p.trim().to_string()).collect();
                        expand_in_or(kind, fields, parts, &mut items);
                    }
                }
            }
        }
    }
    Ok(items)
}

fn expand_in_or(kind: InOrKind, fields: &[String], parts: Vec<String>, items: &mut Vec<Item>) {
    if parts.len() > 1 && kind == InOrKind::Eq {
        items.push(Item::Cmp {
            op: CmpOp::In,
            fields: fields.to_vec(),
            value: SqlValue::Array(parts.into_iter().map(SqlValue::Text).collect()),
        });
        return;
    }
    let op = match kind {
        InOrKind::Eq => CmpOp::Eq,
        InOrKind::Like => CmpOp::Like,
        InOrKind::LeftLike => CmpOp::LeftLike,
        InOrKind::RightLike => CmpOp::RightLike,
    };
    for _ in 1..parts.len() {
        items.push(Item::Or);
    }
    for part in parts {
        items.push(Item::Cmp {
            op,
            fields: fields.to_vec(),
            value: SqlValue::Text(part),
        });
    }
}

fn plain_op(token: &str) -> Result<CmpOp, SteadyDbError> {
    match parse_op(token) {
        Some(OpToken::Plain(op)) => Ok(op),
        _ => Err(SteadyDbError::QueryCompile(format!(
            "unknown operator '{token}'"
        ))),
    }
}

/// The counter-driven grouping walk. Each OR marker bumps a pending counter
/// (by two for the first, one for each further marker); the first absorbed
/// comparison opens `And ((`, later ones continue with `Or (`, and the group
/// closes when the counter runs out. Comparisons outside a pending group are
/// plain `And (...)` clauses.
fn render_items(
    items: &[Item],
    dialect: SqlDialect,
    out: &mut String,
    params: &mut Vec<SqlValue>,
) -> Result<(), SteadyDbError> {
    let mut pending = 0usize;
    let mut in_group = false;
    for item in items {
        let body = match item {
            Item::Or => {
                pending += if pending == 0 { 2 } else { 1 };
                continue;
            }
            Item::Cmp { op, fields, value } => render_cmp(*op, fields, value, dialect, params)?,
            Item::Group(children) => {
                let mut inner = String::new();
                render_items(children, dialect, &mut inner, params)?;
                format!("1 = 1{inner}")
            }
        };
        if pending > 0 {
            out.push_str(if in_group { " Or (" } else { " And ((" });
            in_group = true;
        } else {
            out.push_str(" And (");
        }
        out.push_str(&body);
        out.push(')');
        if pending > 0 {
            pending -= 1;
            if pending == 0 {
                out.push(')');
                in_group = false;
            }
        }
    }
    // Trailing OR markers with too few comparisons still close their group.
    if in_group {
        out.push(')');
    }
    Ok(())
}

/// Render one comparison body. Multiple alternative fields become an OR over
/// the same test, and the parameter value is repeated once per field.
fn render_cmp(
    op: CmpOp,
    fields: &[String],
    value: &SqlValue,
    dialect: SqlDialect,
    params: &mut Vec<SqlValue>,
) -> Result<String, SteadyDbError> {
    let mut pieces = Vec::with_capacity(fields.len());
    for field in fields {
        let field = dialect.quote(field);
        let piece = match op {
            CmpOp::Eq | CmpOp::Ne | CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
                params.push(value.clone());
                format!(" {field} {} %s ", comparison_symbol(op))
            }
            CmpOp::Like | CmpOp::ILike => {
                params.push(wildcard(value, op, "%", "%")?);
                format!(" {field} {} %s ", dialect.like_operator())
            }
            CmpOp::NotLike | CmpOp::NotILike => {
                params.push(wildcard(value, op, "%", "%")?);
                format!(" {field} not {} %s ", dialect.like_operator())
            }
            CmpOp::LeftLike => {
                params.push(wildcard(value, op, "%", "")?);
                format!(" {field} {} %s ", dialect.like_operator())
            }
            CmpOp::RightLike => {
                params.push(wildcard(value, op, "", "%")?);
                format!(" {field} {} %s ", dialect.like_operator())
            }
            CmpOp::Regex => {
                params.push(value.clone());
                format!(" {field} {} %s ", dialect.regex_operator())
            }
            CmpOp::NotRegex => {
                params.push(value.clone());
                format!(" {field} {} %s ", dialect.not_regex_operator())
            }
            CmpOp::Null => format!(" {field} is null "),
            CmpOp::NotNull => format!(" {field} is not null "),
            CmpOp::In | CmpOp::NotIn => {
                let list = membership_list(value)?;
                let placeholders = vec!["%s"; list.len()].join(",");
                params.extend(list);
                let keyword = if op == CmpOp::In { "in" } else { "not in" };
                format!(" {field} {keyword} ({placeholders}) ")
            }
        };
        pieces.push(piece);
    }
    Ok(pieces.join(" or "))
}

fn comparison_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::Ne => "!=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        _ => unreachable!("not a plain comparison"),
    }
}

fn text_value(value: &SqlValue, op: &str) -> Result<String, SteadyDbError> {
    value.as_text().map(str::to_string).ok_or_else(|| {
        SteadyDbError::QueryCompile(format!(
            "operator '{op}' needs a comma-separated text value"
        ))
    })
}

fn wildcard(
    value: &SqlValue,
    op: CmpOp,
    before: &str,
    after: &str,
) -> Result<SqlValue, SteadyDbError> {
    let text = value.as_text().ok_or_else(|| {
        SteadyDbError::QueryCompile(format!("wildcard operator {op:?} needs a text value"))
    })?;
    Ok(SqlValue::Text(format!("{before}{text}{after}")))
}

/// Membership values: an explicit list, or comma-separated text split into
/// trimmed elements. An empty list never reaches the database.
fn membership_list(value: &SqlValue) -> Result<Vec<SqlValue>, SteadyDbError> {
    let list = match value {
        SqlValue::Array(items) => items.clone(),
        SqlValue::Text(text) => text
            .split(',')
            .map(|p| SqlValue::Text(p.trim().to_string()))
            .collect(),
        other => {
            return Err(SteadyDbError::QueryCompile(format!(
                "membership test needs a list or text value, got {other:?}"
            )));
        }
    };
    if list.is_empty() {
        return Err(SteadyDbError::QueryCompile(
            "membership test with an empty list".to_string(),
        ));
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use crate::condition::{Condition, Entry};
    use crate::driver::SqlDialect;
    use crate::types::SqlValue;

    fn compile(entries: Vec<Entry>) -> (String, Vec<SqlValue>) {
        Condition::new(entries)
            .unwrap()
            .compile(SqlDialect::Postgres)
            .unwrap()
    }

    #[test]
    fn plain_comparisons_conjoin() {
        let (sql, params) = compile(vec![
            Entry::cmp("=", "status", "open"),
            Entry::cmp(">", "age", 21i64),
        ]);
        assert_eq!(sql, r#" And ( "status" = %s ) And ( "age" > %s )"#);
        assert_eq!(
            params,
            vec![SqlValue::Text("open".into()), SqlValue::Int(21)]
        );
    }

    #[test]
    fn first_or_absorbs_two_comparisons() {
        let (sql, _) = compile(vec![
            Entry::or(),
            Entry::cmp("=", "a", 1i64),
            Entry::cmp("=", "b", 2i64),
            Entry::cmp("=", "c", 3i64),
        ]);
        assert_eq!(
            sql,
            r#" And (( "a" = %s ) Or ( "b" = %s )) And ( "c" = %s )"#
        );
    }

    #[test]
    fn each_further_or_absorbs_one_more() {
        let (sql, _) = compile(vec![
            Entry::or(),
            Entry::or(),
            Entry::cmp("=", "a", 1i64),
            Entry::cmp("=", "b", 2i64),
            Entry::cmp("=", "c", 3i64),
        ]);
        assert_eq!(
            sql,
            r#" And (( "a" = %s ) Or ( "b" = %s ) Or ( "c" = %s ))"#
        );
    }

    #[test]
    fn short_or_group_still_closes() {
        let (sql, _) = compile(vec![Entry::or(), Entry::cmp("=", "a", 1i64)]);
        assert_eq!(sql, r#" And (( "a" = %s ))"#);
    }

    #[test]
    fn field_alternatives_repeat_the_parameter() {
        let (sql, params) = compile(vec![Entry::cmp_any("like", &["name", "alias"], "bob")]);
        assert_eq!(
            sql,
            r#" And ( "name" ilike %s  or  "alias" ilike %s )"#
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("%bob%".into()),
                SqlValue::Text("%bob%".into())
            ]
        );
    }

    #[test]
    fn wildcard_variants() {
        let (sql, params) = compile(vec![
            Entry::cmp("llike", "path", "tmp"),
            Entry::cmp("rlike", "path", "tmp"),
            Entry::cmp("not like", "path", "tmp"),
        ]);
        assert_eq!(
            sql,
            r#" And ( "path" ilike %s ) And ( "path" ilike %s ) And ( "path" not ilike %s )"#
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("%tmp".into()),
                SqlValue::Text("tmp%".into()),
                SqlValue::Text("%tmp%".into())
            ]
        );
    }

    #[test]
    fn regex_operators_follow_the_dialect() {
        let (pg, _) = compile(vec![Entry::cmp("~", "name", "^a")]);
        assert_eq!(pg, r#" And ( "name" ~ %s )"#);
        let cond = Condition::new(vec![Entry::cmp("not re", "name", "^a")]).unwrap();
        let (generic, _) = cond.compile(SqlDialect::Generic).unwrap();
        assert_eq!(generic, " And ( name not regexp %s )");
    }

    #[test]
    fn null_checks_take_no_parameter() {
        let (sql, params) = compile(vec![
            Entry::unary("null", "deleted_at"),
            Entry::unary("not null", "create_uid"),
        ]);
        assert_eq!(
            sql,
            r#" And ( "deleted_at" is null ) And ( "create_uid" is not null )"#
        );
        assert!(params.is_empty());
    }

    #[test]
    fn membership_expands_placeholders() {
        let (sql, params) = compile(vec![Entry::cmp(
            "in",
            "id",
            SqlValue::Array(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]),
        )]);
        assert_eq!(sql, r#" And ( "id" in (%s,%s,%s) )"#);
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn membership_over_text_splits_on_commas() {
        let (sql, params) = compile(vec![Entry::cmp("not in", "state", "a, b,c")]);
        assert_eq!(sql, r#" And ( "state" not in (%s,%s,%s) )"#);
        assert_eq!(
            params,
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into()),
                SqlValue::Text("c".into())
            ]
        );
    }

    #[test]
    fn in_or_eq_degrades_on_a_single_element() {
        let (sql, params) = compile(vec![Entry::cmp("in_or_=", "state", "open")]);
        assert_eq!(sql, r#" And ( "state" = %s )"#);
        assert_eq!(params, vec![SqlValue::Text("open".into())]);
    }

    #[test]
    fn in_or_eq_becomes_membership_on_multiple_elements() {
        let (sql, params) = compile(vec![Entry::cmp("in_or_=", "state", "open,closed")]);
        assert_eq!(sql, r#" And ( "state" in (%s,%s) )"#);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn in_or_like_expands_into_an_or_group() {
        let (sql, params) = compile(vec![Entry::cmp("in_or_like", "name", "ann,bob")]);
        assert_eq!(
            sql,
            r#" And (( "name" ilike %s ) Or ( "name" ilike %s ))"#
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("%ann%".into()),
                SqlValue::Text("%bob%".into())
            ]
        );
    }

    #[test]
    fn groups_nest_with_their_own_counter() {
        let (sql, params) = compile(vec![
            Entry::cmp("=", "kind", "a"),
            Entry::group(vec![
                Entry::or(),
                Entry::cmp("=", "x", 1i64),
                Entry::cmp("=", "y", 2i64),
            ]),
        ]);
        assert_eq!(
            sql,
            r#" And ( "kind" = %s ) And (1 = 1 And (( "x" = %s ) Or ( "y" = %s )))"#
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn unknown_operator_is_rejected_up_front() {
        assert!(Condition::new(vec![Entry::cmp("<>", "a", 1i64)]).is_err());
    }

    #[test]
    fn unsafe_field_names_are_rejected() {
        assert!(Condition::new(vec![Entry::cmp("=", "a; drop table t", 1i64)]).is_err());
    }

    #[test]
    fn empty_membership_list_fails_to_compile() {
        let cond = Condition::new(vec![Entry::cmp("in", "id", SqlValue::Array(vec![]))]).unwrap();
        assert!(cond.compile(SqlDialect::Postgres).is_err());
    }
}
