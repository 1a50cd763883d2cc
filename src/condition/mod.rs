//! Declarative query conditions.
//!
//! A [`Condition`] is an ordered sequence of entries: comparisons (against
//! one field or a list of alternative fields), unary null checks, OR
//! markers, and nested groups. Entries are validated on construction so a
//! malformed condition fails before any SQL is built, then compiled to a
//! parameterized fragment by [`compiler`]. Values always travel as
//! positional parameters, never interpolated into the statement text.

pub(crate) mod compiler;

use lazy_static::lazy_static;
use regex::Regex;

use crate::driver::SqlDialect;
use crate::error::SteadyDbError;
use crate::types::SqlValue;

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// The closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Substring match: the value is wrapped `%value%`.
    Like,
    ILike,
    /// Left-wildcard match: `%value`.
    LeftLike,
    /// Right-wildcard match: `value%`.
    RightLike,
    NotLike,
    NotILike,
    Regex,
    NotRegex,
    Null,
    NotNull,
    In,
    NotIn,
}

impl CmpOp {
    #[must_use]
    pub fn is_unary(self) -> bool {
        matches!(self, CmpOp::Null | CmpOp::NotNull)
    }
}

/// `in_or_*` tokens: a membership-or-comparison hybrid resolved against the
/// shape of the (comma-separated) value before compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InOrKind {
    Eq,
    Like,
    LeftLike,
    RightLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpToken {
    Plain(CmpOp),
    InOr(InOrKind),
}

/// Parse an operator token. Several legacy spellings are accepted for the
/// wildcard operators.
pub(crate) fn parse_op(token: &str) -> Option<OpToken> {
    let lowered = token.to_ascii_lowercase();
    let op = match lowered.as_str() {
        "=" => OpToken::Plain(CmpOp::Eq),
        "!=" => OpToken::Plain(CmpOp::Ne),
        ">" => OpToken::Plain(CmpOp::Gt),
        ">=" => OpToken::Plain(CmpOp::Ge),
        "<" => OpToken::Plain(CmpOp::Lt),
        "<=" => OpToken::Plain(CmpOp::Le),
        "like" => OpToken::Plain(CmpOp::Like),
        "ilike" => OpToken::Plain(CmpOp::ILike),
        "not like" => OpToken::Plain(CmpOp::NotLike),
        "not ilike" => OpToken::Plain(CmpOp::NotILike),
        "llike" | "l_like" | "prefix_like" => OpToken::Plain(CmpOp::LeftLike),
        "rlike" | "r_like" | "suffix_like" => OpToken::Plain(CmpOp::RightLike),
        "re" | "regular_exp" | "~" => OpToken::Plain(CmpOp::Regex),
        "not re" | "not regular_exp" | "!~" => OpToken::Plain(CmpOp::NotRegex),
        "null" => OpToken::Plain(CmpOp::Null),
        "not null" => OpToken::Plain(CmpOp::NotNull),
        "in" => OpToken::Plain(CmpOp::In),
        "not in" => OpToken::Plain(CmpOp::NotIn),
        "in_or_=" => OpToken::InOr(InOrKind::Eq),
        "in_or_like" => OpToken::InOr(InOrKind::Like),
        "in_or_llike" | "in_or_prefix_like" => OpToken::InOr(InOrKind::LeftLike),
        "in_or_rlike" | "in_or_suffix_like" => OpToken::InOr(InOrKind::RightLike),
        _ => return None,
    };
    Some(op)
}

/// One entry of a condition sequence.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Comparison of one or more alternative fields against a value.
    Cmp {
        op: String,
        fields: Vec<String>,
        value: SqlValue,
    },
    /// A null check on one or more alternative fields.
    Unary { op: String, fields: Vec<String> },
    /// Explicit OR marker; see the grouping rules on
    /// [`Condition::compile`].
    Or,
    /// A nested group, compiled as one parenthesized unit.
    Group(Vec<Entry>),
}

impl Entry {
    #[must_use]
    pub fn cmp(op: &str, field: &str, value: impl Into<SqlValue>) -> Self {
        Entry::Cmp {
            op: op.to_string(),
            fields: vec![field.to_string()],
            value: value.into(),
        }
    }

    /// A comparison over several alternative fields; compiles to an OR
    /// across the field list, nested inside the entry's own AND/OR context.
    #[must_use]
    pub fn cmp_any(op: &str, fields: &[&str], value: impl Into<SqlValue>) -> Self {
        Entry::Cmp {
            op: op.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn unary(op: &str, field: &str) -> Self {
        Entry::Unary {
            op: op.to_string(),
            fields: vec![field.to_string()],
        }
    }

    #[must_use]
    pub fn or() -> Self {
        Entry::Or
    }

    #[must_use]
    pub fn group(entries: Vec<Entry>) -> Self {
        Entry::Group(entries)
    }

    fn validate(&self) -> Result<(), SteadyDbError> {
        match self {
            Entry::Or => Ok(()),
            Entry::Group(entries) => {
                for entry in entries {
                    entry.validate()?;
                }
                Ok(())
            }
            Entry::Unary { op, fields } => {
                let parsed = parse_op(op)
                    .ok_or_else(|| SteadyDbError::QueryCompile(format!("unknown operator '{op}'")))?;
                match parsed {
                    OpToken::Plain(cmp) if cmp.is_unary() => validate_fields(fields),
                    _ => Err(SteadyDbError::QueryCompile(format!(
                        "operator '{op}' requires a value"
                    ))),
                }
            }
            Entry::Cmp { op, fields, value } => {
                let parsed = parse_op(op)
                    .ok_or_else(|| SteadyDbError::QueryCompile(format!("unknown operator '{op}'")))?;
                match parsed {
                    OpToken::Plain(cmp) if cmp.is_unary() => {
                        return Err(SteadyDbError::QueryCompile(format!(
                            "operator '{op}' takes no value"
                        )));
                    }
                    OpToken::Plain(CmpOp::In | CmpOp::NotIn) => {
                        if !matches!(value, SqlValue::Array(_) | SqlValue::Text(_)) {
                            return Err(SteadyDbError::QueryCompile(format!(
                                "operator '{op}' needs a list or comma-separated text value"
                            )));
                        }
                    }
                    OpToken::InOr(_) => {
                        if !matches!(value, SqlValue::Text(_)) {
                            return Err(SteadyDbError::QueryCompile(format!(
                                "operator '{op}' needs a comma-separated text value"
                            )));
                        }
                    }
                    OpToken::Plain(_) => {
                        if matches!(value, SqlValue::Array(_)) {
                            return Err(SteadyDbError::QueryCompile(format!(
                                "operator '{op}' takes a scalar value"
                            )));
                        }
                    }
                }
                validate_fields(fields)
            }
        }
    }
}

fn validate_fields(fields: &[String]) -> Result<(), SteadyDbError> {
    if fields.is_empty() {
        return Err(SteadyDbError::QueryCompile(
            "comparison entry without a field".to_string(),
        ));
    }
    for field in fields {
        validate_ident(field)?;
    }
    Ok(())
}

/// Reject anything that is not a bare identifier; field names are the only
/// caller-supplied text that lands in statement text rather than parameters.
pub(crate) fn validate_ident(ident: &str) -> Result<(), SteadyDbError> {
    if IDENT_RE.is_match(ident) {
        Ok(())
    } else {
        Err(SteadyDbError::QueryCompile(format!(
            "'{ident}' is not an identifier-safe field name"
        )))
    }
}

/// A validated sequence of condition entries.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    entries: Vec<Entry>,
}

impl Condition {
    /// Build a condition, validating every entry up front.
    pub fn new(entries: Vec<Entry>) -> Result<Self, SteadyDbError> {
        for entry in &entries {
            entry.validate()?;
        }
        Ok(Self { entries })
    }

    /// A condition that matches everything.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Append further entries (validated), e.g. standing permission filters.
    pub fn add_entries(&mut self, entries: Vec<Entry>) -> Result<(), SteadyDbError> {
        for entry in &entries {
            entry.validate()?;
        }
        self.entries.extend(entries);
        Ok(())
    }

    /// Compile to a SQL fragment plus its ordered parameter list.
    ///
    /// The fragment is designed to append after `where 1 = 1`. Grouping
    /// follows a left-to-right counter: the first OR marker opens a group
    /// absorbing the next two comparison entries, each further OR absorbs
    /// one more, and the group closes when the counter is exhausted.
    /// Comparisons outside any OR group each become their own conjoined
    /// `And (...)` clause. This absorption rule is a wire contract kept
    /// compatible across rewrites of the callers; do not "fix" it.
    pub fn compile(&self, dialect: SqlDialect) -> Result<(String, Vec<SqlValue>), SteadyDbError> {
        compiler::compile(&self.entries, dialect)
    }
}
