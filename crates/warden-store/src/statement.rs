//! Batched conditional updates.
//!
//! A [`CaseUpdate`] rewrites several columns on several rows in a single
//! statement:
//!
//! ```sql
//! UPDATE `auth_role` SET
//!   `pids` = CASE `id` WHEN 6 THEN '0,5' WHEN 7 THEN '0,5' ELSE `pids` END,
//!   `status` = CASE `id` WHEN 6 THEN 0 WHEN 7 THEN `status` ELSE `status` END
//! WHERE `id` IN (6,7)
//! ```
//!
//! A [`CaseValue::Keep`] arm writes the column back onto itself, leaving the
//! stored value untouched for that row.

use std::fmt::{self, Display, Write as _};

use crate::Value;

/// SQL flavour used when rendering a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// Backtick identifiers, backslash-escaped string literals.
    #[default]
    MySql,
    /// Double-quoted identifiers, `''`-escaped string literals.
    Standard,
}

impl SqlDialect {
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
            SqlDialect::Standard => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn quote_str(self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + 2);
        out.push('\'');
        match self {
            SqlDialect::MySql => {
                for c in raw.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\0' => out.push_str("\\0"),
                        _ => out.push(c),
                    }
                }
            }
            SqlDialect::Standard => {
                for c in raw.chars() {
                    if c == '\'' {
                        out.push_str("''");
                    } else {
                        out.push(c);
                    }
                }
            }
        }
        out.push('\'');
        out
    }

    /// Renders a value as a SQL literal.
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_finite() => v.to_string(),
            Value::Float(_) => "NULL".to_string(),
            Value::Text(s) => self.quote_str(s),
        }
    }
}

/// Value of one `WHEN` arm.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseValue {
    Set(Value),
    /// Keep the row's current value.
    Keep,
}

impl From<Value> for CaseValue {
    fn from(value: Value) -> Self {
        CaseValue::Set(value)
    }
}

/// One `column = CASE id ... END` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCase {
    pub field: String,
    /// `(row id, value)` arms in output order.
    pub arms: Vec<(u64, CaseValue)>,
}

impl FieldCase {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            arms: Vec::new(),
        }
    }

    /// Adds an arm writing `value` to row `id`.
    pub fn set(mut self, id: u64, value: impl Into<Value>) -> Self {
        self.arms.push((id, CaseValue::Set(value.into())));
        self
    }

    /// Adds an arm leaving row `id` unchanged.
    pub fn keep(mut self, id: u64) -> Self {
        self.arms.push((id, CaseValue::Keep));
        self
    }

    /// The arm for `id`, if any.
    pub fn value_for(&self, id: u64) -> Option<&CaseValue> {
        self.arms
            .iter()
            .find(|(arm_id, _)| *arm_id == id)
            .map(|(_, v)| v)
    }
}

/// Multi-row, multi-column conditional update keyed on `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseUpdate {
    table: String,
    fields: Vec<FieldCase>,
    ids: Vec<u64>,
}

impl CaseUpdate {
    pub fn new(table: impl Into<String>, fields: Vec<FieldCase>, ids: Vec<u64>) -> Self {
        Self {
            table: table.into(),
            fields,
            ids,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldCase] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldCase> {
        self.fields.iter().find(|f| f.field == name)
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// A statement with no target rows or no columns changes nothing.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() || self.fields.is_empty()
    }

    /// Renders the statement as SQL text.
    pub fn to_sql(&self, dialect: SqlDialect) -> String {
        let id_col = dialect.quote_ident("id");
        let mut sql = format!("UPDATE {} SET ", dialect.quote_ident(&self.table));

        for (i, case) in self.fields.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let column = dialect.quote_ident(&case.field);
            let _ = write!(sql, "{column} = CASE {id_col}");
            for (id, value) in &case.arms {
                let rendered = match value {
                    CaseValue::Set(v) => dialect.literal(v),
                    CaseValue::Keep => column.clone(),
                };
                let _ = write!(sql, " WHEN {id} THEN {rendered}");
            }
            let _ = write!(sql, " ELSE {column} END");
        }

        let ids = self
            .ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let _ = write!(sql, " WHERE {id_col} IN ({ids})");
        sql
    }
}

impl Display for CaseUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql(SqlDialect::MySql))
    }
}
