//! Embedded DuckDB [`Store`].
//!
//! Statements are rendered with [`SqlDialect::Standard`] and values are bound
//! as positional parameters. Tables registered with
//! [`with_auto_increment`](DuckDbStore::with_auto_increment) must give `id` a
//! sequence default; inserts read the generated id back through `RETURNING`.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::types::{Value as DuckValue, ValueRef};
use duckdb::{Connection, params_from_iter};
use tracing::{debug, trace};

use crate::{CaseUpdate, Condition, Filter, Result, Row, SqlDialect, Store, StoreError, Value};

const DIALECT: SqlDialect = SqlDialect::Standard;

fn backend(err: duckdb::Error) -> StoreError {
    StoreError::Backend(format!("DuckDB error: {err}"))
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(v) => DuckValue::BigInt(*v),
        Value::Float(v) => DuckValue::Double(*v),
        Value::Text(s) => DuckValue::Text(s.clone()),
    }
}

fn from_duck(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::SmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::Int(i) => Value::Int(i64::from(i)),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => Value::Int(i as i64),
        ValueRef::UTinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::USmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::UInt(i) => Value::Int(i64::from(i)),
        ValueRef::UBigInt(i) => Value::Int(i as i64),
        ValueRef::Float(f) => Value::Float(f64::from(f)),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => Value::Text(d.to_string()),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
        _ => Value::Null,
    }
}

/// Renders `filter` as a `WHERE` clause, pushing bound values onto `params`.
fn where_clause(filter: &Filter, params: &mut Vec<DuckValue>) -> String {
    if filter.conditions().is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filter
        .conditions()
        .iter()
        .map(|condition| match condition {
            Condition::Eq(field, value) => {
                params.push(to_duck(value));
                format!("{} = ?", DIALECT.quote_ident(field))
            }
            Condition::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Condition::In(field, values) => {
                params.extend(values.iter().map(to_duck));
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} IN ({marks})", DIALECT.quote_ident(field))
            }
        })
        .collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// DuckDB-backed store over a single connection.
///
/// Every call shares that connection, so a read issued while another thread
/// holds a transaction open runs inside it and sees its uncommitted rows.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    auto_increment: BTreeSet<String>,
}

impl DuckDbStore {
    /// Opens an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
            auto_increment: BTreeSet::new(),
        })
    }

    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
            auto_increment: BTreeSet::new(),
        })
    }

    /// Marks `table` as having a generated `id`.
    pub fn with_auto_increment(mut self, table: impl Into<String>) -> Self {
        self.auto_increment.insert(table.into());
        self
    }

    /// Runs raw SQL, typically schema DDL.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn().execute_batch(sql).map_err(backend)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(&self, sql: &str, params: &[DuckValue]) -> Result<Vec<Row>> {
        trace!(sql, "DuckDB query");
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(backend)?;
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(backend)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(backend)? {
            let column_count = row.as_ref().column_count();
            let mut record = Row::new();
            for i in 0..column_count {
                let name = row.as_ref().column_name(i).map_err(backend)?.to_string();
                let value = row.get_ref(i).map_err(backend)?;
                record.insert(name, from_duck(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn run(&self, sql: &str, params: &[DuckValue]) -> Result<u64> {
        trace!(sql, "DuckDB statement");
        let changed = self
            .conn()
            .execute(sql, params_from_iter(params.iter()))
            .map_err(backend)?;
        Ok(changed as u64)
    }
}

impl Store for DuckDbStore {
    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT * FROM {}{} LIMIT 1",
            DIALECT.quote_ident(table),
            where_clause(filter, &mut params)
        );
        Ok(self.query(&sql, &params)?.into_iter().next())
    }

    fn find_all(&self, table: &str, filter: &Filter, fields: &[&str]) -> Result<Vec<Row>> {
        let columns = if fields.is_empty() {
            "*".to_string()
        } else {
            fields
                .iter()
                .map(|f| DIALECT.quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut params = Vec::new();
        let sql = format!(
            "SELECT {columns} FROM {}{} ORDER BY rowid",
            DIALECT.quote_ident(table),
            where_clause(filter, &mut params)
        );
        self.query(&sql, &params)
    }

    fn insert(&self, table: &str, row: Row) -> Result<u64> {
        let generated = self.auto_increment.contains(table);
        let quoted = DIALECT.quote_ident(table);

        let head = if row.is_empty() {
            format!("INSERT INTO {quoted} DEFAULT VALUES")
        } else {
            let columns = row
                .keys()
                .map(|k| DIALECT.quote_ident(k))
                .collect::<Vec<_>>()
                .join(", ");
            let marks = vec!["?"; row.len()].join(", ");
            format!("INSERT INTO {quoted} ({columns}) VALUES ({marks})")
        };
        let params: Vec<DuckValue> = row.values().map(to_duck).collect();

        if !generated {
            self.run(&head, &params)?;
            return Ok(0);
        }

        let sql = format!("{head} RETURNING {}", DIALECT.quote_ident("id"));
        let returned = self.query(&sql, &params)?;
        let id = returned
            .first()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Backend(format!("insert into {table} returned no id")))?;
        debug!(table, id, "Inserted row");
        Ok(id)
    }

    fn update(&self, table: &str, filter: &Filter, fields: &Row) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let assignments = fields
            .keys()
            .map(|k| format!("{} = ?", DIALECT.quote_ident(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<DuckValue> = fields.values().map(to_duck).collect();
        let sql = format!(
            "UPDATE {} SET {assignments}{}",
            DIALECT.quote_ident(table),
            where_clause(filter, &mut params)
        );
        self.run(&sql, &params)
    }

    fn delete(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<u64> {
        let quoted = DIALECT.quote_ident(table);
        let mut params = Vec::new();
        let predicate = where_clause(filter, &mut params);
        let sql = match limit {
            Some(n) => format!(
                "DELETE FROM {quoted} WHERE rowid IN (SELECT rowid FROM {quoted}{predicate} LIMIT {n})"
            ),
            None => format!("DELETE FROM {quoted}{predicate}"),
        };
        self.run(&sql, &params)
    }

    fn execute(&self, statement: &CaseUpdate) -> Result<u64> {
        if statement.is_empty() {
            return Ok(0);
        }
        let sql = statement.to_sql(DIALECT);
        let changed = self.run(&sql, &[])?;
        debug!(table = statement.table(), changed, "Executed batch update");
        Ok(changed)
    }

    fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN TRANSACTION")
    }

    fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::FieldCase;
    use crate::{Transaction, row};

    fn store() -> DuckDbStore {
        let store = DuckDbStore::open_in_memory()
            .unwrap()
            .with_auto_increment("nodes");
        store
            .execute_batch(
                "CREATE SEQUENCE nodes_id_seq START 1;
                 CREATE TABLE nodes (
                     id BIGINT PRIMARY KEY DEFAULT nextval('nodes_id_seq'),
                     name VARCHAR NOT NULL DEFAULT '',
                     status BIGINT NOT NULL DEFAULT 1
                 );",
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_returns_generated_ids() {
        let store = store();
        assert_eq!(store.insert("nodes", row([("name", Value::from("a"))])).unwrap(), 1);
        assert_eq!(store.insert("nodes", Row::new()).unwrap(), 2);

        let found = store
            .find_one("nodes", &Filter::new().eq("id", 1))
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], Value::from("a"));
        assert_eq!(found["status"], Value::Int(1));
    }

    #[test]
    fn filters_and_projection() {
        let store = store();
        for name in ["a", "b", "c"] {
            store.insert("nodes", row([("name", Value::from(name))])).unwrap();
        }

        let rows = store
            .find_all("nodes", &Filter::new().is_in("id", [1u64, 3]), &["name"])
            .unwrap();
        assert_eq!(
            rows,
            vec![row([("name", Value::from("a"))]), row([("name", Value::from("c"))])]
        );
        assert!(
            store
                .find_all("nodes", &Filter::new().is_in("id", Vec::<u64>::new()), &[])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn update_delete_and_batch() {
        let store = store();
        for name in ["a", "b", "c"] {
            store.insert("nodes", row([("name", Value::from(name))])).unwrap();
        }

        let stmt = CaseUpdate::new(
            "nodes",
            vec![FieldCase::new("name").set(1, "it's").keep(2)],
            vec![1, 2],
        );
        assert_eq!(store.execute(&stmt).unwrap(), 2);
        let one = store.find_one("nodes", &Filter::new().eq("id", 1)).unwrap().unwrap();
        assert_eq!(one["name"], Value::from("it's"));

        assert_eq!(
            store
                .update("nodes", &Filter::new().eq("id", 3), &row([("status", Value::Int(0))]))
                .unwrap(),
            1
        );
        assert_eq!(store.delete("nodes", &Filter::new(), Some(2)).unwrap(), 2);
        assert_eq!(store.find_all("nodes", &Filter::new(), &[]).unwrap().len(), 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = store();
        {
            let tx = Transaction::begin(&store).unwrap();
            tx.store().insert("nodes", Row::new()).unwrap();
        }
        assert!(store.find_all("nodes", &Filter::new(), &[]).unwrap().is_empty());
    }
}
