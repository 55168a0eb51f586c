//! # warden-store: Relational store contract
//!
//! The authorization engine needs very little from its backing store: read
//! rows, write rows, run one batched `UPDATE`, and scope multi-row writes in a
//! transaction. This crate defines that contract ([`Store`]) and ships two
//! implementations:
//!
//! - [`MemoryStore`]: in-process tables, snapshot transactions, fault hooks
//! - `DuckDbStore` (feature `duckdb`): embedded DuckDB over real SQL
//!
//! ## Transactions
//!
//! ```
//! use warden_store::{Filter, MemoryStore, Store, Transaction, Value, row};
//!
//! let store = MemoryStore::new().with_auto_increment("auth_rule");
//! let tx = Transaction::begin(&store)?;
//! let id = tx.store().insert("auth_rule", row([("rule", Value::from("user/edit"))]))?;
//! tx.commit()?;
//!
//! let found = store.find_one("auth_rule", &Filter::new().eq("id", id))?;
//! assert!(found.is_some());
//! # Ok::<(), warden_store::StoreError>(())
//! ```
//!
//! Dropping a [`Transaction`] without committing rolls it back.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod memory;
pub mod statement;

#[cfg(feature = "duckdb")]
pub mod duckdb;

#[cfg(feature = "duckdb")]
pub use self::duckdb::DuckDbStore;
pub use memory::{FailPoint, MemoryStore};
pub use statement::{CaseUpdate, CaseValue, FieldCase, SqlDialect};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a [`Store`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// `begin` was called while a transaction is already open.
    #[error("a transaction is already active")]
    TransactionActive,

    /// `commit` or `rollback` was called with no open transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// The table does not exist in this store.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The backend rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A failure injected through a test fault hook.
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Values and rows
// ============================================================================

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Integer view of the value. Numeric text is accepted because some
    /// backends hand back integer columns as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Float(_) | Value::Null => None,
        }
    }

    /// Unsigned integer view of the value.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality used by filters: numbers compare by value across int/float.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64 - b).abs() < f64::EPSILON
            }
            (Value::Int(a), Value::Bool(b)) | (Value::Bool(b), Value::Int(a)) => {
                *a == i64::from(*b)
            }
            _ => self == other,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A table row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Builds a [`Row`] from literal pairs.
pub fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ============================================================================
// Filters
// ============================================================================

/// A single filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field = value`
    Eq(String, Value),
    /// `field IN (values)`; matches nothing when `values` is empty.
    In(String, Vec<Value>),
}

impl Condition {
    /// Evaluates the condition against a row. Missing columns read as NULL.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Eq(field, expected) => row
                .get(field)
                .is_some_and(|actual| actual.loosely_equals(expected)),
            Condition::In(field, candidates) => row
                .get(field)
                .is_some_and(|actual| candidates.iter().any(|c| actual.loosely_equals(c))),
        }
    }
}

/// Conjunction of [`Condition`]s. The empty filter matches every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// The empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field = value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.into(), value.into()));
        self
    }

    /// Adds `field IN (values)`.
    pub fn is_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns whether every condition holds for `row`.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

// ============================================================================
// Store contract
// ============================================================================

/// Minimal transactional interface over a relational backend.
///
/// Implementations hold a single logical connection: `begin` opens a
/// transaction that every subsequent call participates in until `commit` or
/// `rollback`. Callers that mutate concurrently must serialise themselves.
///
/// Reads from other threads are not isolated from an open transaction: they
/// run on the same connection and see its uncommitted writes, including
/// writes that are later rolled back.
pub trait Store: Send + Sync {
    /// Returns the first row matching `filter`.
    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>>;

    /// Returns every row matching `filter`, projected to `fields`
    /// (all columns when `fields` is empty).
    fn find_all(&self, table: &str, filter: &Filter, fields: &[&str]) -> Result<Vec<Row>>;

    /// Inserts a row and returns its generated id, or `0` for tables
    /// without an auto-increment id.
    fn insert(&self, table: &str, row: Row) -> Result<u64>;

    /// Sets `fields` on every row matching `filter`. Returns matched rows.
    fn update(&self, table: &str, filter: &Filter, fields: &Row) -> Result<u64>;

    /// Deletes rows matching `filter`, at most `limit` of them.
    fn delete(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<u64>;

    /// Runs a batched conditional update in one round trip.
    fn execute(&self, statement: &CaseUpdate) -> Result<u64>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>> {
        (**self).find_one(table, filter)
    }

    fn find_all(&self, table: &str, filter: &Filter, fields: &[&str]) -> Result<Vec<Row>> {
        (**self).find_all(table, filter, fields)
    }

    fn insert(&self, table: &str, row: Row) -> Result<u64> {
        (**self).insert(table, row)
    }

    fn update(&self, table: &str, filter: &Filter, fields: &Row) -> Result<u64> {
        (**self).update(table, filter, fields)
    }

    fn delete(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<u64> {
        (**self).delete(table, filter, limit)
    }

    fn execute(&self, statement: &CaseUpdate) -> Result<u64> {
        (**self).execute(statement)
    }

    fn begin(&self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}

// ============================================================================
// Transaction guard
// ============================================================================

/// Scoped transaction.
///
/// [`commit`](Self::commit) and [`rollback`](Self::rollback) consume the
/// guard. A guard dropped while still open rolls the transaction back.
pub struct Transaction<'a, S: Store + ?Sized> {
    store: &'a S,
    open: bool,
}

impl<'a, S: Store + ?Sized> Transaction<'a, S> {
    /// Opens a transaction on `store`.
    pub fn begin(store: &'a S) -> Result<Self> {
        store.begin()?;
        Ok(Self { store, open: true })
    }

    /// The store the transaction runs on.
    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Commits. On failure the transaction is rolled back before the commit
    /// error is returned.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        match self.store.commit() {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback() {
                    warn!(error = %rollback_err, "Rollback after failed commit also failed");
                }
                Err(err)
            }
        }
    }

    /// Rolls back explicitly, surfacing any rollback error.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.store.rollback()
    }
}

impl<S: Store + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.store.rollback() {
                tracing::error!(error = %err, "Rollback of abandoned transaction failed");
            }
        }
    }
}
