//! In-process [`Store`] backed by ordered row vectors.
//!
//! `begin` snapshots every table; `rollback` restores the snapshot. Writes
//! inside a transaction go to the live tables, so concurrent readers see them
//! before commit. Tables
//! must be registered up front so that a misconfigured table name fails
//! loudly instead of reading as empty.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::statement::CaseValue;
use crate::{CaseUpdate, Filter, Result, Row, Store, StoreError, Value};

/// Operations that can be made to fail once for fault testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailPoint {
    Insert,
    Update,
    Delete,
    Execute,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    auto_increment: bool,
    last_id: u64,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
    armed: BTreeSet<FailPoint>,
}

impl State {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn trip(&mut self, point: FailPoint) -> Result<()> {
        if self.armed.remove(&point) {
            debug!(?point, "Injected store failure");
            return Err(StoreError::Injected(format!("{point:?}")));
        }
        Ok(())
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table whose rows carry caller-supplied keys.
    pub fn with_table(self, name: impl Into<String>) -> Self {
        self.lock().tables.entry(name.into()).or_default();
        self
    }

    /// Registers a table with a generated `id` column.
    pub fn with_auto_increment(self, name: impl Into<String>) -> Self {
        self.lock().tables.entry(name.into()).or_default().auto_increment = true;
        self
    }

    /// Makes the next call of `point` fail with [`StoreError::Injected`].
    pub fn fail_next(&self, point: FailPoint) {
        self.lock().armed.insert(point);
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.lock().table(table)?.rows.len())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn project(row: &Row, fields: &[&str]) -> Row {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .filter_map(|f| row.get(*f).map(|v| ((*f).to_string(), v.clone())))
        .collect()
}

impl Store for MemoryStore {
    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>> {
        let state = self.lock();
        Ok(state
            .table(table)?
            .rows
            .iter()
            .find(|r| filter.matches(r))
            .cloned())
    }

    fn find_all(&self, table: &str, filter: &Filter, fields: &[&str]) -> Result<Vec<Row>> {
        let state = self.lock();
        Ok(state
            .table(table)?
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| project(r, fields))
            .collect())
    }

    fn insert(&self, table: &str, mut row: Row) -> Result<u64> {
        let mut state = self.lock();
        state.trip(FailPoint::Insert)?;
        let t = state.table_mut(table)?;

        let id = if t.auto_increment {
            let id = match row.get("id").and_then(Value::as_u64) {
                Some(explicit) if explicit > 0 => explicit,
                _ => t.last_id + 1,
            };
            t.last_id = t.last_id.max(id);
            row.insert("id".to_string(), Value::from(id));
            id
        } else {
            0
        };

        trace!(table, id, "Inserted row");
        t.rows.push(row);
        Ok(id)
    }

    fn update(&self, table: &str, filter: &Filter, fields: &Row) -> Result<u64> {
        let mut state = self.lock();
        state.trip(FailPoint::Update)?;
        let t = state.table_mut(table)?;

        let mut matched = 0;
        for row in t.rows.iter_mut().filter(|r| filter.matches(r)) {
            for (k, v) in fields {
                row.insert(k.clone(), v.clone());
            }
            matched += 1;
        }
        Ok(matched)
    }

    fn delete(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<u64> {
        let mut state = self.lock();
        state.trip(FailPoint::Delete)?;
        let t = state.table_mut(table)?;

        let budget = limit.unwrap_or(usize::MAX);
        let mut removed = 0usize;
        t.rows.retain(|r| {
            if removed < budget && filter.matches(r) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }

    fn execute(&self, statement: &CaseUpdate) -> Result<u64> {
        let mut state = self.lock();
        state.trip(FailPoint::Execute)?;
        let t = state.table_mut(statement.table())?;

        let mut matched = 0;
        for row in &mut t.rows {
            let Some(id) = row.get("id").and_then(Value::as_u64) else {
                continue;
            };
            if !statement.ids().contains(&id) {
                continue;
            }
            for case in statement.fields() {
                if let Some(CaseValue::Set(value)) = case.value_for(id) {
                    row.insert(case.field.clone(), value.clone());
                }
            }
            matched += 1;
        }
        debug!(table = statement.table(), matched, "Executed batch update");
        Ok(matched)
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.lock();
        if state.snapshot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        if state.snapshot.is_none() {
            return Err(StoreError::NoTransaction);
        }
        state.trip(FailPoint::Commit)?;
        state.snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.lock();
        state.trip(FailPoint::Rollback)?;
        match state.snapshot.take() {
            Some(tables) => {
                state.tables = tables;
                Ok(())
            }
            None => Err(StoreError::NoTransaction),
        }
    }
}
