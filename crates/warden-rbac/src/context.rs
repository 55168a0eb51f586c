//! State shared by the DAOs of one engine.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, Utc};
use tracing::error;
use warden_config::AuthConfig;
use warden_store::{Row, Store, Transaction, Value};
use warden_types::{NodeId, Status};

use crate::error::{RbacError, Result};
use crate::validate::ValidationPolicy;

/// Configuration, store handle and mutation lock, cloned into every DAO.
#[derive(Clone)]
pub(crate) struct DaoContext {
    pub(crate) config: Arc<AuthConfig>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) policy: ValidationPolicy,
    mutation_lock: Arc<Mutex<()>>,
}

impl DaoContext {
    pub(crate) fn new(config: Arc<AuthConfig>, store: Arc<dyn Store>) -> Self {
        let policy = ValidationPolicy::new(&config);
        Self {
            config,
            store,
            policy,
            mutation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn code(&self, status: Status) -> Value {
        Value::Int(self.config.status_codes().code(status))
    }

    /// Current time in the configured column format, or `None` when
    /// timestamps are off.
    pub(crate) fn now(&self) -> Option<Value> {
        if !self.config.write_time {
            return None;
        }
        Some(if self.config.time_format.is_empty() {
            Value::Int(Utc::now().timestamp())
        } else {
            Value::Text(Local::now().format(&self.config.time_format).to_string())
        })
    }

    /// Merges `ext` under `managed` and stamps timestamps. `ext` never
    /// carries the row id.
    pub(crate) fn row_for_insert(&self, ext: Row, managed: Row) -> Row {
        let mut row = ext;
        row.remove("id");
        row.extend(managed);
        if let Some(now) = self.now() {
            row.insert("create_time".to_string(), now.clone());
            row.insert("update_time".to_string(), now);
        }
        row
    }

    /// Like [`row_for_insert`](Self::row_for_insert), and `create_time` is
    /// left as stored.
    pub(crate) fn row_for_update(&self, ext: Row, managed: Row) -> Row {
        let mut row = ext;
        row.remove("id");
        row.remove("create_time");
        row.extend(managed);
        if let Some(now) = self.now() {
            row.insert("update_time".to_string(), now);
        }
        row
    }

    /// Adds `update_time` to every cascaded row.
    pub(crate) fn stamp(&self, changes: &mut [(NodeId, Row)]) {
        if let Some(now) = self.now() {
            for (_, row) in changes {
                row.insert("update_time".to_string(), now.clone());
            }
        }
    }

    /// Runs `op` while holding the mutation lock, outside any transaction.
    pub(crate) fn serialized<T>(&self, op: impl FnOnce(&dyn Store) -> Result<T>) -> Result<T> {
        let _guard = self
            .mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        op(self.store.as_ref())
    }

    /// Runs `op` in one transaction while holding the mutation lock.
    ///
    /// Commits on success. On failure rolls back and returns the original
    /// error; a failed commit or rollback becomes
    /// [`RbacError::TransactionFailed`].
    pub(crate) fn transaction<T>(&self, op: impl FnOnce(&dyn Store) -> Result<T>) -> Result<T> {
        self.serialized(|store| {
            let tx = Transaction::begin(store)?;
            match op(tx.store()) {
                Ok(value) => {
                    tx.commit()
                        .map_err(|source| RbacError::TransactionFailed { source })?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(source) = tx.rollback() {
                        error!(error = %source, cause = %err, "Rollback failed");
                        return Err(RbacError::TransactionFailed { source });
                    }
                    Err(err)
                }
            }
        })
    }
}
