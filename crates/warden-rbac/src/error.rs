//! Error types for the authorization engine.

use std::collections::BTreeMap;

use thiserror::Error;
use warden_store::StoreError;
use warden_types::{NodeId, RuleGrant, UserId};

/// Errors raised by the DAOs and the engine.
#[derive(Debug, Error)]
pub enum RbacError {
    /// The engine was built without a store.
    #[error("Authorization engine is not initialized: {0}")]
    NotInitialized(String),

    /// No node with this id exists.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: NodeId },

    /// The requested parent does not exist.
    #[error("Parent {kind} {pid} not found")]
    ParentNotFound { kind: &'static str, pid: NodeId },

    /// An effective node was requested under an invalid parent.
    #[error("Parent {pid} is invalid, so the node must be invalid too")]
    InvalidStateConflict { pid: NodeId },

    /// A role asked for rules its parent does not hold.
    #[error("Rules [{excess}] exceed the grant of parent role {pid}")]
    UltraVires { pid: NodeId, excess: RuleGrant },

    /// A node cannot be enabled while an ancestor is invalid.
    #[error("Cannot enable {id}: ancestor {ancestor} is invalid")]
    AncestorInvalid { id: NodeId, ancestor: NodeId },

    /// A node cannot be moved under itself or its own subtree.
    #[error("Cannot move {id} under {pid}: {pid} is inside its subtree")]
    CyclicParent { id: NodeId, pid: NodeId },

    /// `check` received something other than a string or a list of strings.
    #[error("Unsupported rule type: {0}, expected a string or an array of strings")]
    UnsupportedRuleType(String),

    /// The user already holds the role.
    #[error("User {uid} is already bound to role {gid}")]
    DuplicateBinding { uid: UserId, gid: NodeId },

    /// The user does not hold the role.
    #[error("User {uid} is not bound to role {gid}")]
    BindingNotFound { uid: UserId, gid: NodeId },

    /// A change that would leave the binding as it is.
    #[error("No-op change: {0}")]
    NoOpChange(String),

    /// Request fields failed validation.
    #[error("Validation failed: {}", render_fields(.0))]
    ValidationFailed(BTreeMap<String, String>),

    /// Commit or rollback failed.
    #[error("Transaction failed: {source}")]
    TransactionFailed {
        #[source]
        source: StoreError,
    },

    /// Unknown DAO name.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A stored row could not be decoded.
    #[error("Malformed row in {table}: {reason}")]
    MalformedRow { table: String, reason: String },

    /// Any other store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RbacError {
    /// Single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        RbacError::ValidationFailed(BTreeMap::from([(field.into(), message.into())]))
    }

    /// Field messages of a [`RbacError::ValidationFailed`].
    pub fn field_errors(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            RbacError::ValidationFailed(fields) => Some(fields),
            _ => None,
        }
    }
}

fn render_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for RBAC operations.
pub type Result<T> = std::result::Result<T, RbacError>;
