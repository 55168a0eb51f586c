//! # warden-rbac: Hierarchical role-based access control
//!
//! Permission rules and roles each form a tree stored in one table, with a
//! denormalised `pids` ancestor chain on every row. Users hold roles through
//! an access table. The [`AuthorizationEngine`] resolves what a user may do
//! and answers permission checks.
//!
//! ## Invariants kept by the DAOs
//!
//! - A node's `pids` is its parent's `pids` with the parent id appended.
//! - Disabling a node disables its whole subtree in the same transaction.
//! - A node can only be enabled while every ancestor is effective.
//! - A role's rules stay within its parent's rules, unless a role above it
//!   holds the admin mark. Narrowing a role narrows its subtree.
//!
//! Cascades are written with one batched `CASE` update per operation.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_config::AuthConfig;
//! use warden_rbac::{AuthorizationEngine, BindAccess, NewRole, NewRule, Relation, schema};
//!
//! let config = AuthConfig::default();
//! let store = Arc::new(schema::memory_store(&config));
//! let engine = AuthorizationEngine::new(config, store)?;
//!
//! let edit = engine.rules().add(NewRule::new("Edit users", "user/edit"))?;
//! let role = engine.roles().add(NewRole::new("Editors", [edit]))?;
//! engine.access().bind(BindAccess::new(10u64, role))?;
//!
//! assert!(engine.check("User/Edit", 10u64, Relation::Any)?);
//! assert!(!engine.check(["user/edit", "user/delete"], 10u64, Relation::All)?);
//! # Ok::<(), warden_rbac::RbacError>(())
//! ```

pub mod access;
pub mod audit;
mod context;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod node;
pub mod role;
pub mod rule;
pub mod schema;
pub mod validate;


pub use access::AccessStore;
pub use audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};
pub use engine::{AuthorizationEngine, Dao, DaoKind, EngineBuilder, Relation, RuleQuery};
pub use error::{RbacError, Result};
pub use hierarchy::{Hierarchy, TreeNode, build_batch_update};
pub use node::{AccessBinding, RoleNode, RuleNode};
pub use role::RoleStore;
pub use rule::RuleStore;
pub use validate::{
    BindAccess, ChangeAccess, NewRole, NewRule, RoleChanges, RuleChanges, UnbindAccess, Validate,
    ValidationPolicy,
};

pub use warden_config::AuthConfig;
pub use warden_types::{AncestorChain, NodeId, RuleGrant, Status, UserId};
