//! Typed rows.
//!
//! Rows are decoded once at the DAO boundary. The `pids` and `rules`
//! columns are parsed into [`AncestorChain`] and [`RuleGrant`] here and
//! rendered back only when written.

use serde::Serialize;
use warden_config::AuthConfig;
use warden_store::{Row, Value};
use warden_types::{AncestorChain, NodeId, RuleGrant, Status, UserId};

use crate::error::{RbacError, Result};
use crate::hierarchy::TreeNode;

fn malformed(table: &str, reason: impl Into<String>) -> RbacError {
    RbacError::MalformedRow {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn require<'r>(row: &'r Row, table: &str, field: &str) -> Result<&'r Value> {
    row.get(field)
        .ok_or_else(|| malformed(table, format!("missing column {field}")))
}

fn id_column(row: &Row, table: &str, field: &str) -> Result<u64> {
    let value = require(row, table, field)?;
    value
        .as_u64()
        .ok_or_else(|| malformed(table, format!("{field} is not an id: {value}")))
}

/// Optional text column; NULL and absent read as empty.
fn text_column(row: &Row, field: &str) -> String {
    match row.get(field) {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn status_column(row: &Row, table: &str, config: &AuthConfig) -> Result<Status> {
    let value = require(row, table, "status")?;
    let code = value
        .as_i64()
        .ok_or_else(|| malformed(table, format!("status is not an integer: {value}")))?;
    config
        .status_codes()
        .status(code)
        .map_err(|e| malformed(table, e.to_string()))
}

fn pids_column(row: &Row, table: &str) -> Result<AncestorChain> {
    AncestorChain::parse(&text_column(row, "pids")).map_err(|e| malformed(table, e.to_string()))
}

/// A permission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleNode {
    pub id: NodeId,
    pub pid: NodeId,
    pub pids: AncestorChain,
    pub title: String,
    /// Permission string, compared case-insensitively.
    pub rule: String,
    pub remark: String,
    pub status: Status,
}

impl RuleNode {
    pub fn from_row(row: &Row, config: &AuthConfig) -> Result<Self> {
        let table = config.rule_table.as_str();
        Ok(Self {
            id: NodeId::new(id_column(row, table, "id")?),
            pid: NodeId::new(id_column(row, table, "pid")?),
            pids: pids_column(row, table)?,
            title: text_column(row, "title"),
            rule: text_column(row, "rule"),
            remark: text_column(row, "remark"),
            status: status_column(row, table, config)?,
        })
    }
}

impl TreeNode for RuleNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn pid(&self) -> NodeId {
        self.pid
    }

    fn pids(&self) -> &AncestorChain {
        &self.pids
    }

    fn status(&self) -> Status {
        self.status
    }
}

/// A role (group) of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleNode {
    pub id: NodeId,
    pub pid: NodeId,
    pub pids: AncestorChain,
    pub title: String,
    pub rules: RuleGrant,
    pub status: Status,
}

impl RoleNode {
    pub fn from_row(row: &Row, config: &AuthConfig) -> Result<Self> {
        let table = config.role_table.as_str();
        let rules = RuleGrant::parse(&text_column(row, "rules"), &config.admin_mark)
            .map_err(|e| malformed(table, e.to_string()))?;
        Ok(Self {
            id: NodeId::new(id_column(row, table, "id")?),
            pid: NodeId::new(id_column(row, table, "pid")?),
            pids: pids_column(row, table)?,
            title: text_column(row, "title"),
            rules,
            status: status_column(row, table, config)?,
        })
    }
}

impl TreeNode for RoleNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn pid(&self) -> NodeId {
        self.pid
    }

    fn pids(&self) -> &AncestorChain {
        &self.pids
    }

    fn status(&self) -> Status {
        self.status
    }
}

/// "User `uid` holds role `gid`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AccessBinding {
    pub uid: UserId,
    pub gid: NodeId,
}

impl AccessBinding {
    pub fn from_row(row: &Row, config: &AuthConfig) -> Result<Self> {
        let table = config.access_table.as_str();
        Ok(Self {
            uid: UserId::new(id_column(row, table, "uid")?),
            gid: NodeId::new(id_column(row, table, "gid")?),
        })
    }
}
