//! Role DAO.
//!
//! Besides the tree bookkeeping shared with rules, roles carry a rule grant
//! that must stay within the grant of their parent. An admin grant anywhere
//! above a role lifts that restriction for the whole subtree below it.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use warden_store::{Filter, Row, Store, Value};
use warden_types::{AncestorChain, NodeId, RuleGrant, Status};

use crate::context::DaoContext;
use crate::error::{RbacError, Result};
use crate::hierarchy::{Hierarchy, build_batch_update, pids_change};
use crate::node::RoleNode;
use crate::validate::{NewRole, RoleChanges, Validate, node_id};

const KIND: &str = "role";

/// Reads and writes the role table.
#[derive(Clone)]
pub struct RoleStore {
    ctx: DaoContext,
}

impl RoleStore {
    pub(crate) fn new(ctx: DaoContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.config.role_table
    }

    fn decode(&self, rows: Vec<Row>) -> Result<Vec<RoleNode>> {
        rows.iter()
            .map(|row| RoleNode::from_row(row, &self.ctx.config))
            .collect()
    }

    fn load(&self, store: &dyn Store) -> Result<Hierarchy<RoleNode>> {
        let rows = store.find_all(self.table(), &Filter::new(), &[])?;
        Ok(Hierarchy::new(self.decode(rows)?))
    }

    fn rules_column(&self, grant: &RuleGrant) -> Value {
        Value::from(grant.to_column(&self.ctx.config.admin_mark))
    }

    /// Fetches one role.
    pub fn get(&self, id: NodeId) -> Result<RoleNode> {
        self.ctx
            .store
            .find_one(self.table(), &Filter::new().eq("id", id.as_u64()))?
            .map(|row| RoleNode::from_row(&row, &self.ctx.config))
            .transpose()?
            .ok_or(RbacError::NotFound { kind: KIND, id })
    }

    /// Every role, in id order.
    pub fn all(&self) -> Result<Vec<RoleNode>> {
        let rows = self.ctx.store.find_all(self.table(), &Filter::new(), &[])?;
        let mut nodes = self.decode(rows)?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// Effective roles among `ids`.
    pub fn effective_by_ids(&self, ids: &BTreeSet<NodeId>) -> Result<Vec<RoleNode>> {
        let filter = Filter::new()
            .is_in("id", ids.iter().map(|id| id.as_u64()))
            .eq("status", self.ctx.code(Status::Effective));
        let rows = self.ctx.store.find_all(self.table(), &filter, &[])?;
        self.decode(rows)
    }

    /// A [`RoleChanges`] pre-filled from the stored role.
    pub fn edit(&self, id: NodeId) -> Result<RoleChanges> {
        let node = self.get(id)?;
        let admin_mark = &self.ctx.config.admin_mark;
        let rules = match &node.rules {
            RuleGrant::All => vec![admin_mark.clone()],
            RuleGrant::Ids(ids) => ids.iter().map(ToString::to_string).collect(),
        };
        Ok(RoleChanges {
            id: node.id.as_u64() as i64,
            pid: node.pid.as_u64() as i64,
            title: node.title,
            rules,
            status: self.ctx.config.status_codes().code(node.status),
            ext: Row::new(),
        })
    }

    /// Creates a role and returns its id.
    pub fn add(&self, request: NewRole) -> Result<NodeId> {
        request.validate(&self.ctx.policy)?;
        let pid = node_id(request.pid);
        let grant = self.ctx.policy.grant(&request.rules)?;
        let status = match request.status {
            Some(code) => self.ctx.policy.status(code)?,
            None => Status::Effective,
        };

        self.ctx.transaction(|store| {
            let pids = if pid.is_root() {
                AncestorChain::root()
            } else {
                let tree = self.load(store)?;
                let parent = tree
                    .get(pid)
                    .ok_or(RbacError::ParentNotFound { kind: KIND, pid })?;
                if parent.status == Status::Invalid && status == Status::Effective {
                    warn!(pid = %pid, "Rejected effective role under invalid parent");
                    return Err(RbacError::InvalidStateConflict { pid });
                }
                check_grant(&tree, pid, &grant)?;
                parent.pids.child_chain(pid)
            };

            let managed = Row::from([
                ("pid".to_string(), Value::from(pid.as_u64())),
                ("pids".to_string(), Value::from(pids.to_string())),
                ("title".to_string(), Value::from(request.title.as_str())),
                ("rules".to_string(), self.rules_column(&grant)),
                ("status".to_string(), self.ctx.code(status)),
            ]);
            let row = self.ctx.row_for_insert(request.ext.clone(), managed);
            let id = NodeId::new(store.insert(self.table(), row)?);
            info!(id = %id, pid = %pid, rules = %grant, "Role created");
            Ok(id)
        })
    }

    /// Replaces a role's fields, cascading to its subtree.
    ///
    /// On top of the `pids` and status cascades, a changed grant (or a new
    /// parent) narrows every descendant holding rules the role no longer
    /// holds down to the intersection with the role's new grant. Only an
    /// admin grant on the role itself skips narrowing.
    pub fn modify(&self, request: RoleChanges) -> Result<()> {
        request.validate(&self.ctx.policy)?;
        let id = node_id(request.id);
        let pid = node_id(request.pid);
        let grant = self.ctx.policy.grant(&request.rules)?;
        let status = self.ctx.policy.status(request.status)?;

        self.ctx.transaction(|store| {
            let tree = self.load(store)?;
            let current = tree
                .get(id)
                .ok_or(RbacError::NotFound { kind: KIND, id })?;

            let reparent = current.pid != pid;
            let pids = tree.plan_parent(id, pid, status, KIND)?;
            tree.check_enable(id, pid, current.status, status)?;

            let regrant = reparent || current.rules != grant;
            if regrant && !pid.is_root() {
                check_grant(&tree, pid, &grant)?;
            }

            let managed = Row::from([
                ("pid".to_string(), Value::from(pid.as_u64())),
                ("pids".to_string(), Value::from(pids.to_string())),
                ("title".to_string(), Value::from(request.title.as_str())),
                ("rules".to_string(), self.rules_column(&grant)),
                ("status".to_string(), self.ctx.code(status)),
            ]);
            let row = self.ctx.row_for_update(request.ext.clone(), managed);
            store.update(self.table(), &Filter::new().eq("id", id.as_u64()), &row)?;

            let mut changes: Vec<(NodeId, Row)> = Vec::new();
            if reparent {
                changes.extend(
                    tree.rewrite_pids(id, &pids)
                        .iter()
                        .map(|(child, chain)| pids_change(*child, chain)),
                );
            }
            let disabling = current.status == Status::Effective && status == Status::Invalid;
            if disabling {
                let invalid = self.ctx.code(Status::Invalid);
                changes.extend(tree.descendant_ids(id).into_iter().map(|child| {
                    (child, Row::from([("status".to_string(), invalid.clone())]))
                }));
            }
            let mut narrowed = 0usize;
            if regrant && !grant.is_all() {
                for child in tree.descendants(id) {
                    if child.rules.is_subset_of(&grant) {
                        continue;
                    }
                    let kept = child.rules.intersect(&grant);
                    changes.push((
                        child.id,
                        Row::from([("rules".to_string(), self.rules_column(&kept))]),
                    ));
                    narrowed += 1;
                }
            }
            self.ctx.stamp(&mut changes);

            if let Some(batch) = build_batch_update(self.table(), changes) {
                let affected = store.execute(&batch)?;
                debug!(id = %id, affected, narrowed, "Cascaded role changes");
            }

            info!(id = %id, reparent, disabling, narrowed, "Role modified");
            Ok(())
        })
    }
}

/// Whether the parent `pid` or any role above it holds the admin grant.
fn admin_above(tree: &Hierarchy<RoleNode>, pid: NodeId) -> bool {
    tree.lineage(pid).iter().any(|role| role.rules.is_all())
}

/// Rejects a grant exceeding the parent's, unless an admin sits above.
fn check_grant(tree: &Hierarchy<RoleNode>, pid: NodeId, grant: &RuleGrant) -> Result<()> {
    if admin_above(tree, pid) {
        return Ok(());
    }
    let parent = tree
        .get(pid)
        .ok_or(RbacError::ParentNotFound { kind: KIND, pid })?;
    let excess = match grant.excess_over(&parent.rules) {
        Some(ids) if ids.is_empty() => return Ok(()),
        Some(ids) => RuleGrant::Ids(ids),
        None => RuleGrant::All,
    };
    warn!(pid = %pid, excess = %excess, "Rejected grant beyond parent role");
    Err(RbacError::UltraVires { pid, excess })
}
