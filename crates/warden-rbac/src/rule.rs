//! Permission rule DAO.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use warden_store::{Filter, Row, Store, Value};
use warden_types::{AncestorChain, NodeId, Status};

use crate::context::DaoContext;
use crate::error::{RbacError, Result};
use crate::hierarchy::{Hierarchy, build_batch_update, pids_change};
use crate::node::RuleNode;
use crate::validate::{NewRule, RuleChanges, Validate, node_id};

const KIND: &str = "rule";

/// Reads and writes the rule table.
#[derive(Clone)]
pub struct RuleStore {
    ctx: DaoContext,
}

impl RuleStore {
    pub(crate) fn new(ctx: DaoContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.config.rule_table
    }

    fn decode(&self, rows: Vec<Row>) -> Result<Vec<RuleNode>> {
        rows.iter()
            .map(|row| RuleNode::from_row(row, &self.ctx.config))
            .collect()
    }

    fn find(&self, store: &dyn Store, id: NodeId) -> Result<Option<RuleNode>> {
        store
            .find_one(self.table(), &Filter::new().eq("id", id.as_u64()))?
            .map(|row| RuleNode::from_row(&row, &self.ctx.config))
            .transpose()
    }

    fn load(&self, store: &dyn Store) -> Result<Hierarchy<RuleNode>> {
        let rows = store.find_all(self.table(), &Filter::new(), &[])?;
        Ok(Hierarchy::new(self.decode(rows)?))
    }

    /// Fetches one rule.
    pub fn get(&self, id: NodeId) -> Result<RuleNode> {
        self.find(self.ctx.store.as_ref(), id)?
            .ok_or(RbacError::NotFound { kind: KIND, id })
    }

    /// Every rule, in id order.
    pub fn all(&self) -> Result<Vec<RuleNode>> {
        let rows = self.ctx.store.find_all(self.table(), &Filter::new(), &[])?;
        let mut nodes = self.decode(rows)?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// Direct children of `id`.
    pub fn children(&self, id: NodeId) -> Result<Vec<RuleNode>> {
        let rows = self
            .ctx
            .store
            .find_all(self.table(), &Filter::new().eq("pid", id.as_u64()), &[])?;
        self.decode(rows)
    }

    /// Effective rules among `ids`. `None` selects every effective rule.
    pub fn effective_by_ids(&self, ids: Option<&BTreeSet<NodeId>>) -> Result<Vec<RuleNode>> {
        let mut filter = Filter::new().eq("status", self.ctx.code(Status::Effective));
        if let Some(ids) = ids {
            filter = filter.is_in("id", ids.iter().map(|id| id.as_u64()));
        }
        let rows = self.ctx.store.find_all(self.table(), &filter, &[])?;
        debug!(requested = ids.map(BTreeSet::len), found = rows.len(), "Loaded effective rules");
        self.decode(rows)
    }

    /// A [`RuleChanges`] pre-filled from the stored rule.
    pub fn edit(&self, id: NodeId) -> Result<RuleChanges> {
        let node = self.get(id)?;
        Ok(RuleChanges {
            id: node.id.as_u64() as i64,
            pid: node.pid.as_u64() as i64,
            title: node.title,
            rule: node.rule,
            remark: node.remark,
            status: self.ctx.config.status_codes().code(node.status),
            ext: Row::new(),
        })
    }

    /// Creates a rule and returns its id.
    pub fn add(&self, request: NewRule) -> Result<NodeId> {
        request.validate(&self.ctx.policy)?;
        let pid = node_id(request.pid);
        let status = match request.status {
            Some(code) => self.ctx.policy.status(code)?,
            None => Status::Effective,
        };

        self.ctx.transaction(|store| {
            let pids = if pid.is_root() {
                AncestorChain::root()
            } else {
                let parent = self
                    .find(store, pid)?
                    .ok_or(RbacError::ParentNotFound { kind: KIND, pid })?;
                if parent.status == Status::Invalid && status == Status::Effective {
                    warn!(pid = %pid, "Rejected effective rule under invalid parent");
                    return Err(RbacError::InvalidStateConflict { pid });
                }
                parent.pids.child_chain(pid)
            };

            let managed = Row::from([
                ("pid".to_string(), Value::from(pid.as_u64())),
                ("pids".to_string(), Value::from(pids.to_string())),
                ("title".to_string(), Value::from(request.title.as_str())),
                ("rule".to_string(), Value::from(request.rule.as_str())),
                ("remark".to_string(), Value::from(request.remark.as_str())),
                ("status".to_string(), self.ctx.code(status)),
            ]);
            let row = self.ctx.row_for_insert(request.ext.clone(), managed);
            let id = NodeId::new(store.insert(self.table(), row)?);
            info!(id = %id, pid = %pid, rule = %request.rule, "Rule created");
            Ok(id)
        })
    }

    /// Replaces a rule's fields, cascading to its subtree.
    ///
    /// Re-parenting rewrites `pids` of every descendant. Disabling marks every
    /// descendant invalid. Both cascades go out as one batched statement in
    /// the same transaction as the row update.
    pub fn modify(&self, request: RuleChanges) -> Result<()> {
        request.validate(&self.ctx.policy)?;
        let id = node_id(request.id);
        let pid = node_id(request.pid);
        let status = self.ctx.policy.status(request.status)?;

        self.ctx.transaction(|store| {
            let tree = self.load(store)?;
            let current = tree
                .get(id)
                .ok_or(RbacError::NotFound { kind: KIND, id })?;

            let reparent = current.pid != pid;
            let pids = tree.plan_parent(id, pid, status, KIND)?;
            tree.check_enable(id, pid, current.status, status)?;

            let managed = Row::from([
                ("pid".to_string(), Value::from(pid.as_u64())),
                ("pids".to_string(), Value::from(pids.to_string())),
                ("title".to_string(), Value::from(request.title.as_str())),
                ("rule".to_string(), Value::from(request.rule.as_str())),
                ("remark".to_string(), Value::from(request.remark.as_str())),
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
            self.ctx.stamp(&mut changes);

            if let Some(batch) = build_batch_update(self.table(), changes) {
                let affected = store.execute(&batch)?;
                debug!(id = %id, affected, "Cascaded rule changes");
            }

            info!(id = %id, reparent, disabling, "Rule modified");
            Ok(())
        })
    }
}
