//! Tree consistency for rule and role hierarchies.
//!
//! A [`Hierarchy`] is built from every row of one table, loaded once per
//! operation. It answers subtree and ancestry questions from an in-memory
//! `id -> children` index and produces the batched statement that rewrites
//! a whole subtree in one round trip.
//!
//! Walks are iterative and track visited ids, so corrupt data containing a
//! parent cycle terminates instead of looping.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};
use warden_store::{CaseUpdate, FieldCase, Row, Value};
use warden_types::{AncestorChain, NodeId, Status};

use crate::error::{RbacError, Result};

/// A node that hangs off a parent by id.
pub trait TreeNode {
    fn id(&self) -> NodeId;
    fn pid(&self) -> NodeId;
    /// The stored ancestor chain.
    fn pids(&self) -> &AncestorChain;
    fn status(&self) -> Status;
}

/// In-memory adjacency index over one table.
#[derive(Debug, Clone)]
pub struct Hierarchy<N> {
    nodes: BTreeMap<NodeId, N>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
}

impl<N: TreeNode> Hierarchy<N> {
    pub fn new(nodes: impl IntoIterator<Item = N>) -> Self {
        let nodes: BTreeMap<NodeId, N> = nodes.into_iter().map(|n| (n.id(), n)).collect();
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in nodes.values() {
            children.entry(node.pid()).or_default().push(node.id());
        }
        Self { nodes, children }
    }

    pub fn get(&self, id: NodeId) -> Option<&N> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct children of `id`, in id order.
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every node below `id`, parents before children. `id` itself is not
    /// included.
    pub fn descendants(&self, id: NodeId) -> Vec<&N> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut stack: Vec<NodeId> = self.children_of(id).iter().rev().copied().collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                out.push(node);
            }
            stack.extend(self.children_of(current).iter().rev().copied());
        }
        out
    }

    pub fn descendant_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id).into_iter().map(TreeNode::id).collect()
    }

    /// Ancestors of `id` by parent links, root-most first. `id` itself is not
    /// included; an unknown `id` has no ancestors.
    pub fn ancestors(&self, id: NodeId) -> Vec<&N> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.nodes.get(&id).map(TreeNode::pid);

        while let Some(pid) = current {
            if pid.is_root() || !seen.insert(pid) {
                break;
            }
            let Some(parent) = self.nodes.get(&pid) else {
                break;
            };
            out.push(parent);
            current = Some(parent.pid());
        }
        out.reverse();
        out
    }

    /// `id` followed by its ancestors, nearest first.
    pub fn lineage(&self, id: NodeId) -> Vec<&N> {
        let mut out: Vec<&N> = self.ancestors(id);
        out.reverse();
        if let Some(node) = self.nodes.get(&id) {
            out.insert(0, node);
        }
        out
    }

    /// Whether `candidate` sits in the subtree below `ancestor`.
    pub fn is_descendant(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        self.ancestors(candidate).iter().any(|n| n.id() == ancestor)
    }

    /// Nearest invalid node among `id` and its ancestors.
    pub fn first_invalid_in_lineage(&self, id: NodeId) -> Option<NodeId> {
        self.lineage(id)
            .into_iter()
            .find(|n| n.status() == Status::Invalid)
            .map(TreeNode::id)
    }

    /// Checks moving `id` under `pid` with the requested `status` and returns
    /// the chain `id` will carry. Keeping the current parent keeps the
    /// current chain.
    pub fn plan_parent(
        &self,
        id: NodeId,
        pid: NodeId,
        status: Status,
        kind: &'static str,
    ) -> Result<AncestorChain> {
        let node = self.get(id).ok_or(RbacError::NotFound { kind, id })?;
        if node.pid() == pid {
            return Ok(node.pids().clone());
        }
        if pid == id || self.is_descendant(pid, id) {
            warn!(id = %id, pid = %pid, "Rejected cyclic re-parent");
            return Err(RbacError::CyclicParent { id, pid });
        }
        if pid.is_root() {
            return Ok(AncestorChain::root());
        }
        let parent = self
            .get(pid)
            .ok_or(RbacError::ParentNotFound { kind, pid })?;
        if parent.status() == Status::Invalid && status == Status::Effective {
            warn!(id = %id, pid = %pid, "Rejected effective node under invalid parent");
            return Err(RbacError::InvalidStateConflict { pid });
        }
        Ok(parent.pids().child_chain(pid))
    }

    /// Rejects an `Invalid -> Effective` transition of `id` while `pid` or any
    /// of its ancestors is invalid.
    pub fn check_enable(&self, id: NodeId, pid: NodeId, from: Status, to: Status) -> Result<()> {
        if from != Status::Invalid || to != Status::Effective || pid.is_root() {
            return Ok(());
        }
        match self.first_invalid_in_lineage(pid) {
            Some(ancestor) => {
                warn!(id = %id, ancestor = %ancestor, "Rejected enable under invalid ancestor");
                Err(RbacError::AncestorInvalid { id, ancestor })
            }
            None => Ok(()),
        }
    }

    /// New `pids` for every descendant of `id`, given the chain `id` itself
    /// now carries.
    ///
    /// Each descendant's chain is its parent's new chain with the parent id
    /// appended. Output is in walk order with one entry per descendant.
    pub fn rewrite_pids(&self, id: NodeId, chain: &AncestorChain) -> Vec<(NodeId, AncestorChain)> {
        let mut chains: BTreeMap<NodeId, AncestorChain> = BTreeMap::from([(id, chain.clone())]);
        let mut out = Vec::new();

        for node in self.descendants(id) {
            let Some(parent_chain) = chains.get(&node.pid()) else {
                continue;
            };
            let own = parent_chain.child_chain(node.pid());
            chains.insert(node.id(), own.clone());
            out.push((node.id(), own));
        }
        out
    }
}

/// Folds per-row changes into one [`CaseUpdate`].
///
/// Rows are grouped by id with later values winning per field. Every field
/// touched by any row gets one `CASE`; rows that do not set it keep their
/// stored value. Returns `None` when there is nothing to write.
pub fn build_batch_update<I>(table: &str, rows: I) -> Option<CaseUpdate>
where
    I: IntoIterator<Item = (NodeId, Row)>,
{
    let mut order: Vec<NodeId> = Vec::new();
    let mut merged: BTreeMap<NodeId, Row> = BTreeMap::new();
    for (id, row) in rows {
        let entry = merged.entry(id).or_insert_with(|| {
            order.push(id);
            Row::new()
        });
        entry.extend(row);
    }

    let fields: BTreeSet<&String> = merged.values().flat_map(Row::keys).collect();
    if order.is_empty() || fields.is_empty() {
        return None;
    }

    let cases = fields
        .into_iter()
        .map(|field| {
            order.iter().fold(FieldCase::new(field.as_str()), |case, id| {
                match merged.get(id).and_then(|row| row.get(field)) {
                    Some(value) => case.set(id.as_u64(), value.clone()),
                    None => case.keep(id.as_u64()),
                }
            })
        })
        .collect();

    let ids: Vec<u64> = order.iter().map(NodeId::as_u64).collect();
    debug!(table, rows = ids.len(), "Built batch update");
    Some(CaseUpdate::new(table, cases, ids))
}

/// One row-change carrying only `pids`.
pub fn pids_change(id: NodeId, chain: &AncestorChain) -> (NodeId, Row) {
    (id, Row::from([("pids".to_string(), Value::from(chain.to_string()))]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use warden_store::CaseValue;

    #[derive(Debug, Clone)]
    struct Node(u64, u64, Status, AncestorChain);

    fn n(id: u64, pid: u64, status: Status) -> Node {
        Node(id, pid, status, AncestorChain::root())
    }

    impl TreeNode for Node {
        fn id(&self) -> NodeId {
            NodeId::new(self.0)
        }
        fn pid(&self) -> NodeId {
            NodeId::new(self.1)
        }
        fn pids(&self) -> &AncestorChain {
            &self.3
        }
        fn status(&self) -> Status {
            self.2
        }
    }

    use Status::{Effective as E, Invalid as I};

    //      1          8
    //    /   \
    //   2     5
    //   |    / \
    //   3   6   7
    //            \
    //             4
    fn sample() -> Hierarchy<Node> {
        Hierarchy::new([
            n(1, 0, E),
            n(2, 1, E),
            n(3, 2, E),
            n(5, 1, I),
            n(6, 5, I),
            n(7, 5, E),
            n(4, 7, E),
            n(8, 0, E),
        ])
    }

    fn ids(nodes: &[&Node]) -> Vec<u64> {
        nodes.iter().map(|n| n.0).collect()
    }

    #[test]
    fn descendants_preorder() {
        let h = sample();
        assert_eq!(ids(&h.descendants(NodeId::new(1))), vec![2, 3, 5, 6, 7, 4]);
        assert_eq!(ids(&h.descendants(NodeId::new(5))), vec![6, 7, 4]);
        assert!(h.descendants(NodeId::new(8)).is_empty());
        assert!(h.descendants(NodeId::new(99)).is_empty());
    }

    #[test]
    fn ancestors_root_most_first() {
        let h = sample();
        assert_eq!(ids(&h.ancestors(NodeId::new(4))), vec![1, 5, 7]);
        assert_eq!(ids(&h.lineage(NodeId::new(4))), vec![4, 7, 5, 1]);
        assert!(h.ancestors(NodeId::new(1)).is_empty());
        assert!(h.is_descendant(NodeId::new(4), NodeId::new(5)));
        assert!(!h.is_descendant(NodeId::new(5), NodeId::new(4)));
        assert!(!h.is_descendant(NodeId::new(3), NodeId::new(3)));
    }

    #[test]
    fn first_invalid() {
        let h = sample();
        assert_eq!(h.first_invalid_in_lineage(NodeId::new(4)), Some(NodeId::new(5)));
        assert_eq!(h.first_invalid_in_lineage(NodeId::new(3)), None);
    }

    #[test]
    fn cycles_terminate() {
        let h = Hierarchy::new([n(1, 2, E), n(2, 1, E)]);
        assert_eq!(ids(&h.descendants(NodeId::new(1))), vec![2]);
        assert_eq!(ids(&h.ancestors(NodeId::new(1))), vec![2]);
    }

    #[test]
    fn plan_parent_rules() {
        let h = sample();
        let id = |v| NodeId::new(v);

        // Unchanged parent keeps the stored chain
        assert_eq!(h.plan_parent(id(3), id(2), E, "rule").unwrap(), AncestorChain::root());
        assert!(matches!(
            h.plan_parent(id(5), id(4), I, "rule"),
            Err(RbacError::CyclicParent { .. })
        ));
        assert!(matches!(
            h.plan_parent(id(5), id(5), I, "rule"),
            Err(RbacError::CyclicParent { .. })
        ));
        assert!(matches!(
            h.plan_parent(id(3), id(42), E, "rule"),
            Err(RbacError::ParentNotFound { .. })
        ));
        assert!(matches!(
            h.plan_parent(id(3), id(6), E, "rule"),
            Err(RbacError::InvalidStateConflict { .. })
        ));
        assert_eq!(
            h.plan_parent(id(3), id(6), I, "rule").unwrap(),
            AncestorChain::root().child_chain(id(6))
        );
        assert_eq!(h.plan_parent(id(3), NodeId::ROOT, E, "rule").unwrap(), AncestorChain::root());
    }

    #[test]
    fn check_enable_rules() {
        let h = sample();
        let id = |v| NodeId::new(v);

        assert!(matches!(
            h.check_enable(id(4), id(7), I, E),
            Err(RbacError::AncestorInvalid { ancestor, .. }) if ancestor == id(5)
        ));
        assert!(h.check_enable(id(3), id(2), I, E).is_ok());
        assert!(h.check_enable(id(4), id(7), E, E).is_ok());
        assert!(h.check_enable(id(4), id(7), I, I).is_ok());
        assert!(h.check_enable(id(1), NodeId::ROOT, I, E).is_ok());
    }

    #[test]
    fn rewrite_pids_under_new_chain() {
        let h = sample();
        let chain = AncestorChain::parse("0,8").unwrap();
        let rewritten: Vec<(u64, String)> = h
            .rewrite_pids(NodeId::new(5), &chain)
            .into_iter()
            .map(|(id, c)| (id.as_u64(), c.to_string()))
            .collect();
        assert_eq!(
            rewritten,
            vec![
                (6, "0,8,5".to_string()),
                (7, "0,8,5".to_string()),
                (4, "0,8,5,7".to_string()),
            ]
        );
    }

    #[test]
    fn batch_groups_and_keeps() {
        let rows = vec![
            (NodeId::new(6), Row::from([("pids".to_string(), Value::from("0,5"))])),
            (NodeId::new(7), Row::from([("status".to_string(), Value::Int(0))])),
            (NodeId::new(6), Row::from([("pids".to_string(), Value::from("0,8"))])),
        ];
        let stmt = build_batch_update("auth_rule", rows).unwrap();

        assert_eq!(stmt.ids(), &[6, 7]);
        let pids = stmt.field("pids").unwrap();
        assert_eq!(pids.value_for(6), Some(&CaseValue::Set(Value::from("0,8"))));
        assert_eq!(pids.value_for(7), Some(&CaseValue::Keep));
        let status = stmt.field("status").unwrap();
        assert_eq!(status.value_for(6), Some(&CaseValue::Keep));
        assert_eq!(
            stmt.to_string(),
            "UPDATE `auth_rule` SET \
             `pids` = CASE `id` WHEN 6 THEN '0,8' WHEN 7 THEN `pids` ELSE `pids` END, \
             `status` = CASE `id` WHEN 6 THEN `status` WHEN 7 THEN 0 ELSE `status` END \
             WHERE `id` IN (6,7)"
        );
    }

    #[test]
    fn batch_of_nothing() {
        assert!(build_batch_update("t", Vec::new()).is_none());
        assert!(build_batch_update("t", vec![(NodeId::new(1), Row::new())]).is_none());
    }

    proptest! {
        #[test]
        fn rewrite_is_consistent_with_parent_chains(
            parents in prop::collection::vec(0usize..1000, 1..60),
            depth in 0u64..5,
        ) {
            // Node i+1 hangs off an earlier node (or the root), so the input is a forest.
            let nodes: Vec<Node> = parents
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let id = i as u64 + 1;
                    let pid = if i == 0 { 0 } else { (*p % (i + 1)) as u64 };
                    n(id, pid, E)
                })
                .collect();
            let h = Hierarchy::new(nodes.clone());

            let mut chain = AncestorChain::root();
            for extra in 0..depth {
                chain = chain.child_chain(NodeId::new(10_000 + extra));
            }
            let root = NodeId::new(1);
            let rewritten: BTreeMap<NodeId, AncestorChain> =
                h.rewrite_pids(root, &chain).into_iter().collect();

            prop_assert_eq!(rewritten.len(), h.descendants(root).len());
            for (id, own) in &rewritten {
                let pid = h.get(*id).unwrap().pid();
                let parent_chain = if pid == root { &chain } else { &rewritten[&pid] };
                prop_assert_eq!(own, &parent_chain.child_chain(pid));
                prop_assert!(own.to_string().starts_with(&chain.child_chain(root).to_string()));
            }

            // Rewriting twice gives the same chains.
            let again: BTreeMap<NodeId, AncestorChain> =
                h.rewrite_pids(root, &chain).into_iter().collect();
            prop_assert_eq!(rewritten, again);
        }
    }
}
