//! Property-based tests using proptest.

use proptest::prelude::*;
use proptest::sample::Index;

use super::*;
use crate::engine::Relation;
use crate::error::RbacError;
use crate::hierarchy::{build_batch_update, pids_change};
use crate::validate::BindAccess;
use warden_store::{Value, row};
use warden_types::AncestorChain;

const TABLE: &str = "nodes";

fn chain(ancestors: &[u64]) -> AncestorChain {
    ancestors
        .iter()
        .fold(AncestorChain::root(), |chain, id| chain.child_chain(NodeId::new(*id)))
}

/// Writes `chains` to rows `1..=n` in one batch and reads them back.
fn batch_round_trip(chains: &[AncestorChain]) -> Vec<(NodeId, String)> {
    let store = MemoryStore::new().with_auto_increment(TABLE);
    for _ in chains {
        store.insert(TABLE, row([("pids", Value::from("0"))])).unwrap();
    }
    let changes = chains
        .iter()
        .enumerate()
        .map(|(i, chain)| pids_change(NodeId::new(i as u64 + 1), chain));
    let batch = build_batch_update(TABLE, changes).unwrap();
    assert_eq!(store.execute(&batch).unwrap(), chains.len() as u64);

    store
        .find_all(TABLE, &Filter::new(), &["id", "pids"])
        .unwrap()
        .iter()
        .map(|r| {
            (
                NodeId::new(r["id"].as_u64().unwrap()),
                r["pids"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

fn expected(chains: &[AncestorChain]) -> Vec<(NodeId, String)> {
    chains
        .iter()
        .enumerate()
        .map(|(i, c)| (NodeId::new(i as u64 + 1), c.to_string()))
        .collect()
}

#[test]
fn batch_round_trip_single_row() {
    let chains = [chain(&[4, 9])];
    assert_eq!(batch_round_trip(&chains), expected(&chains));
}

#[test]
fn batch_round_trip_hundred_rows() {
    let chains: Vec<AncestorChain> = (0..100u64).map(|i| chain(&[i % 7 + 1, i + 1])).collect();
    assert_eq!(batch_round_trip(&chains), expected(&chains));
}

/// Parent of node `i + 1` for every sampled index; always a smaller id.
fn parents_from(samples: &[Index]) -> Vec<u64> {
    samples
        .iter()
        .enumerate()
        .map(|(i, s)| s.index(i + 1) as u64)
        .collect()
}

/// `pids` implied by a parent table (index `i` holds the parent of `i + 1`).
fn implied_pids(parents: &[u64], id: u64) -> String {
    let mut ancestors = Vec::new();
    let mut cursor = parents[id as usize - 1];
    while cursor != 0 && ancestors.len() <= parents.len() {
        ancestors.push(cursor);
        cursor = parents[cursor as usize - 1];
    }
    ancestors.reverse();
    chain(&ancestors).to_string()
}

fn is_within(parents: &[u64], candidate: u64, root: u64) -> bool {
    let mut cursor = candidate;
    while cursor != 0 {
        if cursor == root {
            return true;
        }
        cursor = parents[cursor as usize - 1];
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn batch_update_reproduces_input(
        raw in prop::collection::vec(prop::collection::vec(1u64..500, 0..6), 1..=100),
    ) {
        let chains: Vec<AncestorChain> = raw.iter().map(|a| chain(a)).collect();
        prop_assert_eq!(batch_round_trip(&chains), expected(&chains));
    }

    #[test]
    fn any_intersects_all_contains(
        held in prop::collection::btree_set(0usize..6, 0..=6),
        requested in prop::collection::vec(0usize..8, 0..6),
    ) {
        let f = Fixture::new();
        for i in 0..6 {
            f.rule(0, &format!("perm/{i}"));
        }
        let tokens: Vec<String> = held.iter().map(|i| (i + 1).to_string()).collect();
        let role = f.engine.roles().add(NewRole::new("Holder", tokens)).unwrap();
        f.engine.access().bind(BindAccess::new(7u64, role)).unwrap();

        let query: Vec<String> = requested.iter().map(|i| format!("PERM/{i}")).collect();
        let any = f.engine.check(query.clone(), 7u64, Relation::Any).unwrap();
        let all = f.engine.check(query, 7u64, Relation::All).unwrap();

        prop_assert_eq!(any, requested.iter().any(|i| held.contains(i)));
        prop_assert_eq!(all, requested.iter().all(|i| held.contains(i)));
    }

    #[test]
    fn reparent_keeps_every_chain_consistent(
        samples in prop::collection::vec(any::<Index>(), 2..12),
        mover in any::<Index>(),
        target in any::<Index>(),
    ) {
        let f = Fixture::new();
        let mut parents = parents_from(&samples);
        for (i, pid) in parents.iter().enumerate() {
            f.rule(*pid, &format!("r{}", i + 1));
        }
        let n = parents.len();
        let id = mover.index(n) as u64 + 1;
        let pid = target.index(n + 1) as u64;

        let result = f.move_rule(NodeId::new(id), pid);
        if is_within(&parents, pid, id) {
            prop_assert!(
                matches!(result, Err(RbacError::CyclicParent { .. })),
                "expected a cycle error, got {:?}",
                result
            );
        } else {
            prop_assert!(result.is_ok(), "{:?}", result);
            parents[id as usize - 1] = pid;
            // Same move twice leaves the same chains.
            f.move_rule(NodeId::new(id), pid).unwrap();
        }

        for node in 1..=n as u64 {
            prop_assert_eq!(f.rule_pids(NodeId::new(node)), implied_pids(&parents, node));
        }
    }
}
