//! User-role bindings.

use std::collections::BTreeSet;

use super::*;
use crate::error::RbacError;
use crate::validate::{BindAccess, ChangeAccess, UnbindAccess};
use warden_types::UserId;

fn bound_roles(f: &Fixture, uid: u64) -> Vec<NodeId> {
    f.engine
        .access()
        .bindings_for_user(UserId::new(uid))
        .unwrap()
        .iter()
        .map(|b| b.gid)
        .collect()
}

#[test]
fn bind_duplicate_unbind_bind() {
    let f = Fixture::new();
    f.role(0, &["1"]);
    let gid = f.role(0, &["1"]);
    assert_eq!(gid, NodeId::new(2));
    let access = f.engine.access();

    access.bind(BindAccess::new(10u64, 2u64)).unwrap();
    let err = access.bind(BindAccess::new(10u64, 2u64)).unwrap_err();
    assert!(matches!(
        err,
        RbacError::DuplicateBinding { uid, gid } if uid == UserId::new(10) && gid == NodeId::new(2)
    ));
    assert_eq!(f.store.row_count(&f.config.access_table).unwrap(), 1);

    access.unbind(UnbindAccess::new(10u64, 2u64)).unwrap();
    assert!(bound_roles(&f, 10).is_empty());

    access.bind(BindAccess::new(10u64, 2u64)).unwrap();
    assert_eq!(bound_roles(&f, 10), vec![gid]);
}

#[test]
fn unbind_missing_binding() {
    let f = Fixture::new();
    let err = f
        .engine
        .access()
        .unbind(UnbindAccess::new(10u64, 2u64))
        .unwrap_err();
    assert!(matches!(err, RbacError::BindingNotFound { .. }));
}

#[test]
fn unbind_removes_only_the_pair() {
    let f = Fixture::new();
    let access = f.engine.access();
    access.bind(BindAccess::new(10u64, 1u64)).unwrap();
    access.bind(BindAccess::new(10u64, 2u64)).unwrap();
    access.bind(BindAccess::new(11u64, 1u64)).unwrap();

    access.unbind(UnbindAccess::new(10u64, 1u64)).unwrap();
    assert_eq!(bound_roles(&f, 10), vec![NodeId::new(2)]);
    assert_eq!(bound_roles(&f, 11), vec![NodeId::new(1)]);
}

#[test]
fn modify_repoints_a_binding() {
    let f = Fixture::new();
    let access = f.engine.access();
    access.bind(BindAccess::new(10u64, 1u64)).unwrap();
    access.bind(BindAccess::new(10u64, 3u64)).unwrap();

    let err = access
        .modify(ChangeAccess::new(10u64, 1u64, 1u64))
        .unwrap_err();
    assert!(matches!(err, RbacError::NoOpChange(_)));

    let err = access
        .modify(ChangeAccess::new(10u64, 2u64, 4u64))
        .unwrap_err();
    assert!(matches!(err, RbacError::BindingNotFound { gid, .. } if gid == NodeId::new(2)));

    let err = access
        .modify(ChangeAccess::new(10u64, 1u64, 3u64))
        .unwrap_err();
    assert!(matches!(err, RbacError::DuplicateBinding { gid, .. } if gid == NodeId::new(3)));

    access.modify(ChangeAccess::new(10u64, 1u64, 2u64)).unwrap();
    let mut roles = bound_roles(&f, 10);
    roles.sort();
    assert_eq!(roles, vec![NodeId::new(2), NodeId::new(3)]);
}

#[test]
fn binding_requests_are_validated() {
    let f = Fixture::new();
    let err = f
        .engine
        .access()
        .bind(BindAccess {
            uid: 0,
            gid: -1,
            ..BindAccess::default()
        })
        .unwrap_err();
    let fields = err.field_errors().unwrap();
    assert!(fields.contains_key("uid"));
    assert!(fields.contains_key("gid"));
    assert_eq!(f.store.row_count(&f.config.access_table).unwrap(), 0);
}

#[test]
fn user_roles_skip_invalid_roles() {
    let f = Fixture::new();
    let live = f.role(0, &["1"]);
    let dead = f.role(0, &["1"]);
    let mut changes = f.engine.roles().edit(dead).unwrap();
    changes.status = INVALID;
    f.engine.roles().modify(changes).unwrap();

    let access = f.engine.access();
    access.bind(BindAccess::new(10u64, live)).unwrap();
    access.bind(BindAccess::new(10u64, dead)).unwrap();

    let roles: Vec<NodeId> = access
        .user_roles(UserId::new(10))
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(roles, vec![live]);
    assert!(access.user_roles(UserId::new(99)).unwrap().is_empty());
}

#[test]
fn users_in_role() {
    let f = Fixture::new();
    let access = f.engine.access();
    for uid in [10u64, 11, 12] {
        access.bind(BindAccess::new(uid, 1u64)).unwrap();
    }
    access.bind(BindAccess::new(13u64, 2u64)).unwrap();

    assert_eq!(
        access.users_in_role(NodeId::new(1)).unwrap(),
        [10, 11, 12].into_iter().map(UserId::new).collect::<BTreeSet<_>>()
    );
}

#[test]
fn bindings_carry_timestamps() {
    let f = Fixture::new();
    f.engine
        .access()
        .bind(BindAccess::new(10u64, 1u64))
        .unwrap();
    let row = f
        .store
        .find_one(&f.config.access_table, &Filter::new().eq("uid", 10))
        .unwrap()
        .unwrap();
    assert!(row.contains_key("create_time"));
    assert!(row.contains_key("update_time"));
}
