//! Role hierarchy: grants stay within the parent's grant.

use super::*;
use crate::error::RbacError;

fn regrant(f: &Fixture, id: NodeId, rules: &[&str]) -> Result<()> {
    let changes = f.engine.roles().edit(id)?.with_rules(rules.iter().copied());
    f.engine.roles().modify(changes)
}

fn move_role(f: &Fixture, id: NodeId, pid: NodeId) -> Result<()> {
    let mut changes = f.engine.roles().edit(id)?;
    changes.pid = pid.as_u64() as i64;
    f.engine.roles().modify(changes)
}

#[test]
fn child_role_cannot_exceed_parent() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1", "2"]);

    let err = f
        .engine
        .roles()
        .add(NewRole::new("R2", ["1", "2", "3"]).under(r1))
        .unwrap_err();
    match &err {
        RbacError::UltraVires { pid, excess } => {
            assert_eq!(*pid, r1);
            assert_eq!(*excess, ids(&[3]));
        }
        other => panic!("expected UltraVires, got {other:?}"),
    }
    assert_eq!(err.to_string(), "Rules [3] exceed the grant of parent role 1");
    assert_eq!(f.store.row_count(&f.config.role_table).unwrap(), 1);
}

#[test]
fn subset_child_role_is_stored_sorted() {
    let f = Fixture::new();
    let r1 = f.role(0, &["3", "1", "2"]);
    let r2 = f.role(r1.as_u64(), &["2", " 1", "2"]);

    let role = f.engine.roles().get(r2).unwrap();
    assert_eq!(role.pids.to_string(), "0,1");
    assert_eq!(role.rules, ids(&[1, 2]));
    assert_eq!(role.rules.to_column("*"), "1,2");
}

#[test]
fn admin_grant_needs_admin_parent() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1"]);
    let err = f
        .engine
        .roles()
        .add(NewRole::new("Escalate", ["*"]).under(r1))
        .unwrap_err();
    assert!(matches!(err, RbacError::UltraVires { excess: RuleGrant::All, .. }));

    let admin = f.role(0, &["*"]);
    let sub = f.role(admin.as_u64(), &["*"]);
    assert!(f.role_rules(sub).is_all());
}

/// Admin marks relax the subset check for the whole subtree below, not
/// only for direct children. Narrowing is not relaxed.
#[test]
fn admin_mark_applies_transitively() {
    let f = Fixture::new();
    let admin = f.role(0, &["*"]);
    let manager = f.role(admin.as_u64(), &["1", "2"]);

    let clerk = f
        .engine
        .roles()
        .add(NewRole::new("Clerk", ["1", "5"]).under(manager))
        .unwrap();
    assert_eq!(f.role_rules(clerk), ids(&[1, 5]));

    // Narrowing still reaches the subtree below an admin.
    regrant(&f, manager, &["1"]).unwrap();
    assert_eq!(f.role_rules(manager), ids(&[1]));
    assert_eq!(f.role_rules(clerk), ids(&[1]));
}

#[test]
fn narrowing_under_an_admin_drops_removed_rules() {
    let f = Fixture::new();
    let admin = f.role(0, &["*"]);
    let manager = f.role(admin.as_u64(), &["1", "2"]);
    let clerk = f.role(manager.as_u64(), &["1", "2"]);

    regrant(&f, manager, &["1"]).unwrap();
    assert_eq!(f.role_rules(clerk), ids(&[1]));

    // Only an admin grant on the modified role itself leaves the subtree alone.
    regrant(&f, manager, &["*"]).unwrap();
    assert!(f.role_rules(manager).is_all());
    assert_eq!(f.role_rules(clerk), ids(&[1]));
}

#[test]
fn narrowing_a_role_narrows_its_subtree() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1", "2", "3"]);
    let r2 = f.role(r1.as_u64(), &["1", "2", "3"]);
    let r3 = f.role(r2.as_u64(), &["2", "3"]);
    let r4 = f.role(r1.as_u64(), &["1"]);

    regrant(&f, r1, &["1", "2"]).unwrap();

    assert_eq!(f.role_rules(r1), ids(&[1, 2]));
    assert_eq!(f.role_rules(r2), ids(&[1, 2]));
    assert_eq!(f.role_rules(r3), ids(&[2]));
    assert_eq!(f.role_rules(r4), ids(&[1]));
}

#[test]
fn narrowing_to_nothing_empties_descendants() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1", "2"]);
    let r2 = f.role(r1.as_u64(), &["2"]);

    regrant(&f, r1, &[]).unwrap();
    assert_eq!(f.role_rules(r1), RuleGrant::none());
    assert_eq!(f.role_rules(r2), RuleGrant::none());
}

#[test]
fn widening_a_child_is_checked_against_parent() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1", "2"]);
    let r2 = f.role(r1.as_u64(), &["1"]);

    regrant(&f, r2, &["1", "2"]).unwrap();
    let err = regrant(&f, r2, &["1", "4"]).unwrap_err();
    assert!(matches!(err, RbacError::UltraVires { pid, .. } if pid == r1));
    assert_eq!(f.role_rules(r2), ids(&[1, 2]));
}

#[test]
fn reparenting_checks_the_new_parent() {
    let f = Fixture::new();
    let a = f.role(0, &["1", "2"]);
    let b = f.role(0, &["2"]);
    let child = f.role(a.as_u64(), &["1"]);

    let err = move_role(&f, child, b).unwrap_err();
    assert!(matches!(
        err,
        RbacError::UltraVires { pid, ref excess } if pid == b && *excess == ids(&[1])
    ));

    let grandchild = f.role(child.as_u64(), &["1"]);
    move_role(&f, child, NodeId::ROOT).unwrap();
    assert_eq!(f.engine.roles().get(child).unwrap().pids.to_string(), "0");
    assert_eq!(
        f.engine.roles().get(grandchild).unwrap().pids.to_string(),
        "0,3"
    );
}

#[test]
fn reparent_and_narrow_in_one_modify() {
    let f = Fixture::new();
    let a = f.role(0, &["1", "2", "3"]);
    let b = f.role(0, &["1", "2"]);
    let mid = f.role(a.as_u64(), &["1", "3"]);
    let leaf = f.role(mid.as_u64(), &["1", "3"]);

    let mut changes = f.engine.roles().edit(mid).unwrap().with_rules(["1"]);
    changes.pid = b.as_u64() as i64;
    f.engine.roles().modify(changes).unwrap();

    let leaf = f.engine.roles().get(leaf).unwrap();
    assert_eq!(leaf.pids.to_string(), "0,2,3");
    assert_eq!(leaf.rules, ids(&[1]));
}

#[test]
fn disabling_a_role_cascades() {
    let f = Fixture::new();
    let r1 = f.role(0, &["1"]);
    let r2 = f.role(r1.as_u64(), &["1"]);
    let r3 = f.role(r2.as_u64(), &["1"]);

    let mut changes = f.engine.roles().edit(r1).unwrap();
    changes.status = INVALID;
    f.engine.roles().modify(changes).unwrap();

    for id in [r1, r2, r3] {
        assert_eq!(f.engine.roles().get(id).unwrap().status, Status::Invalid);
    }

    let mut changes = f.engine.roles().edit(r3).unwrap();
    changes.status = EFFECTIVE;
    let err = f.engine.roles().modify(changes).unwrap_err();
    assert!(matches!(err, RbacError::AncestorInvalid { ancestor, .. } if ancestor == r2));

    let err = f
        .engine
        .roles()
        .add(NewRole::new("Late", ["1"]).under(r1))
        .unwrap_err();
    assert!(matches!(err, RbacError::InvalidStateConflict { pid } if pid == r1));
}

#[test]
fn role_validation_reports_bad_tokens() {
    let f = Fixture::new();
    let err = f
        .engine
        .roles()
        .add(NewRole::new("Bad", ["1", "x", "-2"]))
        .unwrap_err();
    assert!(err.field_errors().unwrap().contains_key("rules"));

    let err = f
        .engine
        .roles()
        .add(NewRole::new("Child", ["1"]).under(9u64))
        .unwrap_err();
    assert!(matches!(err, RbacError::ParentNotFound { kind: "role", .. }));
}

#[test]
fn edit_renders_admin_mark() {
    let f = Fixture::new();
    let admin = f.role(0, &["*"]);
    let changes = f.engine.roles().edit(admin).unwrap();
    assert_eq!(changes.rules, vec!["*".to_string()]);
    f.engine.roles().modify(changes).unwrap();
    assert!(f.role_rules(admin).is_all());
}
