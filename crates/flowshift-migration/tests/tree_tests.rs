use flowshift_migration::error::{ContractViolation, MigrationError, TreeError};
use flowshift_migration::types::{AttachmentState, ScopeDescriptor, TimerDeclaration};
use flowshift_migration::context::ExecutionRepository;
use flowshift_migration::tree::MigratingInstanceTree;
use flowshift_test_utils::ProcessFixture;
use proptest::prelude::*;

#[test]
fn detaching_parent_leaves_children_attached() {
    let mut fx = ProcessFixture::new();
    let (parent, _) = fx.add_scope(fx.root, "sub", Some(ScopeDescriptor::scope("sub-v2")));
    let (a, _) = fx.add_non_scope(parent, "a", true);
    let (b, _) = fx.add_scope(parent, "b", Some(ScopeDescriptor::scope("b-v2")));

    fx.tree.detach(parent, &mut fx.runtime).unwrap();

    assert_eq!(fx.node(parent).state(), AttachmentState::Detached);
    assert_eq!(fx.node(a).state(), AttachmentState::Attached);
    assert_eq!(fx.node(b).state(), AttachmentState::Attached);
    assert_eq!(fx.tree.children(parent).unwrap(), vec![a, b]);
}

#[test]
fn attach_requires_prior_detach() {
    let mut fx = ProcessFixture::new();
    let (n, exec) = fx.add_scope(fx.root, "task", Some(ScopeDescriptor::scope("task-v2")));

    let err = fx.tree.attach(n, &mut fx.runtime, exec).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Contract(ContractViolation::IllegalTransition { .. })
    ));

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    fx.tree.attach(n, &mut fx.runtime, exec).unwrap();
    assert!(fx.tree.attach(n, &mut fx.runtime, exec).is_err());
    assert!(fx.tree.detach(n, &mut fx.runtime).is_err());
}

#[test]
fn attach_rejects_anchor_held_by_another_node() {
    let mut fx = ProcessFixture::new();
    let (n, _) = fx.add_scope(fx.root, "task", Some(ScopeDescriptor::scope("task-v2")));
    let (_, other_exec) = fx.add_scope(fx.root, "other", Some(ScopeDescriptor::scope("other-v2")));

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    let err = fx.tree.attach(n, &mut fx.runtime, other_exec).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Contract(ContractViolation::RepresentativeShared { .. })
    ));
    assert_eq!(fx.node(n).state(), AttachmentState::Detached);
}

#[test]
fn scope_node_cannot_attach_to_non_scope_execution() {
    let mut fx = ProcessFixture::new();
    let (n, _) = fx.add_scope(fx.root, "task", Some(ScopeDescriptor::scope("task-v2")));
    let concurrent = fx
        .runtime
        .create_execution(Some(fx.root_exec), false, true, None);

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    let err = fx.tree.attach(n, &mut fx.runtime, concurrent).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Contract(ContractViolation::RepresentativeNotScope { .. })
    ));
}

#[test]
fn detach_cancels_source_timers_and_attach_arms_target_timers() {
    let mut fx = ProcessFixture::new();
    let target = ScopeDescriptor::scope("task-v2")
        .with_timer(TimerDeclaration::new("task-v2-timeout", "PT10M"));
    let (n, exec) = fx.add_scope(fx.root, "task", Some(target));
    fx.runtime.add_timer(exec, "task-timeout", "PT5M");

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    assert!(fx.runtime.data().timers_at(exec).is_empty());

    fx.tree.attach(n, &mut fx.runtime, exec).unwrap();
    fx.tree.migrate_state(n, &mut fx.runtime).unwrap();

    // Arming again must not duplicate timers.
    let target = fx.node(n).target_scope().cloned().unwrap();
    fx.runtime.initialize_timer_declarations(exec, &target).unwrap();
    let data = fx.runtime.data();
    let timers = data.timers_at(exec);
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].activity_id.as_str(), "task-v2-timeout");
    assert_eq!(
        data.executions[&exec].activity_id.as_ref().map(|a| a.as_str()),
        Some("task-v2")
    );
}

#[test]
fn non_scope_node_leaves_parent_timers_alone() {
    let mut fx = ProcessFixture::new();
    let (n, exec) = fx.add_non_scope(fx.root, "task", true);
    fx.runtime.add_timer(fx.root_exec, "process-deadline", "P1D");

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    fx.tree.attach(n, &mut fx.runtime, exec).unwrap();

    assert_eq!(fx.runtime.data().timers_at(fx.root_exec).len(), 1);
}

#[test]
fn detaching_stand_in_nodes_cancels_their_own_timers() {
    let mut fx = ProcessFixture::new();
    let (task, task_exec) = fx.add_non_scope(fx.root, "timerCatch", true);
    let (cont, cont_exec) = fx.add_transition(fx.root, "asyncAfter", true);
    fx.runtime.add_timer(task_exec, "timerCatch", "PT15M");
    fx.runtime.add_timer(cont_exec, "asyncAfter", "PT30S");
    fx.runtime.add_timer(fx.root_exec, "process-deadline", "P1D");

    fx.tree.detach(task, &mut fx.runtime).unwrap();
    fx.tree.detach(cont, &mut fx.runtime).unwrap();

    let data = fx.runtime.data();
    assert!(data.timers_at(task_exec).is_empty());
    assert!(data.timers_at(cont_exec).is_empty());
    assert_eq!(data.timers_at(fx.root_exec).len(), 1);
}

#[test]
fn non_scope_node_needs_concurrent_stand_in() {
    let mut fx = ProcessFixture::new();
    let (n, _) = fx.add_non_scope(fx.root, "task", true);
    let scope_exec = fx
        .runtime
        .create_execution(Some(fx.root_exec), true, false, None);

    fx.tree.detach(n, &mut fx.runtime).unwrap();
    let err = fx.tree.attach(n, &mut fx.runtime, scope_exec).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Contract(ContractViolation::RepresentativeNotConcurrent { .. })
    ));
    assert_eq!(fx.node(n).state(), AttachmentState::Detached);
}

#[test]
fn migrating_node_cannot_be_removed() {
    let mut fx = ProcessFixture::new();
    let (n, _) = fx.add_scope(fx.root, "task", Some(ScopeDescriptor::scope("task-v2")));

    let err = fx
        .tree
        .remove_instance(n, &mut fx.runtime, Default::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Contract(ContractViolation::StillMigrating(_))
    ));
}

#[test]
fn lookup_of_unknown_node_fails() {
    let fx = ProcessFixture::new();
    let missing = flowshift_migration::InstanceId(99);
    assert!(matches!(
        fx.tree.get(missing),
        Err(MigrationError::Tree(TreeError::InstanceNotFound(_)))
    ));
}

#[test]
fn nearest_migrating_ancestor_skips_removed_parents() {
    let mut fx = ProcessFixture::new();
    let (gone, _) = fx.add_scope(fx.root, "gone", None);
    let (task, _) = fx.add_non_scope(gone, "task", true);

    assert_eq!(fx.tree.nearest_migrating_ancestor(task).unwrap(), Some(fx.root));
    assert_eq!(fx.tree.nearest_migrating_ancestor(fx.root).unwrap(), None);
}

proptest! {
    /// Random reparent sequences never produce a cycle or a dangling back-reference.
    #[test]
    fn prop_reparenting_keeps_tree_acyclic(
        moves in proptest::collection::vec((0usize..8, proptest::option::of(0usize..8)), 0..40)
    ) {
        let mut fx = ProcessFixture::new();
        let mut ids = vec![fx.root];
        for i in 0..7 {
            let parent = ids[i / 2];
            let (id, _) = fx.add_scope(parent, &format!("n{i}"), None);
            ids.push(id);
        }
        let tree: &mut MigratingInstanceTree = &mut fx.tree;

        for (child, parent) in moves {
            let _ = tree.reparent(ids[child], parent.map(|p| ids[p]));
            prop_assert!(tree.validate().is_ok());
        }
        prop_assert_eq!(tree.pre_order().len(), ids.len());
        prop_assert_eq!(tree.post_order().len(), ids.len());
    }
}
