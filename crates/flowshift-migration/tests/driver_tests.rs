use flowshift_migration::config::MigrationConfig;
use flowshift_migration::context::EndOptions;
use flowshift_migration::driver::MigrationDriver;
use flowshift_migration::error::{MigrationError, TreeError};
use flowshift_migration::journal::JournalAction;
use flowshift_migration::test_harness::{
    EmergingSubscription, SubscriptionMigration, SubscriptionRemoval, VariableMigration,
};
use flowshift_migration::types::{
    AttachmentState, MigrationInstruction, ScopeDescriptor, TimerDeclaration,
};
use flowshift_test_utils::ProcessFixture;
use pretty_assertions::assert_eq;

#[test]
fn migrates_a_mixed_process_instance() {
    let mut fx = ProcessFixture::new();
    let (sub, sub_exec) = fx.add_scope(
        fx.root,
        "sub",
        Some(ScopeDescriptor::scope("sub-v2").with_timer(TimerDeclaration::new("sub-v2-timer", "PT1H"))),
    );
    let (task, task_exec) = fx.add_non_scope(sub, "task", true);
    let (gone, gone_exec) = fx.add_scope(fx.root, "gone", None);
    let (inner, _) = fx.add_non_scope(gone, "inner", true);
    let (waiting, waiting_exec) = fx.add_transition(fx.root, "waiting", false);

    let var = fx.runtime.add_variable(task_exec, "amount", serde_json::json!(42));
    let kept = fx.runtime.add_subscription(task_exec, "task-msg", "order");
    let dropped = fx.runtime.add_subscription(gone_exec, "gone-msg", "cancel");
    let runtime = fx.runtime.clone();
    fx.node_mut(task)
        .add_migrating_dependent_instance(Box::new(VariableMigration::new(&runtime, var)));
    let kept_instruction = MigrationInstruction::new("task-msg", "task-v2-msg").updating_event_trigger();
    fx.node_mut(task).add_migrating_dependent_instance(Box::new(
        SubscriptionMigration::new(&runtime, kept, &kept_instruction).with_target_trigger("order-v2"),
    ));
    fx.node_mut(gone)
        .add_removing_dependent_instance(Box::new(SubscriptionRemoval::new(&runtime, dropped)));
    fx.node_mut(sub).add_emerging_dependent_instance(Box::new(EmergingSubscription::new(
        &runtime,
        "sub-v2-signal",
        "alarm",
    )));

    let report = fx.migrate().unwrap();

    assert_eq!(report.detached, 4);
    assert_eq!(report.attached, 4);
    assert_eq!(report.instances_removed, 2);
    assert_eq!(report.dependents_migrated, 2);
    assert_eq!(report.dependents_emerged, 1);
    assert_eq!(report.unmapped_removed, 1);

    for id in [fx.root, sub, task, inner] {
        assert_eq!(fx.node(id).state(), AttachmentState::Reattached);
    }
    assert_eq!(fx.node(gone).state(), AttachmentState::Removed);
    assert_eq!(fx.node(waiting).state(), AttachmentState::Removed);

    // The removed scope no longer sits between the root and its migrating child.
    assert_eq!(fx.tree.parent(inner).unwrap(), Some(fx.root));
    assert!(fx.tree.validate().is_ok());

    let data = fx.runtime.data();
    let task_anchor = fx.node(task).representative_execution();
    assert_ne!(task_anchor, task_exec);
    assert_eq!(data.executions[&task_exec].info.replaced_by, Some(task_anchor));
    assert_eq!(data.executions[&task_anchor].info.parent, Some(sub_exec));
    assert_eq!(data.variables[&var].execution, task_anchor);
    assert_eq!(data.subscriptions[&kept].execution, task_anchor);
    assert_eq!(data.subscriptions[&kept].activity_id.as_str(), "task-v2-msg");
    assert_eq!(data.subscriptions[&kept].event_name, "order-v2");
    assert!(!data.subscriptions.contains_key(&dropped));

    let inner_anchor = fx.node(inner).representative_execution();
    assert_eq!(data.executions[&inner_anchor].info.parent, Some(fx.root_exec));

    assert!(data.executions[&gone_exec].info.is_ended);
    assert!(data.executions[&waiting_exec].info.is_ended);

    assert_eq!(data.timers_at(sub_exec).len(), 1);
    let signals = data.subscriptions_at(sub_exec);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].event_name, "alarm");
}

#[test]
fn journal_records_node_steps_in_order() {
    let mut fx = ProcessFixture::new();
    let (task, _) = fx.add_non_scope(fx.root, "task", true);
    let (gone, _) = fx.add_non_scope(fx.root, "gone", false);
    let driver = MigrationDriver::new(MigrationConfig::default()).unwrap();

    fx.migrate_with(&driver).unwrap();

    let journal = driver.journal();
    assert!(journal.verify_integrity().is_ok());
    assert_eq!(
        journal.actions_for(task),
        vec![
            JournalAction::Detached,
            JournalAction::Relocated,
            JournalAction::Attached,
            JournalAction::StateMigrated,
            JournalAction::DependentsMigrated,
        ]
    );
    assert_eq!(journal.actions_for(gone), vec![JournalAction::InstanceRemoved]);

    let entries = journal.entries();
    assert_eq!(entries.first().map(|e| e.action), Some(JournalAction::MigrationStarted));
    assert_eq!(entries.last().map(|e| e.action), Some(JournalAction::MigrationCompleted));
}

#[test]
fn journal_can_be_disabled() {
    let mut fx = ProcessFixture::new();
    fx.add_non_scope(fx.root, "task", true);
    let driver = MigrationDriver::new(MigrationConfig::new().with_journal(false)).unwrap();

    fx.migrate_with(&driver).unwrap();
    assert!(driver.journal().is_empty());
}

#[test]
fn injected_failure_rolls_back_everything() {
    let mut fx = ProcessFixture::new();
    let (sub, sub_exec) = fx.add_scope(fx.root, "sub", Some(ScopeDescriptor::scope("sub-v2")));
    fx.add_non_scope(sub, "task", true);
    fx.add_scope(fx.root, "gone", None);
    fx.runtime.add_timer(sub_exec, "sub-timer", "PT5M");
    let before = fx.runtime.data();

    // Detaching root, sub and task succeeds, relocating the root fails.
    fx.runtime.inject_failure_at(Some(4));
    let err = fx.migrate().unwrap_err();

    assert!(matches!(err, MigrationError::Collaborator { .. }));
    assert!(!err.is_retryable());
    assert_eq!(fx.runtime.data(), before);
}

#[test]
fn failed_migration_closes_its_journal_entries() {
    let mut fx = ProcessFixture::new();
    let (sub, _) = fx.add_scope(fx.root, "sub", Some(ScopeDescriptor::scope("sub-v2")));
    fx.add_non_scope(sub, "task", true);
    let driver = MigrationDriver::new(MigrationConfig::default()).unwrap();

    fx.runtime.inject_failure_at(Some(4));
    assert!(fx.migrate_with(&driver).is_err());

    let journal = driver.journal();
    assert!(journal.verify_integrity().is_ok());
    let entries = journal.entries();
    assert_eq!(entries.first().map(|e| e.action), Some(JournalAction::MigrationStarted));
    let last = entries.last().unwrap();
    assert_eq!(last.action, JournalAction::MigrationFailed);
    assert!(last.detail.contains("relocate"));
    assert_eq!(journal.entries_for(last.migration_id).len(), entries.len());
    assert!(!entries
        .iter()
        .any(|e| e.action == JournalAction::MigrationCompleted));
}

#[test]
fn migrated_stand_in_carries_no_source_timers() {
    let mut fx = ProcessFixture::new();
    let (catch, exec) = fx.add_non_scope(fx.root, "timerCatch", true);
    let (retry, retry_exec) = fx.add_transition(fx.root, "retry", true);
    fx.runtime.add_timer(exec, "timerCatch", "PT15M");
    fx.runtime.add_timer(retry_exec, "retry", "PT30S");

    fx.migrate().unwrap();

    let data = fx.runtime.data();
    assert!(data.executions[&exec].info.is_ended);
    assert!(data.timers_at(exec).is_empty());
    assert!(data.timers_at(retry_exec).is_empty());
    assert!(data.timers_at(fx.node(catch).representative_execution()).is_empty());
    assert!(data.timers_at(fx.node(retry).representative_execution()).is_empty());
    assert!(data
        .timers
        .iter()
        .all(|t| data.executions[&t.execution].info.is_live()));
}

#[test]
fn removed_instances_end_with_configured_options() {
    let mut fx = ProcessFixture::new();
    let (_, gone_exec) = fx.add_scope(fx.root, "gone", None);
    let config = MigrationConfig::new()
        .with_skip_custom_listeners(true)
        .with_skip_io_mappings(true);
    let driver = MigrationDriver::new(config).unwrap();

    fx.migrate_with(&driver).unwrap();

    assert_eq!(
        fx.runtime.data().executions[&gone_exec].ended_with,
        Some(EndOptions {
            skip_custom_listeners: true,
            skip_io_mappings: true,
        })
    );
}

#[test]
fn tree_deeper_than_configured_limit_is_rejected() {
    let mut fx = ProcessFixture::new();
    let (sub, _) = fx.add_scope(fx.root, "sub", Some(ScopeDescriptor::scope("sub-v2")));
    fx.add_non_scope(sub, "task", true);
    let driver = MigrationDriver::new(MigrationConfig::new().with_max_tree_depth(2)).unwrap();
    let before = fx.runtime.data();

    let err = fx.migrate_with(&driver).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Tree(TreeError::DepthExceeded { limit: 2 })
    ));
    assert_eq!(fx.runtime.data(), before);
    assert_eq!(fx.node(sub).state(), AttachmentState::Attached);
}

#[test]
fn invalid_config_is_rejected() {
    let err = MigrationDriver::new(MigrationConfig::new().with_max_tree_depth(0)).unwrap_err();
    assert!(matches!(err, MigrationError::Config(_)));
}
