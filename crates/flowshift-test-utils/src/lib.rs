//! Testing utilities for the Flowshift workspace
//!
//! Process-instance fixtures on top of the in-memory runtime.

#![allow(missing_docs)]

use flowshift_migration::driver::{MigrationDriver, MigrationReport};
use flowshift_migration::test_harness::{CallLog, InMemoryMover, InMemoryRuntime};
use flowshift_migration::{
    ActivityInstanceSnapshot, ExecutionId, InstanceId, MigrationInstruction, Result,
    ScopeDescriptor,
};
use flowshift_migration::config::MigrationConfig;
use flowshift_migration::instance::MigratingActivityInstance;
use flowshift_migration::tree::MigratingInstanceTree;

pub fn snapshot(name: &str, exec: ExecutionId) -> ActivityInstanceSnapshot {
    ActivityInstanceSnapshot::new(format!("{name}:1"), name, vec![exec])
}

pub fn target_name(name: &str) -> String {
    format!("{name}-v2")
}

pub fn instruction(name: &str) -> MigrationInstruction {
    MigrationInstruction::new(name, target_name(name))
}

pub fn call_log() -> CallLog {
    CallLog::default()
}

/// Scope node at a fresh scope execution below `parent_exec`
pub fn scope_node(
    runtime: &InMemoryRuntime,
    parent_exec: ExecutionId,
    name: &str,
    target: Option<ScopeDescriptor>,
) -> (MigratingActivityInstance, ExecutionId) {
    let exec = runtime.create_execution(Some(parent_exec), true, false, Some(name));
    let instruction = target.as_ref().map(|_| instruction(name));
    let node = MigratingActivityInstance::new(
        snapshot(name, exec),
        exec,
        ScopeDescriptor::scope(name),
        target,
        instruction,
    );
    (node, exec)
}

/// Non-scope node at a fresh concurrent execution below `parent_exec`
pub fn non_scope_node(
    runtime: &InMemoryRuntime,
    parent_exec: ExecutionId,
    name: &str,
    migrates: bool,
) -> (MigratingActivityInstance, ExecutionId) {
    let exec = runtime.create_execution(Some(parent_exec), false, true, Some(name));
    let node = MigratingActivityInstance::new(
        snapshot(name, exec),
        exec,
        ScopeDescriptor::non_scope(name),
        migrates.then(|| ScopeDescriptor::non_scope(target_name(name))),
        migrates.then(|| instruction(name)),
    );
    (node, exec)
}

/// Transition node at a fresh concurrent execution below `parent_exec`
pub fn transition_node(
    runtime: &InMemoryRuntime,
    parent_exec: ExecutionId,
    name: &str,
    migrates: bool,
) -> (MigratingActivityInstance, ExecutionId) {
    let exec = runtime.create_execution(Some(parent_exec), false, true, Some(name));
    let node = MigratingActivityInstance::transition(
        snapshot(name, exec),
        exec,
        ScopeDescriptor::non_scope(name),
        migrates.then(|| ScopeDescriptor::non_scope(target_name(name))),
        migrates.then(|| instruction(name)),
    );
    (node, exec)
}

/// A process instance with a migrating root, ready to be filled
pub struct ProcessFixture {
    pub runtime: InMemoryRuntime,
    pub tree: MigratingInstanceTree,
    pub root: InstanceId,
    pub root_exec: ExecutionId,
}

impl ProcessFixture {
    pub fn new() -> Self {
        Self::with_target(ScopeDescriptor::process("process-v2"))
    }

    pub fn with_target(target: ScopeDescriptor) -> Self {
        let runtime = InMemoryRuntime::new();
        let root_exec = runtime.create_execution(None, true, false, Some("process"));
        let node = MigratingActivityInstance::new(
            snapshot("process", root_exec),
            root_exec,
            ScopeDescriptor::process("process"),
            Some(target),
            None,
        );
        let mut tree = MigratingInstanceTree::new();
        let root = tree.insert_root(node).unwrap();
        Self {
            runtime,
            tree,
            root,
            root_exec,
        }
    }

    fn exec_of(&self, id: InstanceId) -> ExecutionId {
        self.tree.get(id).unwrap().representative_execution()
    }

    pub fn add_scope(
        &mut self,
        parent: InstanceId,
        name: &str,
        target: Option<ScopeDescriptor>,
    ) -> (InstanceId, ExecutionId) {
        let (node, exec) = scope_node(&self.runtime, self.exec_of(parent), name, target);
        (self.tree.insert_child(parent, node).unwrap(), exec)
    }

    pub fn add_non_scope(
        &mut self,
        parent: InstanceId,
        name: &str,
        migrates: bool,
    ) -> (InstanceId, ExecutionId) {
        let (node, exec) = non_scope_node(&self.runtime, self.exec_of(parent), name, migrates);
        (self.tree.insert_child(parent, node).unwrap(), exec)
    }

    pub fn add_transition(
        &mut self,
        parent: InstanceId,
        name: &str,
        migrates: bool,
    ) -> (InstanceId, ExecutionId) {
        let (node, exec) = transition_node(&self.runtime, self.exec_of(parent), name, migrates);
        (self.tree.insert_child(parent, node).unwrap(), exec)
    }

    pub fn node_mut(&mut self, id: InstanceId) -> &mut MigratingActivityInstance {
        self.tree.get_mut(id).unwrap()
    }

    pub fn node(&self, id: InstanceId) -> &MigratingActivityInstance {
        self.tree.get(id).unwrap()
    }

    /// Run the driver inside a runtime transaction
    pub fn migrate_with(&mut self, driver: &MigrationDriver) -> Result<MigrationReport> {
        let mut mover = InMemoryMover::new(&self.runtime);
        let tree = &mut self.tree;
        self.runtime
            .transaction(|rt| driver.execute(tree, rt, &mut mover))
    }

    pub fn migrate(&mut self) -> Result<MigrationReport> {
        let driver = MigrationDriver::new(MigrationConfig::default()).unwrap();
        self.migrate_with(&driver)
    }
}

impl Default for ProcessFixture {
    fn default() -> Self {
        Self::new()
    }
}
