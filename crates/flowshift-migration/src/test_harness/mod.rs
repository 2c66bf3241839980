// Test harness module
// In-memory runtime, dependent adapters and the migration simulator

pub mod simulator;

pub use simulator::*;

use crate::context::{CommandContext, EndOptions, ExecutionRepository, JobManager};
use crate::dependent::{DependentInstances, EmergingDependent, MigratingDependent, RemovingDependent};
use crate::driver::StructuralMove;
use crate::error::{CollaboratorError, MigrationError, Result};
use crate::instance::{InstanceKind, MigratingActivityInstance, MAX_REPLACEMENT_HOPS};
use crate::types::{ActivityId, ExecutionId, ExecutionInfo, MigrationInstruction, ScopeDescriptor};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub info: ExecutionInfo,
    pub activity_id: Option<ActivityId>,
    pub ended_with: Option<EndOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerJob {
    pub execution: ExecutionId,
    pub activity_id: ActivityId,
    pub due: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubscription {
    pub execution: ExecutionId,
    pub activity_id: ActivityId,
    pub event_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub execution: ExecutionId,
    pub name: String,
    pub value: serde_json::Value,
}

/// Everything a transaction rolls back
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeData {
    pub executions: BTreeMap<ExecutionId, ExecutionRecord>,
    pub timers: Vec<TimerJob>,
    pub subscriptions: BTreeMap<u64, EventSubscription>,
    pub variables: BTreeMap<u64, Variable>,
    next_entity_id: u64,
}

impl RuntimeData {
    fn next_id(&mut self) -> u64 {
        self.next_entity_id += 1;
        self.next_entity_id
    }

    fn record(&self, id: ExecutionId) -> std::result::Result<&ExecutionRecord, CollaboratorError> {
        self.executions
            .get(&id)
            .ok_or(CollaboratorError::ExecutionNotFound(id))
    }

    fn record_mut(
        &mut self,
        id: ExecutionId,
    ) -> std::result::Result<&mut ExecutionRecord, CollaboratorError> {
        self.executions
            .get_mut(&id)
            .ok_or(CollaboratorError::ExecutionNotFound(id))
    }

    /// Follow `replaced_by` to the live execution
    pub fn resolve_live(&self, id: ExecutionId) -> Option<ExecutionId> {
        let mut current = id;
        for _ in 0..MAX_REPLACEMENT_HOPS {
            let record = self.executions.get(&current)?;
            match record.info.replaced_by {
                Some(next) => current = next,
                None if record.info.is_live() => return Some(current),
                None => return None,
            }
        }
        None
    }

    pub fn timers_at(&self, execution: ExecutionId) -> Vec<&TimerJob> {
        self.timers.iter().filter(|t| t.execution == execution).collect()
    }

    pub fn subscriptions_at(&self, execution: ExecutionId) -> Vec<&EventSubscription> {
        self.subscriptions
            .values()
            .filter(|s| s.execution == execution)
            .collect()
    }
}

/// Failure injection: the n-th collaborator call (1-based) fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_at_call: Option<usize>,
    pub calls: usize,
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub data: RuntimeData,
    pub faults: FaultPlan,
}

impl RuntimeState {
    fn check_fault(&mut self, operation: &str) -> std::result::Result<(), CollaboratorError> {
        self.faults.calls += 1;
        if self.faults.fail_at_call == Some(self.faults.calls) {
            return Err(CollaboratorError::Persistence(format!(
                "injected failure in {operation} (call {})",
                self.faults.calls
            )));
        }
        Ok(())
    }
}

pub type SharedRuntime = Arc<Mutex<RuntimeState>>;

/// In-memory execution tree, job manager and entity store
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuntime {
    shared: SharedRuntime,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for dependent adapters and the mover
    pub fn shared(&self) -> SharedRuntime {
        self.shared.clone()
    }

    pub fn data(&self) -> RuntimeData {
        self.shared.lock().data.clone()
    }

    pub fn inject_failure_at(&self, call: Option<usize>) {
        let mut state = self.shared.lock();
        state.faults = FaultPlan {
            fail_at_call: call,
            calls: 0,
        };
    }

    pub fn collaborator_calls(&self) -> usize {
        self.shared.lock().faults.calls
    }

    pub fn create_execution(
        &self,
        parent: Option<ExecutionId>,
        is_scope: bool,
        is_concurrent: bool,
        activity_id: Option<&str>,
    ) -> ExecutionId {
        let id = ExecutionId::new();
        let record = ExecutionRecord {
            info: ExecutionInfo {
                id,
                parent,
                is_scope,
                is_concurrent,
                is_ended: false,
                replaced_by: None,
            },
            activity_id: activity_id.map(ActivityId::new),
            ended_with: None,
        };
        self.shared.lock().data.executions.insert(id, record);
        id
    }

    pub fn add_timer(&self, execution: ExecutionId, activity_id: &str, due: &str) {
        self.shared.lock().data.timers.push(TimerJob {
            execution,
            activity_id: ActivityId::new(activity_id),
            due: due.to_string(),
        });
    }

    pub fn add_subscription(&self, execution: ExecutionId, activity_id: &str, event_name: &str) -> u64 {
        let mut state = self.shared.lock();
        let id = state.data.next_id();
        state.data.subscriptions.insert(
            id,
            EventSubscription {
                execution,
                activity_id: ActivityId::new(activity_id),
                event_name: event_name.to_string(),
            },
        );
        id
    }

    pub fn add_variable(&self, execution: ExecutionId, name: &str, value: serde_json::Value) -> u64 {
        let mut state = self.shared.lock();
        let id = state.data.next_id();
        state.data.variables.insert(
            id,
            Variable {
                execution,
                name: name.to_string(),
                value,
            },
        );
        id
    }

    /// Run `f` as one transaction; on error every change is rolled back
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.data();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "rolling back migration transaction");
                self.shared.lock().data = snapshot;
                Err(err)
            }
        }
    }
}

impl JobManager for InMemoryRuntime {
    fn cancel_timers(&mut self, execution: ExecutionId) -> std::result::Result<(), CollaboratorError> {
        let mut state = self.shared.lock();
        state.check_fault("cancel_timers")?;
        state.data.record(execution)?;
        state.data.timers.retain(|t| t.execution != execution);
        Ok(())
    }
}

impl ExecutionRepository for InMemoryRuntime {
    fn find(&self, execution: ExecutionId) -> Option<ExecutionInfo> {
        self.shared
            .lock()
            .data
            .executions
            .get(&execution)
            .map(|r| r.info.clone())
    }

    fn initialize_timer_declarations(
        &mut self,
        execution: ExecutionId,
        scope: &ScopeDescriptor,
    ) -> std::result::Result<(), CollaboratorError> {
        let mut state = self.shared.lock();
        state.check_fault("initialize_timer_declarations")?;
        state.data.record(execution)?;
        for declaration in &scope.timer_declarations {
            let armed = state
                .data
                .timers
                .iter()
                .any(|t| t.execution == execution && t.activity_id == declaration.activity_id);
            if !armed {
                state.data.timers.push(TimerJob {
                    execution,
                    activity_id: declaration.activity_id.clone(),
                    due: declaration.due.clone(),
                });
            }
        }
        Ok(())
    }

    fn rebind_activity(
        &mut self,
        execution: ExecutionId,
        scope: &ScopeDescriptor,
    ) -> std::result::Result<(), CollaboratorError> {
        let mut state = self.shared.lock();
        state.check_fault("rebind_activity")?;
        state.data.record_mut(execution)?.activity_id = Some(scope.activity_id.clone());
        Ok(())
    }

    fn end_execution(
        &mut self,
        execution: ExecutionId,
        options: EndOptions,
    ) -> std::result::Result<(), CollaboratorError> {
        let mut state = self.shared.lock();
        state.check_fault("end_execution")?;
        let record = state.data.record_mut(execution)?;
        if record.info.is_ended {
            return Err(CollaboratorError::Rejected(format!(
                "execution {execution} already ended"
            )));
        }
        record.info.is_ended = true;
        record.ended_with = Some(options);
        state.data.timers.retain(|t| t.execution != execution);
        state.data.subscriptions.retain(|_, s| s.execution != execution);
        state.data.variables.retain(|_, v| v.execution != execution);
        Ok(())
    }
}

impl CommandContext for InMemoryRuntime {
    fn jobs(&mut self) -> &mut dyn JobManager {
        self
    }

    fn executions(&mut self) -> &mut dyn ExecutionRepository {
        self
    }
}

/// Structural move over the in-memory tree.
///
/// Scope executions are reused and re-parented. Non-scope and transition
/// stand-ins are replaced by a fresh concurrent execution, and the old one
/// records its replacement.
#[derive(Debug, Clone)]
pub struct InMemoryMover {
    shared: SharedRuntime,
}

impl InMemoryMover {
    pub fn new(runtime: &InMemoryRuntime) -> Self {
        Self {
            shared: runtime.shared(),
        }
    }
}

impl StructuralMove for InMemoryMover {
    fn relocate(
        &mut self,
        _ctx: &mut dyn CommandContext,
        instance: &MigratingActivityInstance,
        new_parent_execution: Option<ExecutionId>,
    ) -> std::result::Result<ExecutionId, CollaboratorError> {
        let mut state = self.shared.lock();
        state.check_fault("relocate")?;
        let current = instance.representative_execution();
        match instance.kind() {
            InstanceKind::ProcessRoot | InstanceKind::Scope => {
                state.data.record_mut(current)?.info.parent = new_parent_execution;
                Ok(current)
            }
            InstanceKind::NonScope | InstanceKind::Transition => {
                let replacement = ExecutionId::new();
                let old = state.data.record_mut(current)?;
                old.info.is_ended = true;
                old.info.replaced_by = Some(replacement);
                let activity_id = old.activity_id.clone();
                state.data.executions.insert(
                    replacement,
                    ExecutionRecord {
                        info: ExecutionInfo {
                            id: replacement,
                            parent: new_parent_execution,
                            is_scope: false,
                            is_concurrent: true,
                            is_ended: false,
                            replaced_by: None,
                        },
                        activity_id,
                        ended_with: None,
                    },
                );
                Ok(replacement)
            }
        }
    }
}

fn entity_error(operation: &'static str, subject: &str, err: CollaboratorError) -> MigrationError {
    MigrationError::collaborator(operation, subject, err)
}

/// Variable that follows its owning execution across the migration
#[derive(Debug)]
pub struct VariableMigration {
    shared: SharedRuntime,
    variable_id: u64,
}

impl VariableMigration {
    pub fn new(runtime: &InMemoryRuntime, variable_id: u64) -> Self {
        Self {
            shared: runtime.shared(),
            variable_id,
        }
    }
}

impl MigratingDependent for VariableMigration {
    fn migrate_state(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        let subject = format!("variable {}", self.variable_id);
        let mut state = self.shared.lock();
        state
            .check_fault("migrate_variable")
            .map_err(|e| entity_error("migrate_state", &subject, e))?;
        let data = &mut state.data;
        let owner = data
            .variables
            .get(&self.variable_id)
            .map(|v| v.execution)
            .ok_or_else(|| {
                entity_error("migrate_state", &subject, CollaboratorError::Persistence("variable missing".into()))
            })?;
        let live = data.resolve_live(owner).ok_or_else(|| {
            entity_error("migrate_state", &subject, CollaboratorError::ExecutionNotFound(owner))
        })?;
        if let Some(variable) = data.variables.get_mut(&self.variable_id) {
            variable.execution = live;
        }
        Ok(())
    }
}

/// Event subscription kept across the migration, pointed at the target
/// activity of its instruction
#[derive(Debug)]
pub struct SubscriptionMigration {
    shared: SharedRuntime,
    subscription_id: u64,
    instruction: MigrationInstruction,
    target_event_name: Option<String>,
}

impl SubscriptionMigration {
    pub fn new(
        runtime: &InMemoryRuntime,
        subscription_id: u64,
        instruction: &MigrationInstruction,
    ) -> Self {
        Self {
            shared: runtime.shared(),
            subscription_id,
            instruction: instruction.clone(),
            target_event_name: None,
        }
    }

    /// Event name the target definition declares. Applied only when the
    /// instruction asks for event trigger updates.
    #[must_use]
    pub fn with_target_trigger(mut self, event_name: &str) -> Self {
        self.target_event_name = Some(event_name.to_string());
        self
    }
}

impl MigratingDependent for SubscriptionMigration {
    fn migrate_state(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        let subject = format!("subscription {}", self.subscription_id);
        let mut state = self.shared.lock();
        state
            .check_fault("migrate_subscription")
            .map_err(|e| entity_error("migrate_state", &subject, e))?;
        let data = &mut state.data;
        let owner = data
            .subscriptions
            .get(&self.subscription_id)
            .map(|s| s.execution)
            .ok_or_else(|| {
                entity_error("migrate_state", &subject, CollaboratorError::Persistence("subscription missing".into()))
            })?;
        let live = data.resolve_live(owner).ok_or_else(|| {
            entity_error("migrate_state", &subject, CollaboratorError::ExecutionNotFound(owner))
        })?;
        if let Some(subscription) = data.subscriptions.get_mut(&self.subscription_id) {
            subscription.execution = live;
            subscription.activity_id = self.instruction.target_activity_id.clone();
            if self.instruction.update_event_trigger {
                if let Some(name) = &self.target_event_name {
                    subscription.event_name = name.clone();
                }
            }
        }
        Ok(())
    }
}

/// Event subscription with no target-side counterpart
#[derive(Debug)]
pub struct SubscriptionRemoval {
    shared: SharedRuntime,
    subscription_id: u64,
}

impl SubscriptionRemoval {
    pub fn new(runtime: &InMemoryRuntime, subscription_id: u64) -> Self {
        Self {
            shared: runtime.shared(),
            subscription_id,
        }
    }
}

impl RemovingDependent for SubscriptionRemoval {
    fn remove(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        let subject = format!("subscription {}", self.subscription_id);
        let mut state = self.shared.lock();
        state
            .check_fault("remove_subscription")
            .map_err(|e| entity_error("remove", &subject, e))?;
        state.data.subscriptions.remove(&self.subscription_id);
        Ok(())
    }
}

/// Event subscription declared only by the target scope
#[derive(Debug)]
pub struct EmergingSubscription {
    shared: SharedRuntime,
    activity_id: ActivityId,
    event_name: String,
    created: Option<u64>,
}

impl EmergingSubscription {
    pub fn new(runtime: &InMemoryRuntime, activity_id: &str, event_name: &str) -> Self {
        Self {
            shared: runtime.shared(),
            activity_id: ActivityId::new(activity_id),
            event_name: event_name.to_string(),
            created: None,
        }
    }

    pub fn created(&self) -> Option<u64> {
        self.created
    }
}

impl EmergingDependent for EmergingSubscription {
    fn create(&mut self, _ctx: &mut dyn CommandContext, anchor: ExecutionId) -> Result<()> {
        let subject = format!("subscription on {}", self.activity_id);
        let mut state = self.shared.lock();
        state
            .check_fault("create_subscription")
            .map_err(|e| entity_error("create", &subject, e))?;
        state
            .data
            .record(anchor)
            .map_err(|e| entity_error("create", &subject, e))?;
        let id = state.data.next_id();
        state.data.subscriptions.insert(
            id,
            EventSubscription {
                execution: anchor,
                activity_id: self.activity_id.clone(),
                event_name: self.event_name.clone(),
            },
        );
        self.created = Some(id);
        Ok(())
    }
}

// ----- recording handlers -----

/// Call observed by a [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerCall {
    MigrateState(String),
    MigrateDependents(String),
    Create { label: String, anchor: ExecutionId },
    Remove(String),
}

pub type CallLog = Arc<Mutex<Vec<HandlerCall>>>;

/// Dependent handler that logs every call and can be told to fail
#[derive(Debug)]
pub struct RecordingHandler {
    label: String,
    log: CallLog,
    fail: bool,
    nested: DependentInstances,
}

impl RecordingHandler {
    pub fn new(label: &str, log: &CallLog) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
            fail: false,
            nested: DependentInstances::new(),
        }
    }

    /// Every call fails with a persistence error
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Own a further migrating dependent
    #[must_use]
    pub fn with_nested(mut self, dependent: Box<dyn MigratingDependent>) -> Self {
        self.nested.add_migrating(dependent);
        self
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.fail {
            return Err(MigrationError::collaborator(
                operation,
                &self.label,
                CollaboratorError::Persistence("recording handler told to fail".into()),
            ));
        }
        Ok(())
    }
}

impl MigratingDependent for RecordingHandler {
    fn migrate_state(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        self.check("migrate_state")?;
        self.log.lock().push(HandlerCall::MigrateState(self.label.clone()));
        Ok(())
    }

    fn migrate_dependent_entities(&mut self, ctx: &mut dyn CommandContext) -> Result<()> {
        self.log
            .lock()
            .push(HandlerCall::MigrateDependents(self.label.clone()));
        // Nested dependents never emerge, the anchor is never handed out.
        let anchor = ExecutionId::new();
        self.nested.migrate(ctx, |_| Ok(anchor))?;
        Ok(())
    }
}

impl RemovingDependent for RecordingHandler {
    fn remove(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        self.check("remove")?;
        self.log.lock().push(HandlerCall::Remove(self.label.clone()));
        Ok(())
    }
}

impl EmergingDependent for RecordingHandler {
    fn create(&mut self, _ctx: &mut dyn CommandContext, anchor: ExecutionId) -> Result<()> {
        self.check("create")?;
        self.log.lock().push(HandlerCall::Create {
            label: self.label.clone(),
            anchor,
        });
        Ok(())
    }
}
