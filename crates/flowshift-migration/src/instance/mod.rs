//! Migrating activity instance
//!
//! One node per activity instance under migration. A node knows its source
//! and target scope, the single execution that currently represents it, and
//! the dependent handlers classified for it. Every migrating node passes
//! through exactly one detach/attach cycle:
//!
//! ```text
//! Attached --detach_state--> Detached --attach_state--> Reattached
//!     \                          |
//!      `------- remove ----------'--> Removed
//! ```
//!
//! The variants differ only in how the representative execution is found
//! and in whether the node arms target timers; the dependent cascade is
//! shared.

use crate::context::{CommandContext, EndOptions};
use crate::dependent::{
    CascadeOutcome, DependentInstances, EmergingDependent, MigratingDependent, RemovingDependent,
};
use crate::error::{ContractViolation, MigrationError, Result};
use crate::state_machine;
use crate::types::{
    ActivityInstanceSnapshot, AttachmentState, ExecutionId, InstanceId, MigrationInstruction,
    ScopeDescriptor, ScopeKind,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Upper bound on `replaced_by` hops while resolving a stand-in execution
pub(crate) const MAX_REPLACEMENT_HOPS: usize = 64;

/// Concrete node variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    /// The process instance itself
    ProcessRoot,
    /// Activity owning its own scope execution
    Scope,
    /// Activity represented by its own concurrent stand-in execution
    NonScope,
    /// Asynchronous continuation waiting before or after an activity
    Transition,
}

impl InstanceKind {
    /// Variant implied by the source scope
    #[must_use]
    pub fn for_scope(scope: &ScopeDescriptor) -> Self {
        match scope.kind {
            ScopeKind::ProcessDefinition => Self::ProcessRoot,
            ScopeKind::Scope => Self::Scope,
            ScopeKind::NonScope => Self::NonScope,
        }
    }

    /// Whether the target scope's timer declarations are armed at this
    /// node's execution on attach
    #[inline]
    #[must_use]
    pub fn owns_timers(self) -> bool {
        matches!(self, Self::ProcessRoot | Self::Scope)
    }
}

/// A node of the migrating instance tree
#[derive(Debug)]
pub struct MigratingActivityInstance {
    kind: InstanceKind,
    migration_instruction: Option<MigrationInstruction>,
    activity_instance: ActivityInstanceSnapshot,
    representative_execution: ExecutionId,
    source_scope: ScopeDescriptor,
    target_scope: Option<ScopeDescriptor>,
    state: AttachmentState,
    dependents: DependentInstances,
    dependents_migrated: bool,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) children: BTreeSet<InstanceId>,
}

impl MigratingActivityInstance {
    /// Create a node whose variant follows the source scope
    pub fn new(
        activity_instance: ActivityInstanceSnapshot,
        representative_execution: ExecutionId,
        source_scope: ScopeDescriptor,
        target_scope: Option<ScopeDescriptor>,
        migration_instruction: Option<MigrationInstruction>,
    ) -> Self {
        let kind = InstanceKind::for_scope(&source_scope);
        Self::with_kind(
            kind,
            activity_instance,
            representative_execution,
            source_scope,
            target_scope,
            migration_instruction,
        )
    }

    /// Create a transition (async continuation) node
    pub fn transition(
        activity_instance: ActivityInstanceSnapshot,
        representative_execution: ExecutionId,
        source_scope: ScopeDescriptor,
        target_scope: Option<ScopeDescriptor>,
        migration_instruction: Option<MigrationInstruction>,
    ) -> Self {
        Self::with_kind(
            InstanceKind::Transition,
            activity_instance,
            representative_execution,
            source_scope,
            target_scope,
            migration_instruction,
        )
    }

    fn with_kind(
        kind: InstanceKind,
        activity_instance: ActivityInstanceSnapshot,
        representative_execution: ExecutionId,
        source_scope: ScopeDescriptor,
        target_scope: Option<ScopeDescriptor>,
        migration_instruction: Option<MigrationInstruction>,
    ) -> Self {
        Self {
            kind,
            migration_instruction,
            activity_instance,
            representative_execution,
            source_scope,
            target_scope,
            state: AttachmentState::Attached,
            dependents: DependentInstances::new(),
            dependents_migrated: false,
            parent: None,
            children: BTreeSet::new(),
        }
    }

    // ----- dependent registration -----

    pub fn add_migrating_dependent_instance(&mut self, dependent: Box<dyn MigratingDependent>) {
        self.dependents.add_migrating(dependent);
    }

    pub fn add_removing_dependent_instance(&mut self, dependent: Box<dyn RemovingDependent>) {
        self.dependents.add_removing(dependent);
    }

    pub fn add_emerging_dependent_instance(&mut self, dependent: Box<dyn EmergingDependent>) {
        self.dependents.add_emerging(dependent);
    }

    // ----- read-only views -----

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    pub fn state(&self) -> AttachmentState {
        self.state
    }

    pub fn activity_instance(&self) -> &ActivityInstanceSnapshot {
        &self.activity_instance
    }

    pub fn source_scope(&self) -> &ScopeDescriptor {
        &self.source_scope
    }

    pub fn target_scope(&self) -> Option<&ScopeDescriptor> {
        self.target_scope.as_ref()
    }

    pub fn migration_instruction(&self) -> Option<&MigrationInstruction> {
        self.migration_instruction.as_ref()
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<InstanceId> {
        &self.children
    }

    /// Execution currently anchoring this node
    pub fn representative_execution(&self) -> ExecutionId {
        self.representative_execution
    }

    pub fn dependents(&self) -> &DependentInstances {
        &self.dependents
    }

    /// Whether the node moves to the target definition
    #[inline]
    #[must_use]
    pub fn migrates(&self) -> bool {
        self.target_scope.is_some()
    }

    /// Whether the node still holds its representative execution
    #[inline]
    #[must_use]
    pub fn holds_anchor(&self) -> bool {
        !matches!(self.state, AttachmentState::Removed)
    }

    // ----- state machine -----

    fn transition_to(&self, to: AttachmentState) -> Result<()> {
        state_machine::validate_transition(self.state, to).map_err(|t| {
            warn!(
                instance = %self.activity_instance.id,
                from = %t.from,
                to = %t.to,
                "rejected attachment transition"
            );
            MigrationError::from(ContractViolation::IllegalTransition {
                instance: self.activity_instance.id.clone(),
                from: t.from,
                to: t.to,
            })
        })
    }

    /// Lift the node's runtime footprint from its source position.
    ///
    /// Every variant cancels the timers anchored at its representative
    /// execution, stand-ins included. Children are not touched; the driver
    /// orders the subtree.
    pub fn detach_state(&mut self, ctx: &mut dyn CommandContext) -> Result<()> {
        self.transition_to(AttachmentState::Detached)?;
        self.remove_timer_jobs(ctx, self.representative_execution)?;
        self.state = AttachmentState::Detached;
        debug!(
            instance = %self.activity_instance.id,
            execution = %self.representative_execution,
            "detached"
        );
        Ok(())
    }

    /// Re-establish the node at its target position.
    ///
    /// The new execution becomes the representative; scope-like variants
    /// arm the target scope's timer declarations there.
    pub fn attach_state(
        &mut self,
        ctx: &mut dyn CommandContext,
        new_scope_execution: ExecutionId,
    ) -> Result<()> {
        self.transition_to(AttachmentState::Reattached)?;
        let target_scope = self
            .target_scope
            .clone()
            .ok_or_else(|| ContractViolation::NotMigrating(self.activity_instance.id.clone()))?;

        let info = ctx
            .executions()
            .find(new_scope_execution)
            .filter(|info| info.is_live())
            .ok_or_else(|| ContractViolation::MissingRepresentativeExecution {
                instance: self.activity_instance.id.clone(),
                execution: new_scope_execution,
            })?;
        if self.kind.owns_timers() && !info.is_scope {
            return Err(ContractViolation::RepresentativeNotScope {
                instance: self.activity_instance.id.clone(),
                execution: new_scope_execution,
            }
            .into());
        }
        if !self.kind.owns_timers() && !info.is_concurrent {
            return Err(ContractViolation::RepresentativeNotConcurrent {
                instance: self.activity_instance.id.clone(),
                execution: new_scope_execution,
            }
            .into());
        }

        if self.kind.owns_timers() {
            self.create_missing_timer_jobs(ctx, new_scope_execution, &target_scope)?;
        }
        self.representative_execution = new_scope_execution;
        self.state = AttachmentState::Reattached;
        debug!(
            instance = %self.activity_instance.id,
            execution = %new_scope_execution,
            target = %target_scope.activity_id,
            "attached"
        );
        Ok(())
    }

    /// Point the representative execution at the target activity
    pub fn migrate_state(&mut self, ctx: &mut dyn CommandContext) -> Result<()> {
        if self.state != AttachmentState::Reattached {
            return Err(ContractViolation::NotReattached(self.activity_instance.id.clone()).into());
        }
        let target_scope = self
            .target_scope
            .as_ref()
            .ok_or_else(|| ContractViolation::NotMigrating(self.activity_instance.id.clone()))?;
        ctx.executions()
            .rebind_activity(self.representative_execution, target_scope)
            .map_err(|e| MigrationError::collaborator("migrate_state", &self.activity_instance.id, e))
    }

    /// Migrate existing dependents, then create emerging ones at the
    /// representative execution, resolved once after all migrations.
    pub fn migrate_dependent_entities(
        &mut self,
        ctx: &mut dyn CommandContext,
    ) -> Result<CascadeOutcome> {
        if self.state != AttachmentState::Reattached {
            return Err(ContractViolation::NotReattached(self.activity_instance.id.clone()).into());
        }
        if self.dependents_migrated {
            return Err(
                ContractViolation::DependentsAlreadyMigrated(self.activity_instance.id.clone())
                    .into(),
            );
        }

        // The resolver only reads node fields, the cascade owns the lists.
        let resolver = AnchorResolver {
            kind: self.kind,
            instance: &self.activity_instance,
            execution: self.representative_execution,
        };
        let outcome = self
            .dependents
            .migrate(ctx, |ctx| resolver.resolve(ctx))?;
        self.dependents_migrated = true;
        debug!(
            instance = %self.activity_instance.id,
            migrated = outcome.migrated,
            emerged = outcome.emerged,
            "dependents migrated"
        );
        Ok(outcome)
    }

    /// Remove every unmapped dependent.
    ///
    /// Applies to migrating and removed nodes alike. Removed handlers leave
    /// the list, so running it again only retries what failed before.
    pub fn remove_unmapped_dependent_instances(
        &mut self,
        ctx: &mut dyn CommandContext,
    ) -> Result<usize> {
        let removed = self.dependents.remove_all(ctx)?;
        if removed > 0 {
            debug!(instance = %self.activity_instance.id, removed, "unmapped dependents removed");
        }
        Ok(removed)
    }

    /// Tear down a node that has no target scope.
    ///
    /// Cancels the node's timers, removes its unmapped dependents and ends
    /// its representative execution. The node contributes nothing to the
    /// target-side tree afterwards.
    pub fn remove(&mut self, ctx: &mut dyn CommandContext, options: EndOptions) -> Result<()> {
        if self.migrates() {
            return Err(ContractViolation::StillMigrating(self.activity_instance.id.clone()).into());
        }
        self.transition_to(AttachmentState::Removed)?;
        if self.state == AttachmentState::Attached {
            self.remove_timer_jobs(ctx, self.representative_execution)?;
        }
        self.remove_unmapped_dependent_instances(ctx)?;
        ctx.executions()
            .end_execution(self.representative_execution, options)
            .map_err(|e| MigrationError::collaborator("remove", &self.activity_instance.id, e))?;
        self.state = AttachmentState::Removed;
        debug!(instance = %self.activity_instance.id, "removed");
        Ok(())
    }

    /// Find the live execution anchoring this node
    pub fn resolve_representative_execution(
        &self,
        ctx: &mut dyn CommandContext,
    ) -> Result<ExecutionId> {
        AnchorResolver {
            kind: self.kind,
            instance: &self.activity_instance,
            execution: self.representative_execution,
        }
        .resolve(ctx)
    }

    fn remove_timer_jobs(&self, ctx: &mut dyn CommandContext, execution: ExecutionId) -> Result<()> {
        ctx.jobs()
            .cancel_timers(execution)
            .map_err(|e| MigrationError::collaborator("remove_timer_jobs", &self.activity_instance.id, e))
    }

    fn create_missing_timer_jobs(
        &self,
        ctx: &mut dyn CommandContext,
        execution: ExecutionId,
        target_scope: &ScopeDescriptor,
    ) -> Result<()> {
        ctx.executions()
            .initialize_timer_declarations(execution, target_scope)
            .map_err(|e| {
                MigrationError::collaborator("create_missing_timer_jobs", &self.activity_instance.id, e)
            })
    }
}

/// Per-variant anchor lookup
struct AnchorResolver<'a> {
    kind: InstanceKind,
    instance: &'a ActivityInstanceSnapshot,
    execution: ExecutionId,
}

impl AnchorResolver<'_> {
    fn missing(&self, execution: ExecutionId) -> MigrationError {
        ContractViolation::MissingRepresentativeExecution {
            instance: self.instance.id.clone(),
            execution,
        }
        .into()
    }

    fn resolve(&self, ctx: &mut dyn CommandContext) -> Result<ExecutionId> {
        let repository = ctx.executions();
        match self.kind {
            InstanceKind::ProcessRoot => {
                let info = repository
                    .find(self.execution)
                    .filter(|info| info.is_live() && info.parent.is_none())
                    .ok_or_else(|| self.missing(self.execution))?;
                Ok(info.id)
            }
            InstanceKind::Scope => {
                let info = repository
                    .find(self.execution)
                    .filter(|info| info.is_live())
                    .ok_or_else(|| self.missing(self.execution))?;
                if !info.is_scope {
                    return Err(ContractViolation::RepresentativeNotScope {
                        instance: self.instance.id.clone(),
                        execution: info.id,
                    }
                    .into());
                }
                Ok(info.id)
            }
            // Stand-ins may have been replaced by tree expansion or compaction.
            InstanceKind::NonScope | InstanceKind::Transition => {
                let mut current = self.execution;
                for _ in 0..MAX_REPLACEMENT_HOPS {
                    let info = repository
                        .find(current)
                        .ok_or_else(|| self.missing(current))?;
                    match info.replaced_by {
                        Some(next) => current = next,
                        None if info.is_live() => return Ok(current),
                        None => return Err(self.missing(current)),
                    }
                }
                Err(self.missing(current))
            }
        }
    }
}
