//! Collaborator contracts
//!
//! The migration core never looks up a global command context. Every
//! operation that touches timers, jobs or executions receives the context
//! explicitly, and all calls through it take part in the same transaction
//! as the migration operation.

use crate::error::CollaboratorError;
use crate::types::{ExecutionId, ExecutionInfo, ScopeDescriptor};

/// Timer and job subsystem
pub trait JobManager {
    /// Cancel every timer job anchored at the execution
    fn cancel_timers(&mut self, execution: ExecutionId) -> Result<(), CollaboratorError>;
}

/// Persistent execution tree
pub trait ExecutionRepository {
    /// Look up an execution
    fn find(&self, execution: ExecutionId) -> Option<ExecutionInfo>;

    /// Arm the scope's timer declarations that are not yet armed at the execution
    fn initialize_timer_declarations(
        &mut self,
        execution: ExecutionId,
        scope: &ScopeDescriptor,
    ) -> Result<(), CollaboratorError>;

    /// Point the execution at the scope's activity
    fn rebind_activity(
        &mut self,
        execution: ExecutionId,
        scope: &ScopeDescriptor,
    ) -> Result<(), CollaboratorError>;

    /// End the execution of a removed activity instance
    fn end_execution(
        &mut self,
        execution: ExecutionId,
        options: EndOptions,
    ) -> Result<(), CollaboratorError>;
}

/// Transactional command context handed to every migration step
pub trait CommandContext {
    /// Timer and job subsystem
    fn jobs(&mut self) -> &mut dyn JobManager;

    /// Execution tree
    fn executions(&mut self) -> &mut dyn ExecutionRepository;
}

/// How a removed activity instance is ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOptions {
    pub skip_custom_listeners: bool,
    pub skip_io_mappings: bool,
}
