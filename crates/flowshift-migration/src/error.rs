//! Error types for the migration core
//!
//! Three failure families reach the caller:
//! - Contract violations: invalid sequencing or missing anchors (programmer error)
//! - Collaborator failures: timer, job or entity persistence errors
//! - Tree errors: structural misuse of the instance arena
//!
//! Nothing here is recovered locally. Every error aborts the enclosing
//! migration command, which rolls the whole operation back.

use crate::types::{ActivityInstanceId, AttachmentState, ExecutionId, InstanceId};

/// Main migration error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Invalid call sequencing or unresolvable anchor
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// A collaborator failed while serving a migration step
    #[error("{operation} failed for {subject}: {source}")]
    Collaborator {
        /// Step that called out to the collaborator
        operation: &'static str,
        /// Activity instance or dependent being migrated
        subject: String,
        /// Underlying failure
        #[source]
        source: CollaboratorError,
    },

    /// Arena misuse
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Wrap a collaborator failure with the step and subject it occurred in
    #[inline]
    pub fn collaborator(
        operation: &'static str,
        subject: impl std::fmt::Display,
        source: CollaboratorError,
    ) -> Self {
        Self::Collaborator {
            operation,
            subject: subject.to_string(),
            source,
        }
    }

    /// Check if error is a programming-contract violation
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Check if re-running the whole migration command may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Collaborator {
                source: CollaboratorError::Transient(_),
                ..
            }
        )
    }
}

/// Programming-contract violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// State machine rejected the transition
    #[error("activity instance {instance} cannot move from {from} to {to}")]
    IllegalTransition {
        instance: ActivityInstanceId,
        from: AttachmentState,
        to: AttachmentState,
    },

    /// Attach or migrate requested on a node without target scope
    #[error("activity instance {0} has no target scope")]
    NotMigrating(ActivityInstanceId),

    /// Removal requested on a node that migrates
    #[error("activity instance {0} migrates and cannot be removed")]
    StillMigrating(ActivityInstanceId),

    /// No live anchor execution could be resolved
    #[error("activity instance {instance} has no live representative execution (last known {execution})")]
    MissingRepresentativeExecution {
        instance: ActivityInstanceId,
        execution: ExecutionId,
    },

    /// A scope node was anchored at a non-scope execution
    #[error("activity instance {instance} needs a scope execution, {execution} is not one")]
    RepresentativeNotScope {
        instance: ActivityInstanceId,
        execution: ExecutionId,
    },

    /// A non-scope or transition node was anchored outside a concurrent stand-in
    #[error("activity instance {instance} needs a concurrent stand-in, {execution} is not one")]
    RepresentativeNotConcurrent {
        instance: ActivityInstanceId,
        execution: ExecutionId,
    },

    /// The execution already anchors another node
    #[error("execution {execution} already anchors {holder}")]
    RepresentativeShared {
        execution: ExecutionId,
        holder: InstanceId,
    },

    /// Dependent-entity migration requested before the node was reattached
    #[error("activity instance {0} must be reattached before its dependents migrate")]
    NotReattached(ActivityInstanceId),

    /// Dependent-entity migration requested twice
    #[error("dependents of activity instance {0} were already migrated")]
    DependentsAlreadyMigrated(ActivityInstanceId),
}

/// Arena errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("instance {0} cannot be its own parent")]
    SelfParent(InstanceId),

    #[error("making {parent} the parent of {child} would create a cycle")]
    WouldCreateCycle { child: InstanceId, parent: InstanceId },

    #[error("tree depth limit {limit} exceeded")]
    DepthExceeded { limit: usize },

    #[error("back-reference of {child} does not match parent {parent}")]
    InconsistentBackReference { child: InstanceId, parent: InstanceId },
}

/// Failures reported by collaborators (job manager, execution repository, handlers)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Persistence failed permanently
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Persistence failed but may succeed on a fresh attempt (e.g. lock contention)
    #[error("transient failure: {0}")]
    Transient(String),

    /// The execution is unknown to the repository
    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    /// The collaborator refused the request
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result alias for migration operations
pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
