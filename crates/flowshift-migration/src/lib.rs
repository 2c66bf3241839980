//! Flowshift migration core
//!
//! Moves a running process instance from one process definition to another
//! without stopping it. Each activity instance under migration becomes a
//! node of a [`MigratingInstanceTree`]; each node passes through one
//! detach/attach cycle and carries its dependent resources (timers, event
//! subscriptions, variables) across as migrating, removing or emerging
//! handlers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use flowshift_migration::prelude::*;
//!
//! let mut tree = MigratingInstanceTree::new();
//! let root = tree.insert_root(process_node)?;
//! tree.insert_child(root, task_node)?;
//!
//! let driver = MigrationDriver::new(MigrationConfig::default())?;
//! let report = driver.execute(&mut tree, &mut ctx, &mut mover)?;
//! ```

// Core modules
pub mod context;
pub mod dependent;
pub mod error;
pub mod instance;
pub mod state_machine;
pub mod tree;
pub mod types;

// Operation layer
pub mod config;
pub mod driver;
pub mod journal;

// Test harness
pub mod test_harness;

// Re-exports
pub use error::*;
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::config::MigrationConfig;
    pub use crate::context::{CommandContext, EndOptions, ExecutionRepository, JobManager};
    pub use crate::dependent::{
        CascadeOutcome, DependentInstances, EmergingDependent, MigratingDependent,
        RemovingDependent,
    };
    pub use crate::driver::{MigrationDriver, MigrationReport, StructuralMove};
    pub use crate::error::{CollaboratorError, ContractViolation, MigrationError, TreeError};
    pub use crate::instance::{InstanceKind, MigratingActivityInstance};
    pub use crate::journal::{JournalAction, MigrationJournal};
    pub use crate::tree::MigratingInstanceTree;
    pub use crate::types::{
        ActivityId, ActivityInstanceId, ActivityInstanceSnapshot, AttachmentState, ExecutionId,
        ExecutionInfo, InstanceId, MigrationId, MigrationInstruction, ScopeDescriptor, ScopeKind,
        TimerDeclaration,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
