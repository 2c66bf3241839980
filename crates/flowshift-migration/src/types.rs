//! Core types for the migration core
//!
//! Identities, the instruction and snapshot views consumed from the
//! surrounding engine, and the structural scope descriptors of the source
//! and target process definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use uuid::Uuid;

/// Index of a node inside one [`MigratingInstanceTree`](crate::tree::MigratingInstanceTree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution identity (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Ulid);

impl ExecutionId {
    /// Generate a new execution id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one migration operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationId(pub Uuid);

impl MigrationId {
    /// Generate a new migration id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MigrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Activity id within a process definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl ActivityId {
    /// Create an activity id
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime activity instance id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityInstanceId(pub String);

impl ActivityInstanceId {
    /// Create an activity instance id
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ActivityInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source activity to target activity mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInstruction {
    pub source_activity_id: ActivityId,
    pub target_activity_id: ActivityId,
    /// Whether event triggers of migrated subscriptions follow the target definition
    #[serde(default)]
    pub update_event_trigger: bool,
}

impl MigrationInstruction {
    /// Create a mapping between two activities
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_activity_id: ActivityId::new(source),
            target_activity_id: ActivityId::new(target),
            update_event_trigger: false,
        }
    }

    /// Request event trigger updates
    #[inline]
    #[must_use]
    pub fn updating_event_trigger(mut self) -> Self {
        self.update_event_trigger = true;
        self
    }
}

/// Read-only view of the source-side activity instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInstanceSnapshot {
    pub id: ActivityInstanceId,
    pub activity_id: ActivityId,
    pub execution_ids: Vec<ExecutionId>,
}

impl ActivityInstanceSnapshot {
    /// Snapshot of an instance running in the given executions
    pub fn new(
        id: impl Into<String>,
        activity_id: impl Into<String>,
        execution_ids: Vec<ExecutionId>,
    ) -> Self {
        Self {
            id: ActivityInstanceId::new(id),
            activity_id: ActivityId::new(activity_id),
            execution_ids,
        }
    }
}

/// Structural role of a scope in a process definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// The process definition itself
    ProcessDefinition,
    /// An activity that owns its own scope execution
    Scope,
    /// An activity executed in its parent's execution or a concurrent stand-in
    NonScope,
}

/// Timer a scope arms when it is entered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerDeclaration {
    /// Activity (usually a boundary event) the timer fires
    pub activity_id: ActivityId,
    /// Due date or duration expression
    pub due: String,
}

impl TimerDeclaration {
    /// Create a timer declaration
    pub fn new(activity_id: impl Into<String>, due: impl Into<String>) -> Self {
        Self {
            activity_id: ActivityId::new(activity_id),
            due: due.into(),
        }
    }
}

/// Structural metadata about a scope on the source or target definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub activity_id: ActivityId,
    pub kind: ScopeKind,
    #[serde(default)]
    pub timer_declarations: Vec<TimerDeclaration>,
}

impl ScopeDescriptor {
    /// Describe a scope
    pub fn new(activity_id: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            activity_id: ActivityId::new(activity_id),
            kind,
            timer_declarations: Vec::new(),
        }
    }

    /// Process definition scope
    pub fn process(activity_id: impl Into<String>) -> Self {
        Self::new(activity_id, ScopeKind::ProcessDefinition)
    }

    /// Scope activity
    pub fn scope(activity_id: impl Into<String>) -> Self {
        Self::new(activity_id, ScopeKind::Scope)
    }

    /// Non-scope activity
    pub fn non_scope(activity_id: impl Into<String>) -> Self {
        Self::new(activity_id, ScopeKind::NonScope)
    }

    /// Add a timer declaration
    #[must_use]
    pub fn with_timer(mut self, timer: TimerDeclaration) -> Self {
        self.timer_declarations.push(timer);
        self
    }

    /// Whether this scope owns a scope execution
    #[inline]
    #[must_use]
    pub fn is_scope(&self) -> bool {
        !matches!(self.kind, ScopeKind::NonScope)
    }
}

/// What the execution repository reports about an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub id: ExecutionId,
    pub parent: Option<ExecutionId>,
    pub is_scope: bool,
    pub is_concurrent: bool,
    pub is_ended: bool,
    /// Set when tree expansion or compaction replaced this execution
    pub replaced_by: Option<ExecutionId>,
}

impl ExecutionInfo {
    /// Whether the execution can anchor runtime state
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.is_ended
    }
}

/// Position of a node in its single detach/attach cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentState {
    /// At its source position (initial)
    Attached,
    /// Runtime footprint lifted, awaiting the structural move
    Detached,
    /// Attached at its target position (final)
    Reattached,
    /// Torn down; never attaches again
    Removed,
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
