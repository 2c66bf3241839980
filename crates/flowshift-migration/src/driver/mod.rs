//! Migration driver
//!
//! Walks a [`MigratingInstanceTree`] through one migration operation:
//!
//! 1. detach every migrating node (parents first)
//! 2. per migrating node, parents first: structural move, attach, migrate state
//! 3. cascade dependents of every migrating node
//! 4. remove unmapped dependents of every node
//! 5. remove non-migrating nodes (children first)
//!
//! The driver never recovers. The first failure is returned unchanged and
//! the enclosing command must roll the whole operation back. The journal
//! closes every started operation with either `MigrationCompleted` or
//! `MigrationFailed`.

use crate::config::MigrationConfig;
use crate::context::CommandContext;
use crate::error::{CollaboratorError, MigrationError, Result, TreeError};
use crate::instance::MigratingActivityInstance;
use crate::journal::{JournalAction, JournalEntry, MigrationJournal};
use crate::tree::MigratingInstanceTree;
use crate::types::{ExecutionId, InstanceId, MigrationId};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Structural execution move, supplied by the execution tree owner
pub trait StructuralMove {
    /// Move the node's execution below `new_parent_execution` on the target
    /// side and return the execution that now stands for the node.
    fn relocate(
        &mut self,
        ctx: &mut dyn CommandContext,
        instance: &MigratingActivityInstance,
        new_parent_execution: Option<ExecutionId>,
    ) -> std::result::Result<ExecutionId, CollaboratorError>;
}

/// Outcome of one migration operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migration_id: Option<MigrationId>,
    pub detached: usize,
    pub attached: usize,
    pub dependents_migrated: usize,
    pub dependents_emerged: usize,
    pub unmapped_removed: usize,
    pub instances_removed: usize,
}

/// Runs migration operations
#[derive(Debug, Default)]
pub struct MigrationDriver {
    config: MigrationConfig,
    journal: MigrationJournal,
}

impl MigrationDriver {
    /// Create a driver with validated configuration
    pub fn new(config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            journal: MigrationJournal::default(),
        })
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn journal(&self) -> &MigrationJournal {
        &self.journal
    }

    fn record(
        &self,
        migration_id: MigrationId,
        instance: Option<InstanceId>,
        action: JournalAction,
        detail: impl Into<String>,
    ) {
        if self.config.record_journal {
            self.journal
                .append(JournalEntry::new(migration_id, instance, action, detail));
        }
    }

    /// Migrate every node of the tree
    pub fn execute(
        &self,
        tree: &mut MigratingInstanceTree,
        ctx: &mut dyn CommandContext,
        mover: &mut dyn StructuralMove,
    ) -> Result<MigrationReport> {
        tree.validate()?;
        if tree.height() > self.config.max_tree_depth {
            return Err(TreeError::DepthExceeded {
                limit: self.config.max_tree_depth,
            }
            .into());
        }
        let migration_id = MigrationId::new();
        self.run(migration_id, tree, ctx, mover).map_err(|err| {
            warn!(%migration_id, error = %err, "migration failed");
            self.record(migration_id, None, JournalAction::MigrationFailed, err.to_string());
            err
        })
    }

    fn run(
        &self,
        migration_id: MigrationId,
        tree: &mut MigratingInstanceTree,
        ctx: &mut dyn CommandContext,
        mover: &mut dyn StructuralMove,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            migration_id: Some(migration_id),
            ..MigrationReport::default()
        };
        info!(%migration_id, instances = tree.len(), "migration started");
        self.record(migration_id, None, JournalAction::MigrationStarted, format!("{} instances", tree.len()));

        let order = tree.pre_order();
        let mut migrating = Vec::new();
        for id in &order {
            if tree.get(*id)?.migrates() {
                migrating.push(*id);
            }
        }

        for id in &migrating {
            tree.detach(*id, ctx)?;
            report.detached += 1;
            self.record(migration_id, Some(*id), JournalAction::Detached, "");
        }
        debug!(%migration_id, detached = report.detached, "detach phase complete");

        for id in &migrating {
            let ancestor = tree.nearest_migrating_ancestor(*id)?;
            if tree.parent(*id)? != ancestor {
                tree.reparent(*id, ancestor)?;
            }
            let parent_execution = match ancestor {
                Some(a) => Some(tree.get(a)?.representative_execution()),
                None => None,
            };

            let node = tree.get(*id)?;
            let new_execution = mover
                .relocate(ctx, node, parent_execution)
                .map_err(|e| MigrationError::collaborator("relocate", &node.activity_instance().id, e))?;
            self.record(migration_id, Some(*id), JournalAction::Relocated, new_execution.to_string());

            tree.attach(*id, ctx, new_execution)?;
            report.attached += 1;
            self.record(migration_id, Some(*id), JournalAction::Attached, new_execution.to_string());

            tree.migrate_state(*id, ctx)?;
            self.record(migration_id, Some(*id), JournalAction::StateMigrated, "");
        }
        debug!(%migration_id, attached = report.attached, "attach phase complete");

        for id in &migrating {
            let outcome = tree.migrate_dependents(*id, ctx)?;
            report.dependents_migrated += outcome.migrated;
            report.dependents_emerged += outcome.emerged;
            self.record(
                migration_id,
                Some(*id),
                JournalAction::DependentsMigrated,
                format!("migrated={} emerged={}", outcome.migrated, outcome.emerged),
            );
        }

        for id in &order {
            let removed = tree.remove_unmapped(*id, ctx)?;
            if removed > 0 {
                report.unmapped_removed += removed;
                self.record(migration_id, Some(*id), JournalAction::UnmappedRemoved, removed.to_string());
            }
        }

        let end_options = self.config.end_options();
        for id in tree.post_order() {
            if !tree.get(id)?.migrates() {
                tree.remove_instance(id, ctx, end_options)?;
                report.instances_removed += 1;
                self.record(migration_id, Some(id), JournalAction::InstanceRemoved, "");
            }
        }

        tree.validate()?;
        self.record(migration_id, None, JournalAction::MigrationCompleted, "");
        info!(
            %migration_id,
            attached = report.attached,
            removed = report.instances_removed,
            emerged = report.dependents_emerged,
            "migration completed"
        );
        Ok(report)
    }
}
