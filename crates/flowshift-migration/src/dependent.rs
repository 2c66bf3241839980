//! Dependent-instance capability roles and the cascade over them
//!
//! Runtime resources owned by an activity instance (timers, event
//! subscriptions, variables) are classified once, while the migrating tree
//! is built, into one of three roles:
//!
//! - [`MigratingDependent`]: exists on both sides, carries state forward
//! - [`RemovingDependent`]: unmapped, torn down
//! - [`EmergingDependent`]: new on the target side, created at an anchor
//!
//! [`DependentInstances`] owns the three ordered lists. A handler is moved
//! into exactly one list, so the roles stay disjoint per node.

use crate::context::CommandContext;
use crate::error::Result;
use crate::types::ExecutionId;
use std::collections::VecDeque;
use std::fmt;

/// Resource with state on both sides of the migration
pub trait MigratingDependent: fmt::Debug {
    /// Apply this handler's own state transition
    fn migrate_state(&mut self, ctx: &mut dyn CommandContext) -> Result<()>;

    /// Recurse into dependents this handler owns
    fn migrate_dependent_entities(&mut self, _ctx: &mut dyn CommandContext) -> Result<()> {
        Ok(())
    }
}

/// Resource with no target-side counterpart
pub trait RemovingDependent: fmt::Debug {
    /// Tear the resource down. A handler whose removal failed stays
    /// registered and is retried by the next removal pass.
    fn remove(&mut self, ctx: &mut dyn CommandContext) -> Result<()>;
}

/// Resource with no source-side counterpart
pub trait EmergingDependent: fmt::Debug {
    /// Materialize the resource at the anchor execution
    fn create(&mut self, ctx: &mut dyn CommandContext, anchor: ExecutionId) -> Result<()>;
}

/// Counts reported by one cascade run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub migrated: usize,
    pub emerged: usize,
    pub anchor: Option<ExecutionId>,
}

/// Ordered dependent handler lists of one owner
#[derive(Debug, Default)]
pub struct DependentInstances {
    removing: VecDeque<Box<dyn RemovingDependent>>,
    migrating: Vec<Box<dyn MigratingDependent>>,
    emerging: Vec<Box<dyn EmergingDependent>>,
}

impl DependentInstances {
    /// Create empty lists
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_migrating(&mut self, dependent: Box<dyn MigratingDependent>) {
        self.migrating.push(dependent);
    }

    pub fn add_removing(&mut self, dependent: Box<dyn RemovingDependent>) {
        self.removing.push_back(dependent);
    }

    pub fn add_emerging(&mut self, dependent: Box<dyn EmergingDependent>) {
        self.emerging.push(dependent);
    }

    pub fn migrating(&self) -> &[Box<dyn MigratingDependent>] {
        &self.migrating
    }

    pub fn removing(&self) -> impl Iterator<Item = &Box<dyn RemovingDependent>> + '_ {
        self.removing.iter()
    }

    pub fn emerging(&self) -> &[Box<dyn EmergingDependent>] {
        &self.emerging
    }

    /// Whether all three lists are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removing.is_empty() && self.migrating.is_empty() && self.emerging.is_empty()
    }

    /// Migrate existing dependents, then create emerging ones.
    ///
    /// Every migrating handler runs `migrate_state` followed by its own
    /// `migrate_dependent_entities`, in list order. Only after the last one
    /// completes is the anchor resolved, exactly once, and handed to every
    /// emerging handler. The first failure stops the cascade.
    pub fn migrate<F>(&mut self, ctx: &mut dyn CommandContext, resolve_anchor: F) -> Result<CascadeOutcome>
    where
        F: FnOnce(&mut dyn CommandContext) -> Result<ExecutionId>,
    {
        for dependent in &mut self.migrating {
            dependent.migrate_state(ctx)?;
            dependent.migrate_dependent_entities(ctx)?;
        }

        let anchor = resolve_anchor(&mut *ctx)?;
        for dependent in &mut self.emerging {
            dependent.create(ctx, anchor)?;
        }

        Ok(CascadeOutcome {
            migrated: self.migrating.len(),
            emerged: self.emerging.len(),
            anchor: Some(anchor),
        })
    }

    /// Remove every unmapped dependent, in order.
    ///
    /// A handler leaves the list only once its removal succeeded. On failure
    /// the failing handler and everything after it stay registered, so each
    /// handler is removed exactly once across passes. Returns how many
    /// handlers this pass removed.
    pub fn remove_all(&mut self, ctx: &mut dyn CommandContext) -> Result<usize> {
        let mut count = 0;
        while let Some(dependent) = self.removing.front_mut() {
            dependent.remove(ctx)?;
            self.removing.pop_front();
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EndOptions, ExecutionRepository, JobManager};
    use crate::error::{CollaboratorError, MigrationError};
    use crate::types::{ExecutionInfo, ScopeDescriptor};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NoopContext;

    impl JobManager for NoopContext {
        fn cancel_timers(&mut self, _: ExecutionId) -> std::result::Result<(), CollaboratorError> {
            Ok(())
        }
    }

    impl ExecutionRepository for NoopContext {
        fn find(&self, _: ExecutionId) -> Option<ExecutionInfo> {
            None
        }
        fn initialize_timer_declarations(
            &mut self,
            _: ExecutionId,
            _: &ScopeDescriptor,
        ) -> std::result::Result<(), CollaboratorError> {
            Ok(())
        }
        fn rebind_activity(
            &mut self,
            _: ExecutionId,
            _: &ScopeDescriptor,
        ) -> std::result::Result<(), CollaboratorError> {
            Ok(())
        }
        fn end_execution(
            &mut self,
            _: ExecutionId,
            _: EndOptions,
        ) -> std::result::Result<(), CollaboratorError> {
            Ok(())
        }
    }

    impl CommandContext for NoopContext {
        fn jobs(&mut self) -> &mut dyn JobManager {
            self
        }
        fn executions(&mut self) -> &mut dyn ExecutionRepository {
            self
        }
    }

    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Log,
        nested: DependentInstances,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                nested: DependentInstances::new(),
                fail: false,
            }
        }
    }

    impl MigratingDependent for Recorder {
        fn migrate_state(&mut self, _: &mut dyn CommandContext) -> Result<()> {
            if self.fail {
                return Err(MigrationError::collaborator(
                    "migrate_state",
                    self.name,
                    CollaboratorError::Persistence("boom".into()),
                ));
            }
            self.log.borrow_mut().push(format!("migrate:{}", self.name));
            Ok(())
        }

        fn migrate_dependent_entities(&mut self, ctx: &mut dyn CommandContext) -> Result<()> {
            let anchor = ExecutionId::new();
            self.nested.migrate(ctx, |_| Ok(anchor))?;
            Ok(())
        }
    }

    impl RemovingDependent for Recorder {
        fn remove(&mut self, _: &mut dyn CommandContext) -> Result<()> {
            if self.fail {
                self.fail = false;
                return Err(MigrationError::collaborator(
                    "remove",
                    self.name,
                    CollaboratorError::Transient("locked".into()),
                ));
            }
            self.log.borrow_mut().push(format!("remove:{}", self.name));
            Ok(())
        }
    }

    impl EmergingDependent for Recorder {
        fn create(&mut self, _: &mut dyn CommandContext, _: ExecutionId) -> Result<()> {
            self.log.borrow_mut().push(format!("create:{}", self.name));
            Ok(())
        }
    }

    #[test]
    fn migration_precedes_emergence_and_recurses() {
        let log = Log::default();
        let mut outer = Recorder::new("outer", &log);
        outer.nested.add_migrating(Box::new(Recorder::new("inner", &log)));

        let mut deps = DependentInstances::new();
        deps.add_emerging(Box::new(Recorder::new("sub", &log)));
        deps.add_migrating(Box::new(outer));
        deps.add_migrating(Box::new(Recorder::new("var", &log)));

        let anchor = ExecutionId::new();
        let outcome = deps.migrate(&mut NoopContext, |_| Ok(anchor)).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["migrate:outer", "migrate:inner", "migrate:var", "create:sub"]
        );
        assert_eq!(outcome.migrated, 2);
        assert_eq!(outcome.emerged, 1);
        assert_eq!(outcome.anchor, Some(anchor));
    }

    #[test]
    fn failing_migration_stops_before_anchor_resolution() {
        let log = Log::default();
        let mut failing = Recorder::new("var", &log);
        failing.fail = true;

        let mut deps = DependentInstances::new();
        deps.add_migrating(Box::new(failing));
        deps.add_emerging(Box::new(Recorder::new("sub", &log)));

        let mut resolved = false;
        let result = deps.migrate(&mut NoopContext, |_| {
            resolved = true;
            Ok(ExecutionId::new())
        });

        assert!(result.is_err());
        assert!(!resolved);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn removal_drains_the_list() {
        let log = Log::default();
        let mut deps = DependentInstances::new();
        deps.add_removing(Box::new(Recorder::new("a", &log)));
        deps.add_removing(Box::new(Recorder::new("b", &log)));

        assert_eq!(deps.remove_all(&mut NoopContext).unwrap(), 2);
        assert_eq!(deps.remove_all(&mut NoopContext).unwrap(), 0);
        assert_eq!(*log.borrow(), vec!["remove:a", "remove:b"]);
        assert!(deps.is_empty());
    }

    #[test]
    fn failed_removal_keeps_the_rest_registered() {
        let log = Log::default();
        let mut flaky = Recorder::new("b", &log);
        flaky.fail = true;

        let mut deps = DependentInstances::new();
        deps.add_removing(Box::new(Recorder::new("a", &log)));
        deps.add_removing(Box::new(flaky));
        deps.add_removing(Box::new(Recorder::new("c", &log)));

        assert!(deps.remove_all(&mut NoopContext).is_err());
        assert_eq!(*log.borrow(), vec!["remove:a"]);
        assert_eq!(deps.removing().count(), 2);

        assert_eq!(deps.remove_all(&mut NoopContext).unwrap(), 2);
        assert_eq!(*log.borrow(), vec!["remove:a", "remove:b", "remove:c"]);
        assert!(deps.is_empty());
    }
}
