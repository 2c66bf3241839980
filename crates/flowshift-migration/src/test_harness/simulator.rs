//! Migration simulator
//!
//! Builds random process instances on an [`InMemoryRuntime`], migrates them
//! with the [`MigrationDriver`] and checks the outcome against the migration
//! invariants. A share of runs gets an injected collaborator failure; those
//! must roll back to the exact pre-migration state.

use super::{
    EmergingSubscription, InMemoryMover, InMemoryRuntime, RuntimeData, SubscriptionMigration,
    SubscriptionRemoval, VariableMigration,
};
use crate::config::MigrationConfig;
use crate::driver::{MigrationDriver, MigrationReport};
use crate::instance::MigratingActivityInstance;
use crate::journal::JournalAction;
use crate::tree::MigratingInstanceTree;
use crate::types::{
    ActivityInstanceSnapshot, AttachmentState, ExecutionId, InstanceId, MigrationInstruction,
    ScopeDescriptor, TimerDeclaration,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Process instances to migrate
    pub runs: u64,
    /// Share of runs with an injected collaborator failure
    pub failure_rate: f64,
    /// Children per scope node
    pub max_children: usize,
    /// Nesting below the process root
    pub max_depth: usize,
    /// Chance that a node has a target scope
    pub migrate_probability: f64,
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            runs: 200,
            failure_rate: 0.2,
            max_children: 3,
            max_depth: 3,
            migrate_probability: 0.7,
            stop_on_first_violation: false,
        }
    }
}

/// Invariants checked after every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvariantCheck {
    RollbackRestoresState,
    MigratedNodesReattached,
    RemovedNodesRemoved,
    AnchorsExclusive,
    RepresentativesLive,
    RemovedExecutionsEnded,
    TargetTimersArmed,
    SourceTimersCancelled,
    JournalIntact,
}

/// A violated invariant
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub run: u64,
    pub check: InvariantCheck,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub runs: u64,
    pub completed: u64,
    pub rolled_back: u64,
    pub instances: u64,
    pub instances_removed: u64,
    pub dependents_migrated: u64,
    pub dependents_emerged: u64,
    pub unmapped_removed: u64,
}

impl RunStats {
    fn record(&mut self, report: &MigrationReport) {
        self.completed += 1;
        self.instances_removed += report.instances_removed as u64;
        self.dependents_migrated += report.dependents_migrated as u64;
        self.dependents_emerged += report.dependents_emerged as u64;
        self.unmapped_removed += report.unmapped_removed as u64;
    }
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: RunStats,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether no invariant was violated
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable summary
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Migration Simulator Report ===\n\n");
        out.push_str(&format!("Seed: {}\n", self.config.seed));
        out.push_str(&format!("Runs: {}\n", self.stats.runs));
        out.push_str(&format!("Completed: {}\n", self.stats.completed));
        out.push_str(&format!("Rolled back: {}\n", self.stats.rolled_back));
        out.push_str(&format!("Instances: {}\n", self.stats.instances));
        out.push_str(&format!("Instances removed: {}\n", self.stats.instances_removed));
        out.push_str(&format!("Dependents migrated: {}\n", self.stats.dependents_migrated));
        out.push_str(&format!("Dependents emerged: {}\n", self.stats.dependents_emerged));
        out.push_str(&format!("Unmapped removed: {}\n", self.stats.unmapped_removed));
        out.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            out.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                out.push_str(&format!("{}. run {} {:?}: {}\n", i + 1, v.run, v.check, v.details));
            }
        }

        out.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        out
    }
}

/// Everything generated for one simulated process instance
struct Scenario {
    runtime: InMemoryRuntime,
    tree: MigratingInstanceTree,
    /// Collaborator calls the scenario is expected to make, roughly
    call_budget: usize,
}

/// Run the migration simulator
pub fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = RunStats::default();
    let mut violations = Vec::new();

    for run in 0..config.runs {
        let Scenario {
            mut runtime,
            mut tree,
            call_budget,
        } = build_scenario(&mut rng, &config);
        stats.runs += 1;
        stats.instances += tree.len() as u64;

        let fault = rng
            .gen_bool(config.failure_rate.clamp(0.0, 1.0))
            .then(|| rng.gen_range(1..=call_budget.max(1)));
        runtime.inject_failure_at(fault);

        let before = runtime.data();
        let driver = match MigrationDriver::new(MigrationConfig::default()) {
            Ok(driver) => driver,
            Err(_) => break,
        };
        let mut mover = InMemoryMover::new(&runtime);
        let result = runtime.transaction(|rt| driver.execute(&mut tree, rt, &mut mover));

        let found = match result {
            Ok(report) => {
                stats.record(&report);
                check_completed(run, &tree, &runtime.data(), &driver, &before)
            }
            Err(err) => {
                debug!(run, error = %err, "simulated migration rolled back");
                stats.rolled_back += 1;
                let mut found =
                    check_rolled_back(run, &before, &runtime.data(), fault.is_some(), &err.to_string());
                let closed = driver
                    .journal()
                    .entries()
                    .last()
                    .is_some_and(|e| e.action == JournalAction::MigrationFailed);
                if !closed {
                    found.push(violation(
                        run,
                        InvariantCheck::JournalIntact,
                        "failed migration not closed in the journal",
                    ));
                }
                found
            }
        };

        let stop = !found.is_empty() && config.stop_on_first_violation;
        violations.extend(found);
        if stop {
            break;
        }
    }

    SimulatorReport {
        config,
        stats,
        violations,
    }
}

fn build_scenario(rng: &mut StdRng, config: &SimulatorConfig) -> Scenario {
    let runtime = InMemoryRuntime::new();
    let mut tree = MigratingInstanceTree::new();
    let mut counter = 0usize;
    let mut call_budget = 0usize;

    let root_exec = runtime.create_execution(None, true, false, Some("process"));
    let mut target = ScopeDescriptor::process("process-v2");
    if rng.gen_bool(0.5) {
        target = target.with_timer(TimerDeclaration::new("escalation", "PT1H"));
    }
    let mut root = MigratingActivityInstance::new(
        ActivityInstanceSnapshot::new("process:0", "process", vec![root_exec]),
        root_exec,
        ScopeDescriptor::process("process"),
        Some(target),
        None,
    );
    add_dependents(rng, &runtime, &mut root, root_exec, &mut call_budget);
    call_budget += 4;

    let Ok(root_id) = tree.insert_root(root) else {
        return Scenario {
            runtime,
            tree,
            call_budget,
        };
    };

    let mut frontier = vec![(root_id, root_exec, 0usize)];
    while let Some((parent_id, parent_exec, depth)) = frontier.pop() {
        if depth >= config.max_depth {
            continue;
        }
        for _ in 0..rng.gen_range(0..=config.max_children) {
            counter += 1;
            let name = format!("activity{counter}");
            let migrates = rng.gen_bool(config.migrate_probability.clamp(0.0, 1.0));
            let (node, exec, is_scope) = match rng.gen_range(0..3) {
                0 => {
                    let exec = runtime.create_execution(Some(parent_exec), true, false, Some(&name));
                    if rng.gen_bool(0.5) {
                        runtime.add_timer(exec, &format!("{name}-boundary"), "PT5M");
                    }
                    let mut target = ScopeDescriptor::scope(format!("{name}-v2"));
                    if rng.gen_bool(0.5) {
                        target = target.with_timer(TimerDeclaration::new(
                            format!("{name}-v2-boundary"),
                            "PT10M",
                        ));
                    }
                    let node = MigratingActivityInstance::new(
                        snapshot(&name, counter, exec),
                        exec,
                        ScopeDescriptor::scope(&name),
                        migrates.then_some(target),
                        migrates.then(|| MigrationInstruction::new(&name, format!("{name}-v2"))),
                    );
                    (node, exec, true)
                }
                1 => {
                    let exec = runtime.create_execution(Some(parent_exec), false, true, Some(&name));
                    if rng.gen_bool(0.5) {
                        runtime.add_timer(exec, &format!("{name}-catch"), "PT2M");
                    }
                    let node = MigratingActivityInstance::new(
                        snapshot(&name, counter, exec),
                        exec,
                        ScopeDescriptor::non_scope(&name),
                        migrates.then(|| ScopeDescriptor::non_scope(format!("{name}-v2"))),
                        migrates.then(|| MigrationInstruction::new(&name, format!("{name}-v2"))),
                    );
                    (node, exec, false)
                }
                _ => {
                    let exec = runtime.create_execution(Some(parent_exec), false, true, Some(&name));
                    if rng.gen_bool(0.3) {
                        runtime.add_timer(exec, &format!("{name}-retry"), "PT30S");
                    }
                    let node = MigratingActivityInstance::transition(
                        snapshot(&name, counter, exec),
                        exec,
                        ScopeDescriptor::non_scope(&name),
                        migrates.then(|| ScopeDescriptor::non_scope(format!("{name}-v2"))),
                        migrates.then(|| MigrationInstruction::new(&name, format!("{name}-v2"))),
                    );
                    (node, exec, false)
                }
            };

            let mut node = node;
            add_dependents(rng, &runtime, &mut node, exec, &mut call_budget);
            call_budget += 5;
            let Ok(id) = tree.insert_child(parent_id, node) else {
                continue;
            };
            if is_scope {
                frontier.push((id, exec, depth + 1));
            }
        }
    }

    Scenario {
        runtime,
        tree,
        call_budget,
    }
}

fn snapshot(name: &str, counter: usize, exec: ExecutionId) -> ActivityInstanceSnapshot {
    ActivityInstanceSnapshot::new(format!("{name}:{counter}"), name, vec![exec])
}

/// Attach a random mix of dependents; only migrating nodes keep or gain entities
fn add_dependents(
    rng: &mut StdRng,
    runtime: &InMemoryRuntime,
    node: &mut MigratingActivityInstance,
    exec: ExecutionId,
    call_budget: &mut usize,
) {
    let migrates = node.migrates();
    let activity = node.activity_instance().activity_id.as_str().to_string();

    for i in 0..rng.gen_range(0..3) {
        let id = runtime.add_variable(exec, &format!("var{i}"), serde_json::json!(i));
        if migrates {
            node.add_migrating_dependent_instance(Box::new(VariableMigration::new(runtime, id)));
            *call_budget += 1;
        }
    }

    for i in 0..rng.gen_range(0..3) {
        let id = runtime.add_subscription(exec, &format!("{activity}-event{i}"), &format!("msg{i}"));
        if migrates && rng.gen_bool(0.5) {
            let instruction = MigrationInstruction::new(
                format!("{activity}-event{i}"),
                format!("{activity}-v2-event{i}"),
            );
            node.add_migrating_dependent_instance(Box::new(SubscriptionMigration::new(
                runtime,
                id,
                &instruction,
            )));
        } else {
            node.add_removing_dependent_instance(Box::new(SubscriptionRemoval::new(runtime, id)));
        }
        *call_budget += 1;
    }

    if migrates && rng.gen_bool(0.4) {
        node.add_emerging_dependent_instance(Box::new(EmergingSubscription::new(
            runtime,
            &format!("{activity}-v2-signal"),
            "signal",
        )));
        *call_budget += 1;
    }
}

fn violation(run: u64, check: InvariantCheck, details: impl Into<String>) -> Violation {
    Violation {
        run,
        check,
        details: details.into(),
    }
}

fn check_rolled_back(
    run: u64,
    before: &RuntimeData,
    after: &RuntimeData,
    fault_injected: bool,
    error: &str,
) -> Vec<Violation> {
    let mut found = Vec::new();
    if before != after {
        found.push(violation(
            run,
            InvariantCheck::RollbackRestoresState,
            format!("state differs after rollback of: {error}"),
        ));
    }
    if !fault_injected {
        found.push(violation(
            run,
            InvariantCheck::RollbackRestoresState,
            format!("migration failed without injected fault: {error}"),
        ));
    }
    found
}

fn check_completed(
    run: u64,
    tree: &MigratingInstanceTree,
    data: &RuntimeData,
    driver: &MigrationDriver,
    before: &RuntimeData,
) -> Vec<Violation> {
    let mut found = Vec::new();

    if let Err(err) = tree.validate() {
        found.push(violation(run, InvariantCheck::AnchorsExclusive, err.to_string()));
    }
    if let Err(err) = driver.journal().verify_integrity() {
        found.push(violation(run, InvariantCheck::JournalIntact, err.to_string()));
    }
    for timer in &data.timers {
        if !data.executions.get(&timer.execution).is_some_and(|r| r.info.is_live()) {
            found.push(violation(
                run,
                InvariantCheck::SourceTimersCancelled,
                format!("timer {} left at ended execution {}", timer.activity_id, timer.execution),
            ));
        }
    }

    for id in tree.ids() {
        let Ok(node) = tree.get(id) else { continue };
        let exec = node.representative_execution();
        let record = data.executions.get(&exec);

        if node.migrates() {
            if node.state() != AttachmentState::Reattached {
                found.push(violation(
                    run,
                    InvariantCheck::MigratedNodesReattached,
                    format!("{id} ended in {}", node.state()),
                ));
            }
            if !record.is_some_and(|r| r.info.is_live()) {
                found.push(violation(
                    run,
                    InvariantCheck::RepresentativesLive,
                    format!("{id} anchored at dead execution {exec}"),
                ));
            }
            check_timers(run, id, node, data, before, &mut found);
        } else {
            if node.state() != AttachmentState::Removed {
                found.push(violation(
                    run,
                    InvariantCheck::RemovedNodesRemoved,
                    format!("{id} ended in {}", node.state()),
                ));
            }
            if !record.is_some_and(|r| r.info.is_ended) {
                found.push(violation(
                    run,
                    InvariantCheck::RemovedExecutionsEnded,
                    format!("{id} left execution {exec} running"),
                ));
            }
        }
    }
    found
}

fn check_timers(
    run: u64,
    id: InstanceId,
    node: &MigratingActivityInstance,
    data: &RuntimeData,
    before: &RuntimeData,
    found: &mut Vec<Violation>,
) {
    let exec = node.representative_execution();
    let armed = data.timers_at(exec);
    let declared = node
        .target_scope()
        .filter(|_| node.kind().owns_timers())
        .map(|scope| scope.timer_declarations.as_slice())
        .unwrap_or_default();

    for declaration in declared {
        if !armed.iter().any(|t| t.activity_id == declaration.activity_id) {
            found.push(violation(
                run,
                InvariantCheck::TargetTimersArmed,
                format!("{id} missing timer {}", declaration.activity_id),
            ));
        }
    }

    // Source timers sit at the source executions, which stand-in
    // replacement leaves behind.
    for source_exec in &node.activity_instance().execution_ids {
        for source in before.timers_at(*source_exec) {
            let redeclared = declared.iter().any(|d| d.activity_id == source.activity_id);
            let kept = data.timers.iter().any(|t| {
                t.activity_id == source.activity_id
                    && (t.execution == *source_exec || t.execution == exec)
            });
            if !redeclared && kept {
                found.push(violation(
                    run,
                    InvariantCheck::SourceTimersCancelled,
                    format!("{id} kept source timer {}", source.activity_id),
                ));
            }
        }
    }
}
