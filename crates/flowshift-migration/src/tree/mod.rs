//! Arena of migrating activity instances
//!
//! Nodes live in a `Vec` and are addressed by [`InstanceId`]. Each node
//! stores its parent id and an ordered set of child ids; the tree owns the
//! nodes, so the parent reference is a lookup key only and nothing is ever
//! freed through it.

use crate::context::{CommandContext, EndOptions};
use crate::dependent::CascadeOutcome;
use crate::error::{ContractViolation, Result, TreeError};
use crate::instance::MigratingActivityInstance;
use crate::types::{ExecutionId, InstanceId};
use std::collections::{HashMap, HashSet};

/// Tree of nodes for one migration operation
#[derive(Debug)]
pub struct MigratingInstanceTree {
    nodes: Vec<MigratingActivityInstance>,
    max_depth: usize,
}

impl Default for MigratingInstanceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MigratingInstanceTree {
    /// Default depth limit
    pub const DEFAULT_MAX_DEPTH: usize = 256;

    /// Create an empty tree
    pub fn new() -> Self {
        Self::with_max_depth(Self::DEFAULT_MAX_DEPTH)
    }

    /// Create an empty tree with a custom depth limit
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            nodes: Vec::new(),
            max_depth,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node without parent
    pub fn insert_root(&mut self, instance: MigratingActivityInstance) -> Result<InstanceId> {
        self.check_anchor_free(instance.representative_execution(), None)?;
        let id = InstanceId(self.nodes.len());
        self.nodes.push(instance);
        self.nodes[id.0].parent = None;
        self.nodes[id.0].children.clear();
        Ok(id)
    }

    /// Insert a node below an existing parent
    pub fn insert_child(
        &mut self,
        parent: InstanceId,
        instance: MigratingActivityInstance,
    ) -> Result<InstanceId> {
        self.get(parent)?;
        if self.depth(parent)? + 1 >= self.max_depth {
            return Err(TreeError::DepthExceeded {
                limit: self.max_depth,
            }
            .into());
        }
        self.check_anchor_free(instance.representative_execution(), None)?;

        let id = InstanceId(self.nodes.len());
        self.nodes.push(instance);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[id.0].children.clear();
        self.nodes[parent.0].children.insert(id);
        Ok(id)
    }

    /// Move a node below another parent, or make it a root.
    ///
    /// Rejects self-parenting and any move that would create a cycle.
    pub fn reparent(&mut self, child: InstanceId, new_parent: Option<InstanceId>) -> Result<()> {
        self.get(child)?;
        if let Some(parent) = new_parent {
            self.get(parent)?;
            if parent == child {
                return Err(TreeError::SelfParent(child).into());
            }
            if self.ancestors(parent).any(|a| a == child) {
                return Err(TreeError::WouldCreateCycle { child, parent }.into());
            }
        }

        if let Some(old) = self.nodes[child.0].parent {
            self.nodes[old.0].children.remove(&child);
        }
        self.nodes[child.0].parent = new_parent;
        if let Some(parent) = new_parent {
            self.nodes[parent.0].children.insert(child);
        }
        Ok(())
    }

    pub fn get(&self, id: InstanceId) -> Result<&MigratingActivityInstance> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| TreeError::InstanceNotFound(id).into())
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Result<&mut MigratingActivityInstance> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| TreeError::InstanceNotFound(id).into())
    }

    pub fn parent(&self, id: InstanceId) -> Result<Option<InstanceId>> {
        Ok(self.get(id)?.parent())
    }

    pub fn children(&self, id: InstanceId) -> Result<Vec<InstanceId>> {
        Ok(self.get(id)?.children().iter().copied().collect())
    }

    /// Nodes without parent, in insertion order
    pub fn roots(&self) -> Vec<InstanceId> {
        self.ids().filter(|id| self.nodes[id.0].parent.is_none()).collect()
    }

    /// All node ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = InstanceId> {
        (0..self.nodes.len()).map(InstanceId)
    }

    fn ancestors(&self, id: InstanceId) -> impl Iterator<Item = InstanceId> + '_ {
        std::iter::successors(self.nodes[id.0].parent, move |p| self.nodes[p.0].parent)
    }

    /// Levels in the deepest branch
    pub fn height(&self) -> usize {
        self.ids()
            .map(|id| self.ancestors(id).count() + 1)
            .max()
            .unwrap_or(0)
    }

    fn depth(&self, id: InstanceId) -> Result<usize> {
        self.get(id)?;
        Ok(self.ancestors(id).count())
    }

    /// Closest ancestor that migrates
    pub fn nearest_migrating_ancestor(&self, id: InstanceId) -> Result<Option<InstanceId>> {
        self.get(id)?;
        Ok(self.ancestors(id).find(|a| self.nodes[a.0].migrates()))
    }

    /// Parents before children, siblings in id order
    pub fn pre_order(&self) -> Vec<InstanceId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<InstanceId> = self.roots().into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Children before parents
    pub fn post_order(&self) -> Vec<InstanceId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(InstanceId, bool)> =
            self.roots().into_iter().rev().map(|id| (id, false)).collect();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
            } else {
                stack.push((id, true));
                stack.extend(self.nodes[id.0].children.iter().rev().map(|c| (*c, false)));
            }
        }
        order
    }

    fn check_anchor_free(&self, execution: ExecutionId, except: Option<InstanceId>) -> Result<()> {
        let holder = self.ids().find(|id| {
            Some(*id) != except
                && self.nodes[id.0].holds_anchor()
                && self.nodes[id.0].representative_execution() == execution
        });
        match holder {
            Some(holder) => Err(ContractViolation::RepresentativeShared { execution, holder }.into()),
            None => Ok(()),
        }
    }

    // ----- node operations -----

    pub fn detach(&mut self, id: InstanceId, ctx: &mut dyn CommandContext) -> Result<()> {
        self.get_mut(id)?.detach_state(ctx)
    }

    /// Attach a node at a new execution that no other node anchors
    pub fn attach(
        &mut self,
        id: InstanceId,
        ctx: &mut dyn CommandContext,
        new_scope_execution: ExecutionId,
    ) -> Result<()> {
        self.get(id)?;
        self.check_anchor_free(new_scope_execution, Some(id))?;
        self.nodes[id.0].attach_state(ctx, new_scope_execution)
    }

    pub fn migrate_state(&mut self, id: InstanceId, ctx: &mut dyn CommandContext) -> Result<()> {
        self.get_mut(id)?.migrate_state(ctx)
    }

    pub fn migrate_dependents(
        &mut self,
        id: InstanceId,
        ctx: &mut dyn CommandContext,
    ) -> Result<CascadeOutcome> {
        self.get_mut(id)?.migrate_dependent_entities(ctx)
    }

    pub fn remove_unmapped(&mut self, id: InstanceId, ctx: &mut dyn CommandContext) -> Result<usize> {
        self.get_mut(id)?.remove_unmapped_dependent_instances(ctx)
    }

    pub fn remove_instance(
        &mut self,
        id: InstanceId,
        ctx: &mut dyn CommandContext,
        options: EndOptions,
    ) -> Result<()> {
        self.get_mut(id)?.remove(ctx, options)
    }

    /// Check acyclicity, back-references and exclusive anchors
    pub fn validate(&self) -> Result<()> {
        for id in self.ids() {
            let node = &self.nodes[id.0];
            if let Some(parent) = node.parent {
                let parent_node = self.get(parent)?;
                if !parent_node.children.contains(&id) {
                    return Err(TreeError::InconsistentBackReference { child: id, parent }.into());
                }
            }
            for child in &node.children {
                if self.get(*child)?.parent != Some(id) {
                    return Err(TreeError::InconsistentBackReference {
                        child: *child,
                        parent: id,
                    }
                    .into());
                }
            }
        }

        // Every node must be reachable from a root exactly once.
        let reachable: HashSet<InstanceId> = self.pre_order().into_iter().collect();
        if let Some(orphan) = self.ids().find(|id| !reachable.contains(id)) {
            let parent = self.nodes[orphan.0].parent.unwrap_or(orphan);
            return Err(TreeError::WouldCreateCycle {
                child: orphan,
                parent,
            }
            .into());
        }

        let mut anchors: HashMap<ExecutionId, InstanceId> = HashMap::new();
        for id in self.ids().filter(|id| self.nodes[id.0].holds_anchor()) {
            let execution = self.nodes[id.0].representative_execution();
            if let Some(holder) = anchors.insert(execution, id) {
                return Err(ContractViolation::RepresentativeShared { execution, holder }.into());
            }
        }
        Ok(())
    }
}
