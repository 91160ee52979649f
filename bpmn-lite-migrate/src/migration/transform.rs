//! Applies a [`MigrationPlan`] to an execution tree.
//!
//! The tree handed in is a private copy; any error leaves the caller's tree
//! untouched because the copy is simply dropped.

use super::call_activity;
use super::error::MigrationError;
use super::gateway;
use super::multi_instance;
use super::plan::*;
use super::timer;
use crate::config::MigrationConfig;
use crate::expression::ExpressionEvaluator;
use crate::model::repository::DefinitionRepository;
use crate::model::{FlowNode, NodeKind, ProcessDefinition};
use crate::runtime::{ExecutionRole, ExecutionTree, HistoryEvent};
use crate::types::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// The instance and definition a landing happens in.
pub(crate) struct Site {
    pub instance_id: InstanceId,
    pub root: ExecutionId,
    pub definition: Arc<ProcessDefinition>,
}

pub(crate) struct MigrationContext<'a> {
    pub tree: &'a mut ExecutionTree,
    pub repository: &'a dyn DefinitionRepository,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub config: &'a MigrationConfig,
    pub source: Arc<ProcessDefinition>,
    pub target: Arc<ProcessDefinition>,
    pub instance_id: InstanceId,
    /// Multi-instance roots whose counters must be refreshed at the end.
    pub touched_multi_instance: BTreeSet<ExecutionId>,
    /// Sub-process instance per call activity, for `INTO_SUBPROCESS` moves.
    pub sub_instances: HashMap<String, InstanceId>,
}

/// State captured from a move's sources before they are removed.
struct Captured {
    inherited: VariableMap,
    /// Ancestors of the sources; preferred when picking an existing scope to land in.
    hints: HashSet<ExecutionId>,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        tree: &'a mut ExecutionTree,
        repository: &'a dyn DefinitionRepository,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a MigrationConfig,
        source: Arc<ProcessDefinition>,
        target: Arc<ProcessDefinition>,
        instance_id: InstanceId,
    ) -> Self {
        Self {
            tree,
            repository,
            evaluator,
            config,
            source,
            target,
            instance_id,
            touched_multi_instance: BTreeSet::new(),
            sub_instances: HashMap::new(),
        }
    }

    pub(crate) fn instance_site(&self) -> Result<Site, MigrationError> {
        Ok(Site {
            instance_id: self.instance_id,
            root: self.tree.instance(self.instance_id)?.root_execution_id,
            definition: self.target.clone(),
        })
    }

    // ── Apply ──

    pub(crate) fn apply(mut self, plan: &MigrationPlan) -> Result<(), MigrationError> {
        let site = self.instance_site()?;
        let original: Vec<(ExecutionId, String)> = self
            .tree
            .executions_of(self.instance_id)
            .into_iter()
            .filter_map(|e| e.activity().map(|a| (e.id, a.to_string())))
            .collect();

        self.tree.set_variables(site.root, &plan.instance_variables)?;

        let captured: Vec<Captured> = plan.moves.iter().map(|m| self.capture(m)).collect();

        for mv in plan.moves.iter().filter(|m| m.kind == MoveKind::Relocate) {
            for source in &mv.sources {
                if self.tree.execution(source.execution_id).is_ok() {
                    self.tree.remove_execution(source.execution_id)?;
                }
            }
        }

        for (mv, captured) in plan.moves.iter().zip(&captured) {
            match mv.kind {
                MoveKind::MultiInstanceRepoint => {
                    if let ([source], [target]) = (mv.sources.as_slice(), mv.targets.as_slice()) {
                        multi_instance::repoint(&mut self, source, target)?;
                    }
                }
                MoveKind::Relocate => self.relocate(mv, captured)?,
            }
        }

        self.reconcile_timers(&original)?;
        self.tree
            .set_definition_id(self.instance_id, self.target.id())?;
        self.prune()?;
        if self.config.discard_moot_joins {
            gateway::discard_moot_joins(self.tree, self.instance_id, &self.target)?;
        }
        for root in std::mem::take(&mut self.touched_multi_instance) {
            if self.tree.execution(root).is_ok() {
                multi_instance::refresh_counters(self.tree, root, &self.target)?;
            }
        }
        self.verify()?;

        self.tree.record(HistoryEvent::InstanceMigrated {
            process_instance_id: self.instance_id,
            from_definition_id: self.source.id().to_string(),
            to_definition_id: self.target.id().to_string(),
        });
        Ok(())
    }

    /// Variables the targets of a move inherit from its sources and their
    /// descendants. First writer wins; loop bookkeeping is left behind.
    fn capture(&self, mv: &PlannedMove) -> Captured {
        let mut inherited = VariableMap::new();
        let mut hints = HashSet::new();
        for source in &mv.sources {
            let source_definition = self
                .repository
                .definition(
                    self.tree
                        .instance(source.process_instance_id)
                        .map(|i| i.definition_id.as_str())
                        .unwrap_or_default(),
                )
                .unwrap_or_else(|| self.source.clone());

            let ids = std::iter::once(source.execution_id).chain(self.tree.descendants(source.execution_id));
            for id in ids {
                let Ok(exec) = self.tree.execution(id) else {
                    continue;
                };
                if exec.is_timer() {
                    continue;
                }
                let index_variable = exec
                    .activity()
                    .and_then(|a| source_definition.node(a))
                    .and_then(|n| n.multi_instance.as_ref())
                    .map(|mi| mi.element_index_variable.as_str())
                    .unwrap_or(DEFAULT_ELEMENT_INDEX_VARIABLE);
                for (name, value) in &exec.variables {
                    if MULTI_INSTANCE_COUNTERS.contains(&name.as_str())
                        || name == index_variable
                        || name == DEFAULT_ELEMENT_INDEX_VARIABLE
                    {
                        continue;
                    }
                    inherited.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }

            let mut parent = self
                .tree
                .execution(source.execution_id)
                .ok()
                .and_then(|e| e.parent_id);
            while let Some(id) = parent {
                hints.insert(id);
                parent = self.tree.execution(id).ok().and_then(|e| e.parent_id);
            }
        }
        Captured { inherited, hints }
    }

    fn relocate(&mut self, mv: &PlannedMove, captured: &Captured) -> Result<(), MigrationError> {
        let site = match &mv.scope {
            TargetScope::Instance => self.instance_site()?,
            TargetScope::SubProcess {
                call_activity_id,
                definition_id,
            } => {
                let definition = self
                    .repository
                    .definition(definition_id)
                    .ok_or_else(|| MigrationError::DefinitionNotFound(definition_id.clone()))?;
                let instance_id =
                    call_activity::ensure_sub_instance(self, call_activity_id, &definition)?;
                Site {
                    instance_id,
                    root: self.tree.instance(instance_id)?.root_execution_id,
                    definition,
                }
            }
        };
        self.tree.set_variables(site.root, &mv.instance_variables)?;

        for target in &mv.targets {
            let parent = self.resolve_parent(&site, &target.activity_id, &captured.hints)?;
            let variables = merged(&captured.inherited, &target.local_variables);
            let landed = self.land_on(&site, parent, &target.activity_id, variables, 0)?;
            debug!(
                activity_id = %target.activity_id,
                executions = landed.len(),
                "Landed migrated execution"
            );
        }
        Ok(())
    }

    /// The execution a new token at `activity_id` hangs under: the scope
    /// execution of its innermost containing sub-process, created (with its
    /// boundary timers) when none exists yet.
    pub(crate) fn resolve_parent(
        &mut self,
        site: &Site,
        activity_id: &str,
        hints: &HashSet<ExecutionId>,
    ) -> Result<ExecutionId, MigrationError> {
        let definition = site.definition.clone();
        let mut parent = site.root;
        for container in definition.containment_chain(activity_id) {
            let existing: Vec<ExecutionId> = self
                .tree
                .child_executions(parent)
                .into_iter()
                .filter(|e| e.role == ExecutionRole::Scope && e.activity() == Some(container.id.as_str()))
                .map(|e| e.id)
                .collect();
            parent = match existing.iter().find(|id| hints.contains(*id)).or(existing.first()) {
                Some(id) => *id,
                None => {
                    let scope = self.tree.create_execution_with(
                        parent,
                        Some(&container.id),
                        ExecutionRole::Scope,
                        false,
                        VariableMap::new(),
                    )?;
                    timer::attach(self.tree, scope, &definition, &container.id)?;
                    scope
                }
            };
        }
        Ok(parent)
    }

    /// Position a new execution at `activity_id`, applying the entry semantics
    /// of whatever node is there. Returns the executions that end up waiting.
    pub(crate) fn land_on(
        &mut self,
        site: &Site,
        parent: ExecutionId,
        activity_id: &str,
        variables: VariableMap,
        depth: usize,
    ) -> Result<Vec<ExecutionId>, MigrationError> {
        if depth > self.config.max_routing_depth {
            return Err(MigrationError::RoutingDepthExceeded {
                element_id: activity_id.to_string(),
                max_depth: self.config.max_routing_depth,
            });
        }
        let definition = site.definition.clone();
        let node = definition
            .node(activity_id)
            .ok_or_else(|| MigrationError::ActivityNotFound {
                activity_id: activity_id.to_string(),
                definition_id: definition.id().to_string(),
            })?;

        if node.is_multi_instance() {
            return multi_instance::create(self, site, parent, node, variables);
        }
        match &node.kind {
            NodeKind::ExclusiveGateway | NodeKind::ParallelGateway | NodeKind::InclusiveGateway => {
                gateway::land(self, site, parent, node, variables, depth)
            }
            NodeKind::SubProcess => {
                let scope = self.open_scope(site, parent, node, variables)?;
                timer::attach(self.tree, scope, &definition, &node.id)?;
                Ok(vec![scope])
            }
            NodeKind::CallActivity { .. } => call_activity::enter(self, site, parent, node, variables),
            NodeKind::BoundaryTimer { .. } => Err(MigrationError::Invalid(format!(
                "Cannot migrate onto boundary event '{}'",
                activity_id
            ))),
            _ => {
                let token = self.tree.create_execution(parent, activity_id, variables)?;
                timer::attach(self.tree, token, &definition, activity_id)?;
                Ok(vec![token])
            }
        }
    }

    /// Scope execution for an embedded sub-process with a token at its start event.
    pub(crate) fn open_scope(
        &mut self,
        site: &Site,
        parent: ExecutionId,
        node: &FlowNode,
        variables: VariableMap,
    ) -> Result<ExecutionId, MigrationError> {
        let start = site
            .definition
            .start_event(Some(&node.id))
            .ok_or_else(|| MigrationError::NoStartEvent {
                scope: node.id.clone(),
                definition_id: site.definition.id().to_string(),
            })?;
        let scope = self.tree.create_execution_with(
            parent,
            Some(&node.id),
            ExecutionRole::Scope,
            false,
            variables,
        )?;
        self.tree.create_execution(scope, &start.id, VariableMap::new())?;
        Ok(scope)
    }

    // ── Finishing ──

    /// Retained executions get the boundary timers their activity has in the
    /// target definition. Iterations of a multi-instance carry none.
    fn reconcile_timers(&mut self, original: &[(ExecutionId, String)]) -> Result<(), MigrationError> {
        let target = self.target.clone();
        for (id, activity) in original {
            let Ok(exec) = self.tree.execution(*id) else {
                continue;
            };
            let eligible = matches!(
                exec.role,
                ExecutionRole::Token | ExecutionRole::Scope | ExecutionRole::MultiInstanceRoot
            );
            let iteration = exec
                .parent_id
                .and_then(|p| self.tree.execution(p).ok())
                .is_some_and(|p| p.is_multi_instance_root());
            // Repointed roots may carry a new activity id.
            let activity = exec.activity().unwrap_or(activity).to_string();
            if eligible && !iteration && target.contains(&activity) {
                timer::reconcile(self.tree, *id, &target, &activity)?;
            }
        }
        Ok(())
    }

    /// Remove structure left empty by the moves, until nothing changes:
    /// scopes and multi-instance roots without children, and call activities
    /// whose sub-process instance has nothing left running. Sub-process
    /// instances are pruned the same way, so a call activity drains once its
    /// called scopes do.
    fn prune(&mut self) -> Result<(), MigrationError> {
        loop {
            let empty: Vec<ExecutionId> = self
                .instance_and_sub_instances()
                .into_iter()
                .flat_map(|pid| self.tree.executions_of(pid))
                .filter(|e| match e.role {
                    ExecutionRole::Scope | ExecutionRole::MultiInstanceRoot => e
                        .children
                        .iter()
                        .all(|c| self.tree.execution(*c).map_or(true, |c| c.is_timer())),
                    ExecutionRole::Token => self
                        .tree
                        .sub_process_instance(e.id)
                        .is_some_and(|sub| self.tree.executions_of(sub.id).len() <= 1),
                    _ => false,
                })
                .map(|e| e.id)
                .collect();
            if empty.is_empty() {
                return Ok(());
            }
            for id in empty {
                let Ok(exec) = self.tree.execution(id) else {
                    continue;
                };
                let parent = exec.parent_id;
                let own = exec.process_instance_id == self.instance_id;
                debug!(execution_id = %id, activity_id = ?exec.activity_id, "Pruning drained execution");
                self.tree.remove_execution(id)?;
                if let Some(parent) = parent.filter(|_| own) {
                    if self
                        .tree
                        .execution(parent)
                        .is_ok_and(|p| p.is_multi_instance_root())
                    {
                        self.touched_multi_instance.insert(parent);
                    }
                }
            }
        }
    }

    /// The migrating instance followed by every instance it calls, transitively.
    fn instance_and_sub_instances(&self) -> Vec<InstanceId> {
        let mut out = vec![self.instance_id];
        let mut next = 0;
        while next < out.len() {
            let called: Vec<InstanceId> = self
                .tree
                .sub_process_instances(out[next])
                .into_iter()
                .map(|i| i.id)
                .collect();
            out.extend(called);
            next += 1;
        }
        out
    }

    fn verify(&self) -> Result<(), MigrationError> {
        for exec in self.tree.executions_of(self.instance_id) {
            if let Some(activity) = exec.activity() {
                if !self.target.contains(activity) {
                    return Err(MigrationError::ActivityNotFound {
                        activity_id: activity.to_string(),
                        definition_id: self.target.id().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
