//! Mapping validator: walks the live execution tree against both definitions
//! and turns a migration document into a [`MigrationPlan`].
//!
//! The same walk serves `validate_migration` (every finding collected) and
//! `migrate` (stop at the first finding).

use super::call_activity::resolve_called_definition;
use super::document::{ActivityMapping, MappingDirection, MigrationDocument, TargetDefinition};
use super::error::{MigrationIssue, UnmappedReason};
use super::multi_instance::resolve_cardinality;
use super::plan::*;
use crate::config::MigrationConfig;
use crate::expression::ExpressionEvaluator;
use crate::model::repository::DefinitionRepository;
use crate::model::{NodeKind, ProcessDefinition};
use crate::runtime::{Execution, ExecutionRole, ExecutionTree};
use crate::types::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Collect,
    FailFast,
}

pub(crate) struct PlanInput<'a> {
    pub tree: &'a ExecutionTree,
    pub instance_id: InstanceId,
    pub document: &'a MigrationDocument,
    pub repository: &'a dyn DefinitionRepository,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub config: &'a MigrationConfig,
}

pub(crate) struct PlanOutcome {
    pub plan: MigrationPlan,
    pub issues: Vec<MigrationIssue>,
    pub source: Arc<ProcessDefinition>,
    pub target: Arc<ProcessDefinition>,
}

pub(crate) fn resolve_target(
    repository: &dyn DefinitionRepository,
    target: &TargetDefinition,
) -> Option<Arc<ProcessDefinition>> {
    match target {
        TargetDefinition::Id { definition_id } => repository.definition(definition_id),
        TargetDefinition::Key {
            process_key,
            version: Some(v),
        } => repository.deployed_version(process_key, *v),
        TargetDefinition::Key {
            process_key,
            version: None,
        } => repository.latest_deployed_version(process_key),
    }
}

/// Build the plan. `Err` carries the finding that stopped planning: a missing
/// instance or definition in either mode, or the first finding in fail-fast mode.
pub(crate) fn build_plan(input: &PlanInput<'_>, mode: Mode) -> Result<PlanOutcome, MigrationIssue> {
    let instance = input
        .tree
        .instance(input.instance_id)
        .map_err(|_| MigrationIssue::InstanceNotFound(input.instance_id))?;
    let source = input
        .repository
        .definition(&instance.definition_id)
        .ok_or_else(|| MigrationIssue::DefinitionNotFound(instance.definition_id.clone()))?;
    let target = resolve_target(input.repository, &input.document.target)
        .ok_or_else(|| MigrationIssue::TargetDefinitionNotFound(input.document.target.to_string()))?;

    let root = instance.root_execution_id;
    let instance_scope = merged(
        &input.tree.variables_in_scope(root),
        &input.document.instance_variables,
    );

    let mut planner = Planner {
        input,
        mode,
        source: source.clone(),
        target: target.clone(),
        instance_scope,
        from_index: HashMap::new(),
        out_index: HashMap::new(),
        malformed: HashSet::new(),
        issues: Vec::new(),
        mapped: Vec::new(),
        retained: Vec::new(),
        reported_containers: HashSet::new(),
        called_definitions: BTreeMap::new(),
    };

    planner.index_mappings()?;
    planner.walk(root, None)?;
    let scopes = planner.resolve_scopes()?;
    let plan = planner.build_moves(&scopes)?;
    debug!(
        process_instance_id = %input.instance_id,
        moves = plan.moves.len(),
        retained = plan.retained.len(),
        issues = planner.issues.len(),
        "Migration plan built"
    );

    Ok(PlanOutcome {
        plan,
        issues: planner.issues,
        source,
        target,
    })
}

// ─── Planner ──────────────────────────────────────────────────

struct MappedUnit {
    mapping: usize,
    unit: SourceUnit,
    multi_instance_root: bool,
}

/// A container that could not be carried over; everything below it must be mapped.
#[derive(Clone)]
struct Displaced {
    execution_id: ExecutionId,
    activity_id: String,
    reason: UnmappedReason,
}

struct ResolvedScope {
    scope: TargetScope,
    definition: Arc<ProcessDefinition>,
}

struct Planner<'a> {
    input: &'a PlanInput<'a>,
    mode: Mode,
    source: Arc<ProcessDefinition>,
    target: Arc<ProcessDefinition>,
    /// Instance variables plus document-level instance variables.
    instance_scope: VariableMap,
    /// Mapped activity of the migrating instance -> mapping index.
    from_index: HashMap<String, usize>,
    /// (call activity, mapped activity of its sub-process instance) -> mapping index.
    out_index: HashMap<(String, String), usize>,
    malformed: HashSet<usize>,
    issues: Vec<MigrationIssue>,
    mapped: Vec<MappedUnit>,
    retained: Vec<ExecutionId>,
    reported_containers: HashSet<ExecutionId>,
    called_definitions: BTreeMap<String, String>,
}

impl<'a> Planner<'a> {
    fn report(&mut self, issue: MigrationIssue) -> Result<(), MigrationIssue> {
        if self.mode == Mode::FailFast {
            return Err(issue);
        }
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
        Ok(())
    }

    // ── Mapping structure ──

    fn index_mappings(&mut self) -> Result<(), MigrationIssue> {
        let input = self.input;
        for (idx, mapping) in input.document.mappings.iter().enumerate() {
            let from = mapping.from_label();
            let malformed = if mapping.from_activity_ids.is_empty()
                || mapping.to_activity_ids.is_empty()
            {
                Some("from and to activity ids must not be empty".to_string())
            } else if mapping.from_activity_ids.len() > 1 && mapping.to_activity_ids.len() > 1 {
                Some("many-to-many mappings are not supported".to_string())
            } else {
                match (mapping.direction, &mapping.call_activity_id) {
                    (MappingDirection::None, Some(call)) => Some(format!(
                        "call activity '{}' is set without a mapping direction",
                        call
                    )),
                    (direction, None) if direction != MappingDirection::None => {
                        Some(format!("direction {:?} requires a call activity id", direction))
                    }
                    _ => None,
                }
            };
            if let Some(reason) = malformed {
                self.malformed.insert(idx);
                self.report(MigrationIssue::MalformedMapping { from, reason })?;
                continue;
            }

            for activity in &mapping.from_activity_ids {
                let duplicate = match (mapping.direction, &mapping.call_activity_id) {
                    (MappingDirection::OutToParent, Some(call)) => {
                        let key = (call.clone(), activity.clone());
                        if self.out_index.contains_key(&key) {
                            true
                        } else {
                            self.out_index.insert(key, idx);
                            false
                        }
                    }
                    _ => {
                        if self.from_index.contains_key(activity) {
                            true
                        } else {
                            self.from_index.insert(activity.clone(), idx);
                            false
                        }
                    }
                };
                if duplicate {
                    self.report(MigrationIssue::DuplicateMapping {
                        activity_id: activity.clone(),
                    })?;
                }
            }
        }
        Ok(())
    }

    // ── Tree walk ──

    /// Whether an activity can be carried over unchanged.
    fn auto_map(&self, activity_id: &str) -> Result<(), UnmappedReason> {
        let target = self
            .target
            .node(activity_id)
            .ok_or(UnmappedReason::Missing)?;
        let Some(source) = self.source.node(activity_id) else {
            return Ok(());
        };
        if !source.kind.same_kind(&target.kind) {
            return Err(UnmappedReason::KindChanged {
                expected: source.kind.display_name(),
            });
        }
        if source.parent != target.parent {
            return Err(UnmappedReason::ScopeChanged);
        }
        let loop_type = |n: &crate::model::FlowNode| n.multi_instance.as_ref().map(|mi| mi.sequential);
        if loop_type(source) != loop_type(target) {
            return Err(UnmappedReason::LoopTypeChanged);
        }
        if let (Some(a), Some(b)) = (source.called_element(), target.called_element()) {
            if a.raw() != b.raw() {
                return Err(UnmappedReason::CalledElementChanged);
            }
        }
        Ok(())
    }

    fn walk(&mut self, parent: ExecutionId, displaced: Option<Displaced>) -> Result<(), MigrationIssue> {
        let tree = self.input.tree;
        for child in tree.child_executions(parent) {
            if child.is_timer() {
                continue;
            }
            let Some(activity) = child.activity_id.clone() else {
                continue;
            };

            if let Some(&mapping) = self.from_index.get(&activity) {
                self.mapped.push(MappedUnit {
                    mapping,
                    unit: SourceUnit {
                        execution_id: child.id,
                        activity_id: activity,
                        process_instance_id: child.process_instance_id,
                    },
                    multi_instance_root: child.is_multi_instance_root(),
                });
                continue;
            }

            match child.role {
                ExecutionRole::Scope | ExecutionRole::MultiInstanceRoot => {
                    let below = match (&displaced, self.auto_map(&activity)) {
                        (Some(d), _) => Some(d.clone()),
                        (None, Ok(())) => {
                            self.retained.push(child.id);
                            None
                        }
                        (None, Err(reason)) => Some(Displaced {
                            execution_id: child.id,
                            activity_id: activity,
                            reason,
                        }),
                    };
                    self.walk(child.id, below)?;
                }
                ExecutionRole::Token if tree.sub_process_instance(child.id).is_some() => {
                    self.walk_call_activity(child, displaced.as_ref())?;
                }
                _ => match (&displaced, self.auto_map(&activity)) {
                    (Some(d), _) => self.report_displaced(d)?,
                    (None, Ok(())) => self.retained.push(child.id),
                    (None, Err(reason)) => self.report(MigrationIssue::Unmapped {
                        process_instance_id: self.input.instance_id,
                        activity_id: activity,
                        reason,
                        has_children: false,
                    })?,
                },
            }
        }
        Ok(())
    }

    fn report_displaced(&mut self, displaced: &Displaced) -> Result<(), MigrationIssue> {
        if !self.reported_containers.insert(displaced.execution_id) {
            return Ok(());
        }
        self.report(MigrationIssue::Unmapped {
            process_instance_id: self.input.instance_id,
            activity_id: displaced.activity_id.clone(),
            reason: displaced.reason.clone(),
            has_children: true,
        })
    }

    /// A call activity that is not mapped itself: either it carries over, or
    /// its running sub-process activities must all be mapped out of it.
    fn walk_call_activity(
        &mut self,
        call: &Execution,
        displaced: Option<&Displaced>,
    ) -> Result<(), MigrationIssue> {
        let tree = self.input.tree;
        let call_activity_id = call.activity_id.clone().unwrap_or_default();
        let Some(sub) = tree.sub_process_instance(call.id) else {
            return Ok(());
        };

        let mut covered = 0;
        let mut running = Vec::new();
        self.walk_sub_instance(&call_activity_id, sub.root_execution_id, &mut covered, &mut running);

        match self.auto_map(&call_activity_id) {
            Ok(()) => match displaced {
                Some(d) if !running.is_empty() => self.report_displaced(d)?,
                Some(_) => {}
                None => self.retained.push(call.id),
            },
            Err(reason) if covered == 0 => self.report(MigrationIssue::CallActivityChanged {
                call_activity_id,
                reason,
                has_children: !running.is_empty(),
            })?,
            Err(_) if running.is_empty() => {}
            Err(UnmappedReason::CalledElementChanged) => {
                self.report(MigrationIssue::IncompleteCallActivity {
                    call_activity_id,
                    running,
                })?
            }
            Err(reason) => self.report(MigrationIssue::CallActivityChanged {
                call_activity_id,
                reason,
                has_children: true,
            })?,
        }
        Ok(())
    }

    fn walk_sub_instance(
        &mut self,
        call_activity_id: &str,
        parent: ExecutionId,
        covered: &mut usize,
        running: &mut Vec<String>,
    ) {
        let tree = self.input.tree;
        for child in tree.child_executions(parent) {
            if child.is_timer() {
                continue;
            }
            let Some(activity) = child.activity_id.clone() else {
                continue;
            };
            let key = (call_activity_id.to_string(), activity.clone());
            if let Some(&mapping) = self.out_index.get(&key) {
                *covered += 1;
                self.mapped.push(MappedUnit {
                    mapping,
                    unit: SourceUnit {
                        execution_id: child.id,
                        activity_id: activity,
                        process_instance_id: child.process_instance_id,
                    },
                    multi_instance_root: child.is_multi_instance_root(),
                });
            } else if !child.is_leaf() {
                self.walk_sub_instance(call_activity_id, child.id, covered, running);
            } else if !running.contains(&activity) {
                running.push(activity);
            }
        }
    }

    // ── Mapping targets ──

    fn resolve_scopes(&mut self) -> Result<Vec<Option<ResolvedScope>>, MigrationIssue> {
        let input = self.input;
        let mut scopes = Vec::with_capacity(input.document.mappings.len());
        for (idx, mapping) in input.document.mappings.iter().enumerate() {
            if self.malformed.contains(&idx) {
                scopes.push(None);
                continue;
            }
            let resolved = match (mapping.direction, mapping.call_activity_id.as_deref()) {
                (MappingDirection::IntoSubprocess, Some(call)) => self.resolve_into(mapping, call)?,
                (MappingDirection::OutToParent, Some(call)) => {
                    let is_call_activity = self
                        .source
                        .node(call)
                        .is_some_and(|n| n.called_element().is_some());
                    if is_call_activity {
                        Some(self.instance_scope_target())
                    } else {
                        self.report(MigrationIssue::CallActivityMissing {
                            call_activity_id: call.to_string(),
                            definition_id: self.source.id().to_string(),
                        })?;
                        None
                    }
                }
                _ => Some(self.instance_scope_target()),
            };

            let resolved = match resolved {
                Some(scope) => {
                    let mut valid = true;
                    for to in &mapping.to_activity_ids {
                        valid &= self.check_target(mapping, to, &scope.definition)?;
                    }
                    valid.then_some(scope)
                }
                None => None,
            };
            scopes.push(resolved);
        }
        Ok(scopes)
    }

    fn instance_scope_target(&self) -> ResolvedScope {
        ResolvedScope {
            scope: TargetScope::Instance,
            definition: self.target.clone(),
        }
    }

    fn resolve_into(
        &mut self,
        mapping: &ActivityMapping,
        call: &str,
    ) -> Result<Option<ResolvedScope>, MigrationIssue> {
        let target = self.target.clone();
        let Some(node) = target.node(call).filter(|n| n.called_element().is_some()) else {
            self.report(MigrationIssue::CallActivityMissing {
                call_activity_id: call.to_string(),
                definition_id: target.id().to_string(),
            })?;
            return Ok(None);
        };
        if node.is_multi_instance() {
            for to in &mapping.to_activity_ids {
                self.report(MigrationIssue::InsideMultiInstance {
                    from: mapping.from_label(),
                    to: to.clone(),
                    container: call.to_string(),
                })?;
            }
            return Ok(None);
        }

        let scope = merged(
            &merged(&self.instance_scope, &mapping.instance_variables),
            &mapping.local_variables,
        );
        let Some(called_element) = node.called_element() else {
            return Ok(None);
        };
        match resolve_called_definition(
            self.input.repository,
            self.input.evaluator,
            called_element,
            mapping.called_element_version,
            &scope,
        ) {
            Ok(definition) => {
                self.called_definitions
                    .insert(call.to_string(), definition.id().to_string());
                Ok(Some(ResolvedScope {
                    scope: TargetScope::SubProcess {
                        call_activity_id: call.to_string(),
                        definition_id: definition.id().to_string(),
                    },
                    definition,
                }))
            }
            Err(e) => {
                self.report(e.into_issue(call))?;
                Ok(None)
            }
        }
    }

    fn check_target(
        &mut self,
        mapping: &ActivityMapping,
        to: &str,
        definition: &ProcessDefinition,
    ) -> Result<bool, MigrationIssue> {
        let from = mapping.from_label();
        let Some(node) = definition.node(to) else {
            self.report(MigrationIssue::InvalidTarget {
                from,
                to: to.to_string(),
                definition_id: definition.id().to_string(),
            })?;
            return Ok(false);
        };
        if matches!(node.kind, NodeKind::BoundaryTimer { .. }) {
            self.report(MigrationIssue::BoundaryEventTarget {
                from,
                to: to.to_string(),
            })?;
            return Ok(false);
        }
        if let Some(container) = definition.multi_instance_container(to) {
            self.report(MigrationIssue::InsideMultiInstance {
                from,
                to: to.to_string(),
                container: container.id.clone(),
            })?;
            return Ok(false);
        }
        Ok(true)
    }

    // ── Moves ──

    fn build_moves(
        &mut self,
        scopes: &[Option<ResolvedScope>],
    ) -> Result<MigrationPlan, MigrationIssue> {
        let input = self.input;
        let mappings = &input.document.mappings;

        // One move per unit, except many-to-one mappings which collapse their units.
        let mut groups: Vec<(usize, Vec<MappedUnit>)> = Vec::new();
        for unit in std::mem::take(&mut self.mapped) {
            let collapse = mappings[unit.mapping].from_activity_ids.len() > 1;
            match groups.iter_mut().find(|(idx, _)| collapse && *idx == unit.mapping) {
                Some((_, units)) => units.push(unit),
                None => groups.push((unit.mapping, vec![unit])),
            }
        }

        let mut moves = Vec::new();
        for (idx, units) in groups {
            let Some(scope) = &scopes[idx] else {
                continue;
            };
            let mapping = &mappings[idx];
            let kind = self.move_kind(mapping, &units, scope);

            let mut targets = Vec::new();
            for to in &mapping.to_activity_ids {
                let local_variables = mapping.locals_for(to);
                if kind == MoveKind::Relocate {
                    self.check_landing(mapping, to, &scope.definition, &units[0].unit, &local_variables)?;
                }
                targets.push(PlannedTarget {
                    activity_id: to.clone(),
                    local_variables,
                });
            }

            moves.push(PlannedMove {
                mapping_index: idx,
                kind,
                sources: units.into_iter().map(|u| u.unit).collect(),
                scope: scope.scope.clone(),
                targets,
                instance_variables: mapping.instance_variables.clone(),
            });
        }

        Ok(MigrationPlan {
            process_instance_id: input.instance_id,
            source_definition_id: self.source.id().to_string(),
            target_definition_id: self.target.id().to_string(),
            instance_variables: input.document.instance_variables.clone(),
            moves,
            retained: std::mem::take(&mut self.retained),
            called_definitions: std::mem::take(&mut self.called_definitions),
        })
    }

    /// Multi-instance roots mapped onto a multi-instance activity of the same
    /// kind keep their iterations; everything else is relocated.
    fn move_kind(&self, mapping: &ActivityMapping, units: &[MappedUnit], scope: &ResolvedScope) -> MoveKind {
        let [unit] = units else {
            return MoveKind::Relocate;
        };
        let [to] = mapping.to_activity_ids.as_slice() else {
            return MoveKind::Relocate;
        };
        if !unit.multi_instance_root
            || scope.scope != TargetScope::Instance
            || unit.unit.process_instance_id != self.input.instance_id
        {
            return MoveKind::Relocate;
        }
        match (self.source.node(&unit.unit.activity_id), scope.definition.node(to)) {
            (Some(s), Some(t))
                if t.is_multi_instance()
                    && s.kind.same_kind(&t.kind)
                    && t.kind != NodeKind::SubProcess =>
            {
                MoveKind::MultiInstanceRepoint
            }
            _ => MoveKind::Relocate,
        }
    }

    /// Checks that landing on `to` will not fail for reasons known up front:
    /// the loop cardinality of a fresh multi-instance and the called process
    /// of a call activity.
    fn check_landing(
        &mut self,
        mapping: &ActivityMapping,
        to: &str,
        definition: &ProcessDefinition,
        unit: &SourceUnit,
        locals: &VariableMap,
    ) -> Result<(), MigrationIssue> {
        let Some(node) = definition.node(to) else {
            return Ok(());
        };
        let scope = merged(
            &merged(
                &merged(
                    &self.input.tree.variables_in_scope(unit.execution_id),
                    &self.input.document.instance_variables,
                ),
                &mapping.instance_variables,
            ),
            locals,
        );

        if let Some(spec) = &node.multi_instance {
            if let Err(reason) = resolve_cardinality(
                self.input.evaluator,
                spec,
                &scope,
                self.input.config.max_loop_cardinality,
            ) {
                self.report(MigrationIssue::InvalidLoopCardinality {
                    activity_id: to.to_string(),
                    reason,
                })?;
            }
        }

        if let Some(called_element) = node.called_element() {
            match resolve_called_definition(
                self.input.repository,
                self.input.evaluator,
                called_element,
                None,
                &scope,
            ) {
                Ok(called) => {
                    self.called_definitions
                        .insert(to.to_string(), called.id().to_string());
                }
                Err(e) => self.report(e.into_issue(to))?,
            }
        }
        Ok(())
    }
}
