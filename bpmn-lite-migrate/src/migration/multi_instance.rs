//! Multi-instance activities: fresh roots with their iterations, repointing
//! live roots onto a new loop type, and keeping the `nrOf*` counters honest.

use super::call_activity;
use super::error::MigrationError;
use super::plan::{PlannedTarget, SourceUnit};
use super::transform::{MigrationContext, Site};
use crate::expression::ExpressionEvaluator;
use crate::model::{FlowNode, LoopCardinality, MultiInstanceSpec, NodeKind, ProcessDefinition};
use crate::runtime::{ExecutionRole, ExecutionTree, TreeError};
use crate::types::*;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

/// Evaluate the loop cardinality. Must be at least 1 and at most `max`.
pub(crate) fn resolve_cardinality(
    evaluator: &dyn ExpressionEvaluator,
    spec: &MultiInstanceSpec,
    scope: &VariableMap,
    max: u32,
) -> Result<u32, String> {
    let n = match &spec.cardinality {
        LoopCardinality::Fixed(n) => *n,
        LoopCardinality::Expression(expression) => {
            let value = evaluator
                .evaluate(expression, scope)
                .map_err(|e| e.to_string())?;
            value_as_u32(&value).ok_or_else(|| {
                format!(
                    "'{}' evaluated to {}, expected a non-negative integer",
                    expression, value
                )
            })?
        }
    };
    if n == 0 {
        Err("cardinality must be at least 1".to_string())
    } else if n > max {
        Err(format!(
            "cardinality {} exceeds the configured maximum of {}",
            n, max
        ))
    } else {
        Ok(n)
    }
}

fn counters(instances: u32, completed: u32, active: u32) -> VariableMap {
    VariableMap::from([
        (NR_OF_INSTANCES.to_string(), json!(instances)),
        (NR_OF_COMPLETED_INSTANCES.to_string(), json!(completed)),
        (NR_OF_ACTIVE_INSTANCES.to_string(), json!(active)),
    ])
}

/// Land on a multi-instance activity: a waiting root holding the counters and
/// boundary timers, with one iteration (sequential) or `n` iterations (parallel).
pub(crate) fn create(
    ctx: &mut MigrationContext<'_>,
    site: &Site,
    parent: ExecutionId,
    node: &FlowNode,
    variables: VariableMap,
) -> Result<Vec<ExecutionId>, MigrationError> {
    let Some(spec) = &node.multi_instance else {
        return Ok(Vec::new());
    };
    let scope = merged(&ctx.tree.variables_in_scope(parent), &variables);
    let n = resolve_cardinality(ctx.evaluator, spec, &scope, ctx.config.max_loop_cardinality)
        .map_err(|reason| MigrationError::InvalidLoopCardinality {
            activity_id: node.id.clone(),
            reason,
        })?;

    let root = ctx.tree.create_execution_with(
        parent,
        Some(&node.id),
        ExecutionRole::MultiInstanceRoot,
        false,
        counters(n, 0, n),
    )?;
    super::timer::attach(ctx.tree, root, &site.definition, &node.id)?;

    let iterations = if spec.sequential { 1 } else { n };
    let mut created = Vec::with_capacity(iterations as usize);
    for loop_counter in 0..iterations {
        created.push(create_iteration(ctx, site, root, node, spec, loop_counter, &variables)?);
    }
    ctx.touched_multi_instance.insert(root);
    debug!(
        activity_id = %node.id,
        cardinality = n,
        sequential = spec.sequential,
        "Created multi-instance root"
    );
    Ok(created)
}

fn create_iteration(
    ctx: &mut MigrationContext<'_>,
    site: &Site,
    root: ExecutionId,
    node: &FlowNode,
    spec: &MultiInstanceSpec,
    loop_counter: u32,
    variables: &VariableMap,
) -> Result<ExecutionId, MigrationError> {
    let mut variables = variables.clone();
    variables.insert(spec.element_index_variable.clone(), json!(loop_counter));
    match node.kind {
        NodeKind::SubProcess => ctx.open_scope(site, root, node, variables),
        NodeKind::CallActivity { .. } => call_activity::start_call(ctx, root, node, variables),
        _ => Ok(ctx.tree.create_execution(root, &node.id, variables)?),
    }
}

/// Move a live multi-instance root onto `target` without losing completed
/// work. Iterations are renamed in place; a sequential loop becoming parallel
/// gains the iterations still to run, a parallel loop becoming sequential
/// keeps only its lowest running iteration.
pub(crate) fn repoint(
    ctx: &mut MigrationContext<'_>,
    source: &SourceUnit,
    target: &PlannedTarget,
) -> Result<(), MigrationError> {
    let definition = ctx.target.clone();
    let node = definition
        .node(&target.activity_id)
        .ok_or_else(|| MigrationError::ActivityNotFound {
            activity_id: target.activity_id.clone(),
            definition_id: definition.id().to_string(),
        })?;
    let Some(spec) = &node.multi_instance else {
        return Err(MigrationError::Invalid(format!(
            "Activity '{}' is not a multi-instance activity",
            node.id
        )));
    };
    let source_spec = ctx
        .source
        .node(&source.activity_id)
        .and_then(|n| n.multi_instance.clone());
    let was_sequential = source_spec.as_ref().map_or(spec.sequential, |s| s.sequential);
    let old_index = source_spec
        .map(|s| s.element_index_variable)
        .unwrap_or_else(|| DEFAULT_ELEMENT_INDEX_VARIABLE.to_string());

    let root_id = source.execution_id;
    let root_vars = ctx.tree.execution(root_id)?.variables.clone();
    let n = match variable_as_u32(&root_vars, NR_OF_INSTANCES) {
        Some(n) => n,
        None => {
            let scope = ctx.tree.variables_in_scope(root_id);
            resolve_cardinality(ctx.evaluator, spec, &scope, ctx.config.max_loop_cardinality)
                .map_err(|reason| MigrationError::InvalidLoopCardinality {
                    activity_id: node.id.clone(),
                    reason,
                })?
        }
    };
    let completed = variable_as_u32(&root_vars, NR_OF_COMPLETED_INSTANCES)
        .unwrap_or(0)
        .min(n);

    ctx.tree.set_activity(root_id, &node.id)?;
    let site = ctx.instance_site()?;
    move_to_scope(ctx, &site, root_id, &node.id)?;
    let iterations: Vec<(ExecutionId, u32)> = ctx
        .tree
        .child_executions(root_id)
        .into_iter()
        .filter(|e| !e.is_timer())
        .map(|e| (e.id, variable_as_u32(&e.variables, &old_index).unwrap_or(0)))
        .collect();

    for (id, loop_counter) in &iterations {
        ctx.tree.set_activity(*id, &node.id)?;
        if old_index != spec.element_index_variable {
            ctx.tree.remove_variables(*id, &[old_index.as_str()])?;
            ctx.tree.set_variables(
                *id,
                &VariableMap::from([(spec.element_index_variable.clone(), json!(loop_counter))]),
            )?;
        }
        ctx.tree.set_variables(*id, &target.local_variables)?;
    }

    let remaining = n - completed;
    match (was_sequential, spec.sequential) {
        (true, false) => {
            let mut next = iterations
                .iter()
                .map(|(_, lc)| lc + 1)
                .max()
                .unwrap_or(completed);
            let mut running = iterations.len() as u32;
            while running < remaining {
                create_iteration(ctx, &site, root_id, node, spec, next, &target.local_variables)?;
                next += 1;
                running += 1;
            }
        }
        (false, true) => {
            let keep = iterations.iter().min_by_key(|(_, lc)| *lc).map(|(id, _)| *id);
            for (id, _) in &iterations {
                if Some(*id) != keep {
                    ctx.tree.remove_execution(*id)?;
                }
            }
        }
        _ => {}
    }

    ctx.tree
        .set_variables(root_id, &counters(n, completed, remaining))?;
    ctx.touched_multi_instance.insert(root_id);
    debug!(
        from = %source.activity_id,
        to = %node.id,
        was_sequential,
        sequential = spec.sequential,
        "Repointed multi-instance root"
    );
    Ok(())
}

/// Hang a repointed root under the scope execution of the sub-process that
/// contains `activity_id` in the target. Timers of a root that moves are
/// dropped; timer reconciliation attaches the target's afterwards.
fn move_to_scope(
    ctx: &mut MigrationContext<'_>,
    site: &Site,
    root_id: ExecutionId,
    activity_id: &str,
) -> Result<(), MigrationError> {
    let mut hints = HashSet::new();
    let mut current = ctx.tree.execution(root_id)?.parent_id;
    let old_parent = current;
    while let Some(id) = current {
        hints.insert(id);
        current = ctx.tree.execution(id)?.parent_id;
    }
    let parent = ctx.resolve_parent(site, activity_id, &hints)?;
    if old_parent == Some(parent) {
        return Ok(());
    }
    let jobs: Vec<JobId> = ctx
        .tree
        .timer_jobs_attached_to(root_id)
        .into_iter()
        .map(|j| j.id)
        .collect();
    for job in jobs {
        ctx.tree.remove_timer_job(job)?;
    }
    ctx.tree.reparent(root_id, parent)?;
    debug!(%root_id, %parent, activity_id, "Moved multi-instance root to its target scope");
    Ok(())
}

/// Recompute `nrOfActiveInstances` from the live iterations.
pub(crate) fn refresh_counters(
    tree: &mut ExecutionTree,
    root: ExecutionId,
    definition: &ProcessDefinition,
) -> Result<(), TreeError> {
    let exec = tree.execution(root)?;
    let Some(spec) = exec
        .activity()
        .and_then(|a| definition.node(a))
        .and_then(|n| n.multi_instance.as_ref())
    else {
        return Ok(());
    };
    let n = variable_as_u32(&exec.variables, NR_OF_INSTANCES).unwrap_or(0);
    let completed = variable_as_u32(&exec.variables, NR_OF_COMPLETED_INSTANCES).unwrap_or(0);
    let running = tree
        .child_executions(root)
        .into_iter()
        .filter(|e| !e.is_timer())
        .count() as u32;
    let active = if spec.sequential {
        n.saturating_sub(completed)
    } else {
        running
    };
    tree.set_variables(
        root,
        &VariableMap::from([(NR_OF_ACTIVE_INSTANCES.to_string(), json!(active))]),
    )
}
