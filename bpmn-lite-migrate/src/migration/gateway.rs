//! Landing on gateways: route forks, park at joins.

use super::error::MigrationError;
use super::transform::{MigrationContext, Site};
use crate::expression::{ExpressionError, ExpressionEvaluator};
use crate::model::{FlowNode, NodeKind, OutgoingFlow, ProcessDefinition};
use crate::runtime::{ExecutionRole, ExecutionTree, HistoryEvent, TreeError};
use crate::types::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Land on a gateway. A join (parallel or inclusive with several incoming
/// flows) gets one waiting execution; a fork is taken immediately and every
/// selected flow's target is landed on in turn.
pub(crate) fn land(
    ctx: &mut MigrationContext<'_>,
    site: &Site,
    parent: ExecutionId,
    node: &FlowNode,
    variables: VariableMap,
    depth: usize,
) -> Result<Vec<ExecutionId>, MigrationError> {
    let definition = site.definition.clone();

    if definition.is_join(&node.id) {
        let waiting = ctx.tree.create_execution_with(
            parent,
            Some(&node.id),
            ExecutionRole::Token,
            false,
            variables,
        )?;
        debug!(gateway = %node.id, "Landed on join, waiting for the remaining branches");
        return Ok(vec![waiting]);
    }

    let flows = definition.outgoing(&node.id);
    let scope = merged(&ctx.tree.variables_in_scope(parent), &variables);
    let selected = match node.kind {
        NodeKind::ParallelGateway => flows,
        NodeKind::ExclusiveGateway => select_exclusive(ctx.evaluator, &node.id, flows, &scope)?,
        NodeKind::InclusiveGateway => select_inclusive(ctx.evaluator, &node.id, flows, &scope)?,
        _ => Vec::new(),
    };
    if selected.is_empty() {
        return Err(MigrationError::NoOutgoingFlow {
            element_id: node.id.clone(),
        });
    }

    ctx.tree.record(HistoryEvent::GatewayTaken {
        process_instance_id: site.instance_id,
        gateway_id: node.id.clone(),
        flow_ids: selected.iter().map(|f| f.flow.id.clone()).collect(),
    });

    let mut landed = Vec::new();
    for flow in selected {
        landed.extend(ctx.land_on(site, parent, &flow.target.id, variables.clone(), depth + 1)?);
    }
    Ok(landed)
}

/// Unconditional flows hold. A condition naming an unset variable does not.
fn holds(
    evaluator: &dyn ExpressionEvaluator,
    gateway_id: &str,
    flow: &OutgoingFlow<'_>,
    scope: &VariableMap,
) -> Result<bool, MigrationError> {
    let Some(condition) = &flow.flow.condition else {
        return Ok(true);
    };
    match evaluator.evaluate_condition(condition, scope) {
        Ok(value) => Ok(value),
        Err(ExpressionError::UnknownProperty { name, .. }) => {
            debug!(gateway = gateway_id, flow = %flow.flow.id, variable = %name, "Condition variable not set, flow not taken");
            Ok(false)
        }
        Err(source) => Err(MigrationError::Expression {
            element_id: gateway_id.to_string(),
            expression: condition.clone(),
            source,
        }),
    }
}

/// First conditional flow that holds, in declaration order, else the default flow.
fn select_exclusive<'d>(
    evaluator: &dyn ExpressionEvaluator,
    gateway_id: &str,
    flows: Vec<OutgoingFlow<'d>>,
    scope: &VariableMap,
) -> Result<Vec<OutgoingFlow<'d>>, MigrationError> {
    for flow in flows.iter().filter(|f| !f.flow.is_default) {
        if holds(evaluator, gateway_id, flow, scope)? {
            return Ok(vec![*flow]);
        }
    }
    Ok(flows.into_iter().filter(|f| f.flow.is_default).take(1).collect())
}

/// Every conditional flow that holds, else the default flow.
fn select_inclusive<'d>(
    evaluator: &dyn ExpressionEvaluator,
    gateway_id: &str,
    flows: Vec<OutgoingFlow<'d>>,
    scope: &VariableMap,
) -> Result<Vec<OutgoingFlow<'d>>, MigrationError> {
    let mut taken = Vec::new();
    for flow in flows.iter().filter(|f| !f.flow.is_default) {
        if holds(evaluator, gateway_id, flow, scope)? {
            taken.push(*flow);
        }
    }
    if taken.is_empty() {
        taken.extend(flows.into_iter().filter(|f| f.flow.is_default).take(1));
    }
    Ok(taken)
}

/// Drop executions waiting at a join that can no longer complete: no sibling
/// branch can reach the join, the join is not yet satisfied, and the
/// instance has other work to do.
pub(crate) fn discard_moot_joins(
    tree: &mut ExecutionTree,
    instance_id: InstanceId,
    definition: &ProcessDefinition,
) -> Result<usize, TreeError> {
    let mut waiting: BTreeMap<(Option<ExecutionId>, String), Vec<ExecutionId>> = BTreeMap::new();
    for exec in tree.executions_of(instance_id) {
        let Some(activity) = exec.activity() else {
            continue;
        };
        if exec.role == ExecutionRole::Token
            && !exec.active
            && exec.is_leaf()
            && definition.is_join(activity)
        {
            waiting
                .entry((exec.parent_id, activity.to_string()))
                .or_default()
                .push(exec.id);
        }
    }

    let mut removed = 0;
    for ((parent, gateway), ids) in waiting {
        if ids.len() >= definition.incoming_count(&gateway) {
            continue;
        }
        let reachable = parent
            .map(|p| tree.child_executions(p))
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.is_timer() && !ids.contains(&s.id))
            .filter_map(|s| s.activity())
            .any(|a| a != gateway && definition.can_reach(a, &gateway));
        if reachable {
            continue;
        }
        let other_work = tree
            .active_leaves(instance_id)
            .iter()
            .any(|e| !ids.contains(&e.id));
        if !other_work {
            continue;
        }
        for id in ids {
            warn!(
                process_instance_id = %instance_id,
                gateway = %gateway,
                execution_id = %id,
                "Discarding execution waiting at a join no branch can reach"
            );
            tree.remove_execution(id)?;
            removed += 1;
        }
    }
    Ok(removed)
}
