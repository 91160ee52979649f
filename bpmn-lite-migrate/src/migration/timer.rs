//! Boundary timers on migrated executions.

use crate::model::{NodeKind, ProcessDefinition};
use crate::runtime::{ExecutionTree, TreeError};
use crate::types::{ExecutionId, JobId};
use std::collections::HashSet;
use tracing::debug;

struct TimerSpec<'a> {
    boundary_event_id: &'a str,
    timer: &'a str,
    cancel_activity: bool,
}

fn timers_of<'a>(definition: &'a ProcessDefinition, activity_id: &str) -> Vec<TimerSpec<'a>> {
    definition
        .boundary_timers(activity_id)
        .into_iter()
        .filter_map(|node| match &node.kind {
            NodeKind::BoundaryTimer {
                timer,
                cancel_activity,
                ..
            } => Some(TimerSpec {
                boundary_event_id: &node.id,
                timer,
                cancel_activity: *cancel_activity,
            }),
            _ => None,
        })
        .collect()
}

/// Create a job for every boundary timer of `activity_id` on `execution`.
pub(crate) fn attach(
    tree: &mut ExecutionTree,
    execution: ExecutionId,
    definition: &ProcessDefinition,
    activity_id: &str,
) -> Result<Vec<JobId>, TreeError> {
    let mut jobs = Vec::new();
    for spec in timers_of(definition, activity_id) {
        jobs.push(tree.create_timer_job(
            execution,
            spec.boundary_event_id,
            spec.timer,
            spec.cancel_activity,
        )?);
    }
    Ok(jobs)
}

/// Bring the timers of a retained execution in line with `activity_id` in the
/// target definition. Jobs whose boundary event, timer and cancel flag are
/// unchanged survive with their identity; the rest are replaced.
pub(crate) fn reconcile(
    tree: &mut ExecutionTree,
    execution: ExecutionId,
    definition: &ProcessDefinition,
    activity_id: &str,
) -> Result<(), TreeError> {
    let wanted = timers_of(definition, activity_id);
    let existing: Vec<(JobId, String, String, bool)> = tree
        .timer_jobs_attached_to(execution)
        .into_iter()
        .map(|j| (j.id, j.boundary_event_id.clone(), j.timer.clone(), j.cancel_activity))
        .collect();

    let mut kept = HashSet::new();
    for (job_id, boundary_event_id, timer, cancel_activity) in existing {
        let unchanged = wanted.iter().any(|w| {
            w.boundary_event_id == boundary_event_id
                && w.timer == timer
                && w.cancel_activity == cancel_activity
        });
        if unchanged && kept.insert(boundary_event_id.clone()) {
            continue;
        }
        debug!(%execution, boundary_event_id = %boundary_event_id, "Removing boundary timer");
        tree.remove_timer_job(job_id)?;
    }

    for spec in wanted {
        if kept.contains(spec.boundary_event_id) {
            continue;
        }
        tree.create_timer_job(
            execution,
            spec.boundary_event_id,
            spec.timer,
            spec.cancel_activity,
        )?;
    }
    Ok(())
}
