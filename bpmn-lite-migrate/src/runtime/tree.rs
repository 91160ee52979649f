use super::events::HistoryEvent;
use super::execution::{Execution, ExecutionRole, ProcessInstance, TimerJob};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Execution '{0}' not found")]
    ExecutionNotFound(ExecutionId),
    #[error("Process instance '{0}' not found")]
    InstanceNotFound(InstanceId),
}

/// Snapshot of process instances, their execution trees, timer jobs and history.
///
/// `Clone` is the copy-on-write boundary: a migration transforms a clone and the
/// caller swaps it in only when the whole transformation succeeded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionTree {
    instances: BTreeMap<InstanceId, ProcessInstance>,
    executions: BTreeMap<ExecutionId, Execution>,
    jobs: BTreeMap<JobId, TimerJob>,
    history: Vec<HistoryEvent>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ──

    pub fn instance(&self, id: InstanceId) -> Result<&ProcessInstance, TreeError> {
        self.instances
            .get(&id)
            .ok_or(TreeError::InstanceNotFound(id))
    }

    pub fn instances(&self) -> impl Iterator<Item = &ProcessInstance> {
        self.instances.values()
    }

    pub fn execution(&self, id: ExecutionId) -> Result<&Execution, TreeError> {
        self.executions
            .get(&id)
            .ok_or(TreeError::ExecutionNotFound(id))
    }

    fn execution_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, TreeError> {
        self.executions
            .get_mut(&id)
            .ok_or(TreeError::ExecutionNotFound(id))
    }

    pub fn root_execution(&self, instance_id: InstanceId) -> Result<&Execution, TreeError> {
        let root = self.instance(instance_id)?.root_execution_id;
        self.execution(root)
    }

    pub fn child_executions(&self, id: ExecutionId) -> Vec<&Execution> {
        self.executions
            .get(&id)
            .map(|e| {
                e.children
                    .iter()
                    .filter_map(|c| self.executions.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All descendants of an execution, pre-order, excluding itself.
    pub fn descendants(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut stack: Vec<ExecutionId> = self
            .executions
            .get(&id)
            .map(|e| e.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(e) = self.executions.get(&current) {
                stack.extend(e.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn executions_of(&self, instance_id: InstanceId) -> Vec<&Execution> {
        self.executions
            .values()
            .filter(|e| e.process_instance_id == instance_id)
            .collect()
    }

    /// Where the instance currently is: active, childless, positioned executions.
    pub fn active_leaves(&self, instance_id: InstanceId) -> Vec<&Execution> {
        let Some(instance) = self.instances.get(&instance_id) else {
            return Vec::new();
        };
        self.descendants(instance.root_execution_id)
            .into_iter()
            .filter_map(|id| self.executions.get(&id))
            .filter(|e| e.active && e.is_leaf() && !e.is_timer() && e.activity_id.is_some())
            .collect()
    }

    /// Variables visible from an execution: ancestors first, nearer scopes win.
    pub fn variables_in_scope(&self, id: ExecutionId) -> VariableMap {
        let mut chain = Vec::new();
        let mut current = self.executions.get(&id);
        while let Some(e) = current {
            chain.push(e);
            current = e.parent_id.and_then(|p| self.executions.get(&p));
        }
        let mut vars = VariableMap::new();
        for e in chain.into_iter().rev() {
            vars.extend(e.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars
    }

    pub fn sub_process_instance(&self, super_execution_id: ExecutionId) -> Option<&ProcessInstance> {
        self.instances
            .values()
            .find(|i| i.super_execution_id == Some(super_execution_id))
    }

    /// Sub-process instances called directly from this instance.
    pub fn sub_process_instances(&self, instance_id: InstanceId) -> Vec<&ProcessInstance> {
        self.instances
            .values()
            .filter(|i| {
                i.super_execution_id
                    .and_then(|s| self.executions.get(&s))
                    .is_some_and(|s| s.process_instance_id == instance_id)
            })
            .collect()
    }

    pub fn super_process_instance_id(&self, instance_id: InstanceId) -> Option<InstanceId> {
        let super_exec = self.instances.get(&instance_id)?.super_execution_id?;
        self.executions
            .get(&super_exec)
            .map(|e| e.process_instance_id)
    }

    pub fn jobs_of(&self, instance_id: InstanceId) -> Vec<&TimerJob> {
        self.jobs
            .values()
            .filter(|j| j.process_instance_id == instance_id)
            .collect()
    }

    pub fn timer_jobs_attached_to(&self, execution_id: ExecutionId) -> Vec<&TimerJob> {
        self.jobs
            .values()
            .filter(|j| j.attached_execution_id == execution_id)
            .collect()
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub(crate) fn record(&mut self, event: HistoryEvent) {
        self.history.push(event);
    }

    // ── Instances ──

    pub fn create_process_instance(
        &mut self,
        definition_id: &str,
        variables: VariableMap,
    ) -> InstanceId {
        self.new_instance(definition_id, None, variables)
    }

    fn new_instance(
        &mut self,
        definition_id: &str,
        super_execution_id: Option<ExecutionId>,
        variables: VariableMap,
    ) -> InstanceId {
        let id = Uuid::now_v7();
        let root = Uuid::now_v7();
        self.executions.insert(
            root,
            Execution {
                id: root,
                process_instance_id: id,
                parent_id: None,
                activity_id: None,
                role: ExecutionRole::ProcessInstance,
                active: true,
                children: Vec::new(),
                variables,
            },
        );
        self.instances.insert(
            id,
            ProcessInstance {
                id,
                definition_id: definition_id.to_string(),
                root_execution_id: root,
                super_execution_id,
            },
        );
        self.history.push(HistoryEvent::ExecutionCreated {
            execution_id: root,
            process_instance_id: id,
            activity_id: None,
        });
        id
    }

    /// Start an instance of `definition_id` called from `super_execution_id`,
    /// optionally with a first token at `start_activity`.
    pub fn start_sub_process_instance(
        &mut self,
        super_execution_id: ExecutionId,
        definition_id: &str,
        start_activity: Option<&str>,
        variables: VariableMap,
    ) -> Result<InstanceId, TreeError> {
        self.execution(super_execution_id)?;
        let id = self.new_instance(definition_id, Some(super_execution_id), variables);
        self.history.push(HistoryEvent::SubProcessInstanceStarted {
            process_instance_id: id,
            super_execution_id,
            definition_id: definition_id.to_string(),
        });
        if let Some(activity) = start_activity {
            let root = self.instance(id)?.root_execution_id;
            self.create_execution(root, activity, VariableMap::new())?;
        }
        Ok(id)
    }

    /// Remove an instance with everything below it, including its own sub-instances.
    pub fn terminate_instance(&mut self, instance_id: InstanceId) -> Result<(), TreeError> {
        let root = self.instance(instance_id)?.root_execution_id;
        self.remove_execution(root)
    }

    pub fn set_definition_id(
        &mut self,
        instance_id: InstanceId,
        definition_id: &str,
    ) -> Result<(), TreeError> {
        let instance = self
            .instances
            .get_mut(&instance_id)
            .ok_or(TreeError::InstanceNotFound(instance_id))?;
        instance.definition_id = definition_id.to_string();
        Ok(())
    }

    // ── Executions ──

    /// Create an active token at `activity_id` under `parent`.
    pub fn create_execution(
        &mut self,
        parent: ExecutionId,
        activity_id: &str,
        variables: VariableMap,
    ) -> Result<ExecutionId, TreeError> {
        self.create_execution_with(
            parent,
            Some(activity_id),
            ExecutionRole::Token,
            true,
            variables,
        )
    }

    pub fn create_execution_with(
        &mut self,
        parent: ExecutionId,
        activity_id: Option<&str>,
        role: ExecutionRole,
        active: bool,
        variables: VariableMap,
    ) -> Result<ExecutionId, TreeError> {
        let process_instance_id = self.execution(parent)?.process_instance_id;
        let id = Uuid::now_v7();
        self.executions.insert(
            id,
            Execution {
                id,
                process_instance_id,
                parent_id: Some(parent),
                activity_id: activity_id.map(str::to_string),
                role,
                active,
                children: Vec::new(),
                variables,
            },
        );
        self.execution_mut(parent)?.children.push(id);
        self.history.push(HistoryEvent::ExecutionCreated {
            execution_id: id,
            process_instance_id,
            activity_id: activity_id.map(str::to_string),
        });
        Ok(id)
    }

    /// Remove an execution and everything hanging off it: descendants, timer
    /// jobs attached to any of them, and sub-process instances they called.
    pub fn remove_execution(&mut self, id: ExecutionId) -> Result<(), TreeError> {
        self.execution(id)?;
        self.detach(id);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(exec) = self.executions.remove(&current) else {
                continue;
            };
            stack.extend(exec.children.iter().copied());

            let job_ids: Vec<JobId> = self
                .jobs
                .values()
                .filter(|j| j.attached_execution_id == current || j.execution_id == current)
                .map(|j| j.id)
                .collect();
            for job_id in job_ids {
                let Some(job) = self.jobs.remove(&job_id) else {
                    continue;
                };
                self.history.push(HistoryEvent::TimerJobRemoved {
                    job_id,
                    boundary_event_id: job.boundary_event_id.clone(),
                });
                if job.execution_id != current && self.executions.contains_key(&job.execution_id) {
                    self.detach(job.execution_id);
                    stack.push(job.execution_id);
                }
            }

            stack.extend(
                self.instances
                    .values()
                    .filter(|i| i.super_execution_id == Some(current))
                    .map(|i| i.root_execution_id),
            );

            if exec.role == ExecutionRole::ProcessInstance {
                self.instances.remove(&exec.process_instance_id);
                self.history.push(HistoryEvent::InstanceTerminated {
                    process_instance_id: exec.process_instance_id,
                });
            }
            self.history.push(HistoryEvent::ExecutionRemoved {
                execution_id: current,
                process_instance_id: exec.process_instance_id,
                activity_id: exec.activity_id,
            });
        }
        Ok(())
    }

    fn detach(&mut self, id: ExecutionId) {
        let parent = self.executions.get(&id).and_then(|e| e.parent_id);
        if let Some(parent) = parent.and_then(|p| self.executions.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
    }

    /// Move an execution (with its subtree) under a new parent.
    pub fn reparent(&mut self, id: ExecutionId, new_parent: ExecutionId) -> Result<(), TreeError> {
        let instance_id = self.execution(new_parent)?.process_instance_id;
        self.execution(id)?;
        self.detach(id);
        self.execution_mut(id)?.parent_id = Some(new_parent);
        self.execution_mut(new_parent)?.children.push(id);
        for moved in std::iter::once(id).chain(self.descendants(id)) {
            self.execution_mut(moved)?.process_instance_id = instance_id;
        }
        Ok(())
    }

    pub fn set_activity(&mut self, id: ExecutionId, activity_id: &str) -> Result<(), TreeError> {
        let exec = self.execution_mut(id)?;
        if exec.activity_id.as_deref() == Some(activity_id) {
            return Ok(());
        }
        let from = exec.activity_id.replace(activity_id.to_string());
        self.history.push(HistoryEvent::ActivityChanged {
            execution_id: id,
            from,
            to: activity_id.to_string(),
        });
        Ok(())
    }

    pub fn set_variables(&mut self, id: ExecutionId, variables: &VariableMap) -> Result<(), TreeError> {
        if variables.is_empty() {
            return Ok(());
        }
        let exec = self.execution_mut(id)?;
        exec.variables
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.history.push(HistoryEvent::VariablesSet {
            execution_id: id,
            names: variables.keys().cloned().collect(),
        });
        Ok(())
    }

    pub fn remove_variables(&mut self, id: ExecutionId, names: &[&str]) -> Result<(), TreeError> {
        let exec = self.execution_mut(id)?;
        for name in names {
            exec.variables.remove(*name);
        }
        Ok(())
    }

    // ── Timer jobs ──

    /// Create a boundary-timer execution next to `attached` plus its pending job.
    pub fn create_timer_job(
        &mut self,
        attached: ExecutionId,
        boundary_event_id: &str,
        timer: &str,
        cancel_activity: bool,
    ) -> Result<JobId, TreeError> {
        let host = self.execution(attached)?;
        let process_instance_id = host.process_instance_id;
        let parent = host.parent_id.ok_or(TreeError::ExecutionNotFound(attached))?;
        let timer_execution = self.create_execution_with(
            parent,
            Some(boundary_event_id),
            ExecutionRole::BoundaryTimer,
            false,
            VariableMap::new(),
        )?;
        let id = Uuid::now_v7();
        self.jobs.insert(
            id,
            TimerJob {
                id,
                process_instance_id,
                execution_id: timer_execution,
                attached_execution_id: attached,
                boundary_event_id: boundary_event_id.to_string(),
                timer: timer.to_string(),
                cancel_activity,
            },
        );
        self.history.push(HistoryEvent::TimerJobCreated {
            job_id: id,
            boundary_event_id: boundary_event_id.to_string(),
            attached_execution_id: attached,
        });
        Ok(id)
    }

    /// Remove a timer job together with its timer execution.
    pub fn remove_timer_job(&mut self, job_id: JobId) -> Result<(), TreeError> {
        if let Some(job) = self.jobs.get(&job_id) {
            let timer_execution = job.execution_id;
            if self.executions.contains_key(&timer_execution) {
                return self.remove_execution(timer_execution);
            }
            if let Some(job) = self.jobs.remove(&job_id) {
                self.history.push(HistoryEvent::TimerJobRemoved {
                    job_id,
                    boundary_event_id: job.boundary_event_id,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> VariableMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_instance_with_token() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("oneTaskProcess:1", VariableMap::new());
        let root = tree.instance(pi).unwrap().root_execution_id;
        let task = tree.create_execution(root, "userTask1Id", VariableMap::new()).unwrap();

        let leaves = tree.active_leaves(pi);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id, task);
        assert_eq!(leaves[0].activity(), Some("userTask1Id"));
        assert_eq!(tree.child_executions(root).len(), 1);
        assert_eq!(tree.executions_of(pi).len(), 2);
    }

    #[test]
    fn test_variables_in_scope_nearest_wins() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("p:1", vars(&[("a", json!(1)), ("b", json!(1))]));
        let root = tree.instance(pi).unwrap().root_execution_id;
        let scope = tree
            .create_execution_with(root, Some("sub"), ExecutionRole::Scope, false, vars(&[("b", json!(2))]))
            .unwrap();
        let task = tree.create_execution(scope, "inner", vars(&[("c", json!(3))])).unwrap();

        let visible = tree.variables_in_scope(task);
        assert_eq!(visible["a"], json!(1));
        assert_eq!(visible["b"], json!(2));
        assert_eq!(visible["c"], json!(3));
    }

    #[test]
    fn test_remove_cascades_timers_and_sub_instances() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("caller:1", VariableMap::new());
        let root = tree.instance(pi).unwrap().root_execution_id;
        let call = tree.create_execution(root, "callActivity", VariableMap::new()).unwrap();
        tree.create_timer_job(call, "timer", "PT5M", true).unwrap();
        let sub = tree
            .start_sub_process_instance(call, "oneTaskProcess:1", Some("theTask"), VariableMap::new())
            .unwrap();

        assert_eq!(tree.super_process_instance_id(sub), Some(pi));
        assert_eq!(tree.sub_process_instance(call).map(|i| i.id), Some(sub));
        assert_eq!(tree.sub_process_instances(pi).len(), 1);
        assert_eq!(tree.jobs_of(pi).len(), 1);
        assert_eq!(tree.child_executions(root).len(), 2);

        tree.remove_execution(call).unwrap();

        assert!(tree.instance(sub).is_err());
        assert!(tree.executions_of(sub).is_empty());
        assert!(tree.jobs_of(pi).is_empty());
        assert!(tree.child_executions(root).is_empty());
        assert!(tree
            .history()
            .iter()
            .any(|e| matches!(e, HistoryEvent::InstanceTerminated { process_instance_id } if *process_instance_id == sub)));
    }

    #[test]
    fn test_reparent_and_set_activity() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("p:1", VariableMap::new());
        let root = tree.instance(pi).unwrap().root_execution_id;
        let scope = tree
            .create_execution_with(root, Some("sub"), ExecutionRole::Scope, false, VariableMap::new())
            .unwrap();
        let task = tree.create_execution(root, "a", VariableMap::new()).unwrap();

        tree.reparent(task, scope).unwrap();
        tree.set_activity(task, "b").unwrap();

        assert_eq!(tree.execution(task).unwrap().parent_id, Some(scope));
        assert_eq!(tree.child_executions(root).len(), 1);
        assert_eq!(tree.execution(task).unwrap().activity(), Some("b"));
        assert!(matches!(
            tree.history().last(),
            Some(HistoryEvent::ActivityChanged { to, .. }) if to == "b"
        ));
    }

    #[test]
    fn test_remove_timer_job() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("p:1", VariableMap::new());
        let root = tree.instance(pi).unwrap().root_execution_id;
        let task = tree.create_execution(root, "a", VariableMap::new()).unwrap();
        let job = tree.create_timer_job(task, "timer", "PT1H", false).unwrap();
        assert_eq!(tree.timer_jobs_attached_to(task).len(), 1);

        tree.remove_timer_job(job).unwrap();

        assert!(tree.timer_jobs_attached_to(task).is_empty());
        assert_eq!(tree.child_executions(root).len(), 1);
    }

    #[test]
    fn test_terminate_unknown_instance() {
        let mut tree = ExecutionTree::new();
        let missing = Uuid::now_v7();
        assert_eq!(
            tree.terminate_instance(missing),
            Err(TreeError::InstanceNotFound(missing))
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut tree = ExecutionTree::new();
        let pi = tree.create_process_instance("p:1", vars(&[("x", json!("y"))]));
        let root = tree.instance(pi).unwrap().root_execution_id;
        tree.create_execution(root, "a", VariableMap::new()).unwrap();
        let json = serde_json::to_string(&tree).unwrap();
        let back: ExecutionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_leaves(pi).len(), 1);
    }
}
