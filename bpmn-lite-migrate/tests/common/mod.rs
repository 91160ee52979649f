#![allow(dead_code)]

use bpmn_lite_migrate::types::*;
use bpmn_lite_migrate::{
    ExecutionRole, ExecutionTree, MemoryRepository, MigrationEngine, ProcessDefinition,
};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ─── Process models ───────────────────────────────────────────

pub const TWO_TASKS: &str = r#"
key: twoTasks
nodes:
  - { id: start, kind: StartEvent }
  - { id: userTask1Id, kind: UserTask }
  - { id: userTask2Id, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: userTask1Id }
  - { from: userTask1Id, to: userTask2Id }
  - { from: userTask2Id, to: end }
"#;

pub const ONE_TASK: &str = r#"
key: oneTaskProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: theTask, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: theTask }
  - { from: theTask, to: end }
"#;

pub const EXCLUSIVE_GATEWAY: &str = r#"
key: gatewayProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: exclusiveGw, kind: ExclusiveGateway }
  - { id: theTask1, kind: UserTask }
  - { id: defaultFlowTask, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: exclusiveGw }
  - { id: flowToTask1, from: exclusiveGw, to: theTask1, condition: "${input == 1}" }
  - { id: defaultFlow, from: exclusiveGw, to: defaultFlowTask, is_default: true }
  - { from: theTask1, to: end }
  - { from: defaultFlowTask, to: end }
"#;

pub const PARALLEL_GATEWAY: &str = r#"
key: parallelProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: fork, kind: ParallelGateway }
  - { id: taskA, kind: UserTask }
  - { id: taskB, kind: UserTask }
  - { id: join, kind: ParallelGateway }
  - { id: afterJoin, kind: UserTask }
flows:
  - { from: start, to: fork }
  - { from: fork, to: taskA }
  - { from: fork, to: taskB }
  - { from: taskA, to: join }
  - { from: taskB, to: join }
  - { from: join, to: afterJoin }
"#;

pub const PARALLEL_MI: &str = r#"
key: parallelMi
nodes:
  - { id: start, kind: StartEvent }
  - id: parallelTasks
    kind: UserTask
    multi_instance: { cardinality: "${nrOfLoops}" }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: parallelTasks }
  - { from: parallelTasks, to: end }
"#;

/// Same key and activity as `PARALLEL_MI`, sequential loop.
pub const SEQUENTIAL_MI: &str = r#"
key: parallelMi
nodes:
  - { id: start, kind: StartEvent }
  - id: parallelTasks
    kind: UserTask
    multi_instance: { sequential: true, cardinality: "${nrOfLoops}" }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: parallelTasks }
  - { from: parallelTasks, to: end }
"#;

/// Sequential multi-instance task inside an embedded sub-process.
pub const WRAPPED_MI: &str = r#"
key: wrappedMi
nodes:
  - { id: start, kind: StartEvent }
  - { id: wrapper, kind: SubProcess }
  - { id: wrapperStart, kind: StartEvent, parent: wrapper }
  - id: innerTasks
    kind: UserTask
    parent: wrapper
    multi_instance: { sequential: true, cardinality: "${nrOfLoops}" }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: wrapper }
  - { from: wrapperStart, to: innerTasks }
  - { from: wrapper, to: end }
"#;

pub const INCLUSIVE_GATEWAY: &str = r#"
key: inclusiveProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: inclusiveGw, kind: InclusiveGateway }
  - { id: smallTask, kind: UserTask }
  - { id: largeTask, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: inclusiveGw }
  - { id: toSmall, from: inclusiveGw, to: smallTask, condition: "${amount > 0}" }
  - { id: toLarge, from: inclusiveGw, to: largeTask, condition: "${amount > 100}" }
  - { from: smallTask, to: end }
  - { from: largeTask, to: end }
"#;

/// Called process with its task inside an embedded sub-process.
pub const SCOPED_SUB: &str = r#"
key: scopedSub
nodes:
  - { id: start, kind: StartEvent }
  - { id: inner, kind: SubProcess }
  - { id: innerStart, kind: StartEvent, parent: inner }
  - { id: innerTask, kind: UserTask, parent: inner }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: inner }
  - { from: innerStart, to: innerTask }
  - { from: inner, to: end }
"#;

/// Called process with two parallel tasks.
pub const PARALLEL_SUB: &str = r#"
key: parallelSub
nodes:
  - { id: start, kind: StartEvent }
  - { id: fork, kind: ParallelGateway }
  - { id: taskA, kind: UserTask }
  - { id: taskB, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: fork }
  - { from: fork, to: taskA }
  - { from: fork, to: taskB }
  - { from: taskA, to: end }
  - { from: taskB, to: end }
"#;

pub const MI_SUB_PROCESS: &str = r#"
key: miSubProcess
nodes:
  - { id: start, kind: StartEvent }
  - id: parallelMISubProcess
    kind: SubProcess
    multi_instance: { cardinality: 3 }
  - { id: subStart, kind: StartEvent, parent: parallelMISubProcess }
  - { id: subTask1, kind: UserTask, parent: parallelMISubProcess }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: parallelMISubProcess }
  - { from: subStart, to: subTask1 }
  - { from: parallelMISubProcess, to: end }
"#;

pub const EMBEDDED_SUB_PROCESS: &str = r#"
key: embeddedSubProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: subProcess, kind: SubProcess }
  - { id: subStart, kind: StartEvent, parent: subProcess }
  - { id: subTask, kind: UserTask, parent: subProcess }
  - { id: subTask2, kind: UserTask, parent: subProcess }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: subProcess }
  - { from: subStart, to: subTask }
  - { from: subTask, to: subTask2 }
  - { from: subProcess, to: end }
"#;

pub const CALL_ACTIVITY: &str = r#"
key: callActivityProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: callActivity, kind: CallActivity, called_element: oneTaskProcess }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: callActivity }
  - { from: callActivity, to: end }
"#;

pub const CALL_ACTIVITY_EXPRESSION: &str = r#"
key: callActivityExpression
nodes:
  - { id: start, kind: StartEvent }
  - { id: callActivity, kind: CallActivity, called_element: "${simpleSubProcessExpression}" }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: callActivity }
  - { from: callActivity, to: end }
"#;

pub const TIMER_TASK: &str = r#"
key: timerProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: userTask1Id, kind: UserTask }
  - { id: reminder, kind: BoundaryTimer, attached_to: userTask1Id, timer: PT5M }
  - { id: escalation, kind: UserTask }
  - { id: end, kind: EndEvent }
flows:
  - { from: start, to: userTask1Id }
  - { from: userTask1Id, to: end }
  - { from: reminder, to: escalation }
"#;

// ─── Harness ──────────────────────────────────────────────────

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub engine: MigrationEngine,
    pub tree: ExecutionTree,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let repo = Arc::new(MemoryRepository::new());
        let engine = MigrationEngine::new(repo.clone());
        Self {
            repo,
            engine,
            tree: ExecutionTree::new(),
        }
    }

    pub fn deploy(&self, yaml: &str) -> Arc<ProcessDefinition> {
        self.repo.deploy_yaml(yaml).unwrap()
    }

    /// New instance of `def` with one token at each of `activities`.
    pub fn start_at(&mut self, def: &ProcessDefinition, activities: &[&str]) -> InstanceId {
        self.start_with(def, activities, VariableMap::new())
    }

    pub fn start_with(
        &mut self,
        def: &ProcessDefinition,
        activities: &[&str],
        variables: VariableMap,
    ) -> InstanceId {
        let pid = self.tree.create_process_instance(def.id(), variables);
        let root = self.root(pid);
        for activity in activities {
            self.tree
                .create_execution(root, activity, VariableMap::new())
                .unwrap();
        }
        pid
    }

    /// Instance of `parent_def` waiting in `call_activity`, whose sub-process
    /// instance of `sub_def` sits at `sub_activity`.
    pub fn start_in_call_activity(
        &mut self,
        parent_def: &ProcessDefinition,
        call_activity: &str,
        sub_def: &ProcessDefinition,
        sub_activity: &str,
    ) -> (InstanceId, InstanceId) {
        let pid = self.tree.create_process_instance(parent_def.id(), VariableMap::new());
        let root = self.root(pid);
        let token = self
            .tree
            .create_execution(root, call_activity, VariableMap::new())
            .unwrap();
        let sub = self
            .tree
            .start_sub_process_instance(token, sub_def.id(), Some(sub_activity), VariableMap::new())
            .unwrap();
        (pid, sub)
    }

    /// Instance positioned in a multi-instance activity with the given
    /// running loop counters.
    pub fn start_in_multi_instance(
        &mut self,
        def: &ProcessDefinition,
        activity: &str,
        instances: u32,
        completed: u32,
        running: &[u32],
    ) -> InstanceId {
        let pid = self.tree.create_process_instance(def.id(), VariableMap::new());
        let root = self.root(pid);
        let counters = VariableMap::from([
            (NR_OF_INSTANCES.to_string(), json!(instances)),
            (NR_OF_COMPLETED_INSTANCES.to_string(), json!(completed)),
            (NR_OF_ACTIVE_INSTANCES.to_string(), json!(running.len())),
        ]);
        let mi_root = self
            .tree
            .create_execution_with(
                root,
                Some(activity),
                ExecutionRole::MultiInstanceRoot,
                false,
                counters,
            )
            .unwrap();
        for loop_counter in running {
            self.tree
                .create_execution(
                    mi_root,
                    activity,
                    VariableMap::from([(DEFAULT_ELEMENT_INDEX_VARIABLE.to_string(), json!(loop_counter))]),
                )
                .unwrap();
        }
        pid
    }

    pub fn root(&self, pid: InstanceId) -> ExecutionId {
        self.tree.instance(pid).unwrap().root_execution_id
    }

    pub fn definition_of(&self, pid: InstanceId) -> String {
        self.tree.instance(pid).unwrap().definition_id.clone()
    }
}

/// Activity ids of the active leaves, sorted.
pub fn active_activities(tree: &ExecutionTree, pid: InstanceId) -> Vec<String> {
    let mut ids: Vec<String> = tree
        .active_leaves(pid)
        .into_iter()
        .filter_map(|e| e.activity_id.clone())
        .collect();
    ids.sort();
    ids
}

pub fn multi_instance_roots(tree: &ExecutionTree, pid: InstanceId) -> Vec<ExecutionId> {
    tree.executions_of(pid)
        .into_iter()
        .filter(|e| e.is_multi_instance_root())
        .map(|e| e.id)
        .collect()
}

pub fn counter(tree: &ExecutionTree, execution: ExecutionId, name: &str) -> u32 {
    variable_as_u32(&tree.execution(execution).unwrap().variables, name).unwrap()
}
