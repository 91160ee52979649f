use crate::types::*;
use serde::{Deserialize, Serialize};

/// What an execution stands for in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionRole {
    /// Root execution of a process instance.
    ProcessInstance,
    /// A token sitting at an activity or gateway.
    Token,
    /// Embedded sub-process scope; its children run inside it.
    Scope,
    /// Multi-instance body; holds the `nrOf*` counters, children are the iterations.
    MultiInstanceRoot,
    /// Waiting boundary timer, sibling of the execution it is attached to.
    BoundaryTimer,
}

/// A live execution (token) of a process instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: InstanceId,
    pub parent_id: Option<ExecutionId>,
    /// `None` only for a process-instance root.
    pub activity_id: Option<String>,
    pub role: ExecutionRole,
    /// False while the execution waits on its children, or at a join.
    pub active: bool,
    pub children: Vec<ExecutionId>,
    pub variables: VariableMap,
}

impl Execution {
    pub fn is_multi_instance_root(&self) -> bool {
        self.role == ExecutionRole::MultiInstanceRoot
    }

    pub fn is_timer(&self) -> bool {
        self.role == ExecutionRole::BoundaryTimer
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn activity(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: InstanceId,
    pub definition_id: String,
    pub root_execution_id: ExecutionId,
    /// Call-activity execution in the calling instance, for sub-process instances.
    pub super_execution_id: Option<ExecutionId>,
}

/// Pending (never fired here) timer job of a boundary timer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerJob {
    pub id: JobId,
    pub process_instance_id: InstanceId,
    /// The BoundaryTimer execution owning this job.
    pub execution_id: ExecutionId,
    /// The execution the timer is attached to.
    pub attached_execution_id: ExecutionId,
    pub boundary_event_id: String,
    pub timer: String,
    pub cancel_activity: bool,
}
