use crate::types::*;
use serde::{Deserialize, Serialize};

/// Audit trail of every change made to the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HistoryEvent {
    ExecutionCreated {
        execution_id: ExecutionId,
        process_instance_id: InstanceId,
        activity_id: Option<String>,
    },
    ExecutionRemoved {
        execution_id: ExecutionId,
        process_instance_id: InstanceId,
        activity_id: Option<String>,
    },
    ActivityChanged {
        execution_id: ExecutionId,
        from: Option<String>,
        to: String,
    },
    /// A gateway was evaluated and these outgoing flows were taken.
    GatewayTaken {
        process_instance_id: InstanceId,
        gateway_id: String,
        flow_ids: Vec<String>,
    },
    SubProcessInstanceStarted {
        process_instance_id: InstanceId,
        super_execution_id: ExecutionId,
        definition_id: String,
    },
    InstanceTerminated {
        process_instance_id: InstanceId,
    },
    TimerJobCreated {
        job_id: JobId,
        boundary_event_id: String,
        attached_execution_id: ExecutionId,
    },
    TimerJobRemoved {
        job_id: JobId,
        boundary_event_id: String,
    },
    VariablesSet {
        execution_id: ExecutionId,
        names: Vec<String>,
    },
    InstanceMigrated {
        process_instance_id: InstanceId,
        from_definition_id: String,
        to_definition_id: String,
    },
}
