use crate::types::*;
use std::collections::BTreeMap;

/// A live execution the plan moves away from its current position.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceUnit {
    pub execution_id: ExecutionId,
    pub activity_id: String,
    /// The migrating instance, or a sub-process instance for `OUT_TO_PARENT` mappings.
    pub process_instance_id: InstanceId,
}

/// Where a move's targets are resolved and created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetScope {
    /// The migrating instance, positioned in the target definition.
    Instance,
    /// The sub-process instance of a call activity, positioned in the called definition.
    SubProcess {
        call_activity_id: String,
        definition_id: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedTarget {
    pub activity_id: String,
    pub local_variables: VariableMap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveKind {
    /// Remove the sources and create fresh executions at the targets.
    Relocate,
    /// Keep a multi-instance root and its iterations, re-deriving loop structure.
    MultiInstanceRepoint,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedMove {
    pub mapping_index: usize,
    pub kind: MoveKind,
    pub sources: Vec<SourceUnit>,
    pub scope: TargetScope,
    pub targets: Vec<PlannedTarget>,
    /// Mapping-level instance variables, set on the instance the targets land in.
    pub instance_variables: VariableMap,
}

/// The validated, resolved product of a migration request.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationPlan {
    pub process_instance_id: InstanceId,
    pub source_definition_id: String,
    pub target_definition_id: String,
    pub instance_variables: VariableMap,
    pub moves: Vec<PlannedMove>,
    /// Executions carried over unchanged (auto-mapped).
    pub retained: Vec<ExecutionId>,
    /// Resolved called definition per call activity crossed by a mapping.
    pub called_definitions: BTreeMap<String, String>,
}

impl MigrationPlan {
    pub fn moved_activity_ids(&self) -> Vec<&str> {
        self.moves
            .iter()
            .flat_map(|m| m.sources.iter().map(|s| s.activity_id.as_str()))
            .collect()
    }
}
