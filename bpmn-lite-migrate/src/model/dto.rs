use super::validate::{validate_model, ModelError};
use super::{
    CalledElement, FlowNode, LoopCardinality, MultiInstanceSpec, NodeKind, ProcessDefinition,
    SequenceFlow,
};
use crate::expression::is_expression;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring form of a process definition, loaded from YAML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessModelDto {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub flows: Vec<FlowDto>,
}

// ── Node ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<MultiInstanceDto>,
    #[serde(flatten)]
    pub kind: NodeKindDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeKindDto {
    StartEvent,
    EndEvent,
    UserTask,
    ServiceTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    SubProcess,
    CallActivity {
        /// Process key, or an expression such as `${subProcessKey}`.
        called_element: String,
        /// Pins the called process to one deployed version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
    },
    BoundaryTimer {
        attached_to: String,
        timer: String,
        #[serde(default = "default_true")]
        cancel_activity: bool,
    },
}

impl NodeKindDto {
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            NodeKindDto::UserTask
                | NodeKindDto::ServiceTask
                | NodeKindDto::SubProcess
                | NodeKindDto::CallActivity { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInstanceDto {
    #[serde(default, skip_serializing_if = "is_false")]
    pub sequential: bool,
    pub cardinality: LoopCardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index_variable: Option<String>,
}

// ── Flow ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl FlowDto {
    /// Declared id, or `<from>_<to>` when none was given.
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.from, self.to))
    }
}

// ── DTO → graph ──

impl ProcessModelDto {
    /// Validate and build the arena for the given deployed version.
    pub fn build_definition(&self, version: u32) -> Result<ProcessDefinition, ModelError> {
        let errors = validate_model(self);
        if !errors.is_empty() {
            return Err(ModelError::Invalid {
                key: self.key.clone(),
                errors,
            });
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for node in &self.nodes {
            let idx = graph.add_node(node.to_flow_node());
            index.insert(node.id.as_str(), idx);
        }
        for flow in &self.flows {
            // Endpoints were checked by validate_model.
            if let (Some(&from), Some(&to)) =
                (index.get(flow.from.as_str()), index.get(flow.to.as_str()))
            {
                graph.add_edge(
                    from,
                    to,
                    SequenceFlow {
                        id: flow.flow_id(),
                        condition: flow.condition.clone(),
                        is_default: flow.is_default,
                    },
                );
            }
        }

        Ok(ProcessDefinition::from_parts(
            self.key.clone(),
            version,
            self.name.clone(),
            graph,
        ))
    }
}

impl NodeDto {
    fn to_flow_node(&self) -> FlowNode {
        let kind = match &self.kind {
            NodeKindDto::StartEvent => NodeKind::StartEvent,
            NodeKindDto::EndEvent => NodeKind::EndEvent,
            NodeKindDto::UserTask => NodeKind::UserTask,
            NodeKindDto::ServiceTask => NodeKind::ServiceTask,
            NodeKindDto::ExclusiveGateway => NodeKind::ExclusiveGateway,
            NodeKindDto::ParallelGateway => NodeKind::ParallelGateway,
            NodeKindDto::InclusiveGateway => NodeKind::InclusiveGateway,
            NodeKindDto::SubProcess => NodeKind::SubProcess,
            NodeKindDto::CallActivity {
                called_element,
                version,
            } => NodeKind::CallActivity {
                called_element: match version {
                    _ if is_expression(called_element) => {
                        CalledElement::Expression(called_element.clone())
                    }
                    Some(v) => CalledElement::KeyVersion {
                        key: called_element.clone(),
                        version: *v,
                    },
                    None => CalledElement::Key(called_element.clone()),
                },
            },
            NodeKindDto::BoundaryTimer {
                attached_to,
                timer,
                cancel_activity,
            } => NodeKind::BoundaryTimer {
                attached_to: attached_to.clone(),
                timer: timer.clone(),
                cancel_activity: *cancel_activity,
            },
        };

        let multi_instance = self.multi_instance.as_ref().map(|mi| {
            let mut spec = if mi.sequential {
                MultiInstanceSpec::sequential(mi.cardinality.clone())
            } else {
                MultiInstanceSpec::parallel(mi.cardinality.clone())
            };
            if let Some(var) = &mi.element_index_variable {
                spec.element_index_variable = var.clone();
            }
            spec
        });

        FlowNode {
            id: self.id.clone(),
            name: self.name.clone(),
            kind,
            parent: self.parent.clone(),
            multi_instance,
        }
    }
}
