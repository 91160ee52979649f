//! Process graph model: read-only definitions the migration engine works against.
//!
//! A definition is an arena (`petgraph` graph) of flow nodes addressed by their
//! activity id. Containment (sub-process children) and call relationships are
//! looked up by id through the arena, never through owned pointers.

pub mod dto;
pub mod repository;
pub mod validate;
pub mod yaml;

use crate::types::DEFAULT_ELEMENT_INDEX_VARIABLE;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Nodes ────────────────────────────────────────────────────

/// How a call activity names the process it calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalledElement {
    /// Latest deployed version of a process key.
    Key(String),
    /// A fixed deployed version of a process key.
    KeyVersion { key: String, version: u32 },
    /// Unevaluated expression producing a process key, e.g. `${subProcessKey}`.
    Expression(String),
}

impl CalledElement {
    /// The raw reference as written in the model.
    pub fn raw(&self) -> &str {
        match self {
            CalledElement::Key(key) | CalledElement::KeyVersion { key, .. } => key,
            CalledElement::Expression(expr) => expr,
        }
    }
}

/// Loop cardinality of a multi-instance activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopCardinality {
    Fixed(u32),
    Expression(String),
}

/// Multi-instance loop characteristics attached to an activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiInstanceSpec {
    #[serde(default)]
    pub sequential: bool,
    pub cardinality: LoopCardinality,
    #[serde(default = "default_element_index_variable")]
    pub element_index_variable: String,
}

fn default_element_index_variable() -> String {
    DEFAULT_ELEMENT_INDEX_VARIABLE.to_string()
}

impl MultiInstanceSpec {
    pub fn parallel(cardinality: LoopCardinality) -> Self {
        Self {
            sequential: false,
            cardinality,
            element_index_variable: default_element_index_variable(),
        }
    }

    pub fn sequential(cardinality: LoopCardinality) -> Self {
        Self {
            sequential: true,
            ..Self::parallel(cardinality)
        }
    }
}

/// Closed set of node kinds the engine understands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    StartEvent,
    EndEvent,
    UserTask,
    ServiceTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    SubProcess,
    CallActivity {
        called_element: CalledElement,
    },
    BoundaryTimer {
        attached_to: String,
        /// ISO 8601 duration / date / cycle, kept opaque.
        timer: String,
        cancel_activity: bool,
    },
}

impl NodeKind {
    /// Same variant, ignoring payload.
    pub fn same_kind(&self, other: &NodeKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Human-readable kind, as used in validation messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            NodeKind::StartEvent => "Start Event",
            NodeKind::EndEvent => "End Event",
            NodeKind::UserTask => "User Task",
            NodeKind::ServiceTask => "Service Task",
            NodeKind::ExclusiveGateway => "Exclusive Gateway",
            NodeKind::ParallelGateway => "Parallel Gateway",
            NodeKind::InclusiveGateway => "Inclusive Gateway",
            NodeKind::SubProcess => "Sub Process",
            NodeKind::CallActivity { .. } => "Call Activity",
            NodeKind::BoundaryTimer { .. } => "Boundary Timer Event",
        }
    }
}

/// One node of a process definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    /// Containing embedded sub-process, `None` at process level.
    pub parent: Option<String>,
    pub multi_instance: Option<MultiInstanceSpec>,
}

impl FlowNode {
    pub fn called_element(&self) -> Option<&CalledElement> {
        match &self.kind {
            NodeKind::CallActivity { called_element } => Some(called_element),
            _ => None,
        }
    }

    pub fn is_multi_instance(&self) -> bool {
        self.multi_instance.is_some()
    }
}

// ─── Edges ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub condition: Option<String>,
    pub is_default: bool,
}

/// An outgoing flow paired with the node it leads to.
#[derive(Clone, Copy, Debug)]
pub struct OutgoingFlow<'a> {
    pub flow: &'a SequenceFlow,
    pub target: &'a FlowNode,
}

// ─── Definition ───────────────────────────────────────────────

/// A deployed, immutable process definition version.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    id: String,
    key: String,
    version: u32,
    name: Option<String>,
    graph: DiGraph<FlowNode, SequenceFlow>,
    index: HashMap<String, NodeIndex>,
}

impl ProcessDefinition {
    /// Build the arena. Callers go through `dto::build_definition`, which validates first.
    pub(crate) fn from_parts(
        key: String,
        version: u32,
        name: Option<String>,
        graph: DiGraph<FlowNode, SequenceFlow>,
    ) -> Self {
        let index = graph
            .node_indices()
            .map(|idx| (graph[idx].id.clone(), idx))
            .collect();
        Self {
            id: definition_id(&key, version),
            key,
            version,
            name,
            graph,
            index,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn node(&self, activity_id: &str) -> Option<&FlowNode> {
        self.index.get(activity_id).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, activity_id: &str) -> bool {
        self.index.contains_key(activity_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.graph.node_weights()
    }

    /// Outgoing flows in declaration order.
    pub fn outgoing(&self, activity_id: &str) -> Vec<OutgoingFlow<'_>> {
        let Some(&idx) = self.index.get(activity_id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
        edges.sort_by_key(|e| e.id().index());
        edges
            .into_iter()
            .map(|e| OutgoingFlow {
                flow: e.weight(),
                target: &self.graph[e.target()],
            })
            .collect()
    }

    pub fn incoming_count(&self, activity_id: &str) -> usize {
        self.index
            .get(activity_id)
            .map(|idx| self.graph.edges_directed(*idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    /// A converging gateway: more than one incoming flow.
    pub fn is_join(&self, activity_id: &str) -> bool {
        self.node(activity_id).is_some_and(|n| {
            matches!(
                n.kind,
                NodeKind::ParallelGateway | NodeKind::InclusiveGateway
            )
        }) && self.incoming_count(activity_id) > 1
    }

    /// Enclosing sub-processes of a node, outermost first, excluding the node itself.
    pub fn containment_chain(&self, activity_id: &str) -> Vec<&FlowNode> {
        let mut chain = Vec::new();
        let mut current = self.node(activity_id).and_then(|n| n.parent.as_deref());
        while let Some(parent_id) = current {
            let Some(parent) = self.node(parent_id) else {
                break;
            };
            chain.push(parent);
            current = parent.parent.as_deref();
        }
        chain.reverse();
        chain
    }

    /// Nearest enclosing multi-instance container of a node.
    pub fn multi_instance_container(&self, activity_id: &str) -> Option<&FlowNode> {
        self.containment_chain(activity_id)
            .into_iter()
            .rev()
            .find(|n| n.is_multi_instance())
    }

    /// First start event declared in the given scope (`None` = process level).
    pub fn start_event(&self, scope: Option<&str>) -> Option<&FlowNode> {
        self.graph
            .node_weights()
            .find(|n| n.kind == NodeKind::StartEvent && n.parent.as_deref() == scope)
    }

    /// Boundary timers attached to an activity, in declaration order.
    pub fn boundary_timers(&self, attached: &str) -> Vec<&FlowNode> {
        self.graph
            .node_weights()
            .filter(|n| {
                matches!(&n.kind, NodeKind::BoundaryTimer { attached_to, .. } if attached_to == attached)
            })
            .collect()
    }

    /// True when a path of sequence flows leads from `from` to `to`.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(a), Some(b)) => petgraph::algo::has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }
}

/// Definition ids are `<key>:<version>`.
pub fn definition_id(key: &str, version: u32) -> String {
    format!("{key}:{version}")
}

#[cfg(test)]
mod tests {
    use super::yaml::parse_process_yaml;
    use super::*;

    fn definition(yaml: &str) -> ProcessDefinition {
        parse_process_yaml(yaml)
            .unwrap()
            .build_definition(1)
            .unwrap()
    }

    const NESTED: &str = r#"
key: nested
nodes:
  - kind: StartEvent
    id: start
  - kind: SubProcess
    id: outer
    multi_instance:
      sequential: true
      cardinality: 2
  - kind: StartEvent
    id: outerStart
    parent: outer
  - kind: SubProcess
    id: inner
    parent: outer
  - kind: StartEvent
    id: innerStart
    parent: inner
  - kind: UserTask
    id: deepTask
    parent: inner
  - kind: BoundaryTimer
    id: deepTimer
    attached_to: deepTask
    timer: PT5M
  - kind: EndEvent
    id: end
flows:
  - from: start
    to: outer
  - from: outerStart
    to: inner
  - from: innerStart
    to: deepTask
  - from: outer
    to: end
"#;

    #[test]
    fn test_containment_chain_outermost_first() {
        let def = definition(NESTED);
        let chain: Vec<&str> = def
            .containment_chain("deepTask")
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(chain, vec!["outer", "inner"]);
        assert_eq!(
            def.multi_instance_container("deepTask").map(|n| n.id.as_str()),
            Some("outer")
        );
        assert!(def.multi_instance_container("outer").is_none());
    }

    #[test]
    fn test_start_event_per_scope() {
        let def = definition(NESTED);
        assert_eq!(def.start_event(None).unwrap().id, "start");
        assert_eq!(def.start_event(Some("inner")).unwrap().id, "innerStart");
        assert!(def.start_event(Some("deepTask")).is_none());
    }

    #[test]
    fn test_boundary_timers_and_reachability() {
        let def = definition(NESTED);
        let timers = def.boundary_timers("deepTask");
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].id, "deepTimer");
        assert!(def.can_reach("start", "end"));
        assert!(!def.can_reach("end", "start"));
    }

    #[test]
    fn test_outgoing_in_declaration_order() {
        let def = definition(
            r#"
key: order
nodes:
  - kind: ExclusiveGateway
    id: gw
  - kind: UserTask
    id: a
  - kind: UserTask
    id: b
  - kind: UserTask
    id: c
flows:
  - from: gw
    to: a
  - from: gw
    to: b
  - from: gw
    to: c
"#,
        );
        let targets: Vec<&str> = def
            .outgoing("gw")
            .iter()
            .map(|f| f.target.id.as_str())
            .collect();
        assert_eq!(targets, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_same_kind_ignores_payload() {
        let a = NodeKind::CallActivity {
            called_element: CalledElement::Key("a".to_string()),
        };
        let b = NodeKind::CallActivity {
            called_element: CalledElement::Key("b".to_string()),
        };
        assert!(a.same_kind(&b));
        assert!(!NodeKind::UserTask.same_kind(&NodeKind::ServiceTask));
    }
}
