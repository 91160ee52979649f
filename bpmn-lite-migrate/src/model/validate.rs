use super::dto::{NodeKindDto, ProcessModelDto};
use crate::expression::is_expression;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Process model '{key}' is invalid: {}", join_errors(.errors))]
    Invalid {
        key: String,
        errors: Vec<ValidationError>,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn push(errors: &mut Vec<ValidationError>, rule: &str, message: String) {
    errors.push(ValidationError {
        rule: rule.to_string(),
        message,
    });
}

/// Validate a ProcessModelDto before graph construction. Returns all errors found.
pub fn validate_model(dto: &ProcessModelDto) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // M1: key is usable inside a definition id
    if dto.key.trim().is_empty() || dto.key.contains(':') {
        push(
            &mut errors,
            "M1",
            format!("Process key must be non-empty and free of ':': '{}'", dto.key),
        );
    }

    // M2: node ids are unique
    let mut nodes: HashMap<&str, &NodeKindDto> = HashMap::new();
    for node in &dto.nodes {
        if nodes.insert(node.id.as_str(), &node.kind).is_some() {
            push(&mut errors, "M2", format!("Duplicate node id: {}", node.id));
        }
    }

    // M3: parent exists and is an embedded sub-process
    for node in &dto.nodes {
        let Some(parent) = &node.parent else { continue };
        match nodes.get(parent.as_str()) {
            None => push(
                &mut errors,
                "M3",
                format!("Node {} references unknown parent {}", node.id, parent),
            ),
            Some(NodeKindDto::SubProcess) => {}
            Some(_) => push(
                &mut errors,
                "M3",
                format!("Node {}: parent {} is not a SubProcess", node.id, parent),
            ),
        }
    }

    // M4: containment is acyclic
    let parents: HashMap<&str, &str> = dto
        .nodes
        .iter()
        .filter_map(|n| n.parent.as_deref().map(|p| (n.id.as_str(), p)))
        .collect();
    for node in &dto.nodes {
        let mut seen = HashSet::from([node.id.as_str()]);
        let mut current = parents.get(node.id.as_str()).copied();
        while let Some(parent) = current {
            if !seen.insert(parent) {
                push(
                    &mut errors,
                    "M4",
                    format!("Containment cycle through node {}", node.id),
                );
                break;
            }
            current = parents.get(parent).copied();
        }
    }

    // M5: flow endpoints reference declared nodes
    for flow in &dto.flows {
        for (end, id) in [("from", &flow.from), ("to", &flow.to)] {
            if !nodes.contains_key(id.as_str()) {
                push(
                    &mut errors,
                    "M5",
                    format!("Flow {} references unknown node '{}' ({})", flow.flow_id(), id, end),
                );
            }
        }
    }

    // M6: at most one default flow per node
    let mut defaults: HashMap<&str, usize> = HashMap::new();
    for flow in dto.flows.iter().filter(|f| f.is_default) {
        *defaults.entry(flow.from.as_str()).or_default() += 1;
    }
    for (from, count) in defaults {
        if count > 1 {
            push(
                &mut errors,
                "M6",
                format!("Node {}: expected at most one default flow, found {}", from, count),
            );
        }
    }

    for node in &dto.nodes {
        match &node.kind {
            // M7: boundary timers attach to an activity
            NodeKindDto::BoundaryTimer { attached_to, .. } => match nodes.get(attached_to.as_str()) {
                Some(host) if host.is_activity() => {}
                Some(_) => push(
                    &mut errors,
                    "M7",
                    format!("BoundaryTimer {}: host {} is not an activity", node.id, attached_to),
                ),
                None => push(
                    &mut errors,
                    "M7",
                    format!("BoundaryTimer {}: unknown host {}", node.id, attached_to),
                ),
            },
            // M8: a version pin needs a literal process key
            NodeKindDto::CallActivity {
                called_element,
                version,
            } => {
                if called_element.trim().is_empty() {
                    push(
                        &mut errors,
                        "M8",
                        format!("CallActivity {}: empty called element", node.id),
                    );
                } else if version.is_some() && is_expression(called_element) {
                    push(
                        &mut errors,
                        "M8",
                        format!(
                            "CallActivity {}: cannot pin a version of expression '{}'",
                            node.id, called_element
                        ),
                    );
                }
            }
            _ => {}
        }

        // M9: multi-instance characteristics only on activities
        if node.multi_instance.is_some() && !node.kind.is_activity() {
            push(
                &mut errors,
                "M9",
                format!("Node {}: multi-instance is only allowed on activities", node.id),
            );
        }
    }

    errors
}
