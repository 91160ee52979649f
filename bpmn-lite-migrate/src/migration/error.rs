use crate::expression::ExpressionError;
use crate::runtime::TreeError;
use crate::types::InstanceId;
use std::fmt;

/// Fatal migration failure. Message texts are matched on by callers.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Cannot find process instance with id '{0}'")]
    ProcessInstanceNotFound(InstanceId),

    #[error("Cannot find process definition with id '{0}'")]
    DefinitionNotFound(String),

    #[error("Cannot find target process definition {0}")]
    TargetDefinitionNotFound(String),

    #[error("Cannot find activity '{activity_id}' in process definition with id '{definition_id}'")]
    ActivityNotFound {
        activity_id: String,
        definition_id: String,
    },

    #[error("Cannot find callActivity '{call_activity_id}' in process definition with id '{definition_id}'")]
    CallActivityNotFound {
        call_activity_id: String,
        definition_id: String,
    },

    #[error("Cannot resolve calledElement expression '{expression}' of callActivity '{call_activity_id}'")]
    UnresolvedCalledElement {
        expression: String,
        call_activity_id: String,
    },

    #[error("Cannot find process definition with key '{key}'{}", version_suffix(.version))]
    CalledProcessNotFound { key: String, version: Option<u32> },

    #[error("No outgoing sequence flow of element '{element_id}' could be selected for continuing the process.")]
    NoOutgoingFlow { element_id: String },

    #[error("Error while evaluating expression '{expression}' of element '{element_id}': {source}")]
    Expression {
        element_id: String,
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Invalid loop cardinality for multi-instance activity '{activity_id}': {reason}")]
    InvalidLoopCardinality { activity_id: String, reason: String },

    #[error("No start event found in scope '{scope}' of process definition with id '{definition_id}'")]
    NoStartEvent {
        scope: String,
        definition_id: String,
    },

    #[error("Routing from element '{element_id}' exceeded the maximum depth of {max_depth}")]
    RoutingDepthExceeded { element_id: String, max_depth: usize },

    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A validation finding surfaced by `migrate`.
    #[error("{0}")]
    Invalid(String),
}

fn version_suffix(version: &Option<u32>) -> String {
    version
        .map(|v| format!(" and version '{v}'"))
        .unwrap_or_default()
}

// ─── Validation findings ──────────────────────────────────────

/// Why an activity cannot be carried over to the target definition as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmappedReason {
    Missing,
    KindChanged { expected: &'static str },
    ScopeChanged,
    LoopTypeChanged,
    CalledElementChanged,
}

impl fmt::Display for UnmappedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmappedReason::Missing => write!(f, "does not exist in the new model"),
            UnmappedReason::KindChanged { expected } => {
                write!(f, "is not a {} in the new model", expected)
            }
            UnmappedReason::ScopeChanged => write!(f, "is in a different scope in the new model"),
            UnmappedReason::LoopTypeChanged => {
                write!(f, "has a different multi-instance loop type in the new model")
            }
            UnmappedReason::CalledElementChanged => {
                write!(f, "has a different called element in the new model")
            }
        }
    }
}

/// One validation finding. `Display` is the message reported by `validate_migration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationIssue {
    InstanceNotFound(InstanceId),
    DefinitionNotFound(String),
    TargetDefinitionNotFound(String),
    Unmapped {
        process_instance_id: InstanceId,
        activity_id: String,
        reason: UnmappedReason,
        has_children: bool,
    },
    CallActivityChanged {
        call_activity_id: String,
        reason: UnmappedReason,
        has_children: bool,
    },
    IncompleteCallActivity {
        call_activity_id: String,
        running: Vec<String>,
    },
    MalformedMapping {
        from: String,
        reason: String,
    },
    DuplicateMapping {
        activity_id: String,
    },
    InvalidTarget {
        from: String,
        to: String,
        definition_id: String,
    },
    BoundaryEventTarget {
        from: String,
        to: String,
    },
    InsideMultiInstance {
        from: String,
        to: String,
        container: String,
    },
    CallActivityMissing {
        call_activity_id: String,
        definition_id: String,
    },
    CalledElementNotResolved {
        call_activity_id: String,
        expression: String,
    },
    CalledProcessNotDeployed {
        call_activity_id: String,
        key: String,
        version: Option<u32>,
    },
    InvalidLoopCardinality {
        activity_id: String,
        reason: String,
    },
}

impl fmt::Display for MigrationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationIssue::InstanceNotFound(id) => {
                write!(f, "Cannot find process instance with id '{}'", id)
            }
            MigrationIssue::DefinitionNotFound(id) => {
                write!(f, "Cannot find process definition with id '{}'", id)
            }
            MigrationIssue::TargetDefinitionNotFound(target) => {
                write!(f, "Cannot find target process definition {}", target)
            }
            MigrationIssue::Unmapped {
                process_instance_id,
                activity_id,
                reason,
                has_children,
            } => {
                write!(
                    f,
                    "Process instance (id:'{}') has a running Activity (id:'{}') that is not mapped for migration (it {})",
                    process_instance_id, activity_id, reason
                )?;
                if *has_children {
                    write!(f, " (or all its child activities)")?;
                }
                Ok(())
            }
            MigrationIssue::CallActivityChanged {
                call_activity_id,
                reason,
                has_children,
            } => {
                write!(
                    f,
                    "Call activity '{}' {}. It must be mapped explicitly for migration",
                    call_activity_id, reason
                )?;
                if *has_children {
                    write!(f, " (or all its child activities)")?;
                }
                Ok(())
            }
            MigrationIssue::IncompleteCallActivity {
                call_activity_id,
                running,
            } => write!(
                f,
                "Incomplete migration mapping for call activity. The call activity '{}' called element is different in the new model. Running subProcess activities '[{}]' should also be mapped for migration (or the call activity itself)",
                call_activity_id,
                running.join(", ")
            ),
            MigrationIssue::MalformedMapping { from, reason } => {
                write!(f, "Invalid mapping for '{}': {}", from, reason)
            }
            MigrationIssue::DuplicateMapping { activity_id } => write!(
                f,
                "Activity '{}' is mapped for migration more than once",
                activity_id
            ),
            MigrationIssue::InvalidTarget {
                from,
                to,
                definition_id,
            } => write!(
                f,
                "Invalid mapping for '{}' to '{}', cannot be found in the process definition with id '{}'",
                from, to, definition_id
            ),
            MigrationIssue::BoundaryEventTarget { from, to } => write!(
                f,
                "Invalid mapping for '{}' to '{}', cannot migrate onto a boundary event",
                from, to
            ),
            MigrationIssue::InsideMultiInstance {
                from,
                to,
                container,
            } => write!(
                f,
                "Invalid mapping for '{}' to '{}', cannot migrate arbitrarily inside a Multi Instance container '{}'",
                from, to, container
            ),
            MigrationIssue::CallActivityMissing {
                call_activity_id,
                definition_id,
            } => write!(
                f,
                "There's no call activity element with id '{}' in the process definition with id '{}'",
                call_activity_id, definition_id
            ),
            MigrationIssue::CalledElementNotResolved {
                call_activity_id,
                expression,
            } => write!(
                f,
                "Invalid mapping for call activity '{}', no processes deployed with key '{}'",
                call_activity_id, expression
            ),
            MigrationIssue::CalledProcessNotDeployed {
                call_activity_id,
                key,
                version,
            } => write!(
                f,
                "Invalid mapping for call activity '{}', no processes deployed with key '{}'{}",
                call_activity_id,
                key,
                version_suffix(version)
            ),
            MigrationIssue::InvalidLoopCardinality {
                activity_id,
                reason,
            } => write!(
                f,
                "Invalid loop cardinality for multi-instance activity '{}': {}",
                activity_id, reason
            ),
        }
    }
}

impl MigrationIssue {
    /// The fatal error `migrate` raises for this finding.
    pub fn into_error(self) -> MigrationError {
        match self {
            MigrationIssue::InstanceNotFound(id) => MigrationError::ProcessInstanceNotFound(id),
            MigrationIssue::DefinitionNotFound(id) => MigrationError::DefinitionNotFound(id),
            MigrationIssue::TargetDefinitionNotFound(target) => {
                MigrationError::TargetDefinitionNotFound(target)
            }
            MigrationIssue::InvalidTarget {
                to, definition_id, ..
            } => MigrationError::ActivityNotFound {
                activity_id: to,
                definition_id,
            },
            MigrationIssue::CallActivityMissing {
                call_activity_id,
                definition_id,
            } => MigrationError::CallActivityNotFound {
                call_activity_id,
                definition_id,
            },
            MigrationIssue::CalledElementNotResolved {
                call_activity_id,
                expression,
            } => MigrationError::UnresolvedCalledElement {
                expression,
                call_activity_id,
            },
            MigrationIssue::CalledProcessNotDeployed { key, version, .. } => {
                MigrationError::CalledProcessNotFound { key, version }
            }
            MigrationIssue::InvalidLoopCardinality {
                activity_id,
                reason,
            } => MigrationError::InvalidLoopCardinality {
                activity_id,
                reason,
            },
            other => MigrationError::Invalid(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_call_activity_changed_hint() {
        let issue = MigrationIssue::CallActivityChanged {
            call_activity_id: "callActivity".to_string(),
            reason: UnmappedReason::KindChanged {
                expected: "Call Activity",
            },
            has_children: true,
        };
        assert_eq!(
            issue.to_string(),
            "Call activity 'callActivity' is not a Call Activity in the new model. It must be mapped explicitly for migration (or all its child activities)"
        );
    }

    #[test]
    fn test_incomplete_lists_running_activities() {
        let issue = MigrationIssue::IncompleteCallActivity {
            call_activity_id: "callActivity".to_string(),
            running: vec!["taskA".to_string(), "taskB".to_string()],
        };
        assert!(issue
            .to_string()
            .ends_with("Running subProcess activities '[taskA, taskB]' should also be mapped for migration (or the call activity itself)"));
    }

    #[test]
    fn test_unresolved_expression_becomes_fatal() {
        let issue = MigrationIssue::CalledElementNotResolved {
            call_activity_id: "callActivity".to_string(),
            expression: "${simpleSubProcessExpression}".to_string(),
        };
        assert!(issue
            .to_string()
            .contains("no processes deployed with key '${simpleSubProcessExpression}'"));
        assert_eq!(
            issue.into_error().to_string(),
            "Cannot resolve calledElement expression '${simpleSubProcessExpression}' of callActivity 'callActivity'"
        );
    }

    #[test]
    fn test_invalid_target_becomes_activity_not_found() {
        let issue = MigrationIssue::InvalidTarget {
            from: "userTask1Id".to_string(),
            to: "ghost".to_string(),
            definition_id: "twoTasks:2".to_string(),
        };
        assert_eq!(
            issue.into_error().to_string(),
            "Cannot find activity 'ghost' in process definition with id 'twoTasks:2'"
        );
    }

    #[test]
    fn test_other_issues_keep_message() {
        let pid = Uuid::nil();
        let issue = MigrationIssue::Unmapped {
            process_instance_id: pid,
            activity_id: "userTask1Id".to_string(),
            reason: UnmappedReason::Missing,
            has_children: false,
        };
        let message = issue.to_string();
        assert_eq!(
            message,
            format!("Process instance (id:'{}') has a running Activity (id:'userTask1Id') that is not mapped for migration (it does not exist in the new model)", pid)
        );
        assert_eq!(issue.into_error().to_string(), message);
    }

    #[test]
    fn test_pinned_version_in_messages() {
        let err = MigrationError::CalledProcessNotFound {
            key: "oneTaskProcess".to_string(),
            version: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Cannot find process definition with key 'oneTaskProcess' and version '7'"
        );
    }
}
