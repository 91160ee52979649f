//! Call activities: resolving the called process and wiring sub-process instances.

use super::error::{MigrationError, MigrationIssue};
use super::timer;
use super::transform::{MigrationContext, Site};
use crate::expression::ExpressionEvaluator;
use crate::model::repository::DefinitionRepository;
use crate::model::{CalledElement, FlowNode, ProcessDefinition};
use crate::types::*;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub(crate) enum CalledElementError {
    Unresolved {
        expression: String,
    },
    NotDeployed {
        key: String,
        version: Option<u32>,
    },
}

impl CalledElementError {
    pub(crate) fn into_issue(self, call_activity_id: &str) -> MigrationIssue {
        match self {
            CalledElementError::Unresolved { expression, .. } => {
                MigrationIssue::CalledElementNotResolved {
                    call_activity_id: call_activity_id.to_string(),
                    expression,
                }
            }
            CalledElementError::NotDeployed { key, version } => {
                MigrationIssue::CalledProcessNotDeployed {
                    call_activity_id: call_activity_id.to_string(),
                    key,
                    version,
                }
            }
        }
    }

    pub(crate) fn into_error(self, call_activity_id: &str) -> MigrationError {
        self.into_issue(call_activity_id).into_error()
    }
}

/// Resolve the definition a call activity calls.
///
/// Version precedence: `version_override` (from a mapping), then a version
/// pinned in the model, then the latest deployed version of the key.
pub(crate) fn resolve_called_definition(
    repository: &dyn DefinitionRepository,
    evaluator: &dyn ExpressionEvaluator,
    called_element: &CalledElement,
    version_override: Option<u32>,
    scope: &VariableMap,
) -> Result<Arc<ProcessDefinition>, CalledElementError> {
    let (key, pinned) = match called_element {
        CalledElement::Key(key) => (key.clone(), None),
        CalledElement::KeyVersion { key, version } => (key.clone(), Some(*version)),
        CalledElement::Expression(expression) => match evaluator.evaluate(expression, scope) {
            Ok(Value::String(key)) if !key.is_empty() => (key, None),
            Ok(other) => {
                debug!(expression = %expression, value = %other, "calledElement did not evaluate to a process key");
                return Err(CalledElementError::Unresolved {
                    expression: expression.clone(),
                });
            }
            Err(e) => {
                debug!(expression = %expression, error = %e, "calledElement expression failed");
                return Err(CalledElementError::Unresolved {
                    expression: expression.clone(),
                });
            }
        },
    };

    let version = version_override.or(pinned);
    let found = match version {
        Some(v) => repository.deployed_version(&key, v),
        None => repository.latest_deployed_version(&key),
    };
    found.ok_or(CalledElementError::NotDeployed { key, version })
}

/// Token at the call activity plus a sub-process instance waiting at the
/// called process's start event. Boundary timers are the caller's concern.
pub(crate) fn start_call(
    ctx: &mut MigrationContext<'_>,
    parent: ExecutionId,
    node: &FlowNode,
    variables: VariableMap,
) -> Result<ExecutionId, MigrationError> {
    let Some(called_element) = node.called_element() else {
        return Err(MigrationError::CallActivityNotFound {
            call_activity_id: node.id.clone(),
            definition_id: ctx.target.id().to_string(),
        });
    };
    let scope = merged(&ctx.tree.variables_in_scope(parent), &variables);
    let called = resolve_called_definition(ctx.repository, ctx.evaluator, called_element, None, &scope)
        .map_err(|e| e.into_error(&node.id))?;
    let start = called
        .start_event(None)
        .ok_or_else(|| MigrationError::NoStartEvent {
            scope: called.key().to_string(),
            definition_id: called.id().to_string(),
        })?;

    let token = ctx.tree.create_execution(parent, &node.id, variables)?;
    let sub = ctx
        .tree
        .start_sub_process_instance(token, called.id(), Some(&start.id), VariableMap::new())?;
    debug!(
        call_activity = %node.id,
        sub_process_instance_id = %sub,
        definition_id = called.id(),
        "Started sub-process instance"
    );
    Ok(token)
}

/// Land on a call activity: token, boundary timers and a fresh sub-process instance.
pub(crate) fn enter(
    ctx: &mut MigrationContext<'_>,
    site: &Site,
    parent: ExecutionId,
    node: &FlowNode,
    variables: VariableMap,
) -> Result<Vec<ExecutionId>, MigrationError> {
    let token = start_call(ctx, parent, node, variables)?;
    timer::attach(ctx.tree, token, &site.definition, &node.id)?;
    Ok(vec![token])
}

/// The sub-process instance that `INTO_SUBPROCESS` moves for `call_activity_id`
/// land in. All moves into the same call activity share one instance; an
/// existing one is reused when it already runs `definition`.
pub(crate) fn ensure_sub_instance(
    ctx: &mut MigrationContext<'_>,
    call_activity_id: &str,
    definition: &ProcessDefinition,
) -> Result<InstanceId, MigrationError> {
    if let Some(id) = ctx.sub_instances.get(call_activity_id) {
        if ctx.tree.instance(*id).is_ok() {
            return Ok(*id);
        }
    }

    let existing = ctx
        .tree
        .executions_of(ctx.instance_id)
        .into_iter()
        .filter(|e| e.activity() == Some(call_activity_id) && !e.is_timer())
        .find_map(|e| {
            ctx.tree
                .sub_process_instance(e.id)
                .filter(|sub| sub.definition_id == definition.id())
                .map(|sub| sub.id)
        });

    let id = match existing {
        Some(id) => id,
        None => {
            let site = ctx.instance_site()?;
            let parent = ctx.resolve_parent(&site, call_activity_id, &HashSet::new())?;
            let token = ctx
                .tree
                .create_execution(parent, call_activity_id, VariableMap::new())?;
            timer::attach(ctx.tree, token, &site.definition, call_activity_id)?;
            let sub = ctx
                .tree
                .start_sub_process_instance(token, definition.id(), None, VariableMap::new())?;
            debug!(
                call_activity = call_activity_id,
                sub_process_instance_id = %sub,
                definition_id = definition.id(),
                "Created sub-process instance for mapped activities"
            );
            sub
        }
    };
    ctx.sub_instances.insert(call_activity_id.to_string(), id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::SimpleExpressionEvaluator;
    use crate::model::repository::MemoryRepository;
    use serde_json::json;

    const SUB_V1: &str = r#"
key: oneTaskProcess
nodes:
  - { id: start, kind: StartEvent }
  - { id: theTask, kind: UserTask }
flows:
  - { from: start, to: theTask }
"#;

    fn repository() -> MemoryRepository {
        let repo = MemoryRepository::new();
        repo.deploy_yaml(SUB_V1).unwrap();
        repo.deploy_yaml(SUB_V1).unwrap();
        repo
    }

    #[test]
    fn test_key_resolves_latest() {
        let repo = repository();
        let def = resolve_called_definition(
            &repo,
            &SimpleExpressionEvaluator,
            &CalledElement::Key("oneTaskProcess".to_string()),
            None,
            &VariableMap::new(),
        )
        .unwrap();
        assert_eq!(def.version(), 2);
    }

    #[test]
    fn test_override_beats_pinned_version() {
        let repo = repository();
        let pinned = CalledElement::KeyVersion {
            key: "oneTaskProcess".to_string(),
            version: 2,
        };
        let def =
            resolve_called_definition(&repo, &SimpleExpressionEvaluator, &pinned, Some(1), &VariableMap::new())
                .unwrap();
        assert_eq!(def.version(), 1);
    }

    #[test]
    fn test_expression_uses_scope() {
        let repo = repository();
        let mut scope = VariableMap::new();
        scope.insert("subKey".to_string(), json!("oneTaskProcess"));
        let def = resolve_called_definition(
            &repo,
            &SimpleExpressionEvaluator,
            &CalledElement::Expression("${subKey}".to_string()),
            None,
            &scope,
        )
        .unwrap();
        assert_eq!(def.key(), "oneTaskProcess");
    }

    #[test]
    fn test_unresolved_expression() {
        let repo = repository();
        let err = resolve_called_definition(
            &repo,
            &SimpleExpressionEvaluator,
            &CalledElement::Expression("${subKey}".to_string()),
            None,
            &VariableMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CalledElementError::Unresolved { ref expression, .. } if expression == "${subKey}"));
    }

    #[test]
    fn test_missing_version_not_deployed() {
        let repo = repository();
        let err = resolve_called_definition(
            &repo,
            &SimpleExpressionEvaluator,
            &CalledElement::Key("oneTaskProcess".to_string()),
            Some(9),
            &VariableMap::new(),
        )
        .unwrap_err();
        assert_eq!(
            err.into_error("callActivity").to_string(),
            "Cannot find process definition with key 'oneTaskProcess' and version '9'"
        );
    }
}
