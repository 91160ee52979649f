//! Migration engine facade.
//!
//! ```text
//! validate_migration(tree, instance, document) -> ValidationResult
//! migrate(tree, instance, document)            -> Result<ExecutionTree>
//! migrate_in_place(&mut tree, ...)             -> Result<()>   (all-or-nothing)
//! ```

use crate::config::MigrationConfig;
use crate::expression::{ExpressionEvaluator, SimpleExpressionEvaluator};
use crate::migration::transform::MigrationContext;
use crate::migration::validate::{build_plan, Mode, PlanInput, PlanOutcome};
use crate::migration::{MigrationDocument, MigrationError, MigrationPlan};
use crate::model::repository::DefinitionRepository;
use crate::runtime::ExecutionTree;
use crate::types::InstanceId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of `validate_migration`. Any message makes the migration invalid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub messages: Vec<String>,
}

impl ValidationResult {
    fn from_messages(messages: Vec<String>) -> Self {
        Self {
            valid: messages.is_empty(),
            messages,
        }
    }
}

pub struct MigrationEngine {
    repository: Arc<dyn DefinitionRepository>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: MigrationConfig,
}

impl MigrationEngine {
    pub fn new(repository: Arc<dyn DefinitionRepository>) -> Self {
        Self {
            repository,
            evaluator: Arc::new(SimpleExpressionEvaluator::new()),
            config: MigrationConfig::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn input<'a>(
        &'a self,
        tree: &'a ExecutionTree,
        instance_id: InstanceId,
        document: &'a MigrationDocument,
    ) -> PlanInput<'a> {
        PlanInput {
            tree,
            instance_id,
            document,
            repository: self.repository.as_ref(),
            evaluator: self.evaluator.as_ref(),
            config: &self.config,
        }
    }

    /// Check a migration without touching the tree. Every finding is reported.
    pub fn validate_migration(
        &self,
        tree: &ExecutionTree,
        instance_id: InstanceId,
        document: &MigrationDocument,
    ) -> ValidationResult {
        let input = self.input(tree, instance_id, document);
        let result = match build_plan(&input, Mode::Collect) {
            Ok(outcome) => {
                ValidationResult::from_messages(outcome.issues.iter().map(ToString::to_string).collect())
            }
            Err(issue) => ValidationResult::from_messages(vec![issue.to_string()]),
        };
        debug!(
            process_instance_id = %instance_id,
            valid = result.valid,
            messages = result.messages.len(),
            "Validated migration"
        );
        result
    }

    /// The plan `migrate` would apply, or the first finding as a fatal error.
    pub fn plan(
        &self,
        tree: &ExecutionTree,
        instance_id: InstanceId,
        document: &MigrationDocument,
    ) -> Result<MigrationPlan, MigrationError> {
        self.plan_outcome(tree, instance_id, document)
            .map(|outcome| outcome.plan)
    }

    fn plan_outcome(
        &self,
        tree: &ExecutionTree,
        instance_id: InstanceId,
        document: &MigrationDocument,
    ) -> Result<PlanOutcome, MigrationError> {
        let input = self.input(tree, instance_id, document);
        build_plan(&input, Mode::FailFast).map_err(|issue| issue.into_error())
    }

    /// Migrate one instance on a copy of `tree` and return the copy.
    /// The input tree is never modified.
    pub fn migrate(
        &self,
        tree: &ExecutionTree,
        instance_id: InstanceId,
        document: &MigrationDocument,
    ) -> Result<ExecutionTree, MigrationError> {
        let outcome = self.plan_outcome(tree, instance_id, document)?;
        let plan = outcome.plan;
        info!(
            "Migrating process instance {} from {} to {}",
            instance_id, plan.source_definition_id, plan.target_definition_id
        );
        debug!(
            moves = plan.moves.len(),
            retained = plan.retained.len(),
            moved = ?plan.moved_activity_ids(),
            called_definitions = ?plan.called_definitions,
            "Applying migration plan"
        );

        let mut migrated = tree.clone();
        MigrationContext::new(
            &mut migrated,
            self.repository.as_ref(),
            self.evaluator.as_ref(),
            &self.config,
            outcome.source,
            outcome.target,
            instance_id,
        )
        .apply(&plan)?;

        info!(
            "Migrated process instance {} to {}",
            instance_id, plan.target_definition_id
        );
        Ok(migrated)
    }

    /// Migrate in place. On error `tree` is left exactly as it was.
    pub fn migrate_in_place(
        &self,
        tree: &mut ExecutionTree,
        instance_id: InstanceId,
        document: &MigrationDocument,
    ) -> Result<(), MigrationError> {
        *tree = self.migrate(tree, instance_id, document)?;
        Ok(())
    }
}
