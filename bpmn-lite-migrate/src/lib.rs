pub mod config;
pub mod engine;
pub mod expression;
pub mod migration;
pub mod model;
pub mod runtime;
pub mod types;

pub use config::MigrationConfig;
pub use engine::{MigrationEngine, ValidationResult};
pub use expression::{ExpressionError, ExpressionEvaluator, SimpleExpressionEvaluator};
pub use migration::{
    ActivityMapping, MappingDirection, MigrationDocument, MigrationError, MigrationIssue,
    TargetDefinition,
};
pub use model::repository::{DefinitionRepository, MemoryRepository};
pub use model::ProcessDefinition;
pub use runtime::{Execution, ExecutionRole, ExecutionTree, HistoryEvent, ProcessInstance, TimerJob};
