//! Process instance migration: validate a mapping document against a live
//! execution tree, then rewrite the tree for the target definition.

pub mod document;
pub mod error;
pub mod plan;

pub(crate) mod call_activity;
pub(crate) mod gateway;
pub(crate) mod multi_instance;
pub(crate) mod timer;
pub(crate) mod transform;
pub(crate) mod validate;

pub use document::{ActivityMapping, MappingDirection, MigrationDocument, TargetDefinition};
pub use error::{MigrationError, MigrationIssue, UnmappedReason};
pub use plan::{MigrationPlan, MoveKind, PlannedMove, PlannedTarget, SourceUnit, TargetScope};
