//! Execution tree snapshot: the live state of process instances that a
//! migration reads and rewrites.

pub mod events;
pub mod execution;
pub mod tree;

pub use events::HistoryEvent;
pub use execution::{Execution, ExecutionRole, ProcessInstance, TimerJob};
pub use tree::{ExecutionTree, TreeError};
