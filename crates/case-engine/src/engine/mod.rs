//! Case execution engine.
//!
//! This module provides the execution core for case instances:
//!
//! - **State**: States, activity types and lifecycle verbs
//! - **Tree**: Arena of the executions of one case instance
//! - **Variables**: Hierarchical variable scopes
//! - **Transitions**: Per-activity-type transition table
//! - **Completion**: Auto-completion rules for stages and case instances
//! - **Commands**: Command batches and their validation
//! - **Executor**: Applies a batch to a tree and drives cascades
//! - **Effects**: Cross-tree work emitted by a commit

pub mod commands;
pub mod completion;
pub mod effects;
pub mod executor;
pub mod state;
pub mod transitions;
pub mod tree;
pub mod variables;

pub use commands::{CommandBatch, VariableOp};
pub use completion::CompletionEvaluator;
pub use effects::SideEffect;
pub use executor::{CommandExecutor, CommitOutcome};
pub use state::{ActivityType, ExecutionState, LifecycleVerb};
pub use transitions::TransitionTable;
pub use tree::{ExecutionNode, ExecutionTree, UserTask};
pub use variables::{VariableInstance, VariableScope};
