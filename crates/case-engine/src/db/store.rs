//! Persistence collaborator for execution trees.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::tree::ExecutionTree;
use crate::error::EngineResult;

/// Kind of instance embedded below a process or case task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedKind {
    Process,
    Case,
}

impl std::fmt::Display for EmbeddedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Case => write!(f, "case"),
        }
    }
}

/// Back-reference from an embedded instance to the task execution that
/// started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedLink {
    pub embedded_instance_id: String,
    pub kind: EmbeddedKind,
    pub parent_execution_id: String,
    pub parent_case_instance_id: String,
}

/// Storage of execution trees with optimistic concurrency.
///
/// Every tree carries a revision. `save_tree` and `delete_tree` succeed only
/// when the stored revision still equals the one the caller read; otherwise
/// they fail with `EngineError::Conflict`.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn load_tree(&self, case_instance_id: &str) -> EngineResult<Option<ExecutionTree>>;

    /// Tree containing the given execution id.
    async fn find_tree_of_execution(&self, execution_id: &str) -> EngineResult<Option<ExecutionTree>>;

    /// Tree owning the given user task.
    async fn find_tree_of_task(&self, task_id: &str) -> EngineResult<Option<ExecutionTree>>;

    /// Insert (expected revision 0) or replace a tree. Returns the new revision.
    async fn save_tree(&self, tree: ExecutionTree, expected_revision: u64) -> EngineResult<u64>;

    async fn delete_tree(&self, case_instance_id: &str, expected_revision: u64) -> EngineResult<()>;

    async fn list_trees(&self) -> EngineResult<Vec<ExecutionTree>>;

    async fn save_link(&self, link: EmbeddedLink) -> EngineResult<()>;

    async fn find_link_by_embedded(&self, embedded_instance_id: &str) -> EngineResult<Option<EmbeddedLink>>;

    async fn find_link_by_parent(&self, parent_execution_id: &str) -> EngineResult<Option<EmbeddedLink>>;

    async fn delete_link(&self, embedded_instance_id: &str) -> EngineResult<()>;
}
