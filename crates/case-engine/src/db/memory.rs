//! In-memory execution store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::store::{EmbeddedLink, ExecutionStore};
use crate::engine::tree::ExecutionTree;
use crate::error::{EngineError, EngineResult};

#[derive(Default)]
struct Inner {
    trees: HashMap<String, ExecutionTree>,
    links: HashMap<String, EmbeddedLink>,
}

/// Execution store backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(case_instance_id: &str, expected: u64, actual: u64) -> EngineError {
    EngineError::Conflict {
        case_instance_id: case_instance_id.to_string(),
        expected,
        actual,
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn load_tree(&self, case_instance_id: &str) -> EngineResult<Option<ExecutionTree>> {
        Ok(self.inner.read().await.trees.get(case_instance_id).cloned())
    }

    async fn find_tree_of_execution(&self, execution_id: &str) -> EngineResult<Option<ExecutionTree>> {
        let inner = self.inner.read().await;
        if let Some(tree) = inner.trees.get(execution_id) {
            return Ok(Some(tree.clone()));
        }
        Ok(inner
            .trees
            .values()
            .find(|tree| tree.contains(execution_id))
            .cloned())
    }

    async fn find_tree_of_task(&self, task_id: &str) -> EngineResult<Option<ExecutionTree>> {
        Ok(self
            .inner
            .read()
            .await
            .trees
            .values()
            .find(|tree| tree.task(task_id).is_some())
            .cloned())
    }

    async fn save_tree(&self, mut tree: ExecutionTree, expected_revision: u64) -> EngineResult<u64> {
        let mut inner = self.inner.write().await;
        let actual = inner
            .trees
            .get(&tree.case_instance_id)
            .map(|stored| stored.revision)
            .unwrap_or(0);
        if actual != expected_revision {
            return Err(conflict(&tree.case_instance_id, expected_revision, actual));
        }

        let revision = expected_revision + 1;
        tree.revision = revision;
        debug!(
            case_instance_id = %tree.case_instance_id,
            revision = revision,
            executions = tree.len(),
            "Saved execution tree"
        );
        inner.trees.insert(tree.case_instance_id.clone(), tree);
        Ok(revision)
    }

    async fn delete_tree(&self, case_instance_id: &str, expected_revision: u64) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let actual = match inner.trees.get(case_instance_id) {
            Some(stored) => stored.revision,
            None => {
                return Err(EngineError::NotFound(format!(
                    "Cannot find case instance with id '{}'",
                    case_instance_id
                )))
            }
        };
        if actual != expected_revision {
            return Err(conflict(case_instance_id, expected_revision, actual));
        }
        inner.trees.remove(case_instance_id);
        inner
            .links
            .retain(|_, link| link.parent_case_instance_id != case_instance_id);
        Ok(())
    }

    async fn list_trees(&self) -> EngineResult<Vec<ExecutionTree>> {
        let mut trees: Vec<_> = self.inner.read().await.trees.values().cloned().collect();
        trees.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.case_instance_id.cmp(&b.case_instance_id))
        });
        Ok(trees)
    }

    async fn save_link(&self, link: EmbeddedLink) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .links
            .insert(link.embedded_instance_id.clone(), link);
        Ok(())
    }

    async fn find_link_by_embedded(&self, embedded_instance_id: &str) -> EngineResult<Option<EmbeddedLink>> {
        Ok(self.inner.read().await.links.get(embedded_instance_id).cloned())
    }

    async fn find_link_by_parent(&self, parent_execution_id: &str) -> EngineResult<Option<EmbeddedLink>> {
        Ok(self
            .inner
            .read()
            .await
            .links
            .values()
            .find(|link| link.parent_execution_id == parent_execution_id)
            .cloned())
    }

    async fn delete_link(&self, embedded_instance_id: &str) -> EngineResult<()> {
        self.inner.write().await.links.remove(embedded_instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::EmbeddedKind;
    use crate::model::loader::parse_definition;

    fn tree(id: &str) -> ExecutionTree {
        let def = parse_definition(
            "key: emptyCase\ncase_plan_model:\n  id: CasePlanModel_1\n  type: case_plan_model\n",
        )
        .unwrap();
        ExecutionTree::new(id.to_string(), &def, None, None)
    }

    #[tokio::test]
    async fn test_save_checks_revision() {
        let store = InMemoryStore::new();
        assert_eq!(store.save_tree(tree("case-1"), 0).await.unwrap(), 1);

        let loaded = store.load_tree("case-1").await.unwrap().unwrap();
        assert_eq!(loaded.revision, 1);

        // a second writer that read revision 0 loses
        let err = store.save_tree(tree("case-1"), 0).await.unwrap_err();
        assert!(err.is_transient());

        assert_eq!(store.save_tree(loaded, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_tree_and_links() {
        let store = InMemoryStore::new();
        store.save_tree(tree("case-1"), 0).await.unwrap();
        store
            .save_link(EmbeddedLink {
                embedded_instance_id: "proc-1".to_string(),
                kind: EmbeddedKind::Process,
                parent_execution_id: "task-1".to_string(),
                parent_case_instance_id: "case-1".to_string(),
            })
            .await
            .unwrap();
        assert!(store.find_link_by_parent("task-1").await.unwrap().is_some());

        assert!(store.delete_tree("case-1", 5).await.unwrap_err().is_transient());
        store.delete_tree("case-1", 1).await.unwrap();
        assert!(store.load_tree("case-1").await.unwrap().is_none());
        assert!(store.find_link_by_embedded("proc-1").await.unwrap().is_none());
        assert!(matches!(
            store.delete_tree("case-1", 1).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_tree_of_execution() {
        let store = InMemoryStore::new();
        store.save_tree(tree("case-1"), 0).await.unwrap();
        assert!(store.find_tree_of_execution("case-1").await.unwrap().is_some());
        assert!(store.find_tree_of_execution("other").await.unwrap().is_none());
    }
}
