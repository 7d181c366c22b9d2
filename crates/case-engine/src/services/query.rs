//! Read-only queries over case instances, executions and variables.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::ExecutionStore;
use crate::engine::state::{ActivityType, ExecutionState};
use crate::engine::tree::{ExecutionNode, ExecutionTree};
use crate::engine::variables::VariableInstance;
use crate::error::{EngineError, EngineResult};

/// A case execution as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseExecution {
    pub id: String,
    pub case_instance_id: String,
    pub parent_id: Option<String>,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub state: ExecutionState,
    pub required: bool,
    pub manual_activation_required: bool,
    pub case_definition_id: String,
    pub business_key: Option<String>,
}

impl CaseExecution {
    pub(crate) fn from_node(tree: &ExecutionTree, node: &ExecutionNode) -> Self {
        Self {
            id: node.id.clone(),
            case_instance_id: node.case_instance_id.clone(),
            parent_id: node.parent_id.clone(),
            activity_id: node.activity_id.clone(),
            activity_type: node.activity_type,
            state: node.state,
            required: node.required,
            manual_activation_required: node.manual_activation_required,
            case_definition_id: tree.case_definition_id.clone(),
            business_key: tree.business_key.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == ExecutionState::Available
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ExecutionState::Enabled
    }

    pub fn is_disabled(&self) -> bool {
        self.state == ExecutionState::Disabled
    }

    pub fn is_active(&self) -> bool {
        self.state == ExecutionState::Active
    }
}

/// A case instance as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInstance {
    pub id: String,
    pub case_definition_id: String,
    pub case_definition_key: String,
    pub business_key: Option<String>,
    pub state: ExecutionState,
    pub super_execution_id: Option<String>,
}

impl CaseInstance {
    pub(crate) fn from_tree(tree: &ExecutionTree) -> Self {
        Self {
            id: tree.case_instance_id.clone(),
            case_definition_id: tree.case_definition_id.clone(),
            case_definition_key: tree.case_definition_key.clone(),
            business_key: tree.business_key.clone(),
            state: tree.state(),
            super_execution_id: tree.super_execution_id.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ExecutionState::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ExecutionState::Terminated
    }
}

fn single<T>(mut results: Vec<T>, what: &str) -> EngineResult<Option<T>> {
    match results.len() {
        0 => Ok(None),
        1 => Ok(results.pop()),
        n => Err(EngineError::NotValid(format!(
            "{} query returned {} results instead of max 1",
            what, n
        ))),
    }
}

/// Query over the executions of all live case instances.
pub struct CaseExecutionQuery {
    store: Arc<dyn ExecutionStore>,
    case_instance_id: Option<String>,
    case_execution_id: Option<String>,
    activity_id: Option<String>,
    business_key: Option<String>,
    case_definition_key: Option<String>,
    state: Option<ExecutionState>,
}

impl CaseExecutionQuery {
    pub(crate) fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            case_instance_id: None,
            case_execution_id: None,
            activity_id: None,
            business_key: None,
            case_definition_key: None,
            state: None,
        }
    }

    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.case_instance_id = Some(id.into());
        self
    }

    pub fn case_execution_id(mut self, id: impl Into<String>) -> Self {
        self.case_execution_id = Some(id.into());
        self
    }

    pub fn activity_id(mut self, id: impl Into<String>) -> Self {
        self.activity_id = Some(id.into());
        self
    }

    pub fn business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn case_definition_key(mut self, key: impl Into<String>) -> Self {
        self.case_definition_key = Some(key.into());
        self
    }

    pub fn state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn active(self) -> Self {
        self.state(ExecutionState::Active)
    }

    pub fn enabled(self) -> Self {
        self.state(ExecutionState::Enabled)
    }

    pub fn disabled(self) -> Self {
        self.state(ExecutionState::Disabled)
    }

    pub async fn list(&self) -> EngineResult<Vec<CaseExecution>> {
        let trees = self.store.list_trees().await?;
        let mut results = Vec::new();
        for tree in &trees {
            if self
                .case_instance_id
                .as_ref()
                .is_some_and(|id| *id != tree.case_instance_id)
                || self
                    .business_key
                    .as_ref()
                    .is_some_and(|key| tree.business_key.as_ref() != Some(key))
                || self
                    .case_definition_key
                    .as_ref()
                    .is_some_and(|key| *key != tree.case_definition_key)
            {
                continue;
            }
            for node in tree.nodes() {
                let matches = self.case_execution_id.as_ref().map_or(true, |id| *id == node.id)
                    && self.activity_id.as_ref().map_or(true, |id| *id == node.activity_id)
                    && self.state.map_or(true, |state| state == node.state);
                if matches {
                    results.push(CaseExecution::from_node(tree, node));
                }
            }
        }
        Ok(results)
    }

    pub async fn single_result(&self) -> EngineResult<Option<CaseExecution>> {
        single(self.list().await?, "Case execution")
    }

    pub async fn count(&self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }
}

/// Query over case instances.
pub struct CaseInstanceQuery {
    store: Arc<dyn ExecutionStore>,
    case_instance_id: Option<String>,
    business_key: Option<String>,
    case_definition_key: Option<String>,
    case_definition_id: Option<String>,
    super_case_execution_id: Option<String>,
    state: Option<ExecutionState>,
}

impl CaseInstanceQuery {
    pub(crate) fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            case_instance_id: None,
            business_key: None,
            case_definition_key: None,
            case_definition_id: None,
            super_case_execution_id: None,
            state: None,
        }
    }

    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.case_instance_id = Some(id.into());
        self
    }

    pub fn business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn case_definition_key(mut self, key: impl Into<String>) -> Self {
        self.case_definition_key = Some(key.into());
        self
    }

    pub fn case_definition_id(mut self, id: impl Into<String>) -> Self {
        self.case_definition_id = Some(id.into());
        self
    }

    pub fn super_case_execution_id(mut self, id: impl Into<String>) -> Self {
        self.super_case_execution_id = Some(id.into());
        self
    }

    pub fn active(mut self) -> Self {
        self.state = Some(ExecutionState::Active);
        self
    }

    pub fn completed(mut self) -> Self {
        self.state = Some(ExecutionState::Completed);
        self
    }

    pub fn terminated(mut self) -> Self {
        self.state = Some(ExecutionState::Terminated);
        self
    }

    pub async fn list(&self) -> EngineResult<Vec<CaseInstance>> {
        Ok(self
            .store
            .list_trees()
            .await?
            .iter()
            .filter(|tree| {
                self.case_instance_id.as_ref().map_or(true, |id| *id == tree.case_instance_id)
                    && self
                        .business_key
                        .as_ref()
                        .map_or(true, |key| tree.business_key.as_ref() == Some(key))
                    && self
                        .case_definition_key
                        .as_ref()
                        .map_or(true, |key| *key == tree.case_definition_key)
                    && self
                        .case_definition_id
                        .as_ref()
                        .map_or(true, |id| *id == tree.case_definition_id)
                    && self
                        .super_case_execution_id
                        .as_ref()
                        .map_or(true, |id| tree.super_execution_id.as_ref() == Some(id))
                    && self.state.map_or(true, |state| state == tree.state())
            })
            .map(CaseInstance::from_tree)
            .collect())
    }

    pub async fn single_result(&self) -> EngineResult<Option<CaseInstance>> {
        single(self.list().await?, "Case instance")
    }

    pub async fn count(&self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }
}

/// Query over variable instances.
pub struct VariableInstanceQuery {
    store: Arc<dyn ExecutionStore>,
    case_instance_id: Option<String>,
    case_execution_id: Option<String>,
    name: Option<String>,
}

impl VariableInstanceQuery {
    pub(crate) fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            case_instance_id: None,
            case_execution_id: None,
            name: None,
        }
    }

    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.case_instance_id = Some(id.into());
        self
    }

    /// Variables owned by this execution.
    pub fn case_execution_id(mut self, id: impl Into<String>) -> Self {
        self.case_execution_id = Some(id.into());
        self
    }

    pub fn variable_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub async fn list(&self) -> EngineResult<Vec<VariableInstance>> {
        let trees = self.store.list_trees().await?;
        Ok(trees
            .iter()
            .filter(|tree| {
                self.case_instance_id
                    .as_ref()
                    .map_or(true, |id| *id == tree.case_instance_id)
            })
            .flat_map(|tree| tree.variable_instances())
            .filter(|v| {
                self.case_execution_id
                    .as_ref()
                    .map_or(true, |id| *id == v.case_execution_id)
                    && self.name.as_ref().map_or(true, |name| *name == v.name)
            })
            .collect())
    }

    pub async fn single_result(&self) -> EngineResult<Option<VariableInstance>> {
        single(self.list().await?, "Variable instance")
    }

    pub async fn count(&self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }
}
