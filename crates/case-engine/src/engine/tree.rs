//! Execution tree of one case instance.
//!
//! Nodes are kept in an arena keyed by execution id. The parent is an id,
//! children an ordered list of ids, so the tree serializes as plain data and
//! can be cloned as a unit for an all-or-nothing commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::state::{ActivityType, ExecutionState};
use crate::engine::variables::{VariableInstance, VariableScope};
use crate::error::{EngineError, EngineResult};
use crate::model::types::{CaseDefinition, PlanItemDefinition};

/// One instantiation of a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: String,
    pub case_instance_id: String,
    pub parent_id: Option<String>,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub manual_activation_required: bool,
    pub required: bool,
    pub state: ExecutionState,
    pub children: Vec<String>,
}

impl ExecutionNode {
    /// Build a node in state AVAILABLE for a plan item.
    pub fn for_plan_item(
        id: String,
        case_instance_id: &str,
        parent_id: Option<String>,
        item: &PlanItemDefinition,
    ) -> Self {
        Self {
            id,
            case_instance_id: case_instance_id.to_string(),
            parent_id,
            activity_id: item.id.clone(),
            activity_type: item.activity_type,
            manual_activation_required: item.manual_activation_required,
            required: item.required,
            state: ExecutionState::Available,
            children: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ExecutionState::Active
    }
}

/// Work item created for an ACTIVE human task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub name: Option<String>,
    pub task_definition_key: String,
    pub case_execution_id: String,
    pub case_instance_id: String,
    pub created_at: DateTime<Utc>,
}

/// Arena of the executions of one case instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTree {
    pub case_instance_id: String,
    pub case_definition_id: String,
    pub case_definition_key: String,
    pub business_key: Option<String>,
    /// Case task execution that spawned this instance, if embedded.
    pub super_execution_id: Option<String>,
    /// Bumped by the store on every successful save.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    nodes: BTreeMap<String, ExecutionNode>,
    variables: VariableScope,
    tasks: BTreeMap<String, UserTask>,
}

impl ExecutionTree {
    /// New tree holding only the case instance root, in state AVAILABLE.
    pub fn new(
        case_instance_id: String,
        definition: &CaseDefinition,
        business_key: Option<String>,
        super_execution_id: Option<String>,
    ) -> Self {
        let root = ExecutionNode::for_plan_item(
            case_instance_id.clone(),
            &case_instance_id,
            None,
            &definition.case_plan_model,
        );
        let mut nodes = BTreeMap::new();
        nodes.insert(root.id.clone(), root);

        Self {
            case_instance_id,
            case_definition_id: definition.id.clone(),
            case_definition_key: definition.key.clone(),
            business_key,
            super_execution_id,
            revision: 0,
            created_at: Utc::now(),
            nodes,
            variables: VariableScope::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// State of the case instance root.
    pub fn state(&self) -> ExecutionState {
        self.nodes
            .get(&self.case_instance_id)
            .map(|root| root.state)
            .unwrap_or(ExecutionState::Terminated)
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.nodes.contains_key(execution_id)
    }

    pub fn node(&self, execution_id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(execution_id)
    }

    /// Look up a node, failing with NotFound.
    pub fn require(&self, execution_id: &str) -> EngineResult<&ExecutionNode> {
        self.nodes.get(execution_id).ok_or_else(|| {
            EngineError::NotFound(format!(
                "Cannot find case execution with id '{}'",
                execution_id
            ))
        })
    }

    pub fn require_mut(&mut self, execution_id: &str) -> EngineResult<&mut ExecutionNode> {
        self.nodes.get_mut(execution_id).ok_or_else(|| {
            EngineError::NotFound(format!(
                "Cannot find case execution with id '{}'",
                execution_id
            ))
        })
    }

    /// Nodes in tree order (root first, then children depth-first).
    pub fn nodes(&self) -> Vec<&ExecutionNode> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.case_instance_id.as_str()];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                ordered.push(node);
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }
        ordered
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, execution_id: &str) -> Vec<&ExecutionNode> {
        self.nodes
            .get(execution_id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|id| self.nodes.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Execution ids from `execution_id` up to and including the root.
    pub fn ancestry(&self, execution_id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(execution_id);
        while let Some(node) = current {
            chain.push(node.id.as_str());
            current = node.parent_id.as_deref().and_then(|p| self.nodes.get(p));
        }
        chain
    }

    pub fn find_by_activity(&self, activity_id: &str) -> Vec<&ExecutionNode> {
        self.nodes()
            .into_iter()
            .filter(|n| n.activity_id == activity_id)
            .collect()
    }

    /// Attach a new child below `parent_id`.
    pub fn insert_child(&mut self, parent_id: &str, node: ExecutionNode) -> EngineResult<()> {
        let child_id = node.id.clone();
        self.require_mut(parent_id)?.children.push(child_id.clone());
        self.nodes.insert(child_id, node);
        Ok(())
    }

    /// Ids of all descendants of `execution_id`, deepest first.
    pub fn descendants(&self, execution_id: &str) -> Vec<String> {
        let mut pre_order = Vec::new();
        let mut stack: Vec<&str> = self
            .nodes
            .get(execution_id)
            .map(|n| n.children.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                pre_order.push(node.id.clone());
                stack.extend(node.children.iter().map(String::as_str));
            }
        }
        pre_order.reverse();
        pre_order
    }

    /// Destroy a node together with its descendants, their local variables
    /// and their user tasks. Returns the removed nodes, deepest first.
    pub fn remove_subtree(&mut self, execution_id: &str) -> Vec<ExecutionNode> {
        let mut ids = self.descendants(execution_id);
        ids.push(execution_id.to_string());

        if let Some(parent_id) = self
            .nodes
            .get(execution_id)
            .and_then(|n| n.parent_id.clone())
        {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.retain(|c| c != execution_id);
            }
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            self.variables.drop_owner(&id);
            self.tasks.retain(|_, task| task.case_execution_id != id);
            if let Some(node) = self.nodes.remove(&id) {
                removed.push(node);
            }
        }
        removed
    }

    // Variables

    pub fn get_variable(&self, execution_id: &str, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(self.ancestry(execution_id), name)
    }

    pub fn get_variable_local(&self, execution_id: &str, name: &str) -> Option<&serde_json::Value> {
        self.variables.get_local(execution_id, name)
    }

    /// Variables visible from `execution_id`.
    pub fn variables(&self, execution_id: &str) -> BTreeMap<String, serde_json::Value> {
        self.variables.visible(self.ancestry(execution_id))
    }

    pub fn variables_local(&self, execution_id: &str) -> BTreeMap<String, serde_json::Value> {
        self.variables.local(execution_id)
    }

    /// Write at the case instance root.
    pub fn set_variable(&mut self, name: &str, value: serde_json::Value) {
        let root = self.case_instance_id.clone();
        self.variables.set(&root, name, value);
    }

    pub fn set_variable_local(&mut self, execution_id: &str, name: &str, value: serde_json::Value) {
        self.variables.set(execution_id, name, value);
    }

    /// Delete the root-owned variable.
    pub fn remove_variable(&mut self, name: &str) -> Option<serde_json::Value> {
        let root = self.case_instance_id.clone();
        self.variables.remove(&root, name)
    }

    pub fn remove_variable_local(&mut self, execution_id: &str, name: &str) -> Option<serde_json::Value> {
        self.variables.remove(execution_id, name)
    }

    pub fn variable_instances(&self) -> Vec<VariableInstance> {
        self.variables.instances(&self.case_instance_id)
    }

    // User tasks

    pub fn add_task(&mut self, task: UserTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn remove_task_of(&mut self, execution_id: &str) -> Option<UserTask> {
        let task_id = self
            .tasks
            .values()
            .find(|t| t.case_execution_id == execution_id)
            .map(|t| t.id.clone())?;
        self.tasks.remove(&task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&UserTask> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> Vec<&UserTask> {
        self.tasks.values().collect()
    }
}
