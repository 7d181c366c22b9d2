//! Command execution against one execution tree.
//!
//! The executor applies a validated batch (variables first, then the verb)
//! and then drains a work queue of follow-up steps:
//! - `Trigger`: a freshly created child leaves AVAILABLE
//! - `Activated`: type-specific entry behavior of an ACTIVE node
//! - `Evaluate`: completion check of a container, re-queued upward
//!
//! Work is processed iteratively so nested stages and long completion
//! cascades never recurse. Callers run the executor on a copy of the tree
//! and only keep it when the whole commit succeeded.

use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::commands::{CommandBatch, VariableOp};
use crate::engine::completion::CompletionEvaluator;
use crate::engine::effects::SideEffect;
use crate::engine::state::{ActivityType, ExecutionState, LifecycleVerb};
use crate::engine::transitions::{state_guard, TransitionTable};
use crate::engine::tree::{ExecutionNode, ExecutionTree, UserTask};
use crate::error::{EngineError, EngineResult};
use crate::model::types::{CaseDefinition, PlanItemDefinition};

/// Result of a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Cross-tree work to carry out after the tree is saved.
    pub effects: Vec<SideEffect>,
    /// The case instance was closed; its tree must be deleted, not saved.
    pub closed: bool,
}

#[derive(Debug)]
enum Work {
    Trigger(String),
    Activated(String),
    Evaluate { container_id: String, depth: usize },
}

pub struct CommandExecutor<'a> {
    tree: &'a mut ExecutionTree,
    definition: &'a CaseDefinition,
    table: &'a TransitionTable,
    evaluator: CompletionEvaluator,
    seed: BTreeMap<String, serde_json::Value>,
    queue: VecDeque<Work>,
    outcome: CommitOutcome,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(
        tree: &'a mut ExecutionTree,
        definition: &'a CaseDefinition,
        table: &'a TransitionTable,
        evaluator: CompletionEvaluator,
    ) -> Self {
        Self {
            tree,
            definition,
            table,
            evaluator,
            seed: BTreeMap::new(),
            queue: VecDeque::new(),
            outcome: CommitOutcome::default(),
        }
    }

    /// Variables handed to sub-instances started by this commit.
    pub fn with_seed(mut self, seed: BTreeMap<String, serde_json::Value>) -> Self {
        self.seed = seed;
        self
    }

    /// Activate the root of a newly created tree and its automatic subtree.
    pub fn start_case_instance(mut self) -> EngineResult<CommitOutcome> {
        let root_id = self.tree.case_instance_id.clone();
        self.set_state(&root_id, ExecutionState::Active)?;
        self.queue.push_back(Work::Activated(root_id));
        self.run()?;
        Ok(self.outcome)
    }

    /// Apply a batch: variable writes, then the lifecycle verb.
    pub fn commit(mut self, batch: &CommandBatch) -> EngineResult<CommitOutcome> {
        batch.validate()?;
        self.tree.require(&batch.execution_id)?;

        if self.seed.is_empty() {
            self.seed = batch.seed_variables();
        }

        for op in &batch.operations {
            self.apply_variable(&batch.execution_id, op);
        }

        if let Some(verb) = batch.verb {
            self.fire(&batch.execution_id, verb)?;
        }

        self.run()?;
        Ok(self.outcome)
    }

    /// Model-internal occurrence of an ACTIVE milestone.
    pub fn signal_milestone(mut self, execution_id: &str) -> EngineResult<CommitOutcome> {
        let node = self.tree.require(execution_id)?;
        if node.activity_type != ActivityType::Milestone {
            return Err(EngineError::NotAllowed(format!(
                "Case execution '{}' is a {}, not a milestone",
                execution_id, node.activity_type
            )));
        }
        if !node.is_active() {
            return Err(state_guard(&[ExecutionState::Active], "occur"));
        }
        self.finish_node(execution_id, ExecutionState::Completed, 0)?;
        self.run()?;
        Ok(self.outcome)
    }

    /// Complete a process/case task whose embedded instance has completed.
    pub fn complete_embedded(mut self, execution_id: &str) -> EngineResult<CommitOutcome> {
        let node = self.tree.require(execution_id)?;
        if !node.activity_type.spawns_instance() {
            return Err(EngineError::NotAllowed(format!(
                "Case execution '{}' is a {} and has no embedded instance",
                execution_id, node.activity_type
            )));
        }
        if !node.is_active() {
            return Err(state_guard(&[ExecutionState::Active], LifecycleVerb::Complete));
        }
        self.finish_node(execution_id, ExecutionState::Completed, 0)?;
        self.run()?;
        Ok(self.outcome)
    }

    fn apply_variable(&mut self, execution_id: &str, op: &VariableOp) {
        match op {
            VariableOp::Set { name, value } => self.tree.set_variable(name, value.clone()),
            VariableOp::SetLocal { name, value } => {
                self.tree.set_variable_local(execution_id, name, value.clone())
            }
            VariableOp::Remove { name } => {
                self.tree.remove_variable(name);
            }
            VariableOp::RemoveLocal { name } => {
                self.tree.remove_variable_local(execution_id, name);
            }
        }
    }

    fn fire(&mut self, execution_id: &str, verb: LifecycleVerb) -> EngineResult<()> {
        let node = self.tree.require(execution_id)?.clone();
        let target = self.table.check(&node, verb)?;

        match (verb, target) {
            (LifecycleVerb::ManualStart, Some(to)) => {
                self.set_state(execution_id, to)?;
                self.queue.push_back(Work::Activated(execution_id.to_string()));
            }
            (LifecycleVerb::Disable, Some(to)) => {
                self.set_state(execution_id, to)?;
                if let Some(parent_id) = node.parent_id {
                    self.queue.push_back(Work::Evaluate {
                        container_id: parent_id,
                        depth: 0,
                    });
                }
            }
            (LifecycleVerb::Reenable, Some(to)) => {
                self.set_state(execution_id, to)?;
            }
            (LifecycleVerb::Complete, Some(_)) => {
                if node.activity_type.spawns_instance() {
                    return Err(EngineError::NotAllowed(format!(
                        "Cannot complete case execution '{}': its embedded {} instance is still running",
                        execution_id,
                        embedded_kind(node.activity_type)
                    )));
                }
                if node.activity_type.is_container() {
                    CompletionEvaluator::check_manual_completion(self.tree, execution_id)?;
                }
                self.finish_node(execution_id, ExecutionState::Completed, 0)?;
            }
            (LifecycleVerb::Terminate, Some(_)) => {
                self.finish_node(execution_id, ExecutionState::Terminated, 0)?;
            }
            (LifecycleVerb::Close, None) => {
                info!(
                    case_instance_id = %self.tree.case_instance_id,
                    state = %node.state,
                    "Closing case instance"
                );
                self.outcome.closed = true;
            }
            (verb, target) => {
                return Err(EngineError::Internal(format!(
                    "inconsistent transition table entry for {} {:?}",
                    verb, target
                )));
            }
        }
        Ok(())
    }

    fn run(&mut self) -> EngineResult<()> {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Trigger(id) => self.trigger(&id)?,
                Work::Activated(id) => self.activated(&id)?,
                Work::Evaluate {
                    container_id,
                    depth,
                } => self.evaluate(&container_id, depth)?,
            }
        }
        Ok(())
    }

    fn trigger(&mut self, execution_id: &str) -> EngineResult<()> {
        let Some(node) = self.tree.node(execution_id) else {
            return Ok(());
        };
        if node.state != ExecutionState::Available {
            return Ok(());
        }
        if node.manual_activation_required {
            self.set_state(execution_id, ExecutionState::Enabled)
        } else {
            self.set_state(execution_id, ExecutionState::Active)?;
            self.queue.push_back(Work::Activated(execution_id.to_string()));
            Ok(())
        }
    }

    fn activated(&mut self, execution_id: &str) -> EngineResult<()> {
        let Some(node) = self.tree.node(execution_id) else {
            return Ok(());
        };
        if !node.is_active() {
            return Ok(());
        }
        let node = node.clone();
        let item = self.plan_item(&node.activity_id)?;

        match node.activity_type {
            ActivityType::CasePlanModel | ActivityType::Stage => {
                for child in &item.children {
                    let child_node = ExecutionNode::for_plan_item(
                        Uuid::new_v4().to_string(),
                        &node.case_instance_id,
                        Some(node.id.clone()),
                        child,
                    );
                    let child_id = child_node.id.clone();
                    self.tree.insert_child(&node.id, child_node)?;
                    debug!(
                        case_instance_id = %node.case_instance_id,
                        execution_id = %child_id,
                        activity_id = %child.id,
                        parent_id = %node.id,
                        "Created case execution"
                    );
                    self.queue.push_back(Work::Trigger(child_id));
                }
                self.queue.push_back(Work::Evaluate {
                    container_id: node.id.clone(),
                    depth: 0,
                });
            }
            ActivityType::HumanTask => {
                let task = UserTask {
                    id: Uuid::new_v4().to_string(),
                    name: item.name.clone(),
                    task_definition_key: item.id.clone(),
                    case_execution_id: node.id.clone(),
                    case_instance_id: node.case_instance_id.clone(),
                    created_at: Utc::now(),
                };
                debug!(
                    case_instance_id = %node.case_instance_id,
                    execution_id = %node.id,
                    task_id = %task.id,
                    "Created user task"
                );
                self.tree.add_task(task);
            }
            ActivityType::ProcessTask | ActivityType::CaseTask => {
                let definition_key = item.definition_key.clone().ok_or_else(|| {
                    EngineError::Internal(format!(
                        "{} '{}' has no definition key",
                        node.activity_type, item.id
                    ))
                })?;
                let blocking = item.blocking;
                let variables = self.seed.clone();
                let effect = if node.activity_type == ActivityType::ProcessTask {
                    SideEffect::StartProcessInstance {
                        case_instance_id: node.case_instance_id.clone(),
                        execution_id: node.id.clone(),
                        definition_key,
                        variables,
                        blocking,
                    }
                } else {
                    SideEffect::StartCaseInstance {
                        case_instance_id: node.case_instance_id.clone(),
                        execution_id: node.id.clone(),
                        definition_key,
                        variables,
                        blocking,
                    }
                };
                self.outcome.effects.push(effect);
                if !blocking {
                    self.finish_node(&node.id, ExecutionState::Completed, 0)?;
                }
            }
            ActivityType::Milestone => {}
        }
        Ok(())
    }

    fn evaluate(&mut self, container_id: &str, depth: usize) -> EngineResult<()> {
        let Some(container) = self.tree.node(container_id) else {
            return Ok(());
        };
        let auto_complete = self
            .definition
            .plan_item(&container.activity_id)
            .map(|item| item.auto_complete)
            .unwrap_or(false);

        if self
            .evaluator
            .should_auto_complete(self.tree, container_id, auto_complete)
        {
            let next = self.evaluator.next_depth(depth)?;
            debug!(
                case_instance_id = %self.tree.case_instance_id,
                execution_id = %container_id,
                depth = next,
                "No outstanding children, completing"
            );
            self.finish_node(container_id, ExecutionState::Completed, next)?;
        }
        Ok(())
    }

    /// Move a node to COMPLETED or TERMINATED.
    ///
    /// Remaining children are destroyed. A non-root node is removed and its
    /// parent re-evaluated; the root keeps its terminal state until closed.
    fn finish_node(&mut self, execution_id: &str, to: ExecutionState, depth: usize) -> EngineResult<()> {
        let node = self.tree.require(execution_id)?.clone();

        for child_id in &node.children {
            self.destroy(child_id);
        }

        if node.activity_type == ActivityType::HumanTask {
            self.tree.remove_task_of(execution_id);
        }
        if to == ExecutionState::Terminated
            && node.activity_type.spawns_instance()
            && node.is_active()
        {
            self.outcome.effects.push(SideEffect::TerminateEmbedded {
                execution_id: node.id.clone(),
            });
        }

        self.set_state(execution_id, to)?;

        match node.parent_id {
            Some(parent_id) => {
                self.tree.remove_subtree(execution_id);
                self.queue.push_back(Work::Evaluate {
                    container_id: parent_id,
                    depth,
                });
            }
            None => {
                info!(
                    case_instance_id = %node.id,
                    state = %to,
                    "Case instance finished"
                );
                if to == ExecutionState::Completed {
                    self.outcome.effects.push(SideEffect::CaseInstanceCompleted {
                        case_instance_id: node.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove a subtree, terminating embedded instances of running tasks in it.
    fn destroy(&mut self, execution_id: &str) {
        for removed in self.tree.remove_subtree(execution_id) {
            if removed.activity_type.spawns_instance() && removed.is_active() {
                self.outcome.effects.push(SideEffect::TerminateEmbedded {
                    execution_id: removed.id.clone(),
                });
            }
            debug!(
                case_instance_id = %removed.case_instance_id,
                execution_id = %removed.id,
                activity_id = %removed.activity_id,
                from = %removed.state,
                "Removed case execution"
            );
        }
    }

    fn set_state(&mut self, execution_id: &str, to: ExecutionState) -> EngineResult<()> {
        let node = self.tree.require_mut(execution_id)?;
        let from = node.state;
        node.state = to;
        debug!(
            case_instance_id = %node.case_instance_id,
            execution_id = %node.id,
            activity_id = %node.activity_id,
            from = %from,
            to = %to,
            "Case execution transition"
        );
        Ok(())
    }

    fn plan_item(&self, activity_id: &str) -> EngineResult<&'a PlanItemDefinition> {
        self.definition.plan_item(activity_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "activity '{}' not found in case definition '{}'",
                activity_id, self.definition.id
            ))
        })
    }
}

fn embedded_kind(activity_type: ActivityType) -> &'static str {
    match activity_type {
        ActivityType::CaseTask => "case",
        _ => "process",
    }
}
