//! Completion rules for stages and the case plan model.
//!
//! Decides whether a container may (auto-)complete given the states of its
//! children. The upward cascade itself is driven by the command executor,
//! which re-submits the parent after every completion and asks
//! [`CompletionEvaluator::next_depth`] to bound the chain.

use crate::engine::state::ExecutionState;
use crate::engine::tree::{ExecutionNode, ExecutionTree};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct CompletionEvaluator {
    max_cascade_depth: usize,
}

impl CompletionEvaluator {
    pub fn new(max_cascade_depth: usize) -> Self {
        Self { max_cascade_depth }
    }

    /// Whether `child` still holds up an automatic completion of its parent.
    pub fn is_outstanding(child: &ExecutionNode, auto_complete: bool) -> bool {
        match child.state {
            ExecutionState::Available | ExecutionState::Active | ExecutionState::Suspended => true,
            ExecutionState::Enabled => !auto_complete || child.required,
            ExecutionState::Disabled | ExecutionState::Completed | ExecutionState::Terminated => {
                false
            }
        }
    }

    /// Whether the ACTIVE container `container_id` should complete on its own.
    pub fn should_auto_complete(
        &self,
        tree: &ExecutionTree,
        container_id: &str,
        auto_complete: bool,
    ) -> bool {
        let Some(container) = tree.node(container_id) else {
            return false;
        };
        if !container.activity_type.is_container() || !container.is_active() {
            return false;
        }
        !tree
            .children(container_id)
            .into_iter()
            .any(|child| Self::is_outstanding(child, auto_complete))
    }

    /// Guard for an explicit `complete` of a container.
    ///
    /// Every AVAILABLE/ACTIVE child blocks; an ENABLED child blocks only
    /// if it is required.
    pub fn check_manual_completion(tree: &ExecutionTree, container_id: &str) -> EngineResult<()> {
        for child in tree.children(container_id) {
            let blocking = match child.state {
                ExecutionState::Available | ExecutionState::Active | ExecutionState::Suspended => {
                    true
                }
                ExecutionState::Enabled => child.required,
                _ => false,
            };
            if blocking {
                return Err(EngineError::NotAllowed(format!(
                    "Cannot complete case execution '{}': child case execution '{}' is in state '{}'",
                    container_id, child.id, child.state
                )));
            }
        }
        Ok(())
    }

    /// Depth of the next cascade hop, failing once the bound is exceeded.
    pub fn next_depth(&self, depth: usize) -> EngineResult<usize> {
        let next = depth + 1;
        if next > self.max_cascade_depth {
            return Err(EngineError::Internal(format!(
                "completion cascade exceeded the maximum depth of {}",
                self.max_cascade_depth
            )));
        }
        Ok(next)
    }
}
