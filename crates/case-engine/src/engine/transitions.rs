//! Per-activity-type transition table.
//!
//! A lookup keyed by (activity type, lifecycle verb). Each entry either
//! rejects the verb for that type outright or names the states it may be
//! applied from and the state it leads to.

use std::collections::HashMap;

use crate::engine::state::{ActivityType, ExecutionState, LifecycleVerb};
use crate::engine::tree::ExecutionNode;
use crate::error::{EngineError, EngineResult};

/// Outcome of a table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// The type never supports this verb.
    Rejected,
    /// Legal from any of `from`; `to` is `None` when the verb removes the node.
    Allowed {
        from: &'static [ExecutionState],
        to: Option<ExecutionState>,
    },
}

const ENABLED: &[ExecutionState] = &[ExecutionState::Enabled];
const DISABLED: &[ExecutionState] = &[ExecutionState::Disabled];
const ACTIVE: &[ExecutionState] = &[ExecutionState::Active];
const FINISHED: &[ExecutionState] = &[ExecutionState::Completed, ExecutionState::Terminated];

#[derive(Debug, Clone)]
pub struct TransitionTable {
    rules: HashMap<(ActivityType, LifecycleVerb), Rule>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl TransitionTable {
    /// The CMMN lifecycle for the supported activity types.
    pub fn standard() -> Self {
        use ActivityType::*;
        use LifecycleVerb::*;

        let mut rules = HashMap::new();

        let task_like = [Stage, HumanTask, ProcessTask, CaseTask];
        for ty in task_like {
            rules.insert((ty, ManualStart), allowed(ENABLED, ExecutionState::Active));
            rules.insert((ty, Disable), allowed(ENABLED, ExecutionState::Disabled));
            rules.insert((ty, Reenable), allowed(DISABLED, ExecutionState::Enabled));
            rules.insert((ty, Complete), allowed(ACTIVE, ExecutionState::Completed));
            rules.insert((ty, Terminate), allowed(ACTIVE, ExecutionState::Terminated));
            rules.insert((ty, Close), Rule::Rejected);
        }

        for verb in [ManualStart, Disable, Reenable] {
            rules.insert((CasePlanModel, verb), Rule::Rejected);
        }
        rules.insert((CasePlanModel, Complete), allowed(ACTIVE, ExecutionState::Completed));
        rules.insert((CasePlanModel, Terminate), allowed(ACTIVE, ExecutionState::Terminated));
        rules.insert((CasePlanModel, Close), Rule::Allowed { from: FINISHED, to: None });

        for verb in [ManualStart, Disable, Reenable, Complete, Close] {
            rules.insert((Milestone, verb), Rule::Rejected);
        }
        rules.insert((Milestone, Terminate), allowed(ACTIVE, ExecutionState::Terminated));

        Self { rules }
    }

    pub fn rule(&self, activity_type: ActivityType, verb: LifecycleVerb) -> Rule {
        self.rules
            .get(&(activity_type, verb))
            .copied()
            .unwrap_or(Rule::Rejected)
    }

    /// Check `verb` against the node's type and state.
    ///
    /// Returns the target state, or `None` when the verb removes the node.
    pub fn check(&self, node: &ExecutionNode, verb: LifecycleVerb) -> EngineResult<Option<ExecutionState>> {
        match self.rule(node.activity_type, verb) {
            Rule::Rejected => Err(EngineError::NotAllowed(format!(
                "It is not possible to {} the {} '{}'",
                verb, node.activity_type, node.id
            ))),
            Rule::Allowed { from, to } => {
                if from.contains(&node.state) {
                    Ok(to)
                } else {
                    Err(state_guard(from, verb))
                }
            }
        }
    }
}

fn allowed(from: &'static [ExecutionState], to: ExecutionState) -> Rule {
    Rule::Allowed { from, to: Some(to) }
}

/// "The case execution must be in state '<state>' to <verb>"
pub fn state_guard(required: &[ExecutionState], verb: impl std::fmt::Display) -> EngineError {
    let states = required
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|");
    EngineError::NotAllowed(format!(
        "The case execution must be in state '{}' to {}",
        states, verb
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(activity_type: ActivityType, state: ExecutionState) -> ExecutionNode {
        ExecutionNode {
            id: "exec-1".to_string(),
            case_instance_id: "case-1".to_string(),
            parent_id: Some("case-1".to_string()),
            activity_id: "PI_1".to_string(),
            activity_type,
            manual_activation_required: false,
            required: false,
            state,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_milestone_rejects_everything_but_terminate() {
        let table = TransitionTable::standard();
        let states = [
            ExecutionState::Available,
            ExecutionState::Enabled,
            ExecutionState::Disabled,
            ExecutionState::Active,
        ];
        for state in states {
            let milestone = node(ActivityType::Milestone, state);
            for verb in [
                LifecycleVerb::ManualStart,
                LifecycleVerb::Disable,
                LifecycleVerb::Reenable,
                LifecycleVerb::Complete,
            ] {
                assert!(matches!(
                    table.check(&milestone, verb),
                    Err(EngineError::NotAllowed(_))
                ));
            }
        }
        let active = node(ActivityType::Milestone, ExecutionState::Active);
        assert_eq!(
            table.check(&active, LifecycleVerb::Terminate).unwrap(),
            Some(ExecutionState::Terminated)
        );
    }

    #[test]
    fn test_terminate_requires_active() {
        let table = TransitionTable::standard();
        let enabled = node(ActivityType::HumanTask, ExecutionState::Enabled);
        let err = table.check(&enabled, LifecycleVerb::Terminate).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not allowed: The case execution must be in state 'active' to terminate"
        );
    }

    #[test]
    fn test_disable_twice_is_rejected() {
        let table = TransitionTable::standard();
        let disabled = node(ActivityType::Stage, ExecutionState::Disabled);
        assert!(table.check(&disabled, LifecycleVerb::Disable).is_err());
        assert_eq!(
            table.check(&disabled, LifecycleVerb::Reenable).unwrap(),
            Some(ExecutionState::Enabled)
        );
    }

    #[test]
    fn test_case_instance_rules() {
        let table = TransitionTable::standard();
        let active = node(ActivityType::CasePlanModel, ExecutionState::Active);
        assert!(table.check(&active, LifecycleVerb::Disable).is_err());
        assert!(table.check(&active, LifecycleVerb::Close).is_err());

        let completed = node(ActivityType::CasePlanModel, ExecutionState::Completed);
        assert_eq!(table.check(&completed, LifecycleVerb::Close).unwrap(), None);

        let task = node(ActivityType::HumanTask, ExecutionState::Completed);
        assert_eq!(table.rule(task.activity_type, LifecycleVerb::Close), Rule::Rejected);
    }
}
