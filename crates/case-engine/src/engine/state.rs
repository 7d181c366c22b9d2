//! Shared vocabulary of the case execution state machine.
//!
//! States, activity types and lifecycle verbs. All three render in the
//! lower-case form used by guard messages ("must be in state 'active'").

use serde::{Deserialize, Serialize};

/// Lifecycle state of a case execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, waiting for its lifecycle to be triggered.
    Available,
    /// Waiting for a manual start.
    Enabled,
    /// Manually switched off before activation.
    Disabled,
    /// Running.
    Active,
    /// Suspended case instance. No command verb enters or leaves this state.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Aborted.
    Terminated,
}

impl ExecutionState {
    /// Completed or terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Completed => write!(f, "completed"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown case execution state '{}'", other)),
        }
    }
}

/// Kind of plan item a case execution instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    CasePlanModel,
    Stage,
    HumanTask,
    Milestone,
    ProcessTask,
    CaseTask,
}

impl ActivityType {
    /// Stages and the case plan model own child executions.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::CasePlanModel | Self::Stage)
    }

    /// Process and case tasks bridge to an embedded instance.
    pub fn spawns_instance(&self) -> bool {
        matches!(self, Self::ProcessTask | Self::CaseTask)
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CasePlanModel => write!(f, "case instance"),
            Self::Stage => write!(f, "stage"),
            Self::HumanTask => write!(f, "human task"),
            Self::Milestone => write!(f, "milestone"),
            Self::ProcessTask => write!(f, "process task"),
            Self::CaseTask => write!(f, "case task"),
        }
    }
}

/// Lifecycle verb accepted by the command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleVerb {
    ManualStart,
    Disable,
    Reenable,
    Complete,
    Terminate,
    Close,
}

impl std::fmt::Display for LifecycleVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManualStart => write!(f, "start"),
            Self::Disable => write!(f, "disable"),
            Self::Reenable => write!(f, "re-enable"),
            Self::Complete => write!(f, "complete"),
            Self::Terminate => write!(f, "terminate"),
            Self::Close => write!(f, "close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_state_display() {
        assert_eq!(ExecutionState::Active.to_string(), "active");
        assert_eq!(ExecutionState::Enabled.to_string(), "enabled");
        assert_eq!(ExecutionState::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_execution_state_from_str() {
        assert_eq!("ACTIVE".parse::<ExecutionState>(), Ok(ExecutionState::Active));
        assert_eq!(
            "disabled".parse::<ExecutionState>(),
            Ok(ExecutionState::Disabled)
        );
        assert!("running".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionState::Completed.is_terminal());
        assert!(ExecutionState::Terminated.is_terminal());
        assert!(!ExecutionState::Disabled.is_terminal());
    }

    #[test]
    fn test_activity_type_serde() {
        let ty: ActivityType = serde_json::from_str("\"process_task\"").unwrap();
        assert_eq!(ty, ActivityType::ProcessTask);
        assert!(ty.spawns_instance());
        assert!(ActivityType::Stage.is_container());
        assert!(!ActivityType::Milestone.is_container());
    }
}
