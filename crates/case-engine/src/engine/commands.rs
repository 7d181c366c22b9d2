//! Command batches.
//!
//! A batch bundles variable operations and at most one lifecycle verb for
//! one target execution. It is validated as a whole before anything is
//! applied.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::engine::state::LifecycleVerb;
use crate::error::{EngineError, EngineResult};

/// One pending variable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VariableOp {
    Set { name: String, value: serde_json::Value },
    SetLocal { name: String, value: serde_json::Value },
    Remove { name: String },
    RemoveLocal { name: String },
}

impl VariableOp {
    pub fn name(&self) -> &str {
        match self {
            VariableOp::Set { name, .. }
            | VariableOp::SetLocal { name, .. }
            | VariableOp::Remove { name }
            | VariableOp::RemoveLocal { name } => name,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, VariableOp::Set { .. } | VariableOp::SetLocal { .. })
    }
}

/// Operations against one case execution, applied as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub execution_id: String,
    pub operations: Vec<VariableOp>,
    pub verb: Option<LifecycleVerb>,
}

impl CommandBatch {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            operations: Vec::new(),
            verb: None,
        }
    }

    pub fn with_verb(mut self, verb: LifecycleVerb) -> Self {
        self.verb = Some(verb);
        self
    }

    pub fn push(&mut self, op: VariableOp) {
        self.operations.push(op);
    }

    /// Structural validation: a target id, and no name both set and removed.
    pub fn validate(&self) -> EngineResult<()> {
        if self.execution_id.trim().is_empty() {
            return Err(EngineError::NotValid("caseExecutionId is null".to_string()));
        }

        let mut set_names = HashSet::new();
        let mut removed_names = HashSet::new();
        for op in &self.operations {
            if op.is_set() {
                set_names.insert(op.name());
            } else {
                removed_names.insert(op.name());
            }
        }

        // report in batch order so the message is deterministic
        if let Some(op) = self
            .operations
            .iter()
            .find(|op| set_names.contains(op.name()) && removed_names.contains(op.name()))
        {
            return Err(EngineError::NotValid(format!(
                "Cannot set and remove a variable with the same variable name: '{}' within a command.",
                op.name()
            )));
        }

        Ok(())
    }

    /// Every value set by the batch, local or not, later writes winning.
    /// Sub-instances started by the batch are seeded with these.
    pub fn seed_variables(&self) -> BTreeMap<String, serde_json::Value> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                VariableOp::Set { name, value } | VariableOp::SetLocal { name, value } => {
                    Some((name.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }
}
