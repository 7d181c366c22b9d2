//! Compiled case definition types.
//!
//! A case definition is the immutable, already-compiled case model the
//! engine instantiates. Only the attributes the execution core needs are
//! kept: the plan item tree, activation flags and references to the
//! process/case definitions that tasks spawn.

use serde::{Deserialize, Serialize};

use crate::engine::state::ActivityType;

/// A deployed (or deployable) case definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Unique id, assigned on deployment.
    #[serde(default)]
    pub id: String,

    /// Definition key shared by all versions.
    pub key: String,

    /// Version within the key, assigned on deployment.
    #[serde(default)]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Root plan item; always of type `case_plan_model`.
    pub case_plan_model: PlanItemDefinition,
}

impl CaseDefinition {
    /// Look up a plan item anywhere in the definition by activity id.
    pub fn plan_item(&self, activity_id: &str) -> Option<&PlanItemDefinition> {
        self.case_plan_model.find(activity_id)
    }

    /// Number of plan items including the case plan model.
    pub fn plan_item_count(&self) -> usize {
        self.case_plan_model.count()
    }
}

/// One plan item of a case model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    /// Activity id, unique within the definition (e.g. "PI_HumanTask_1").
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub activity_type: ActivityType,

    /// Execution waits in ENABLED until started manually.
    #[serde(default)]
    pub manual_activation_required: bool,

    /// Counted by the auto-complete rule of the parent.
    #[serde(default)]
    pub required: bool,

    /// Stages / case plan model: complete once only required children remain open.
    #[serde(default)]
    pub auto_complete: bool,

    /// Process / case tasks: wait for the embedded instance before completing.
    #[serde(default = "default_true")]
    pub blocking: bool,

    /// Process / case tasks: key of the definition to instantiate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_key: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanItemDefinition>,
}

fn default_true() -> bool {
    true
}

impl PlanItemDefinition {
    /// Create a plan item with default flags.
    pub fn new(id: impl Into<String>, activity_type: ActivityType) -> Self {
        Self {
            id: id.into(),
            name: None,
            activity_type,
            manual_activation_required: false,
            required: false,
            auto_complete: false,
            blocking: true,
            definition_key: None,
            children: Vec::new(),
        }
    }

    /// Depth-first search for `activity_id` in this subtree.
    pub fn find(&self, activity_id: &str) -> Option<&PlanItemDefinition> {
        if self.id == activity_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(activity_id))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(|c| c.count()).sum::<usize>()
    }

    /// Set manual activation.
    pub fn with_manual_activation(mut self) -> Self {
        self.manual_activation_required = true;
        self
    }

    /// Mark as required.
    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the referenced process/case definition key.
    pub fn with_definition_key(mut self, key: impl Into<String>) -> Self {
        self.definition_key = Some(key.into());
        self
    }

    /// Add a child plan item.
    pub fn with_child(mut self, child: PlanItemDefinition) -> Self {
        self.children.push(child);
        self
    }
}
