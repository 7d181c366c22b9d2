//! Cross-tree side effects produced by a commit.
//!
//! The executor only ever mutates one tree. Anything that touches another
//! instance is queued here and carried out by the service after the tree
//! has been saved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    /// A process task became ACTIVE.
    StartProcessInstance {
        case_instance_id: String,
        execution_id: String,
        definition_key: String,
        variables: BTreeMap<String, serde_json::Value>,
        /// Blocking tasks wait for the completion callback.
        blocking: bool,
    },
    /// A case task became ACTIVE.
    StartCaseInstance {
        case_instance_id: String,
        execution_id: String,
        definition_key: String,
        variables: BTreeMap<String, serde_json::Value>,
        blocking: bool,
    },
    /// A process or case task was terminated while its instance was running.
    TerminateEmbedded { execution_id: String },
    /// The case instance root reached COMPLETED.
    CaseInstanceCompleted { case_instance_id: String },
}
