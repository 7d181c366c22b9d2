//! Embedded instance coordination.
//!
//! Process tasks start instances on an external [`ProcessRuntime`]; case
//! tasks start case instances on this engine. Both are correlated with the
//! task execution through an [`EmbeddedLink`] kept in the store, so a
//! completion callback only needs the embedded instance id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{EmbeddedKind, EmbeddedLink, ExecutionStore};
use crate::error::{EngineError, EngineResult};

/// Instance factory for embedded process instances.
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Start a process instance and return its id.
    async fn start_process_instance(
        &self,
        definition_key: &str,
        variables: BTreeMap<String, serde_json::Value>,
        parent_execution_id: &str,
    ) -> EngineResult<String>;

    async fn terminate_process_instance(&self, process_instance_id: &str) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessInstanceState {
    Running,
    Completed,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: String,
    pub definition_key: String,
    pub variables: BTreeMap<String, serde_json::Value>,
    pub super_case_execution_id: String,
    pub state: ProcessInstanceState,
}

/// Process runtime that only records instances.
///
/// Hosts and tests finish an instance with [`InMemoryProcessRuntime::complete`]
/// and then report it through `CaseService::on_embedded_instance_completed`.
#[derive(Default)]
pub struct InMemoryProcessRuntime {
    instances: RwLock<HashMap<String, ProcessInstance>>,
}

impl InMemoryProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, process_instance_id: &str) -> Option<ProcessInstance> {
        self.instances.read().await.get(process_instance_id).cloned()
    }

    /// Instance started by the given case execution.
    pub async fn find_by_super_case_execution(&self, case_execution_id: &str) -> Option<ProcessInstance> {
        self.instances
            .read()
            .await
            .values()
            .find(|p| p.super_case_execution_id == case_execution_id)
            .cloned()
    }

    /// Mark a running instance completed.
    pub async fn complete(&self, process_instance_id: &str) -> EngineResult<()> {
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(process_instance_id).ok_or_else(|| {
            EngineError::NotFound(format!(
                "Cannot find process instance with id '{}'",
                process_instance_id
            ))
        })?;
        if instance.state != ProcessInstanceState::Running {
            return Err(EngineError::NotAllowed(format!(
                "Process instance '{}' is not running",
                process_instance_id
            )));
        }
        instance.state = ProcessInstanceState::Completed;
        Ok(())
    }
}

#[async_trait]
impl ProcessRuntime for InMemoryProcessRuntime {
    async fn start_process_instance(
        &self,
        definition_key: &str,
        variables: BTreeMap<String, serde_json::Value>,
        parent_execution_id: &str,
    ) -> EngineResult<String> {
        let instance = ProcessInstance {
            id: Uuid::new_v4().to_string(),
            definition_key: definition_key.to_string(),
            variables,
            super_case_execution_id: parent_execution_id.to_string(),
            state: ProcessInstanceState::Running,
        };
        let id = instance.id.clone();
        self.instances.write().await.insert(id.clone(), instance);
        Ok(id)
    }

    async fn terminate_process_instance(&self, process_instance_id: &str) -> EngineResult<()> {
        if let Some(instance) = self.instances.write().await.get_mut(process_instance_id) {
            instance.state = ProcessInstanceState::Terminated;
        }
        Ok(())
    }
}

/// Bridges process and case tasks to their embedded instances.
#[derive(Clone)]
pub struct SubInstanceCoordinator {
    store: Arc<dyn ExecutionStore>,
    runtime: Arc<dyn ProcessRuntime>,
}

impl SubInstanceCoordinator {
    pub fn new(store: Arc<dyn ExecutionStore>, runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Start a process instance for a process task.
    ///
    /// Only blocking tasks are linked afterwards, so the completion callback
    /// can find them; see [`SubInstanceCoordinator::link`].
    pub async fn start_process(
        &self,
        case_instance_id: &str,
        execution_id: &str,
        definition_key: &str,
        variables: BTreeMap<String, serde_json::Value>,
    ) -> EngineResult<String> {
        let process_instance_id = self
            .runtime
            .start_process_instance(definition_key, variables, execution_id)
            .await
            .map_err(|e| match e {
                EngineError::ExternalService(_) => e,
                other => EngineError::ExternalService(other.to_string()),
            })?;

        info!(
            case_instance_id = %case_instance_id,
            execution_id = %execution_id,
            process_instance_id = %process_instance_id,
            definition_key = %definition_key,
            "Started embedded process instance"
        );
        Ok(process_instance_id)
    }

    /// Terminate a process instance started by a command that failed.
    pub async fn abort_process(&self, process_instance_id: &str) -> EngineResult<()> {
        self.runtime
            .terminate_process_instance(process_instance_id)
            .await?;
        info!(
            process_instance_id = %process_instance_id,
            "Aborted embedded process instance"
        );
        Ok(())
    }

    /// Record the back-reference of an embedded instance.
    pub async fn link(
        &self,
        embedded_instance_id: &str,
        kind: EmbeddedKind,
        parent_execution_id: &str,
        parent_case_instance_id: &str,
    ) -> EngineResult<()> {
        self.store
            .save_link(EmbeddedLink {
                embedded_instance_id: embedded_instance_id.to_string(),
                kind,
                parent_execution_id: parent_execution_id.to_string(),
                parent_case_instance_id: parent_case_instance_id.to_string(),
            })
            .await
    }

    /// Task execution waiting for the given embedded instance.
    pub async fn resolve(&self, embedded_instance_id: &str) -> EngineResult<Option<EmbeddedLink>> {
        self.store.find_link_by_embedded(embedded_instance_id).await
    }

    /// Drop the link once the owning task has been completed.
    pub async fn release(&self, embedded_instance_id: &str) -> EngineResult<()> {
        self.store.delete_link(embedded_instance_id).await
    }

    /// Detach the embedded instance of a terminated task execution.
    ///
    /// Process instances are terminated right away. Case links are returned
    /// so the caller can terminate the case instance on its own tree.
    pub async fn terminate_for(&self, parent_execution_id: &str) -> EngineResult<Option<EmbeddedLink>> {
        let Some(link) = self.store.find_link_by_parent(parent_execution_id).await? else {
            debug!(execution_id = %parent_execution_id, "No embedded instance to terminate");
            return Ok(None);
        };
        self.store.delete_link(&link.embedded_instance_id).await?;

        if link.kind == EmbeddedKind::Process {
            self.runtime
                .terminate_process_instance(&link.embedded_instance_id)
                .await?;
            info!(
                execution_id = %parent_execution_id,
                process_instance_id = %link.embedded_instance_id,
                "Terminated embedded process instance"
            );
        }
        Ok(Some(link))
    }
}
