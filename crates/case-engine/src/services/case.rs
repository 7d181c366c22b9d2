//! Case service.
//!
//! Entry point for callers: creates case instances, runs command batches
//! against case executions, exposes variables, tasks and queries, and
//! receives completion callbacks of embedded instances.
//!
//! Every command mutates exactly one execution tree. The tree is loaded,
//! changed on a private copy, and saved with the revision it was read at.
//! Work on other instances (starting, terminating or completing embedded
//! instances) is carried out afterwards from a queue of side effects. When
//! any of that work fails, every write of the command is undone.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{EmbeddedKind, EmbeddedLink, ExecutionStore, InMemoryStore};
use crate::engine::commands::{CommandBatch, VariableOp};
use crate::engine::completion::CompletionEvaluator;
use crate::engine::effects::SideEffect;
use crate::engine::executor::{CommandExecutor, CommitOutcome};
use crate::engine::state::{ExecutionState, LifecycleVerb};
use crate::engine::transitions::TransitionTable;
use crate::engine::tree::{ExecutionTree, UserTask};
use crate::error::{EngineError, EngineResult};
use crate::model::{load_dir, parse_definition, CaseDefinition, DefinitionRepository};
use crate::result_ext::{EngineResultExt, OptionResultExt};
use crate::services::coordinator::{ProcessRuntime, SubInstanceCoordinator};
use crate::services::journal::Journal;
use crate::services::query::{
    CaseExecution, CaseExecutionQuery, CaseInstance, CaseInstanceQuery, VariableInstanceQuery,
};

type Variables = BTreeMap<String, serde_json::Value>;

/// Case execution service.
#[derive(Clone)]
pub struct CaseService {
    store: Arc<dyn ExecutionStore>,
    definitions: DefinitionRepository,
    coordinator: SubInstanceCoordinator,
    table: Arc<TransitionTable>,
    config: Arc<EngineConfig>,
}

impl CaseService {
    /// Create a new case service.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ExecutionStore>,
        runtime: Arc<dyn ProcessRuntime>,
    ) -> Self {
        Self {
            coordinator: SubInstanceCoordinator::new(store.clone(), runtime),
            store,
            definitions: DefinitionRepository::new(),
            table: Arc::new(TransitionTable::standard()),
            config: Arc::new(config),
        }
    }

    /// Case service over an [`InMemoryStore`].
    pub fn in_memory(config: EngineConfig, runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self::new(config, Arc::new(InMemoryStore::new()), runtime)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &DefinitionRepository {
        &self.definitions
    }

    fn evaluator(&self) -> CompletionEvaluator {
        CompletionEvaluator::new(self.config.max_cascade_depth)
    }

    // Deployment

    pub async fn deploy(&self, definition: CaseDefinition) -> EngineResult<Arc<CaseDefinition>> {
        self.definitions.deploy(definition).await
    }

    /// Parse, validate and deploy a YAML definition.
    pub async fn deploy_yaml(&self, yaml: &str) -> EngineResult<Arc<CaseDefinition>> {
        self.deploy(parse_definition(yaml)?).await
    }

    /// Deploy every definition found in `EngineConfig::definitions_dir`.
    pub async fn deploy_from_config(&self) -> EngineResult<Vec<Arc<CaseDefinition>>> {
        let Some(dir) = self.config.definitions_dir.as_ref() else {
            return Ok(Vec::new());
        };
        let mut deployed = Vec::new();
        for definition in load_dir(dir).log_rejection("loading case definitions")? {
            deployed.push(self.deploy(definition).await?);
        }
        info!(
            dir = %dir.display(),
            count = deployed.len(),
            "Deployed case definitions from directory"
        );
        Ok(deployed)
    }

    // Builders

    /// Start a creation builder for a definition id.
    pub fn with_case_definition(&self, case_definition_id: impl Into<String>) -> CaseInstanceBuilder {
        CaseInstanceBuilder::new(self.clone(), DefinitionRef::Id(case_definition_id.into()))
    }

    /// Start a creation builder for the latest version of a definition key.
    pub fn with_case_definition_by_key(&self, key: impl Into<String>) -> CaseInstanceBuilder {
        CaseInstanceBuilder::new(self.clone(), DefinitionRef::Key(key.into()))
    }

    /// Start a command builder for a case execution.
    pub fn with_case_execution(&self, case_execution_id: impl Into<String>) -> CaseExecutionCommandBuilder {
        CaseExecutionCommandBuilder {
            service: self.clone(),
            batch: CommandBatch::new(case_execution_id),
        }
    }

    // Lifecycle verbs

    pub async fn manual_start_case_execution(&self, case_execution_id: &str, variables: Variables) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variables(variables)
            .manual_start()
            .await
    }

    pub async fn disable_case_execution(&self, case_execution_id: &str) -> EngineResult<()> {
        self.with_case_execution(case_execution_id).disable().await
    }

    pub async fn reenable_case_execution(&self, case_execution_id: &str) -> EngineResult<()> {
        self.with_case_execution(case_execution_id).reenable().await
    }

    pub async fn complete_case_execution(&self, case_execution_id: &str, variables: Variables) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variables(variables)
            .complete()
            .await
    }

    pub async fn terminate_case_execution(&self, case_execution_id: &str) -> EngineResult<()> {
        self.with_case_execution(case_execution_id).terminate().await
    }

    pub async fn close_case_instance(&self, case_instance_id: &str) -> EngineResult<()> {
        self.with_case_execution(case_instance_id).close().await
    }

    /// Model-internal occurrence of a milestone.
    pub async fn signal_milestone(&self, case_execution_id: &str) -> EngineResult<()> {
        let mut journal = Journal::default();
        let result = async {
            let tree = self.tree_of_execution(case_execution_id).await?;
            let outcome = self
                .apply(tree, &mut journal, |executor| {
                    executor.signal_milestone(case_execution_id)
                })
                .await?;
            self.process_effects(outcome.effects, &mut journal).await
        }
        .await;
        self.settle(result, journal)
            .await
            .log_rejection(format!("signaling milestone '{}'", case_execution_id))
    }

    /// Completion callback for an embedded process or case instance.
    pub async fn on_embedded_instance_completed(&self, embedded_instance_id: &str) -> EngineResult<()> {
        let mut journal = Journal::default();
        let result = async {
            if embedded_instance_id.trim().is_empty() {
                return Err(EngineError::NotValid("embeddedInstanceId is null".to_string()));
            }
            let link = self
                .coordinator
                .resolve(embedded_instance_id)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "No case execution is waiting for embedded instance '{}'",
                        embedded_instance_id
                    ))
                })?;
            let effects = self.complete_parent(&link, &mut journal).await?;
            self.process_effects(effects, &mut journal).await
        }
        .await;
        self.settle(result, journal)
            .await
            .log_rejection(format!("completing embedded instance '{}'", embedded_instance_id))
    }

    // Tasks

    /// User tasks of a case instance.
    pub async fn find_tasks(&self, case_instance_id: &str) -> EngineResult<Vec<UserTask>> {
        Ok(self
            .store
            .load_tree(case_instance_id)
            .await?
            .map(|tree| tree.tasks().into_iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Complete a user task, and with it the owning case execution.
    pub async fn complete_task(&self, task_id: &str, variables: Variables) -> EngineResult<()> {
        async {
            if task_id.trim().is_empty() {
                return Err(EngineError::NotValid("taskId is null".to_string()));
            }
            let not_found = || EngineError::NotFound(format!("Cannot find task with id '{}'", task_id));
            let tree = self
                .store
                .find_tree_of_task(task_id)
                .await?
                .ok_or_else(not_found)?;
            let execution_id = tree
                .task(task_id)
                .map(|task| task.case_execution_id.clone())
                .ok_or_else(not_found)?;

            let mut batch = CommandBatch::new(execution_id).with_verb(LifecycleVerb::Complete);
            for (name, value) in variables {
                batch.push(VariableOp::Set { name, value });
            }
            self.execute_batch(batch).await
        }
        .await
        .log_rejection(format!("completing task '{}'", task_id))
    }

    // Variables

    /// Variables visible from an execution.
    pub async fn get_variables(&self, case_execution_id: &str) -> EngineResult<Variables> {
        let tree = self.tree_of_execution(case_execution_id).await?;
        Ok(tree.variables(case_execution_id))
    }

    pub async fn get_variables_local(&self, case_execution_id: &str) -> EngineResult<Variables> {
        let tree = self.tree_of_execution(case_execution_id).await?;
        Ok(tree.variables_local(case_execution_id))
    }

    pub async fn get_variables_by_names(&self, case_execution_id: &str, names: &[&str]) -> EngineResult<Variables> {
        let mut variables = self.get_variables(case_execution_id).await?;
        variables.retain(|name, _| names.contains(&name.as_str()));
        Ok(variables)
    }

    pub async fn get_variables_local_by_names(&self, case_execution_id: &str, names: &[&str]) -> EngineResult<Variables> {
        let mut variables = self.get_variables_local(case_execution_id).await?;
        variables.retain(|name, _| names.contains(&name.as_str()));
        Ok(variables)
    }

    pub async fn get_variable(&self, case_execution_id: &str, name: &str) -> EngineResult<Option<serde_json::Value>> {
        let tree = self.tree_of_execution(case_execution_id).await?;
        Ok(tree.get_variable(case_execution_id, name).cloned())
    }

    pub async fn get_variable_local(&self, case_execution_id: &str, name: &str) -> EngineResult<Option<serde_json::Value>> {
        let tree = self.tree_of_execution(case_execution_id).await?;
        Ok(tree.get_variable_local(case_execution_id, name).cloned())
    }

    pub async fn set_variable(
        &self,
        case_execution_id: &str,
        name: &str,
        value: impl Into<serde_json::Value>,
    ) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variable(name, value)
            .execute()
            .await
    }

    pub async fn set_variables(&self, case_execution_id: &str, variables: Variables) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variables(variables)
            .execute()
            .await
    }

    pub async fn set_variable_local(
        &self,
        case_execution_id: &str,
        name: &str,
        value: impl Into<serde_json::Value>,
    ) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variable_local(name, value)
            .execute()
            .await
    }

    pub async fn set_variables_local(&self, case_execution_id: &str, variables: Variables) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .set_variables_local(variables)
            .execute()
            .await
    }

    pub async fn remove_variable(&self, case_execution_id: &str, name: &str) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .remove_variable(name)
            .execute()
            .await
    }

    pub async fn remove_variables(&self, case_execution_id: &str, names: &[&str]) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .remove_variables(names.iter().copied())
            .execute()
            .await
    }

    pub async fn remove_variable_local(&self, case_execution_id: &str, name: &str) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .remove_variable_local(name)
            .execute()
            .await
    }

    pub async fn remove_variables_local(&self, case_execution_id: &str, names: &[&str]) -> EngineResult<()> {
        self.with_case_execution(case_execution_id)
            .remove_variables_local(names.iter().copied())
            .execute()
            .await
    }

    // Queries

    pub fn create_case_execution_query(&self) -> CaseExecutionQuery {
        CaseExecutionQuery::new(self.store.clone())
    }

    pub fn create_case_instance_query(&self) -> CaseInstanceQuery {
        CaseInstanceQuery::new(self.store.clone())
    }

    pub fn create_variable_instance_query(&self) -> VariableInstanceQuery {
        VariableInstanceQuery::new(self.store.clone())
    }

    pub async fn find_executions_by_activity(
        &self,
        case_instance_id: &str,
        activity_id: &str,
    ) -> EngineResult<Vec<CaseExecution>> {
        self.create_case_execution_query()
            .case_instance_id(case_instance_id)
            .activity_id(activity_id)
            .list()
            .await
    }

    /// A live or finished (but not closed) case instance.
    pub async fn find_case_instance(&self, case_instance_id: &str) -> EngineResult<Option<CaseInstance>> {
        Ok(self
            .store
            .load_tree(case_instance_id)
            .await?
            .map(|tree| CaseInstance::from_tree(&tree)))
    }

    /// Case instance carrying `business_key`; more than one is NotValid.
    pub async fn find_case_instance_by_business_key(
        &self,
        business_key: &str,
    ) -> EngineResult<Option<CaseInstance>> {
        self.create_case_instance_query()
            .business_key(business_key)
            .single_result()
            .await
    }

    pub async fn find_case_instances_by_definition_key(
        &self,
        case_definition_key: &str,
    ) -> EngineResult<Vec<CaseInstance>> {
        self.create_case_instance_query()
            .case_definition_key(case_definition_key)
            .list()
            .await
    }

    // Internals

    async fn tree_of_execution(&self, case_execution_id: &str) -> EngineResult<ExecutionTree> {
        if case_execution_id.trim().is_empty() {
            return Err(EngineError::NotValid("caseExecutionId is null".to_string()));
        }
        self.store
            .find_tree_of_execution(case_execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Cannot find case execution with id '{}'",
                    case_execution_id
                ))
            })
    }

    /// Validate, apply and persist one batch, then run its side effects.
    async fn execute_batch(&self, batch: CommandBatch) -> EngineResult<()> {
        batch.validate()?;
        let mut journal = Journal::default();
        let result = async {
            let tree = self.tree_of_execution(&batch.execution_id).await?;
            let outcome = self
                .apply(tree, &mut journal, |executor| executor.commit(&batch))
                .await?;
            info!(
                case_execution_id = %batch.execution_id,
                verb = ?batch.verb,
                operations = batch.operations.len(),
                effects = outcome.effects.len(),
                "Committed case execution command"
            );
            self.process_effects(outcome.effects, &mut journal).await
        }
        .await;
        self.settle(result, journal).await
    }

    /// Undo the writes of a failed command.
    async fn settle<T>(&self, result: EngineResult<T>, journal: Journal) -> EngineResult<T> {
        if result.is_err() && !journal.is_empty() {
            journal.rollback(self.store.as_ref(), &self.coordinator).await;
        }
        result
    }

    /// Every case task about to start must name a deployed definition.
    async fn check_case_tasks(&self, effects: &[SideEffect]) -> EngineResult<()> {
        for effect in effects {
            if let SideEffect::StartCaseInstance { definition_key, .. } = effect {
                self.definitions.find_latest_by_key(definition_key).await?;
            }
        }
        Ok(())
    }

    /// Run the executor on `tree` and persist the result at the revision
    /// the tree was read at.
    async fn apply<F>(
        &self,
        mut tree: ExecutionTree,
        journal: &mut Journal,
        run: F,
    ) -> EngineResult<CommitOutcome>
    where
        F: FnOnce(CommandExecutor<'_>) -> EngineResult<CommitOutcome> + Send,
    {
        let definition = self.definitions.find_by_id(&tree.case_definition_id).await?;
        let before = tree.clone();
        let expected_revision = tree.revision;

        let outcome = run(CommandExecutor::new(
            &mut tree,
            &definition,
            &self.table,
            self.evaluator(),
        ))?;
        self.check_case_tasks(&outcome.effects).await?;

        if outcome.closed {
            self.store
                .delete_tree(&tree.case_instance_id, expected_revision)
                .await?;
            journal.tree_deleted(before);
        } else {
            let case_instance_id = tree.case_instance_id.clone();
            let revision = self.store.save_tree(tree, expected_revision).await?;
            journal.tree_saved(&case_instance_id, Some(before), revision);
        }
        Ok(outcome)
    }

    /// Create and persist a case instance. Side effects are returned, not run.
    async fn instantiate(
        &self,
        definition: Arc<CaseDefinition>,
        business_key: Option<String>,
        variables: Variables,
        super_execution_id: Option<String>,
        journal: &mut Journal,
    ) -> EngineResult<(String, Vec<SideEffect>)> {
        if let Some(key) = business_key.as_ref() {
            if self.config.enforce_business_key_uniqueness {
                let taken = self
                    .create_case_instance_query()
                    .case_definition_key(definition.key.clone())
                    .business_key(key.clone())
                    .active()
                    .count()
                    .await?
                    > 0;
                if taken {
                    return Err(EngineError::NotValid(format!(
                        "Business key '{}' is already used by a case instance of '{}'",
                        key, definition.key
                    )));
                }
            }
        }

        let case_instance_id = Uuid::new_v4().to_string();
        let mut tree = ExecutionTree::new(
            case_instance_id.clone(),
            &definition,
            business_key,
            super_execution_id,
        );
        for (name, value) in &variables {
            tree.set_variable(name, value.clone());
        }

        let outcome = CommandExecutor::new(&mut tree, &definition, &self.table, self.evaluator())
            .with_seed(variables)
            .start_case_instance()?;
        self.check_case_tasks(&outcome.effects).await?;

        info!(
            case_instance_id = %case_instance_id,
            case_definition_id = %definition.id,
            executions = tree.len(),
            state = %tree.state(),
            "Created case instance"
        );

        let revision = self.store.save_tree(tree, 0).await?;
        journal.tree_saved(&case_instance_id, None, revision);
        Ok((case_instance_id, outcome.effects))
    }

    async fn create_case_instance(
        &self,
        definition: DefinitionRef,
        business_key: Option<String>,
        variables: Variables,
    ) -> EngineResult<CaseInstance> {
        let definition = match definition {
            DefinitionRef::Id(id) => self.definitions.find_by_id(&id).await?,
            DefinitionRef::Key(key) => self.definitions.find_latest_by_key(&key).await?,
        };

        let mut journal = Journal::default();
        let result: EngineResult<String> = async {
            let (case_instance_id, effects) = self
                .instantiate(definition, business_key, variables, None, &mut journal)
                .await?;
            self.process_effects(effects, &mut journal).await?;
            Ok(case_instance_id)
        }
        .await;
        let case_instance_id = self.settle(result, journal).await?;

        let tree = self.store.load_tree(&case_instance_id).await?.ok_or_else(|| {
            EngineError::Internal(format!(
                "case instance '{}' vanished after creation",
                case_instance_id
            ))
        })?;
        Ok(CaseInstance::from_tree(&tree))
    }

    /// Drain side effects breadth-first. Effects raised while handling one
    /// are queued one hop deeper.
    async fn process_effects(&self, effects: Vec<SideEffect>, journal: &mut Journal) -> EngineResult<()> {
        let mut queue: VecDeque<(SideEffect, usize)> =
            effects.into_iter().map(|effect| (effect, 0)).collect();

        while let Some((effect, depth)) = queue.pop_front() {
            if depth > self.config.max_cascade_depth {
                return Err(EngineError::Internal(format!(
                    "embedded instance chain exceeded the maximum depth of {}",
                    self.config.max_cascade_depth
                )));
            }
            let follow_up = self.handle_effect(effect, journal).await?;
            queue.extend(follow_up.into_iter().map(|effect| (effect, depth + 1)));
        }
        Ok(())
    }

    async fn handle_effect(
        &self,
        effect: SideEffect,
        journal: &mut Journal,
    ) -> EngineResult<Vec<SideEffect>> {
        match effect {
            SideEffect::StartProcessInstance {
                case_instance_id,
                execution_id,
                definition_key,
                variables,
                blocking,
            } => {
                let process_instance_id = self
                    .coordinator
                    .start_process(&case_instance_id, &execution_id, &definition_key, variables)
                    .await?;
                journal.process_started(&process_instance_id);
                if blocking {
                    self.coordinator
                        .link(
                            &process_instance_id,
                            EmbeddedKind::Process,
                            &execution_id,
                            &case_instance_id,
                        )
                        .await?;
                    journal.link_saved(&process_instance_id);
                }
                Ok(Vec::new())
            }
            SideEffect::StartCaseInstance {
                case_instance_id,
                execution_id,
                definition_key,
                variables,
                blocking,
            } => {
                let definition = self.definitions.find_latest_by_key(&definition_key).await?;
                let super_execution_id = blocking.then(|| execution_id.clone());
                let (sub_case_instance_id, effects) = self
                    .instantiate(definition, None, variables, super_execution_id, journal)
                    .await?;
                if blocking {
                    self.coordinator
                        .link(
                            &sub_case_instance_id,
                            EmbeddedKind::Case,
                            &execution_id,
                            &case_instance_id,
                        )
                        .await?;
                    journal.link_saved(&sub_case_instance_id);
                }
                info!(
                    case_instance_id = %case_instance_id,
                    execution_id = %execution_id,
                    sub_case_instance_id = %sub_case_instance_id,
                    blocking = blocking,
                    "Started embedded case instance"
                );
                Ok(effects)
            }
            SideEffect::TerminateEmbedded { execution_id } => {
                let Some(link) = self.coordinator.terminate_for(&execution_id).await? else {
                    return Ok(Vec::new());
                };
                journal.link_removed(link.clone());
                if link.kind != EmbeddedKind::Case {
                    return Ok(Vec::new());
                }
                let sub = self
                    .store
                    .load_tree(&link.embedded_instance_id)
                    .await?
                    .log_none(format!(
                        "embedded case instance '{}' of case execution '{}'",
                        link.embedded_instance_id, execution_id
                    ));
                match sub {
                    Some(sub) if sub.state() == ExecutionState::Active => {
                        let batch = CommandBatch::new(sub.case_instance_id.clone())
                            .with_verb(LifecycleVerb::Terminate);
                        let outcome = self
                            .apply(sub, journal, |executor| executor.commit(&batch))
                            .await?;
                        info!(
                            execution_id = %execution_id,
                            sub_case_instance_id = %link.embedded_instance_id,
                            "Terminated embedded case instance"
                        );
                        Ok(outcome.effects)
                    }
                    _ => Ok(Vec::new()),
                }
            }
            SideEffect::CaseInstanceCompleted { case_instance_id } => {
                match self.coordinator.resolve(&case_instance_id).await? {
                    Some(link) => self.complete_parent(&link, journal).await,
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    /// Complete the task execution waiting on a finished embedded instance.
    async fn complete_parent(
        &self,
        link: &EmbeddedLink,
        journal: &mut Journal,
    ) -> EngineResult<Vec<SideEffect>> {
        let tree = self
            .store
            .load_tree(&link.parent_case_instance_id)
            .await?
            .filter(|tree| tree.contains(&link.parent_execution_id))
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Cannot find case execution with id '{}'",
                    link.parent_execution_id
                ))
            })?;

        let outcome = self
            .apply(tree, journal, |executor| {
                executor.complete_embedded(&link.parent_execution_id)
            })
            .await?;
        self.coordinator.release(&link.embedded_instance_id).await?;
        journal.link_removed(link.clone());

        info!(
            case_instance_id = %link.parent_case_instance_id,
            execution_id = %link.parent_execution_id,
            embedded_instance_id = %link.embedded_instance_id,
            kind = %link.kind,
            "Embedded instance completed"
        );
        Ok(outcome.effects)
    }
}

enum DefinitionRef {
    Id(String),
    Key(String),
}

/// Builder for a new case instance.
pub struct CaseInstanceBuilder {
    service: CaseService,
    definition: DefinitionRef,
    business_key: Option<String>,
    variables: Variables,
}

impl CaseInstanceBuilder {
    fn new(service: CaseService, definition: DefinitionRef) -> Self {
        Self {
            service,
            definition,
            business_key: None,
            variables: Variables::new(),
        }
    }

    pub fn business_key(mut self, business_key: impl Into<String>) -> Self {
        self.business_key = Some(business_key.into());
        self
    }

    pub fn set_variable(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn set_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Create the case instance and its automatically activated subtree.
    pub async fn create(self) -> EngineResult<CaseInstance> {
        let context = match &self.definition {
            DefinitionRef::Id(id) => format!("creating case instance of definition '{}'", id),
            DefinitionRef::Key(key) => format!("creating case instance of key '{}'", key),
        };
        self.service
            .create_case_instance(self.definition, self.business_key, self.variables)
            .await
            .log_rejection(context)
    }
}

/// Builder for a command against one case execution.
///
/// Variable operations accumulate; a terminal method commits them together
/// with at most one lifecycle verb.
pub struct CaseExecutionCommandBuilder {
    service: CaseService,
    batch: CommandBatch,
}

impl CaseExecutionCommandBuilder {
    pub fn set_variable(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.batch.push(VariableOp::Set {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_variables(mut self, variables: Variables) -> Self {
        for (name, value) in variables {
            self.batch.push(VariableOp::Set { name, value });
        }
        self
    }

    pub fn set_variable_local(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.batch.push(VariableOp::SetLocal {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_variables_local(mut self, variables: Variables) -> Self {
        for (name, value) in variables {
            self.batch.push(VariableOp::SetLocal { name, value });
        }
        self
    }

    pub fn remove_variable(mut self, name: impl Into<String>) -> Self {
        self.batch.push(VariableOp::Remove { name: name.into() });
        self
    }

    pub fn remove_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.batch.push(VariableOp::Remove { name: name.into() });
        }
        self
    }

    pub fn remove_variable_local(mut self, name: impl Into<String>) -> Self {
        self.batch.push(VariableOp::RemoveLocal { name: name.into() });
        self
    }

    pub fn remove_variables_local<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.batch.push(VariableOp::RemoveLocal { name: name.into() });
        }
        self
    }

    /// Apply only the variable operations.
    pub async fn execute(self) -> EngineResult<()> {
        self.commit(None).await
    }

    pub async fn manual_start(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::ManualStart)).await
    }

    pub async fn disable(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::Disable)).await
    }

    pub async fn reenable(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::Reenable)).await
    }

    pub async fn complete(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::Complete)).await
    }

    pub async fn terminate(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::Terminate)).await
    }

    /// Remove a completed or terminated case instance for good.
    pub async fn close(self) -> EngineResult<()> {
        self.commit(Some(LifecycleVerb::Close)).await
    }

    async fn commit(self, verb: Option<LifecycleVerb>) -> EngineResult<()> {
        let Self { service, mut batch } = self;
        batch.verb = verb;
        let context = match verb {
            Some(verb) => format!("{} case execution '{}'", verb, batch.execution_id),
            None => format!("executing command on case execution '{}'", batch.execution_id),
        };
        service.execute_batch(batch).await.log_rejection(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coordinator::{InMemoryProcessRuntime, ProcessInstanceState};
    use serde_json::json;

    const ONE_TASK_CASE: &str = r#"
key: oneTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_HumanTask_1
      type: human_task
      name: A HumanTask
      manual_activation_required: true
"#;

    const ONE_STAGE_CASE: &str = r#"
key: oneStageCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_Stage_1
      type: stage
      children:
        - id: PI_HumanTask_1
          type: human_task
        - id: PI_HumanTask_2
          type: human_task
"#;

    const MANUAL_TASK_STAGE_CASE: &str = r#"
key: manualTaskStageCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_Stage_1
      type: stage
      children:
        - id: PI_HumanTask_1
          type: human_task
          manual_activation_required: true
"#;

    const TWO_MANUAL_TASKS_CASE: &str = r#"
key: twoManualTasksCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_HumanTask_1
      type: human_task
      manual_activation_required: true
    - id: PI_HumanTask_2
      type: human_task
      manual_activation_required: true
"#;

    const EMPTY_CASE: &str = r#"
key: emptyCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
"#;

    const MILESTONE_CASE: &str = r#"
key: oneMilestoneCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_Milestone_1
      type: milestone
    - id: PI_HumanTask_1
      type: human_task
"#;

    const CASE_TASK_CASE: &str = r#"
key: oneCaseTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_CaseTask_1
      type: case_task
      manual_activation_required: true
      definition_key: oneTaskCase
"#;

    const PROCESS_TASK_CASE: &str = r#"
key: oneProcessTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_ProcessTask_1
      type: process_task
      manual_activation_required: true
      definition_key: oneTaskProcess
"#;

    async fn service_with(definitions: &[&str]) -> (CaseService, Arc<InMemoryProcessRuntime>) {
        let runtime = Arc::new(InMemoryProcessRuntime::new());
        let service = CaseService::in_memory(EngineConfig::default(), runtime.clone());
        for yaml in definitions {
            service.deploy_yaml(yaml).await.unwrap();
        }
        (service, runtime)
    }

    async fn execution_id(service: &CaseService, case_instance_id: &str, activity_id: &str) -> String {
        service
            .find_executions_by_activity(case_instance_id, activity_id)
            .await
            .unwrap()
            .pop()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_manual_start_with_variables_writes_to_root() {
        let (service, _) = service_with(&[ONE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();
        assert!(case.is_active());

        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;
        let execution = service
            .create_case_execution_query()
            .case_execution_id(task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();
        assert!(execution.is_enabled());

        service
            .with_case_execution(task.clone())
            .set_variable("aVariableName", "abc")
            .set_variable("anotherVariableName", 999)
            .manual_start()
            .await
            .unwrap();

        let execution = service
            .create_case_execution_query()
            .case_execution_id(task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();
        assert!(execution.is_active());

        let variables = service
            .create_variable_instance_query()
            .case_instance_id(case.id.clone())
            .list()
            .await
            .unwrap();
        assert_eq!(variables.len(), 2);
        assert!(variables.iter().all(|v| v.case_execution_id == case.id));
        assert_eq!(service.find_tasks(&case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_and_remove_same_variable_is_not_valid() {
        let (service, _) = service_with(&[ONE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();

        let err = service
            .with_case_execution(case.id.clone())
            .set_variable("x", 1)
            .remove_variable("x")
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));

        let err = service
            .with_case_execution(case.id.clone())
            .remove_variable_local("x")
            .set_variable_local("x", 1)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));

        assert!(service.get_variables(&case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_unknown_ids() {
        let (service, _) = service_with(&[ONE_TASK_CASE]).await;

        let err = service.with_case_execution("").complete().await.unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));

        let err = service.with_case_execution("unknown").complete().await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = service
            .with_case_definition_by_key("unknown")
            .create()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = service.with_case_definition("").create().await.unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));
    }

    #[tokio::test]
    async fn test_completing_both_tasks_completes_stage_and_case() {
        let (service, _) = service_with(&[ONE_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();

        let first = execution_id(&service, &case.id, "PI_HumanTask_1").await;
        let second = execution_id(&service, &case.id, "PI_HumanTask_2").await;

        service.with_case_execution(first).complete().await.unwrap();
        assert_eq!(
            service.find_executions_by_activity(&case.id, "PI_Stage_1").await.unwrap().len(),
            1
        );

        service.with_case_execution(second).complete().await.unwrap();
        assert!(service
            .find_executions_by_activity(&case.id, "PI_Stage_1")
            .await
            .unwrap()
            .is_empty());

        let case = service.find_case_instance(&case.id).await.unwrap().unwrap();
        assert!(case.is_completed());
    }

    #[tokio::test]
    async fn test_disabling_only_child_completes_case() {
        let (service, _) = service_with(&[MANUAL_TASK_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("manualTaskStageCase")
            .create()
            .await
            .unwrap();
        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;

        service.disable_case_execution(&task).await.unwrap();

        assert!(service
            .find_executions_by_activity(&case.id, "PI_Stage_1")
            .await
            .unwrap()
            .is_empty());
        assert!(service
            .create_case_instance_query()
            .case_instance_id(case.id.clone())
            .completed()
            .single_result()
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_disable_reenable_and_repeat_rejections() {
        let (service, _) = service_with(&[TWO_MANUAL_TASKS_CASE]).await;
        let case = service
            .with_case_definition_by_key("twoManualTasksCase")
            .create()
            .await
            .unwrap();
        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;

        service.with_case_execution(task.clone()).disable().await.unwrap();
        let err = service.with_case_execution(task.clone()).disable().await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));

        service.reenable_case_execution(&task).await.unwrap();
        service
            .manual_start_case_execution(&task, Variables::new())
            .await
            .unwrap();
        let err = service.with_case_execution(task.clone()).manual_start().await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));

        let err = service.with_case_execution(task.clone()).disable().await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn test_terminate_stage_removes_subtree() {
        let (service, _) = service_with(&[ONE_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();
        let stage = execution_id(&service, &case.id, "PI_Stage_1").await;

        service.terminate_case_execution(&stage).await.unwrap();

        let remaining = service
            .create_case_execution_query()
            .case_instance_id(case.id.clone())
            .list()
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, case.id);
        assert!(service.find_tasks(&case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_requires_active() {
        let (service, _) = service_with(&[ONE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();
        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;

        let err = service.terminate_case_execution(&task).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("The case execution must be in state 'active' to terminate"));
    }

    #[tokio::test]
    async fn test_empty_case_completes_and_closes() {
        let (service, _) = service_with(&[EMPTY_CASE]).await;
        let case = service
            .with_case_definition_by_key("emptyCase")
            .business_key("aBusinessKey")
            .create()
            .await
            .unwrap();
        assert!(case.is_completed());
        assert_eq!(case.business_key.as_deref(), Some("aBusinessKey"));

        service.close_case_instance(&case.id).await.unwrap();
        assert!(service.find_case_instance(&case.id).await.unwrap().is_none());

        let err = service.close_case_instance(&case.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_close_active_or_non_root_is_not_allowed() {
        let (service, _) = service_with(&[ONE_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();
        let stage = execution_id(&service, &case.id, "PI_Stage_1").await;

        let err = service.close_case_instance(&case.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));
        let err = service.close_case_instance(&stage).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn test_complete_case_instance_with_open_task_is_not_allowed() {
        let (service, _) = service_with(&[ONE_STAGE_CASE, ONE_TASK_CASE]).await;
        let stage_case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();
        let err = service
            .complete_case_execution(&stage_case.id, Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));

        // an enabled, non-required task does not block manual completion
        let task_case = service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();
        service
            .complete_case_execution(&task_case.id, Variables::new())
            .await
            .unwrap();
        let task_case = service.find_case_instance(&task_case.id).await.unwrap().unwrap();
        assert!(task_case.is_completed());
        assert!(service.find_tasks(&task_case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_milestone_rejects_commands_and_occurs_on_signal() {
        let (service, _) = service_with(&[MILESTONE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneMilestoneCase")
            .create()
            .await
            .unwrap();
        let milestone = execution_id(&service, &case.id, "PI_Milestone_1").await;

        for result in [
            service.with_case_execution(milestone.clone()).manual_start().await,
            service.with_case_execution(milestone.clone()).disable().await,
            service.with_case_execution(milestone.clone()).reenable().await,
            service.with_case_execution(milestone.clone()).complete().await,
        ] {
            assert!(matches!(result, Err(EngineError::NotAllowed(_))));
        }

        service.signal_milestone(&milestone).await.unwrap();
        assert!(service
            .find_executions_by_activity(&case.id, "PI_Milestone_1")
            .await
            .unwrap()
            .is_empty());
        assert!(service.find_case_instance(&case.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_complete_task_completes_execution() {
        let (service, _) = service_with(&[MILESTONE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneMilestoneCase")
            .create()
            .await
            .unwrap();

        let tasks = service.find_tasks(&case.id).await.unwrap();
        assert_eq!(tasks.len(), 1);

        let mut variables = Variables::new();
        variables.insert("approved".to_string(), json!(true));
        service.complete_task(&tasks[0].id, variables).await.unwrap();

        assert!(service.find_tasks(&case.id).await.unwrap().is_empty());
        assert_eq!(
            service.get_variable(&case.id, "approved").await.unwrap(),
            Some(json!(true))
        );

        let err = service.complete_task(&tasks[0].id, Variables::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_variables_vanish_with_execution() {
        let (service, _) = service_with(&[ONE_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();
        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;

        service
            .with_case_execution(task.clone())
            .set_variable_local("aVariableName", "abc")
            .set_variable_local("anotherVariableName", 999)
            .complete()
            .await
            .unwrap();

        assert_eq!(
            service
                .create_variable_instance_query()
                .case_instance_id(case.id.clone())
                .count()
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_variable_api_scopes() {
        let (service, _) = service_with(&[ONE_STAGE_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneStageCase")
            .create()
            .await
            .unwrap();
        let task = execution_id(&service, &case.id, "PI_HumanTask_1").await;

        service.set_variable(&task, "global", "g").await.unwrap();
        service.set_variable_local(&task, "local", 1).await.unwrap();

        assert_eq!(service.get_variable(&task, "global").await.unwrap(), Some(json!("g")));
        assert_eq!(service.get_variable_local(&task, "global").await.unwrap(), None);
        assert_eq!(service.get_variables_local(&case.id).await.unwrap().len(), 1);
        assert_eq!(service.get_variables(&task).await.unwrap().len(), 2);
        assert_eq!(
            service
                .get_variables_by_names(&task, &["local"])
                .await
                .unwrap()
                .len(),
            1
        );

        service.remove_variable(&task, "global").await.unwrap();
        service.remove_variables_local(&task, &["local"]).await.unwrap();
        assert!(service.get_variables(&task).await.unwrap().is_empty());

        let err = service.get_variables("").await.unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));
        let err = service.get_variables("unknown").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_case_task_spawns_and_completes_sub_case() {
        let (service, _) = service_with(&[ONE_TASK_CASE, CASE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneCaseTaskCase")
            .create()
            .await
            .unwrap();
        let case_task = execution_id(&service, &case.id, "PI_CaseTask_1").await;

        service
            .with_case_execution(case_task.clone())
            .set_variable("aVariableName", "abc")
            .set_variable("anotherVariableName", 999)
            .manual_start()
            .await
            .unwrap();

        let sub_case = service
            .create_case_instance_query()
            .super_case_execution_id(case_task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();
        let sub_variables = service
            .create_variable_instance_query()
            .case_instance_id(sub_case.id.clone())
            .list()
            .await
            .unwrap();
        assert_eq!(sub_variables.len(), 2);
        assert_eq!(
            service.get_variable(&sub_case.id, "aVariableName").await.unwrap(),
            Some(json!("abc"))
        );
        assert_eq!(
            service.get_variable(&sub_case.id, "anotherVariableName").await.unwrap(),
            Some(json!(999))
        );

        // still running: the case task cannot be completed by command
        let err = service.with_case_execution(case_task.clone()).complete().await.unwrap_err();
        assert!(matches!(err, EngineError::NotAllowed(_)));

        let sub_task = execution_id(&service, &sub_case.id, "PI_HumanTask_1").await;
        service.manual_start_case_execution(&sub_task, Variables::new()).await.unwrap();
        service.complete_case_execution(&sub_task, Variables::new()).await.unwrap();

        assert!(service
            .find_case_instance(&sub_case.id)
            .await
            .unwrap()
            .unwrap()
            .is_completed());
        assert!(service
            .find_executions_by_activity(&case.id, "PI_CaseTask_1")
            .await
            .unwrap()
            .is_empty());
        assert!(service.find_case_instance(&case.id).await.unwrap().unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_process_task_lifecycle() {
        let (service, runtime) = service_with(&[PROCESS_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneProcessTaskCase")
            .create()
            .await
            .unwrap();
        let process_task = execution_id(&service, &case.id, "PI_ProcessTask_1").await;

        service
            .with_case_execution(process_task.clone())
            .set_variable_local("aVariableName", "abc")
            .manual_start()
            .await
            .unwrap();

        let process = runtime
            .find_by_super_case_execution(&process_task)
            .await
            .unwrap();
        assert_eq!(process.variables["aVariableName"], json!("abc"));

        runtime.complete(&process.id).await.unwrap();
        service.on_embedded_instance_completed(&process.id).await.unwrap();

        assert!(service
            .find_executions_by_activity(&case.id, "PI_ProcessTask_1")
            .await
            .unwrap()
            .is_empty());
        assert!(service.find_case_instance(&case.id).await.unwrap().unwrap().is_completed());

        let err = service.on_embedded_instance_completed(&process.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminating_process_task_terminates_process() {
        let (service, runtime) = service_with(&[PROCESS_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneProcessTaskCase")
            .create()
            .await
            .unwrap();
        let process_task = execution_id(&service, &case.id, "PI_ProcessTask_1").await;
        service.with_case_execution(process_task.clone()).manual_start().await.unwrap();

        service.terminate_case_execution(&process_task).await.unwrap();

        let process = runtime.find_by_super_case_execution(&process_task).await.unwrap();
        assert_eq!(process.state, ProcessInstanceState::Terminated);
    }

    #[tokio::test]
    async fn test_terminating_case_task_terminates_sub_case() {
        let (service, _) = service_with(&[ONE_TASK_CASE, CASE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("oneCaseTaskCase")
            .create()
            .await
            .unwrap();
        let case_task = execution_id(&service, &case.id, "PI_CaseTask_1").await;
        service.with_case_execution(case_task.clone()).manual_start().await.unwrap();

        let sub_case = service
            .create_case_instance_query()
            .super_case_execution_id(case_task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();

        service.terminate_case_execution(&case.id).await.unwrap();

        assert!(service
            .find_case_instance(&sub_case.id)
            .await
            .unwrap()
            .unwrap()
            .is_terminated());
        assert!(service.find_case_instance(&case.id).await.unwrap().unwrap().is_terminated());
    }

    #[tokio::test]
    async fn test_business_key_uniqueness() {
        let runtime = Arc::new(InMemoryProcessRuntime::new());
        let config = EngineConfig {
            enforce_business_key_uniqueness: true,
            ..EngineConfig::default()
        };
        let service = CaseService::in_memory(config, runtime);
        service.deploy_yaml(ONE_TASK_CASE).await.unwrap();

        service
            .with_case_definition_by_key("oneTaskCase")
            .business_key("order-1")
            .create()
            .await
            .unwrap();
        let err = service
            .with_case_definition_by_key("oneTaskCase")
            .business_key("order-1")
            .create()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotValid(_)));
    }

    #[tokio::test]
    async fn test_creation_by_id_uses_that_version() {
        let (service, _) = service_with(&[EMPTY_CASE]).await;
        let v1 = service.definitions().find_latest_by_key("emptyCase").await.unwrap();
        let v2 = service.deploy_yaml(EMPTY_CASE).await.unwrap();

        let by_id = service.with_case_definition(v1.id.clone()).create().await.unwrap();
        let by_key = service.with_case_definition_by_key("emptyCase").create().await.unwrap();
        assert_eq!(by_id.case_definition_id, v1.id);
        assert_eq!(by_key.case_definition_id, v2.id);
    }

    #[tokio::test]
    async fn test_find_case_instance_by_keys() {
        let (service, _) = service_with(&[ONE_TASK_CASE]).await;
        let first = service
            .with_case_definition_by_key("oneTaskCase")
            .business_key("order-1")
            .create()
            .await
            .unwrap();
        service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();

        let found = service
            .find_case_instance_by_business_key("order-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        assert!(service
            .find_case_instance_by_business_key("order-2")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            service
                .find_case_instances_by_definition_key("oneTaskCase")
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_deploy_from_config_directory() {
        let dir = std::env::temp_dir().join(format!("case-engine-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("one_task.yaml"), ONE_TASK_CASE).unwrap();
        std::fs::write(dir.join("empty.yml"), EMPTY_CASE).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a definition").unwrap();

        let config = EngineConfig {
            definitions_dir: Some(dir.clone()),
            ..EngineConfig::default()
        };
        let service = CaseService::in_memory(config, Arc::new(InMemoryProcessRuntime::new()));
        let deployed = service.deploy_from_config().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(deployed.len(), 2);
        assert!(service.definitions().find_latest_by_key("oneTaskCase").await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_revision_is_a_conflict() {
        let runtime = Arc::new(InMemoryProcessRuntime::new());
        let store = Arc::new(InMemoryStore::new());
        let service = CaseService::new(EngineConfig::default(), store.clone(), runtime);
        service.deploy_yaml(ONE_TASK_CASE).await.unwrap();
        let case = service
            .with_case_definition_by_key("oneTaskCase")
            .create()
            .await
            .unwrap();

        let stale = store.load_tree(&case.id).await.unwrap().unwrap();
        service.set_variable(&case.id, "x", 1).await.unwrap();

        let err = store.save_tree(stale.clone(), stale.revision).await.unwrap_err();
        assert!(err.is_transient());
    }

    const UNDEPLOYED_CASE_TASK_CASE: &str = r#"
key: undeployedCaseTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_CaseTask_1
      type: case_task
      manual_activation_required: true
      definition_key: notDeployed
"#;

    const AUTO_UNDEPLOYED_CASE_TASK_CASE: &str = r#"
key: autoUndeployedCaseTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_CaseTask_1
      type: case_task
      definition_key: notDeployed
"#;

    const BROKEN_PROCESS_TASK_CASE: &str = r#"
key: brokenProcessTaskCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_ProcessTask_1
      type: process_task
      manual_activation_required: true
      definition_key: brokenProcess
"#;

    const MIXED_EMBEDDED_CASE: &str = r#"
key: mixedEmbeddedCase
case_plan_model:
  id: CasePlanModel_1
  type: case_plan_model
  children:
    - id: PI_CaseTask_1
      type: case_task
      definition_key: oneTaskCase
    - id: PI_ProcessTask_1
      type: process_task
      definition_key: oneTaskProcess
    - id: PI_ProcessTask_2
      type: process_task
      definition_key: brokenProcess
"#;

    /// Process runtime that cannot start `brokenProcess`.
    #[derive(Default)]
    struct FlakyRuntime {
        inner: InMemoryProcessRuntime,
        started: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ProcessRuntime for FlakyRuntime {
        async fn start_process_instance(
            &self,
            definition_key: &str,
            variables: Variables,
            parent_execution_id: &str,
        ) -> EngineResult<String> {
            if definition_key == "brokenProcess" {
                return Err(EngineError::ExternalService(
                    "process engine unavailable".to_string(),
                ));
            }
            let id = self
                .inner
                .start_process_instance(definition_key, variables, parent_execution_id)
                .await?;
            self.started.lock().await.push(id.clone());
            Ok(id)
        }

        async fn terminate_process_instance(&self, process_instance_id: &str) -> EngineResult<()> {
            self.inner.terminate_process_instance(process_instance_id).await
        }
    }

    async fn flaky_service(definitions: &[&str]) -> (CaseService, Arc<FlakyRuntime>) {
        let runtime = Arc::new(FlakyRuntime::default());
        let service = CaseService::in_memory(EngineConfig::default(), runtime.clone());
        for yaml in definitions {
            service.deploy_yaml(yaml).await.unwrap();
        }
        (service, runtime)
    }

    #[tokio::test]
    async fn test_case_task_with_undeployed_definition_changes_nothing() {
        let (service, _) = service_with(&[UNDEPLOYED_CASE_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("undeployedCaseTaskCase")
            .create()
            .await
            .unwrap();
        let case_task = execution_id(&service, &case.id, "PI_CaseTask_1").await;

        let err = service
            .with_case_execution(case_task.clone())
            .set_variable("a", 1)
            .manual_start()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let execution = service
            .create_case_execution_query()
            .case_execution_id(case_task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();
        assert!(execution.is_enabled());
        assert!(service.get_variables(&case.id).await.unwrap().is_empty());
        assert_eq!(service.create_case_instance_query().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_with_undeployed_case_task_leaves_no_instance() {
        let (service, _) = service_with(&[AUTO_UNDEPLOYED_CASE_TASK_CASE]).await;

        let err = service
            .with_case_definition_by_key("autoUndeployedCaseTaskCase")
            .create()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(service.create_case_instance_query().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_process_start_restores_tree() {
        let (service, _) = flaky_service(&[BROKEN_PROCESS_TASK_CASE]).await;
        let case = service
            .with_case_definition_by_key("brokenProcessTaskCase")
            .create()
            .await
            .unwrap();
        let process_task = execution_id(&service, &case.id, "PI_ProcessTask_1").await;

        let err = service
            .with_case_execution(process_task.clone())
            .set_variable("a", 1)
            .manual_start()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalService(_)));

        let execution = service
            .create_case_execution_query()
            .case_execution_id(process_task.clone())
            .single_result()
            .await
            .unwrap()
            .unwrap();
        assert!(execution.is_enabled());
        assert!(service.get_variable(&case.id, "a").await.unwrap().is_none());

        // the restored tree still accepts commands
        service.disable_case_execution(&process_task).await.unwrap();
        assert!(service.find_case_instance(&case.id).await.unwrap().unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_failed_creation_undoes_embedded_instances() {
        let (service, runtime) = flaky_service(&[ONE_TASK_CASE, MIXED_EMBEDDED_CASE]).await;

        let err = service
            .with_case_definition_by_key("mixedEmbeddedCase")
            .create()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalService(_)));

        // neither the case nor its sub-case survive
        assert_eq!(service.create_case_instance_query().count().await.unwrap(), 0);

        let started = runtime.started.lock().await.clone();
        assert_eq!(started.len(), 1);
        let process = runtime.inner.get(&started[0]).await.unwrap();
        assert_eq!(process.state, ProcessInstanceState::Terminated);
        assert!(service
            .on_embedded_instance_completed(&started[0])
            .await
            .is_err());
    }
}
